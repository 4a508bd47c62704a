//! Hard edge handling.
//!
//! EMD has no per-edge flag, so a hard edge is expressed the way the game's own
//! meshes do it: the faces on either side stop sharing vertices and each side
//! carries its own normal. Encoding splits vertices along marked edges and decoding
//! recovers the marks from that pattern.

use std::collections::{HashMap, HashSet};

use cgmath::{InnerSpace, Vector3};

use super::{Submesh, TriangleGroup};
use crate::mesh::Topology;

type PosKey = [u32; 3];
type EdgeKey = (PosKey, PosKey);

const NORMAL_EPSILON: f32 = 1e-3;

fn pos_key(p: &[f32; 3]) -> PosKey {
    bytemuck::cast(*p)
}

fn edge_key(a: PosKey, b: PosKey) -> EdgeKey {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn face_normal(sub: &Submesh, f: &[u32; 3]) -> Vector3<f32> {
    let p = |i: u32| Vector3::from(sub.vertices[i as usize].position);
    (p(f[1]) - p(f[0])).cross(p(f[2]) - p(f[0]))
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Duplicate vertices around the submesh's sharp edges so no vertex is shared across
/// one. Each separated fan gets the normalised average of its face normals. Groups
/// come back as lists and `sharp_edges` is rebuilt against the new indices.
pub fn split_sharp_edges(sub: &mut Submesh) {
    if sub.sharp_edges.is_empty() {
        return;
    }
    let count = sub.vertices.len() as u32;
    let sharp: HashSet<EdgeKey> = sub
        .sharp_edges
        .iter()
        .filter(|[a, b]| *a < count && *b < count)
        .map(|&[a, b]| {
            edge_key(
                pos_key(&sub.vertices[a as usize].position),
                pos_key(&sub.vertices[b as usize].position),
            )
        })
        .collect();

    let mut faces: Vec<Vec<[u32; 3]>> = sub
        .triangle_groups
        .iter()
        .map(|g| {
            g.faces()
                .into_iter()
                .filter(|f| f.iter().all(|&i| i < count))
                .collect()
        })
        .collect();

    // (group, face, corner) for every use of a vertex
    let mut incident: Vec<Vec<(usize, usize, usize)>> = vec![Vec::new(); count as usize];
    for (g, group) in faces.iter().enumerate() {
        for (fi, f) in group.iter().enumerate() {
            for (corner, &vi) in f.iter().enumerate() {
                incident[vi as usize].push((g, fi, corner));
            }
        }
    }

    let key_of = |sub: &Submesh, i: u32| pos_key(&sub.vertices[i as usize].position);

    for vi in 0..count {
        let uses = &incident[vi as usize];
        if uses.len() < 2 {
            continue;
        }
        let here = key_of(sub, vi);
        let others = |&(g, fi, corner): &(usize, usize, usize)| -> [PosKey; 2] {
            let f = faces[g][fi];
            [
                key_of(sub, f[(corner + 1) % 3]),
                key_of(sub, f[(corner + 2) % 3]),
            ]
        };
        let neighbours: Vec<[PosKey; 2]> = uses.iter().map(others).collect();
        let touches_sharp = neighbours
            .iter()
            .flatten()
            .any(|&o| sharp.contains(&edge_key(here, o)));
        if !touches_sharp {
            continue;
        }

        let mut parent: Vec<usize> = (0..uses.len()).collect();
        for i in 0..uses.len() {
            for j in (i + 1)..uses.len() {
                let joined = neighbours[i].iter().any(|o| {
                    neighbours[j].contains(o) && !sharp.contains(&edge_key(here, *o))
                });
                if joined {
                    let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                    parent[rj] = ri;
                }
            }
        }

        let mut fans: Vec<(usize, Vec<usize>)> = Vec::new();
        for i in 0..uses.len() {
            let root = find(&mut parent, i);
            match fans.iter_mut().find(|(r, _)| *r == root) {
                Some((_, members)) => members.push(i),
                None => fans.push((root, vec![i])),
            }
        }
        if fans.len() < 2 {
            continue;
        }

        for (n, (_, members)) in fans.iter().enumerate() {
            let sum = members.iter().fold(Vector3::new(0.0, 0.0, 0.0), |acc, &m| {
                let (g, fi, _) = uses[m];
                acc + face_normal(sub, &faces[g][fi])
            });
            let normal = if sum.magnitude2() > 0.0 {
                sum.normalize().into()
            } else {
                sub.vertices[vi as usize].normal
            };
            let target = if n == 0 {
                sub.vertices[vi as usize].normal = normal;
                vi
            } else {
                let mut copy = sub.vertices[vi as usize].clone();
                copy.normal = normal;
                sub.vertices.push(copy);
                (sub.vertices.len() - 1) as u32
            };
            for &m in members {
                let (g, fi, corner) = uses[m];
                faces[g][fi][corner] = target;
            }
        }
    }

    for (group, group_faces) in sub.triangle_groups.iter_mut().zip(&faces) {
        *group = TriangleGroup {
            topology: Topology::List,
            indices: group_faces.iter().flatten().copied().collect(),
            bone_names: std::mem::take(&mut group.bone_names),
        };
    }

    let mut rebuilt: Vec<[u32; 2]> = Vec::new();
    for f in faces.iter().flatten() {
        for k in 0..3 {
            let (a, b) = (f[k], f[(k + 1) % 3]);
            if sharp.contains(&edge_key(key_of(sub, a), key_of(sub, b))) {
                rebuilt.push([a.min(b), a.max(b)]);
            }
        }
    }
    rebuilt.sort_unstable();
    rebuilt.dedup();
    sub.sharp_edges = rebuilt;
}

fn normals_differ(sub: &Submesh, a: u32, b: u32) -> bool {
    let na = sub.vertices[a as usize].normal;
    let nb = sub.vertices[b as usize].normal;
    na.iter().zip(nb).any(|(x, y)| (x - y).abs() > NORMAL_EPSILON)
}

/// True when the two vertices only differ in their normal. Such a pair exists only
/// to break shading; a UV or colour seam keeps its own attributes apart.
fn split_copies(sub: &Submesh, a: u32, b: u32) -> bool {
    let (va, vb) = (&sub.vertices[a as usize], &sub.vertices[b as usize]);
    va.uv == vb.uv
        && va.uv2 == vb.uv2
        && va.tangent == vb.tangent
        && va.color == vb.color
        && va.skin == vb.skin
}

fn is_hard_pair(sub: &Submesh, p: (u32, u32), q: (u32, u32)) -> bool {
    if normals_differ(sub, p.0, q.0) || normals_differ(sub, p.1, q.1) {
        return true;
    }
    // coplanar faces: both sides share a normal, the split itself marks the edge
    (p.0 != q.0 || p.1 != q.1) && split_copies(sub, p.0, q.0) && split_copies(sub, p.1, q.1)
}

/// Recover hard edges: an edge is sharp where faces meet at coincident positions
/// without sharing vertices, and either the normals differ or the unshared vertices
/// are plain copies of each other.
pub fn detect_sharp_edges(sub: &Submesh) -> Vec<[u32; 2]> {
    let count = sub.vertices.len() as u32;
    let mut edges: HashMap<EdgeKey, Vec<(u32, u32)>> = HashMap::new();
    for f in sub.faces() {
        if f.iter().any(|&i| i >= count) {
            continue;
        }
        for k in 0..3 {
            let (a, b) = (f[k], f[(k + 1) % 3]);
            let (ka, kb) = (
                pos_key(&sub.vertices[a as usize].position),
                pos_key(&sub.vertices[b as usize].position),
            );
            if ka == kb {
                continue;
            }
            let pair = if ka < kb { (a, b) } else { (b, a) };
            edges.entry(edge_key(ka, kb)).or_default().push(pair);
        }
    }

    let mut sharp: Vec<[u32; 2]> = Vec::new();
    for pairs in edges.values() {
        for i in 0..pairs.len() {
            for j in (i + 1)..pairs.len() {
                let (p, q) = (pairs[i], pairs[j]);
                if p == q {
                    continue;
                }
                if is_hard_pair(sub, p, q) {
                    sharp.push([p.0.min(p.1), p.0.max(p.1)]);
                    sharp.push([q.0.min(q.1), q.0.max(q.1)]);
                }
            }
        }
    }
    sharp.sort_unstable();
    sharp.dedup();
    sharp
}
