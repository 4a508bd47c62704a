use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    Aabb, Sampler, SkinSlot, Submesh, Topology, TriangleGroup, Vertex, VertexFlags,
    MAX_BONES_PER_TRIANGLE_GROUP, MAX_INFLUENCES,
};
use crate::error::{CodecError, Result, WarningKind, Warnings};
use crate::skeleton::Skeleton;

/// One triangle corner as a host application hands it over: attributes plus any
/// number of named bone influences.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InfluenceVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub uv2: [f32; 2],
    pub tangent: [f32; 3],
    pub color: [u8; 4],
    pub influences: Vec<(String, f32)>,
}

/// Keep the strongest influences and renormalise them to sum to one.
pub fn top_influences(influences: &[(String, f32)]) -> Vec<(String, f32)> {
    let mut kept: Vec<(String, f32)> = influences
        .iter()
        .filter(|(name, w)| !name.is_empty() && *w > 0.0)
        .cloned()
        .collect();
    kept.sort_by(|a, b| b.1.total_cmp(&a.1));
    kept.truncate(MAX_INFLUENCES);
    let total: f32 = kept.iter().map(|(_, w)| w).sum();
    if total > 1e-6 {
        kept.iter_mut().for_each(|(_, w)| *w /= total);
    }
    kept
}

#[derive(Default)]
struct GroupBuild {
    bone_names: Vec<String>,
    lookup: HashMap<String, u8>,
    indices: Vec<u32>,
}

impl GroupBuild {
    fn palette_index(&mut self, name: &str) -> u8 {
        if let Some(&i) = self.lookup.get(name) {
            return i;
        }
        let i = self.bone_names.len() as u8;
        self.bone_names.push(name.to_string());
        self.lookup.insert(name.to_string(), i);
        i
    }

    fn missing<'a>(&self, required: &'a [String]) -> Vec<&'a String> {
        required
            .iter()
            .filter(|n| !self.lookup.contains_key(n.as_str()))
            .collect()
    }
}

type DedupKey = (usize, [u32; 16], [u8; 8], [u32; 4]);

/// Packs triangles with named influences into palette-limited triangle groups.
pub struct SubmeshBuilder {
    name: String,
    flags: VertexFlags,
    samplers: Vec<Sampler>,
    vertices: Vec<Vertex>,
    groups: Vec<GroupBuild>,
    dedup: HashMap<DedupKey, u32>,
    sharp_positions: Vec<([f32; 3], [f32; 3])>,
}

impl SubmeshBuilder {
    pub fn new(name: impl Into<String>, flags: VertexFlags) -> Self {
        Self {
            name: name.into(),
            flags,
            samplers: Vec::new(),
            vertices: Vec::new(),
            groups: Vec::new(),
            dedup: HashMap::new(),
            sharp_positions: Vec::new(),
        }
    }

    pub fn with_samplers(mut self, samplers: Vec<Sampler>) -> Self {
        self.samplers = samplers;
        self
    }

    /// Mark the edge between two corner positions as hard.
    pub fn mark_sharp(&mut self, a: [f32; 3], b: [f32; 3]) {
        self.sharp_positions.push((a, b));
    }

    fn group_for(&mut self, required: &[String]) -> usize {
        for (gi, group) in self.groups.iter_mut().enumerate() {
            let missing = group.missing(required);
            if group.bone_names.len() + missing.len() <= MAX_BONES_PER_TRIANGLE_GROUP {
                for name in missing {
                    group.palette_index(name);
                }
                return gi;
            }
        }
        let mut group = GroupBuild::default();
        for name in required.iter().take(MAX_BONES_PER_TRIANGLE_GROUP) {
            group.palette_index(name);
        }
        self.groups.push(group);
        debug!(submesh = %self.name, groups = self.groups.len(), "opened triangle group");
        self.groups.len() - 1
    }

    pub fn add_triangle(&mut self, corners: &[InfluenceVertex; 3]) {
        let kept: Vec<Vec<(String, f32)>> =
            corners.iter().map(|c| top_influences(&c.influences)).collect();

        let mut required: Vec<String> = Vec::new();
        for (name, _) in kept.iter().flatten() {
            if !required.contains(name) {
                required.push(name.clone());
            }
        }
        let gi = self.group_for(&required);

        for (corner, influences) in corners.iter().zip(&kept) {
            let mut skin = [SkinSlot::default(); MAX_INFLUENCES];
            if influences.is_empty() {
                // the implied last weight carries the whole vertex
                skin[MAX_INFLUENCES - 1].weight = 1.0;
            } else {
                for (slot, (name, weight)) in skin.iter_mut().zip(influences) {
                    slot.palette_index = self.groups[gi].palette_index(name);
                    slot.weight = *weight;
                }
            }
            let vertex = Vertex {
                position: corner.position,
                normal: corner.normal,
                uv: corner.uv,
                uv2: corner.uv2,
                tangent: corner.tangent,
                color: corner.color,
                skin,
                weights_valid: true,
            };
            let index = self.intern(gi, vertex);
            self.groups[gi].indices.push(index);
        }
    }

    fn intern(&mut self, group: usize, v: Vertex) -> u32 {
        let mut attrs = [0u32; 16];
        let floats = v
            .position
            .iter()
            .chain(&v.normal)
            .chain(&v.uv)
            .chain(&v.uv2)
            .chain(&v.tangent)
            .map(|f| f.to_bits());
        for (dst, bits) in attrs.iter_mut().zip(floats) {
            *dst = bits;
        }
        let mut small = [0u8; 8];
        small[..4].copy_from_slice(&v.color);
        for (dst, slot) in small[4..].iter_mut().zip(&v.skin) {
            *dst = slot.palette_index;
        }
        let weights = v.skin.map(|s| s.weight.to_bits());
        let key = (group, attrs, small, weights);
        if let Some(&i) = self.dedup.get(&key) {
            return i;
        }
        let i = self.vertices.len() as u32;
        self.vertices.push(v);
        self.dedup.insert(key, i);
        i
    }

    pub fn build(self) -> Submesh {
        let mut sub = Submesh {
            name: self.name,
            vertex_flags: self.flags,
            aabb: Aabb::default(),
            vertices: self.vertices,
            triangle_groups: self
                .groups
                .into_iter()
                .map(|g| TriangleGroup {
                    topology: Topology::List,
                    indices: g.indices,
                    bone_names: g.bone_names,
                })
                .collect(),
            samplers: self.samplers,
            sharp_edges: Vec::new(),
            unknown_68: 0,
        };
        sub.recompute_aabb();
        let mut sharp = Vec::new();
        for (a, b) in &self.sharp_positions {
            for f in sub.faces() {
                for k in 0..3 {
                    let (i, j) = (f[k], f[(k + 1) % 3]);
                    let (pi, pj) = (
                        sub.vertices[i as usize].position,
                        sub.vertices[j as usize].position,
                    );
                    if (pi == *a && pj == *b) || (pi == *b && pj == *a) {
                        sharp.push([i.min(j), i.max(j)]);
                    }
                }
            }
        }
        sharp.sort_unstable();
        sharp.dedup();
        sub.sharp_edges = sharp;
        sub
    }
}

impl Submesh {
    /// Resolve every used skinning slot to a skeleton bone through the palette of the
    /// first triangle group that references the vertex.
    pub fn resolve_skinning(
        &mut self,
        skeleton: Option<&Skeleton>,
        warnings: &mut Warnings,
    ) -> Result<()> {
        let lookup = skeleton.map(|s| s.name_index());
        let mut seen = vec![false; self.vertices.len()];
        let mut unresolved: Vec<String> = Vec::new();

        for (gi, group) in self.triangle_groups.iter().enumerate() {
            for &index in &group.indices {
                let Some(vertex) = self.vertices.get_mut(index as usize) else {
                    continue;
                };
                if std::mem::replace(&mut seen[index as usize], true) {
                    continue;
                }
                for slot in vertex.skin.iter_mut().filter(|s| s.is_used()) {
                    let id = slot.palette_index as usize;
                    if group.bone_names.is_empty() {
                        if let Some(skeleton) = skeleton {
                            skeleton.resolve_bone_index(
                                id,
                                &format!("submesh '{}' vertex {}", self.name, index),
                            )?;
                            slot.bone = Some(id);
                        }
                        continue;
                    }
                    let name = group.bone_names.get(id).ok_or_else(|| {
                        CodecError::bone_out_of_range(
                            id,
                            group.bone_names.len(),
                            format!(
                                "palette of triangle group {} in submesh '{}'",
                                gi, self.name
                            ),
                        )
                    })?;
                    if let Some(lookup) = &lookup {
                        slot.bone = lookup.get(name.as_str()).copied();
                        if slot.bone.is_none() && !unresolved.contains(name) {
                            unresolved.push(name.clone());
                        }
                    }
                }
            }
        }

        for name in unresolved {
            warnings.push(
                WarningKind::UnresolvedBoneName,
                format!("submesh '{}': bone '{}' is not in the skeleton", self.name, name),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Transform;
    use crate::skeleton::Bone;

    fn corner(p: [f32; 3], influences: &[(&str, f32)]) -> InfluenceVertex {
        InfluenceVertex {
            position: p,
            normal: [0.0, 0.0, 1.0],
            color: [255; 4],
            influences: influences
                .iter()
                .map(|(n, w)| (n.to_string(), *w))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn keeps_four_strongest_and_normalises() {
        let infl: Vec<(String, f32)> = [("a", 0.1), ("b", 0.4), ("c", 0.2), ("d", 0.2), ("e", 0.1)]
            .iter()
            .map(|(n, w)| (n.to_string(), *w))
            .collect();
        let kept = top_influences(&infl);
        assert_eq!(kept.len(), 4);
        assert_eq!(kept[0].0, "b");
        let sum: f32 = kept.iter().map(|(_, w)| w).sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn shared_corners_are_deduplicated() {
        let mut builder = SubmeshBuilder::new("body", VertexFlags::SKINNED_COMPRESSED);
        let a = corner([0.0, 0.0, 0.0], &[("b_C_Spine1", 1.0)]);
        let b = corner([1.0, 0.0, 0.0], &[("b_C_Spine1", 1.0)]);
        let c = corner([0.0, 1.0, 0.0], &[("b_C_Spine1", 0.5), ("b_C_Chest", 0.5)]);
        let d = corner([1.0, 1.0, 0.0], &[("b_C_Chest", 1.0)]);
        builder.add_triangle(&[a.clone(), b.clone(), c.clone()]);
        builder.add_triangle(&[b, d, c]);
        let sub = builder.build();
        assert_eq!(sub.vertices.len(), 4);
        assert_eq!(sub.triangle_groups.len(), 1);
        assert_eq!(sub.triangle_groups[0].bone_names, vec!["b_C_Spine1", "b_C_Chest"]);
        assert_eq!(sub.aabb.max[..3], [1.0, 1.0, 0.0]);
    }

    #[test]
    fn palette_overflow_opens_new_group() {
        let mut builder = SubmeshBuilder::new("hair", VertexFlags::SKINNED_COMPRESSED);
        for t in 0..10 {
            let names: Vec<String> = (0..3).map(|k| format!("bone_{}", t * 3 + k)).collect();
            let tri = [
                corner([t as f32, 0.0, 0.0], &[(names[0].as_str(), 1.0)]),
                corner([t as f32, 1.0, 0.0], &[(names[1].as_str(), 1.0)]),
                corner([t as f32, 0.0, 1.0], &[(names[2].as_str(), 1.0)]),
            ];
            builder.add_triangle(&tri);
        }
        let sub = builder.build();
        assert_eq!(sub.triangle_groups.len(), 2);
        assert!(sub
            .triangle_groups
            .iter()
            .all(|g| g.bone_names.len() <= MAX_BONES_PER_TRIANGLE_GROUP));
        assert_eq!(sub.triangle_groups[0].bone_names.len(), 24);
    }

    #[test]
    fn unweighted_vertex_binds_through_implied_slot() {
        let mut builder = SubmeshBuilder::new("prop", VertexFlags::SKINNED_COMPRESSED);
        builder.add_triangle(&[
            corner([0.0, 0.0, 0.0], &[]),
            corner([1.0, 0.0, 0.0], &[]),
            corner([0.0, 1.0, 0.0], &[]),
        ]);
        let sub = builder.build();
        let v = &sub.vertices[0];
        assert_eq!(v.skin[3].weight, 1.0);
        assert!((v.weight_sum() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn resolve_warns_about_missing_bones() {
        let mut builder = SubmeshBuilder::new("face", VertexFlags::SKINNED_COMPRESSED);
        builder.add_triangle(&[
            corner([0.0, 0.0, 0.0], &[("b_C_Head", 1.0)]),
            corner([1.0, 0.0, 0.0], &[("f_L_Eye", 1.0)]),
            corner([0.0, 1.0, 0.0], &[("b_C_Head", 1.0)]),
        ]);
        let mut sub = builder.build();
        let skeleton = Skeleton::new(vec![
            Bone::new("b_C_Base", None, Transform::IDENTITY),
            Bone::new("b_C_Head", Some(0), Transform::IDENTITY),
        ]);
        let mut warnings = Warnings::new();
        sub.resolve_skinning(Some(&skeleton), &mut warnings).unwrap();
        assert_eq!(sub.vertices[0].skin[0].bone, Some(1));
        assert_eq!(sub.vertices[1].skin[0].bone, None);
        assert!(warnings.has(WarningKind::UnresolvedBoneName));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn palette_id_past_palette_is_rejected() {
        let mut sub = Submesh {
            name: "broken".into(),
            vertices: vec![Vertex::default(); 3],
            triangle_groups: vec![TriangleGroup {
                topology: Topology::List,
                indices: vec![0, 1, 2],
                bone_names: vec!["b_C_Base".into()],
            }],
            ..Default::default()
        };
        sub.vertices[1].skin[0] = SkinSlot {
            palette_index: 5,
            weight: 1.0,
            bone: None,
        };
        let err = sub.resolve_skinning(None, &mut Warnings::new()).unwrap_err();
        assert!(matches!(
            err,
            CodecError::BoneIndexOutOfRange { index: 5, bone_count: 1, .. }
        ));
    }
}
