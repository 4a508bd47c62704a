//! Triangle strip expansion and greedy regeneration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Topology {
    #[default]
    List,
    Strip,
}

fn is_degenerate(a: u32, b: u32, c: u32) -> bool {
    a == b || b == c || a == c
}

/// Expand a strip into triangles, flipping every odd triangle to keep the winding
/// and dropping the degenerate joints.
pub fn expand_strip(indices: &[u32]) -> Vec<[u32; 3]> {
    indices
        .windows(3)
        .enumerate()
        .filter(|(_, w)| !is_degenerate(w[0], w[1], w[2]))
        .map(|(i, w)| {
            if i % 2 == 0 {
                [w[0], w[1], w[2]]
            } else {
                [w[1], w[0], w[2]]
            }
        })
        .collect()
}

/// Greedy stripifier: walks shared edges while the winding allows, then bridges to the
/// next strip with degenerate triangles.
pub fn stripify(faces: &[[u32; 3]]) -> Vec<u32> {
    let mut by_edge: HashMap<(u32, u32), Vec<usize>> = HashMap::new();
    for (fi, f) in faces.iter().enumerate() {
        if is_degenerate(f[0], f[1], f[2]) {
            continue;
        }
        for k in 0..3 {
            by_edge.entry((f[k], f[(k + 1) % 3])).or_default().push(fi);
        }
    }

    let mut used: Vec<bool> = faces
        .iter()
        .map(|f| is_degenerate(f[0], f[1], f[2]))
        .collect();
    let mut out: Vec<u32> = Vec::new();

    for start in 0..faces.len() {
        if used[start] {
            continue;
        }
        used[start] = true;
        let mut strip = faces[start].to_vec();

        loop {
            let n = strip.len();
            let t = n - 2;
            let (u, v) = if t % 2 == 0 {
                (strip[n - 2], strip[n - 1])
            } else {
                (strip[n - 1], strip[n - 2])
            };
            let next = by_edge
                .get(&(u, v))
                .and_then(|list| list.iter().copied().find(|&fi| !used[fi]));
            let Some(fi) = next else { break };
            used[fi] = true;
            let f = faces[fi];
            let third = f
                .iter()
                .copied()
                .find(|&x| x != u && x != v)
                .unwrap_or(f[0]);
            strip.push(third);
        }

        if let Some(&last) = out.last() {
            out.push(last);
            if out.len() % 2 == 0 {
                // keep the next strip starting on an even triangle
                out.push(last);
            }
            out.push(strip[0]);
        }
        out.extend(strip);
    }
    out
}
