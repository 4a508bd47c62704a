pub mod emd;
pub mod sharp;
pub mod skinning;
pub mod strip;
pub mod vertex;

use serde::{Deserialize, Serialize};

pub use emd::{decode_emd, encode_emd, EmdFile};
pub use skinning::{InfluenceVertex, SubmeshBuilder};
pub use strip::Topology;
pub use vertex::VertexFlags;

/// Slots per vertex in the skinning record.
pub const MAX_INFLUENCES: usize = 4;
/// Bones one triangle group's palette may reference.
pub const MAX_BONES_PER_TRIANGLE_GROUP: usize = 24;
pub const WEIGHT_TOLERANCE: f32 = 1e-4;
/// Prefix of physics-only bones; models built solely on them are the "scd" variant.
pub const SCD_BONE_PREFIX: &str = "scd_";

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SkinSlot {
    /// Palette id exactly as stored.
    pub palette_index: u8,
    pub weight: f32,
    /// Skeleton bone the palette id resolved to. `None` for unused slots.
    pub bone: Option<usize>,
}

impl SkinSlot {
    pub fn is_used(&self) -> bool {
        self.weight > WEIGHT_TOLERANCE
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    /// File-space UV; hosts flipping V do so in their adapter.
    pub uv: [f32; 2],
    pub uv2: [f32; 2],
    pub tangent: [f32; 3],
    pub color: [u8; 4],
    pub skin: [SkinSlot; MAX_INFLUENCES],
    /// False when the stored weights are negative or do not sum to one.
    pub weights_valid: bool,
}

impl Default for Vertex {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            normal: [0.0; 3],
            uv: [0.0; 2],
            uv2: [0.0; 2],
            tangent: [0.0; 3],
            color: [255; 4],
            skin: [SkinSlot::default(); MAX_INFLUENCES],
            weights_valid: true,
        }
    }
}

impl Vertex {
    pub fn at(position: [f32; 3], normal: [f32; 3]) -> Self {
        Self {
            position,
            normal,
            ..Default::default()
        }
    }

    pub fn weight_sum(&self) -> f32 {
        self.skin.iter().filter(|s| s.is_used()).map(|s| s.weight).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TriangleGroup {
    pub topology: Topology,
    pub indices: Vec<u32>,
    /// Palette: skinning slot ids index into this list.
    pub bone_names: Vec<String>,
}

impl TriangleGroup {
    pub fn faces(&self) -> Vec<[u32; 3]> {
        match self.topology {
            Topology::List => self
                .indices
                .chunks_exact(3)
                .map(|c| [c[0], c[1], c[2]])
                .collect(),
            Topology::Strip => strip::expand_strip(&self.indices),
        }
    }

    /// Re-encode this group's faces as a single greedy strip.
    pub fn to_strip(&self) -> TriangleGroup {
        TriangleGroup {
            topology: Topology::Strip,
            indices: strip::stripify(&self.faces()),
            bone_names: self.bone_names.clone(),
        }
    }

    pub fn to_list(&self) -> TriangleGroup {
        TriangleGroup {
            topology: Topology::List,
            indices: self.faces().into_iter().flatten().collect(),
            bone_names: self.bone_names.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressMode {
    Wrap,
    Mirror,
    Clamp,
    Other(u8),
}

impl From<u8> for AddressMode {
    fn from(v: u8) -> Self {
        match v {
            0 => AddressMode::Wrap,
            1 => AddressMode::Mirror,
            2 => AddressMode::Clamp,
            other => AddressMode::Other(other),
        }
    }
}

impl From<AddressMode> for u8 {
    fn from(m: AddressMode) -> u8 {
        match m {
            AddressMode::Wrap => 0,
            AddressMode::Mirror => 1,
            AddressMode::Clamp => 2,
            AddressMode::Other(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterMode {
    None,
    Point,
    Linear,
    Other(u8),
}

impl From<u8> for FilterMode {
    fn from(v: u8) -> Self {
        match v {
            0 => FilterMode::None,
            1 => FilterMode::Point,
            2 => FilterMode::Linear,
            other => FilterMode::Other(other),
        }
    }
}

impl From<FilterMode> for u8 {
    fn from(m: FilterMode) -> u8 {
        match m {
            FilterMode::None => 0,
            FilterMode::Point => 1,
            FilterMode::Linear => 2,
            FilterMode::Other(v) => v,
        }
    }
}

/// Texture sampler definition of a submesh.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sampler {
    pub flag0: u8,
    pub texture_index: u8,
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub filter_min: FilterMode,
    pub filter_mag: FilterMode,
    pub scale_u: f32,
    pub scale_v: f32,
}

impl Sampler {
    pub fn default_for_slot(texture_index: u8) -> Self {
        Self {
            flag0: 0,
            texture_index,
            address_u: AddressMode::Wrap,
            address_v: AddressMode::Wrap,
            filter_min: FilterMode::Linear,
            filter_mag: FilterMode::Linear,
            scale_u: 1.0,
            scale_v: 1.0,
        }
    }

    /// Samplers synthesized for submeshes that carry none: slots 0 and 1.
    pub fn defaults() -> Vec<Sampler> {
        vec![Self::default_for_slot(0), Self::default_for_slot(1)]
    }
}

/// Bounding box as stored: xyz of center/min/max with the box size in the w lanes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Aabb {
    pub center: [f32; 4],
    pub min: [f32; 4],
    pub max: [f32; 4],
}

impl Aabb {
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a [f32; 3]>) -> Aabb {
        let mut lo = [f32::INFINITY; 3];
        let mut hi = [f32::NEG_INFINITY; 3];
        let mut any = false;
        for p in points {
            any = true;
            for axis in 0..3 {
                lo[axis] = lo[axis].min(p[axis]);
                hi[axis] = hi[axis].max(p[axis]);
            }
        }
        if !any {
            return Aabb::default();
        }
        let size = [hi[0] - lo[0], hi[1] - lo[1], hi[2] - lo[2]];
        Aabb {
            center: [
                (hi[0] + lo[0]) / 2.0,
                (hi[1] + lo[1]) / 2.0,
                (hi[2] + lo[2]) / 2.0,
                size[0],
            ],
            min: [lo[0], lo[1], lo[2], size[1]],
            max: [hi[0], hi[1], hi[2], size[2]],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Submesh {
    pub name: String,
    pub vertex_flags: VertexFlags,
    pub aabb: Aabb,
    pub vertices: Vec<Vertex>,
    pub triangle_groups: Vec<TriangleGroup>,
    pub samplers: Vec<Sampler>,
    /// Hard edges as vertex index pairs.
    pub sharp_edges: Vec<[u32; 2]>,
    pub unknown_68: u8,
}

impl Submesh {
    pub fn faces(&self) -> Vec<[u32; 3]> {
        self.triangle_groups.iter().flat_map(|g| g.faces()).collect()
    }

    pub fn recompute_aabb(&mut self) {
        self.aabb = Aabb::from_points(self.vertices.iter().map(|v| &v.position));
    }

    /// Whether the edge between two positions is marked sharp.
    pub fn is_sharp_between(&self, a: [f32; 3], b: [f32; 3]) -> bool {
        self.sharp_edges.iter().any(|&[i, j]| {
            let (Some(vi), Some(vj)) = (
                self.vertices.get(i as usize),
                self.vertices.get(j as usize),
            ) else {
                return false;
            };
            (vi.position == a && vj.position == b) || (vi.position == b && vj.position == a)
        })
    }

    pub fn palette_bone_names(&self) -> impl Iterator<Item = &str> {
        self.triangle_groups
            .iter()
            .flat_map(|g| g.bone_names.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Mesh {
    pub name: String,
    pub aabb: Aabb,
    pub flags: u16,
    pub submeshes: Vec<Submesh>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    pub flags: u16,
    pub meshes: Vec<Mesh>,
}

impl Model {
    /// True for physics-only ("scd") models: every palette bone carries the scd prefix.
    pub fn is_scd(&self) -> bool {
        let mut names = self
            .meshes
            .iter()
            .flat_map(|m| m.submeshes.iter())
            .flat_map(|s| s.palette_bone_names())
            .peekable();
        names.peek().is_some()
            && names.all(|n| n.to_ascii_lowercase().starts_with(SCD_BONE_PREFIX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aabb_stores_sizes_in_w() {
        let pts = [[0.0, 0.0, 0.0], [2.0, 4.0, -6.0]];
        let aabb = Aabb::from_points(pts.iter());
        assert_eq!(aabb.center, [1.0, 2.0, -3.0, 2.0]);
        assert_eq!(aabb.min, [0.0, 0.0, -6.0, 4.0]);
        assert_eq!(aabb.max, [2.0, 4.0, 0.0, 6.0]);
    }

    #[test]
    fn default_samplers_cover_two_slots() {
        let samplers = Sampler::defaults();
        assert_eq!(samplers.len(), 2);
        assert_eq!(samplers[1].texture_index, 1);
        assert_eq!(samplers[0].address_u, AddressMode::Wrap);
        assert_eq!(samplers[0].filter_mag, FilterMode::Linear);
    }

    #[test]
    fn scd_detection_needs_only_scd_bones() {
        let group = |names: &[&str]| TriangleGroup {
            bone_names: names.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        let model = |names: &[&str]| Model {
            meshes: vec![Mesh {
                submeshes: vec![Submesh {
                    triangle_groups: vec![group(names)],
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(model(&["scd_hair_01", "SCD_hair_02"]).is_scd());
        assert!(!model(&["scd_hair_01", "b_C_Head"]).is_scd());
        assert!(!model(&[]).is_scd());
    }

    #[test]
    fn strip_group_expands_to_faces() {
        let group = TriangleGroup {
            topology: Topology::Strip,
            indices: vec![0, 1, 2, 3],
            bone_names: vec![],
        };
        assert_eq!(group.faces(), vec![[0, 1, 2], [2, 1, 3]]);
        assert_eq!(group.to_list().indices, vec![0, 1, 2, 2, 1, 3]);
    }
}
