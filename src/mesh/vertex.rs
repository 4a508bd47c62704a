use serde::{Deserialize, Serialize};

use super::{SkinSlot, Vertex, MAX_INFLUENCES};
use crate::cursor::{ByteReader, ByteWriter};
use crate::error::{CodecError, Result};

/// Vertex layout bits of an EMD submesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VertexFlags(pub u32);

impl VertexFlags {
    pub const POSITION: u32 = 0x1;
    pub const NORMAL: u32 = 0x2;
    pub const TEXUV: u32 = 0x4;
    pub const TEX2UV: u32 = 0x8;
    pub const COLOR: u32 = 0x40;
    pub const TANGENT: u32 = 0x80;
    pub const BLENDWEIGHT: u32 = 0x200;
    pub const COMPRESSED: u32 = 0x8000;

    const KNOWN: u32 = Self::POSITION
        | Self::NORMAL
        | Self::TEXUV
        | Self::TEX2UV
        | Self::COLOR
        | Self::TANGENT
        | Self::BLENDWEIGHT
        | Self::COMPRESSED;

    /// Layout the exporter uses for skinned character meshes.
    pub const SKINNED_COMPRESSED: VertexFlags = VertexFlags(
        Self::POSITION
            | Self::NORMAL
            | Self::TEXUV
            | Self::TANGENT
            | Self::COLOR
            | Self::BLENDWEIGHT
            | Self::COMPRESSED,
    );

    pub fn contains(self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    pub fn is_compressed(self) -> bool {
        self.contains(Self::COMPRESSED)
    }

    pub fn unknown_bits(self) -> u32 {
        self.0 & !Self::KNOWN
    }

    /// Byte size of one vertex with this layout.
    pub fn vertex_size(self) -> usize {
        let comp = self.is_compressed();
        let vec3 = if comp { 8 } else { 12 };
        let vec2 = if comp { 4 } else { 8 };
        let mut size = 0;
        if self.contains(Self::POSITION) {
            size += 12;
        }
        if self.contains(Self::NORMAL) {
            size += vec3;
        }
        if self.contains(Self::TEXUV) {
            size += vec2;
        }
        if self.contains(Self::TEX2UV) {
            size += vec2;
        }
        if self.contains(Self::TANGENT) {
            size += vec3;
        }
        if self.contains(Self::COLOR) {
            size += 4;
        }
        if self.contains(Self::BLENDWEIGHT) {
            size += 4 + vec3;
        }
        size
    }

    /// Reject layouts this codec cannot represent faithfully.
    pub fn check(self, declared_size: usize) -> Result<()> {
        if self.unknown_bits() != 0 {
            return Err(CodecError::UnsupportedEncoding(format!(
                "vertex flags {:#x} carry unknown bits {:#x}",
                self.0,
                self.unknown_bits()
            )));
        }
        let expected = self.vertex_size();
        if expected != declared_size {
            return Err(CodecError::UnsupportedEncoding(format!(
                "vertex size {} disagrees with flags {:#x} (expected {})",
                declared_size, self.0, expected
            )));
        }
        Ok(())
    }
}

fn read_vec3(r: &mut ByteReader, compressed: bool) -> Result<[f32; 3]> {
    if compressed {
        let v = [r.read_f16()?, r.read_f16()?, r.read_f16()?];
        r.skip(2)?;
        Ok(v)
    } else {
        Ok([r.read_f32()?, r.read_f32()?, r.read_f32()?])
    }
}

fn read_vec2(r: &mut ByteReader, compressed: bool) -> Result<[f32; 2]> {
    if compressed {
        Ok([r.read_f16()?, r.read_f16()?])
    } else {
        Ok([r.read_f32()?, r.read_f32()?])
    }
}

fn write_vec3(w: &mut ByteWriter, v: [f32; 3], compressed: bool) {
    if compressed {
        v.iter().for_each(|c| w.write_f16(*c));
        w.write_zeros(2);
    } else {
        v.iter().for_each(|c| w.write_f32(*c));
    }
}

fn write_vec2(w: &mut ByteWriter, v: [f32; 2], compressed: bool) {
    if compressed {
        v.iter().for_each(|c| w.write_f16(*c));
    } else {
        v.iter().for_each(|c| w.write_f32(*c));
    }
}

/// Read one vertex. Skinning slots come back with their raw palette ids and no
/// bone resolved yet.
pub fn read_vertex(r: &mut ByteReader, flags: VertexFlags) -> Result<Vertex> {
    let comp = flags.is_compressed();
    let mut v = Vertex::default();
    if flags.contains(VertexFlags::POSITION) {
        v.position = [r.read_f32()?, r.read_f32()?, r.read_f32()?];
    }
    if flags.contains(VertexFlags::NORMAL) {
        v.normal = read_vec3(r, comp)?;
    }
    if flags.contains(VertexFlags::TEXUV) {
        v.uv = read_vec2(r, comp)?;
    }
    if flags.contains(VertexFlags::TEX2UV) {
        v.uv2 = read_vec2(r, comp)?;
    }
    if flags.contains(VertexFlags::TANGENT) {
        v.tangent = read_vec3(r, comp)?;
    }
    if flags.contains(VertexFlags::COLOR) {
        let bytes = r.read_bytes(4)?;
        v.color = [bytes[0], bytes[1], bytes[2], bytes[3]];
    }
    if flags.contains(VertexFlags::BLENDWEIGHT) {
        let ids = r.read_bytes(MAX_INFLUENCES)?;
        let stored = read_vec3(r, comp)?;
        let last = 1.0 - (stored[0] + stored[1] + stored[2]);
        let weights = [stored[0], stored[1], stored[2], last];
        for (slot, (id, weight)) in v.skin.iter_mut().zip(ids.iter().zip(weights)) {
            *slot = SkinSlot {
                palette_index: *id,
                weight,
                bone: None,
            };
        }
    }
    Ok(v)
}

pub fn write_vertex(w: &mut ByteWriter, v: &Vertex, flags: VertexFlags) {
    let comp = flags.is_compressed();
    if flags.contains(VertexFlags::POSITION) {
        v.position.iter().for_each(|c| w.write_f32(*c));
    }
    if flags.contains(VertexFlags::NORMAL) {
        write_vec3(w, v.normal, comp);
    }
    if flags.contains(VertexFlags::TEXUV) {
        write_vec2(w, v.uv, comp);
    }
    if flags.contains(VertexFlags::TEX2UV) {
        write_vec2(w, v.uv2, comp);
    }
    if flags.contains(VertexFlags::TANGENT) {
        write_vec3(w, v.tangent, comp);
    }
    if flags.contains(VertexFlags::COLOR) {
        w.write_bytes(&v.color);
    }
    if flags.contains(VertexFlags::BLENDWEIGHT) {
        for slot in &v.skin {
            w.write_u8(slot.palette_index);
        }
        write_vec3(w, [v.skin[0].weight, v.skin[1].weight, v.skin[2].weight], comp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compressed_skinned_layout_size() {
        // 12 pos + 8 normal + 4 uv + 8 tangent + 4 color + 4 ids + 8 weights
        assert_eq!(VertexFlags::SKINNED_COMPRESSED.vertex_size(), 48);
        let plain = VertexFlags(VertexFlags::POSITION | VertexFlags::NORMAL | VertexFlags::TEXUV);
        assert_eq!(plain.vertex_size(), 32);
    }

    #[test]
    fn unknown_bits_are_unsupported() {
        let flags = VertexFlags(VertexFlags::POSITION | 0x10);
        assert!(matches!(
            flags.check(12),
            Err(CodecError::UnsupportedEncoding(_))
        ));
        let flags = VertexFlags(VertexFlags::POSITION);
        assert!(flags.check(16).is_err());
        assert!(flags.check(12).is_ok());
    }

    #[test]
    fn last_weight_is_implied() {
        let flags = VertexFlags(VertexFlags::POSITION | VertexFlags::BLENDWEIGHT);
        let mut vertex = Vertex::at([1.0, 2.0, 3.0], [0.0; 3]);
        vertex.skin[0].palette_index = 3;
        vertex.skin[0].weight = 0.5;
        vertex.skin[1].palette_index = 1;
        vertex.skin[1].weight = 0.25;
        vertex.skin[3].palette_index = 7;

        let mut w = ByteWriter::new();
        write_vertex(&mut w, &vertex, flags);
        let bytes = w.finish().unwrap();
        assert_eq!(bytes.len(), flags.vertex_size());

        let back = read_vertex(&mut ByteReader::new(&bytes), flags).unwrap();
        assert_eq!(back.position, [1.0, 2.0, 3.0]);
        let ids: Vec<u8> = back.skin.iter().map(|s| s.palette_index).collect();
        assert_eq!(ids, vec![3, 1, 0, 7]);
        assert!((back.skin[3].weight - 0.25).abs() < 1e-6);
    }
}
