//! ESK skeleton files and the skeleton block they share with EAN animations.
//!
//! ```text
//! file header (32 bytes)
//!   magic "#ESK" | 0xFFFE | header_size u16 | version u16 | u16
//!   file_size u32 | skeleton_offset u32 | skeleton_len u32 | 8 reserved bytes
//! skeleton block (offsets relative to the block start)
//!   bone_count i16 | flag u16 | links_rel | names_rel | transforms_rel
//!   absolute_rel (0 = none) | extra u32 | block_len u32 | skeleton_id u64
//!   links:      bone_count × (parent i16, child i16, sibling i16, flags u16)
//!   names:      bone_count × name_rel u32, then the strings
//!   transforms: bone_count × (position xyzw, rotation xyzw, scale xyzw)
//!   absolute:   bone_count × 4x4 f32
//! ```

use binrw::binrw;

use super::{Bone, Skeleton, NO_BONE};
use crate::cursor::{ByteReader, ByteWriter, FixedRecord};
use crate::error::{CodecError, Decoded, Result, WarningKind, Warnings};
use crate::math::{matrix_to_array, Transform, XvMatrix44, XvQuaternion, XvScaledVector};

pub const ESK_MAGIC: [u8; 4] = *b"#ESK";
pub const ENDIAN_MARK: u16 = 0xFFFE;
pub const ESK_HEADER_SIZE: u16 = 32;
pub const KNOWN_ESK_VERSIONS: &[u16] = &[1];

const SKELETON_HEADER_SIZE: usize = 36;

#[binrw]
#[derive(Debug, Clone)]
#[brw(little, magic = b"#ESK")]
pub struct EskHeader {
    pub endian: u16,
    pub header_size: u16,
    pub version: u16,
    pub unknown_0a: u16,
    pub file_size: u32,
    pub skeleton_offset: u32,
    pub skeleton_len: u32,
    pub reserved: [u32; 2],
}

impl FixedRecord for EskHeader {
    const SIZE: usize = 32;
}

#[binrw]
#[derive(Debug, Clone)]
#[brw(little)]
struct SkeletonHeader {
    bone_count: i16,
    flag: u16,
    links_rel: u32,
    names_rel: u32,
    transforms_rel: u32,
    absolute_rel: u32,
    extra: u32,
    block_len: u32,
    skeleton_id: u64,
}

impl FixedRecord for SkeletonHeader {
    const SIZE: usize = SKELETON_HEADER_SIZE;
}

#[binrw]
#[derive(Debug, Clone, Copy)]
#[brw(little)]
struct BoneLink {
    parent: i16,
    child: i16,
    sibling: i16,
    flags: u16,
}

impl FixedRecord for BoneLink {
    const SIZE: usize = 8;
}

#[binrw]
#[derive(Debug, Clone, Copy)]
#[brw(little)]
struct TransformRecord {
    position: XvScaledVector,
    rotation: XvQuaternion,
    scale: XvScaledVector,
}

impl FixedRecord for TransformRecord {
    const SIZE: usize = 48;
}

impl From<TransformRecord> for Transform {
    fn from(r: TransformRecord) -> Self {
        let q = r.rotation.0;
        Transform {
            translation: r.position.0.into(),
            rotation: [q.v.x, q.v.y, q.v.z, q.s],
            scale: r.scale.0.into(),
        }
    }
}

impl From<&Transform> for TransformRecord {
    fn from(t: &Transform) -> Self {
        TransformRecord {
            position: XvScaledVector(t.translation.into()),
            rotation: XvQuaternion(t.quaternion()),
            scale: XvScaledVector(t.scale.into()),
        }
    }
}

/// A decoded ESK file: header fields kept for re-encoding plus the skeleton.
#[derive(Debug, Clone, PartialEq)]
pub struct EskFile {
    pub version: u16,
    pub skeleton: Skeleton,
}

impl EskFile {
    pub fn new(skeleton: Skeleton) -> Self {
        Self {
            version: KNOWN_ESK_VERSIONS[0],
            skeleton,
        }
    }
}

pub fn decode_esk(data: &[u8]) -> Result<Decoded<EskFile>> {
    let mut warnings = Warnings::new();
    let mut reader = ByteReader::new(data);
    if data.len() >= 4 && data[..4] != ESK_MAGIC {
        return Err(CodecError::unrecognized("ESK", "magic is not #ESK"));
    }
    let header: EskHeader = reader.read_record()?;
    if header.endian != ENDIAN_MARK {
        return Err(CodecError::UnsupportedEncoding(format!(
            "ESK endian mark {:#06x}",
            header.endian
        )));
    }
    if !KNOWN_ESK_VERSIONS.contains(&header.version) {
        warnings.push(
            WarningKind::VersionDrift,
            format!("ESK version {} is not a known version", header.version),
        );
    }
    if header.file_size as usize > data.len() {
        return Err(CodecError::TruncatedBuffer {
            offset: data.len(),
            needed: header.file_size as usize - data.len(),
            available: 0,
        });
    }

    let skeleton = decode_skeleton_block(&mut reader, header.skeleton_offset as usize, &mut warnings)?;
    tracing::debug!(bones = skeleton.len(), "decoded ESK skeleton");

    Ok(Decoded::new(
        EskFile {
            version: header.version,
            skeleton,
        },
        warnings,
    ))
}

pub fn encode_esk(file: &EskFile) -> Result<Vec<u8>> {
    let mut w = ByteWriter::new();
    w.write_bytes(&ESK_MAGIC);
    w.write_u16(ENDIAN_MARK);
    w.write_u16(ESK_HEADER_SIZE);
    w.write_u16(file.version);
    w.write_u16(0);
    let file_size = w.reserve_u32("ESK file size");
    let skeleton_offset = w.reserve_u32("ESK skeleton offset");
    let skeleton_len = w.reserve_u32("ESK skeleton length");
    w.write_zeros(8);

    let start = w.position();
    w.patch(skeleton_offset, start as u32)?;
    encode_skeleton_block(&mut w, &file.skeleton)?;
    w.patch_relative(skeleton_len, start)?;
    w.patch_relative(file_size, 0)?;
    w.finish()
}

/// Decode a skeleton block starting at the absolute offset `base`.
pub fn decode_skeleton_block(
    reader: &mut ByteReader,
    base: usize,
    warnings: &mut Warnings,
) -> Result<Skeleton> {
    reader.seek(base)?;
    let header: SkeletonHeader = reader.read_record()?;
    if header.bone_count < 0 {
        return Err(CodecError::MalformedSkeleton(format!(
            "negative bone count {}",
            header.bone_count
        )));
    }
    let count = header.bone_count as usize;
    let links_at = base + header.links_rel as usize;
    let names_at = base + header.names_rel as usize;
    let transforms_at = base + header.transforms_rel as usize;

    reader.require(links_at, count * BoneLink::SIZE)?;
    reader.require(names_at, count * 4)?;
    reader.require(transforms_at, count * TransformRecord::SIZE)?;

    let mut bones = Vec::with_capacity(count);
    for index in 0..count {
        reader.seek(links_at + index * BoneLink::SIZE)?;
        let link: BoneLink = reader.read_record()?;

        reader.seek(names_at + index * 4)?;
        let name_rel = reader.read_u32()? as usize;
        let name = if name_rel == 0 {
            String::new()
        } else {
            reader.read_string_at(base + name_rel)?
        };

        reader.seek(transforms_at + index * TransformRecord::SIZE)?;
        let transform: TransformRecord = reader.read_record()?;

        let parent = match link.parent {
            p if p < 0 => None,
            p => Some(p as usize),
        };
        tracing::trace!(index, %name, ?parent, "bone");
        bones.push(Bone {
            name,
            parent,
            transform: transform.into(),
            link_flags: link.flags,
            absolute_matrix: None,
        });
    }

    if header.absolute_rel != 0 {
        let absolute_at = base + header.absolute_rel as usize;
        reader.require(absolute_at, count * XvMatrix44::SIZE)?;
        reader.seek(absolute_at)?;
        for bone in bones.iter_mut() {
            let m: XvMatrix44 = reader.read_record()?;
            bone.absolute_matrix = Some(matrix_to_array(&m.0));
        }
    }

    let skeleton = Skeleton {
        bones,
        flag: header.flag,
        extra: header.extra,
        skeleton_id: header.skeleton_id,
    };
    skeleton.validate_with_warnings(warnings)?;
    Ok(skeleton)
}

/// Append a skeleton block at the writer's current position.
///
/// Child and sibling links are recomputed from the parent table. Absolute matrices are
/// written when the bones carry them; a skeleton where only some bones do is rejected
/// since the table holds one matrix per bone.
pub fn encode_skeleton_block(w: &mut ByteWriter, skeleton: &Skeleton) -> Result<()> {
    skeleton.validate()?;
    let count = skeleton.bones.len();
    let bone_count = i16::try_from(count)
        .map_err(|_| CodecError::CorruptOutput(format!("{} bones exceed the i16 count", count)))?;
    let write_absolute = skeleton.bones.iter().any(|b| b.absolute_matrix.is_some());
    if write_absolute {
        if let Some((index, bone)) = skeleton
            .bones
            .iter()
            .enumerate()
            .find(|(_, b)| b.absolute_matrix.is_none())
        {
            return Err(CodecError::CorruptOutput(format!(
                "bone {} ({:?}) has no absolute matrix while others do",
                index, bone.name
            )));
        }
    }

    let base = w.position();
    w.write_i16(bone_count);
    w.write_u16(skeleton.flag);
    let links_rel = w.reserve_u32("skeleton links");
    let names_rel = w.reserve_u32("skeleton names");
    let transforms_rel = w.reserve_u32("skeleton transforms");
    let absolute_rel = w.reserve_u32("skeleton absolute matrices");
    w.write_u32(skeleton.extra);
    let block_len = w.reserve_u32("skeleton length");
    w.write_u64(skeleton.skeleton_id);

    w.patch_relative(links_rel, base)?;
    for (bone, (child, sibling)) in skeleton.bones.iter().zip(skeleton.child_sibling_links()) {
        let parent = match bone.parent {
            Some(p) => p as i16,
            None => NO_BONE,
        };
        w.write_i16(parent);
        w.write_i16(child);
        w.write_i16(sibling);
        w.write_u16(bone.link_flags);
    }

    w.patch_relative(names_rel, base)?;
    let name_sites: Vec<_> = (0..count).map(|i| w.reserve_u32(format!("bone name {}", i))).collect();
    for (site, bone) in name_sites.into_iter().zip(&skeleton.bones) {
        w.patch_relative(site, base)?;
        w.write_cstring(&bone.name);
    }
    w.align(4);

    w.patch_relative(transforms_rel, base)?;
    for bone in &skeleton.bones {
        w.write_record(&TransformRecord::from(&bone.transform))?;
    }

    if write_absolute {
        w.patch_relative(absolute_rel, base)?;
        for bone in &skeleton.bones {
            if let Some(m) = &bone.absolute_matrix {
                for v in m {
                    w.write_f32(*v);
                }
            }
        }
    } else {
        w.patch(absolute_rel, 0)?;
    }

    w.patch_relative(block_len, base)?;
    Ok(())
}
