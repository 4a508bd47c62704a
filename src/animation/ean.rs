//! EAN animation files.
//!
//! ```text
//! header (32 bytes)
//!   magic "#EAN" | 0xFFFE | header_size u16 | version u32 | u32
//!   is_camera u8 | u8 | animation_count u16
//!   skeleton_offset u32 | animation_table u32 | name_table u32
//! skeleton block (same layout as ESK)
//! animation table: count × absolute offset (0 = empty slot)
//! animation (offsets relative to its start unless noted)
//!   u16 | index_size u8 (0 = u8, 1 = u16) | float_size u8 (1 = f16, 2 = f32)
//!   frame_count u32 | node_count u32 | node_table_rel u32
//!   node:      bone_index i16 | component_count i16 | component_table_rel u32 (from node)
//!   component: kind u8 | flags u8 | i16 | key_count u32 | frames_rel | values_rel (from component)
//!              frames, pad to 16, xyzw values
//!   12 zero bytes
//! name table: count × absolute offset
//! ```

use binrw::binrw;

use super::bake::{apply_auto_bake, insert_dummy_keyframes, pad_clip_edges, step_to_linear};
use super::{AnimationClip, AnimationNode, Channel, FloatPrecision, Keyframe, KeyframeTrack};
use crate::config::ExportOptions;
use crate::cursor::{ByteReader, ByteWriter, FixedRecord};
use crate::error::{CodecError, Decoded, Result, WarningKind, Warnings};
use crate::skeleton::esk::{decode_skeleton_block, encode_skeleton_block};
use crate::skeleton::Skeleton;

pub const EAN_MAGIC: [u8; 4] = *b"#EAN";
pub const ENDIAN_MARK: u16 = 0xFFFE;
pub const EAN_HEADER_SIZE: u16 = 32;
pub const CHARACTER_EAN_VERSION: u32 = 37505;
pub const CAMERA_EAN_VERSION: u32 = 37568;
pub const KNOWN_EAN_VERSIONS: &[u32] = &[CHARACTER_EAN_VERSION, CAMERA_EAN_VERSION];
pub const DEFAULT_UNKNOWN_17: u8 = 4;

const ANIMATION_TRAILER: usize = 12;
/// Frame counts above this need 16-bit frame indices.
const MAX_U8_FRAME_COUNT: u32 = 255;

#[binrw]
#[derive(Debug, Clone)]
#[brw(little, magic = b"#EAN")]
pub struct EanHeader {
    pub endian: u16,
    pub header_size: u16,
    pub version: u32,
    pub unknown_0c: u32,
    pub is_camera: u8,
    pub unknown_17: u8,
    pub animation_count: u16,
    pub skeleton_offset: u32,
    pub animation_table: u32,
    pub name_table: u32,
}

impl FixedRecord for EanHeader {
    const SIZE: usize = 32;
}

#[binrw]
#[derive(Debug, Clone)]
#[brw(little)]
struct AnimationHeader {
    unknown_00: u16,
    index_size: u8,
    float_size: u8,
    frame_count: u32,
    node_count: u32,
    node_table_rel: u32,
}

impl FixedRecord for AnimationHeader {
    const SIZE: usize = 16;
}

#[binrw]
#[derive(Debug, Clone)]
#[brw(little)]
struct NodeHeader {
    bone_index: i16,
    component_count: i16,
    component_table_rel: u32,
}

impl FixedRecord for NodeHeader {
    const SIZE: usize = 8;
}

#[binrw]
#[derive(Debug, Clone)]
#[brw(little)]
struct ComponentHeader {
    kind: u8,
    flags: u8,
    unknown_02: i16,
    key_count: u32,
    frames_rel: u32,
    values_rel: u32,
}

impl FixedRecord for ComponentHeader {
    const SIZE: usize = 16;
}

#[derive(Debug, Clone)]
pub struct EanFile {
    pub version: u32,
    pub is_camera: bool,
    pub unknown_17: u8,
    pub skeleton: Skeleton,
    /// Clips in table order. Each clip carries its own stable index.
    pub clips: Vec<AnimationClip>,
}

impl EanFile {
    pub fn new(skeleton: Skeleton) -> Self {
        Self {
            version: CHARACTER_EAN_VERSION,
            is_camera: false,
            unknown_17: DEFAULT_UNKNOWN_17,
            skeleton,
            clips: Vec::new(),
        }
    }

    pub fn clip_by_index(&self, index: u32) -> Option<&AnimationClip> {
        self.clips.iter().find(|c| c.index == index)
    }

    pub fn clip_by_name(&self, name: &str) -> Option<&AnimationClip> {
        self.clips.iter().find(|c| c.name == name)
    }

    /// First stable index past every existing clip.
    pub fn next_free_index(&self) -> u32 {
        self.clips.iter().map(|c| c.index + 1).max().unwrap_or(0)
    }

    /// Add a new clip under the next free index and return that index.
    pub fn push_clip(&mut self, mut clip: AnimationClip) -> u32 {
        let index = self.next_free_index();
        clip.index = index;
        self.clips.push(clip);
        index
    }
}

pub fn decode_ean(data: &[u8]) -> Result<Decoded<EanFile>> {
    let mut warnings = Warnings::new();
    let mut reader = ByteReader::new(data);
    if data.len() >= 4 && data[..4] != EAN_MAGIC {
        return Err(CodecError::unrecognized("EAN", "magic is not #EAN"));
    }
    let header: EanHeader = reader.read_record()?;
    if header.endian != ENDIAN_MARK {
        return Err(CodecError::UnsupportedEncoding(format!(
            "EAN endian mark {:#06x}",
            header.endian
        )));
    }
    if !KNOWN_EAN_VERSIONS.contains(&header.version) {
        warnings.push(
            WarningKind::VersionDrift,
            format!("EAN version {} is not a known version", header.version),
        );
    }

    let skeleton = if header.skeleton_offset == 0 {
        Skeleton::default()
    } else {
        decode_skeleton_block(&mut reader, header.skeleton_offset as usize, &mut warnings)?
    };

    let count = header.animation_count as usize;
    let table_at = header.animation_table as usize;
    let names_at = header.name_table as usize;
    if count > 0 {
        reader.require(table_at, count * 4)?;
        if names_at != 0 {
            reader.require(names_at, count * 4)?;
        }
    }

    let mut clips = Vec::new();
    for slot in 0..count {
        reader.seek(table_at + slot * 4)?;
        let offset = reader.read_u32()? as usize;
        if offset == 0 {
            continue;
        }
        let name = if names_at != 0 {
            reader.seek(names_at + slot * 4)?;
            let name_at = reader.read_u32()? as usize;
            reader.read_string_at(name_at)?
        } else {
            String::new()
        };
        let name = if name.is_empty() { slot.to_string() } else { name };
        let clip = decode_animation(&mut reader, offset, slot as u32, name, &skeleton, &mut warnings)?;
        clips.push(clip);
    }
    tracing::debug!(
        clips = clips.len(),
        bones = skeleton.len(),
        camera = header.is_camera != 0,
        "decoded EAN"
    );

    Ok(Decoded::new(
        EanFile {
            version: header.version,
            is_camera: header.is_camera != 0,
            unknown_17: header.unknown_17,
            skeleton,
            clips,
        },
        warnings,
    ))
}

fn decode_animation(
    reader: &mut ByteReader,
    base: usize,
    index: u32,
    name: String,
    skeleton: &Skeleton,
    warnings: &mut Warnings,
) -> Result<AnimationClip> {
    reader.seek(base)?;
    let header: AnimationHeader = reader.read_record()?;
    let wide_frames = match header.index_size {
        0 => false,
        1 => true,
        other => {
            return Err(CodecError::UnsupportedEncoding(format!(
                "animation '{}' frame index size {}",
                name, other
            )))
        }
    };
    let precision = FloatPrecision::from_raw(header.float_size).ok_or_else(|| {
        CodecError::UnsupportedEncoding(format!(
            "animation '{}' float size {}",
            name, header.float_size
        ))
    })?;

    let node_count = header.node_count as usize;
    let node_table = base + header.node_table_rel as usize;
    reader.require(node_table, node_count * 4)?;

    let mut nodes = Vec::with_capacity(node_count);
    for n in 0..node_count {
        reader.seek(node_table + n * 4)?;
        let node_at = base + reader.read_u32()? as usize;
        reader.seek(node_at)?;
        let node: NodeHeader = reader.read_record()?;
        if node.bone_index < 0 {
            return Err(CodecError::bone_out_of_range(
                node.bone_index as usize,
                skeleton.len(),
                format!("animation '{}' node {}", name, n),
            ));
        }
        let bone_index = node.bone_index as usize;
        let bone = skeleton.resolve_bone_index(bone_index, &format!("animation '{}' node {}", name, n))?;
        if node.component_count < 0 {
            return Err(CodecError::unrecognized(
                "EAN",
                format!("negative component count on node {} of '{}'", n, name),
            ));
        }

        let table = node_at + node.component_table_rel as usize;
        let component_count = node.component_count as usize;
        reader.require(table, component_count * 4)?;
        let mut tracks = Vec::with_capacity(component_count);
        for c in 0..component_count {
            reader.seek(table + c * 4)?;
            let component_at = node_at + reader.read_u32()? as usize;
            let track = decode_component(reader, component_at, wide_frames, precision)?;
            if let Channel::Unknown(raw) = track.channel {
                warnings.push(
                    WarningKind::UnknownComponent,
                    format!(
                        "animation '{}' bone '{}' has component kind {}",
                        name, bone.name, raw
                    ),
                );
            }
            tracks.push(track);
        }
        nodes.push(AnimationNode {
            bone_index,
            bone_name: bone.name.clone(),
            tracks,
        });
    }
    tracing::trace!(index, %name, nodes = nodes.len(), "animation");

    Ok(AnimationClip {
        name,
        index,
        frame_count: header.frame_count,
        float_precision: precision,
        nodes,
        curves: Vec::new(),
    })
}

fn decode_component(
    reader: &mut ByteReader,
    at: usize,
    wide_frames: bool,
    precision: FloatPrecision,
) -> Result<KeyframeTrack> {
    reader.seek(at)?;
    let header: ComponentHeader = reader.read_record()?;
    let count = header.key_count as usize;

    let frames_at = at + header.frames_rel as usize;
    let frame_width = if wide_frames { 2 } else { 1 };
    reader.require(frames_at, count * frame_width)?;
    reader.seek(frames_at)?;
    let mut frames = Vec::with_capacity(count);
    for _ in 0..count {
        frames.push(if wide_frames {
            reader.read_u16()? as u32
        } else {
            reader.read_u8()? as u32
        });
    }

    let values_at = at + header.values_rel as usize;
    let value_width = match precision {
        FloatPrecision::Half => 8,
        FloatPrecision::Single => 16,
    };
    reader.require(values_at, count * value_width)?;
    reader.seek(values_at)?;
    let mut keyframes = Vec::with_capacity(count);
    for frame in frames {
        let mut value = [0.0f32; 4];
        for v in value.iter_mut() {
            *v = match precision {
                FloatPrecision::Half => reader.read_f16()?,
                FloatPrecision::Single => reader.read_f32()?,
            };
        }
        keyframes.push(Keyframe::new(frame, value));
    }

    let mut track = KeyframeTrack {
        channel: Channel::from_raw(header.kind),
        interpolation: Default::default(),
        flags: header.flags,
        unknown_02: header.unknown_02,
        keyframes,
    };
    if !track.is_sorted() {
        tracing::debug!(at, "component keyframes out of order, sorting");
        track.sort();
    }
    Ok(track)
}

/// Encode with default export options.
pub fn encode_ean(file: &EanFile) -> Result<Vec<u8>> {
    encode_ean_with(file, &ExportOptions::default())
}

/// Encode clips into table slots given by their stable indices, in ascending index
/// order. Gaps become empty slots.
pub fn encode_ean_with(file: &EanFile, options: &ExportOptions) -> Result<Vec<u8>> {
    let mut clips: Vec<AnimationClip> = file
        .clips
        .iter()
        .map(|clip| prepare_clip(clip, &file.skeleton, options))
        .collect::<Result<_>>()?;
    clips.sort_by_key(|c| c.index);
    if let Some(pair) = clips.windows(2).find(|w| w[0].index == w[1].index) {
        return Err(CodecError::CorruptOutput(format!(
            "clips '{}' and '{}' share index {}",
            pair[0].name, pair[1].name, pair[0].index
        )));
    }
    let count = clips.last().map_or(0, |c| c.index as usize + 1);
    let count = u16::try_from(count).map_err(|_| {
        CodecError::CorruptOutput(format!("animation index {} exceeds the u16 count", count - 1))
    })?;

    let mut w = ByteWriter::new();
    w.write_bytes(&EAN_MAGIC);
    w.write_u16(ENDIAN_MARK);
    w.write_u16(EAN_HEADER_SIZE);
    w.write_u32(file.version);
    w.write_u32(0);
    w.write_u8(file.is_camera as u8);
    w.write_u8(file.unknown_17);
    w.write_u16(count);
    let skeleton_site = w.reserve_u32("EAN skeleton offset");
    let table_site = w.reserve_u32("EAN animation table");
    let names_site = w.reserve_u32("EAN name table");

    w.patch_relative(skeleton_site, 0)?;
    encode_skeleton_block(&mut w, &file.skeleton)?;

    if count == 0 {
        w.patch(table_site, 0)?;
        w.patch(names_site, 0)?;
        return w.finish();
    }

    w.patch_relative(table_site, 0)?;
    let slots: Vec<_> = (0..count).map(|i| w.reserve_u32(format!("animation {}", i))).collect();
    let mut by_slot: Vec<Option<&AnimationClip>> = vec![None; count as usize];
    for clip in &clips {
        by_slot[clip.index as usize] = Some(clip);
    }
    for (site, clip) in slots.into_iter().zip(&by_slot) {
        match clip {
            Some(clip) => {
                w.align(16);
                w.patch_relative(site, 0)?;
                write_animation(&mut w, clip)?;
            }
            None => w.patch(site, 0)?,
        }
    }

    w.patch_relative(names_site, 0)?;
    let name_slots: Vec<_> = (0..count).map(|i| w.reserve_u32(format!("animation name {}", i))).collect();
    for (site, clip) in name_slots.into_iter().zip(&by_slot) {
        match clip {
            Some(clip) => {
                w.patch_relative(site, 0)?;
                w.write_cstring(&clip.name);
            }
            None => w.patch(site, 0)?,
        }
    }
    tracing::debug!(clips = clips.len(), slots = count, "encoded EAN");
    w.finish()
}

/// Apply export options and check references so the writer only sees keyframe data
/// that fits the format.
fn prepare_clip(clip: &AnimationClip, skeleton: &Skeleton, options: &ExportOptions) -> Result<AnimationClip> {
    let mut clip = clip.clone();
    if !clip.curves.is_empty() {
        if !options.auto_bake {
            return Err(CodecError::UnsupportedEncoding(format!(
                "clip '{}' has {} continuous channels; enable auto-bake to export them",
                clip.name,
                clip.curves.len()
            )));
        }
        apply_auto_bake(&mut clip);
    }
    for node in clip.nodes.iter_mut() {
        for track in node.tracks.iter_mut() {
            step_to_linear(track);
            track.sort();
        }
    }
    // every track spans the whole clip
    pad_clip_edges(&mut clip);
    if options.insert_dummy_keyframes {
        insert_dummy_keyframes(&mut clip, skeleton);
    }

    for node in clip.nodes.iter_mut() {
        skeleton.resolve_bone_index(node.bone_index, &format!("clip '{}'", clip.name))?;
        node.tracks.retain(|t| !t.keyframes.is_empty());
    }
    clip.nodes.retain(|n| !n.tracks.is_empty());
    clip.frame_count = clip.effective_frame_count();
    Ok(clip)
}

fn write_animation(w: &mut ByteWriter, clip: &AnimationClip) -> Result<()> {
    let wide_frames = clip.frame_count > MAX_U8_FRAME_COUNT;
    if clip.frame_count > u16::MAX as u32 + 1 {
        return Err(CodecError::CorruptOutput(format!(
            "clip '{}' has {} frames, more than 16-bit frame indices can address",
            clip.name, clip.frame_count
        )));
    }
    let node_count = u32::try_from(clip.nodes.len())
        .map_err(|_| CodecError::CorruptOutput(format!("clip '{}' node count", clip.name)))?;

    let base = w.position();
    w.write_u16(0);
    w.write_u8(wide_frames as u8);
    w.write_u8(clip.float_precision.raw());
    w.write_u32(clip.frame_count);
    w.write_u32(node_count);
    let node_table = w.reserve_u32(format!("clip '{}' node table", clip.name));
    if clip.nodes.is_empty() {
        w.patch(node_table, 0)?;
    } else {
        w.patch_relative(node_table, base)?;
    }
    let node_sites: Vec<_> = (0..clip.nodes.len())
        .map(|i| w.reserve_u32(format!("clip '{}' node {}", clip.name, i)))
        .collect();

    for (site, node) in node_sites.into_iter().zip(&clip.nodes) {
        let node_at = w.position();
        w.patch_relative(site, base)?;
        let bone = i16::try_from(node.bone_index).map_err(|_| {
            CodecError::CorruptOutput(format!("bone index {} exceeds i16", node.bone_index))
        })?;
        let components = i16::try_from(node.tracks.len()).map_err(|_| {
            CodecError::CorruptOutput(format!("bone {} has too many tracks", node.bone_index))
        })?;
        w.write_i16(bone);
        w.write_i16(components);
        let table = w.reserve_u32("component table");
        w.patch_relative(table, node_at)?;
        let component_sites: Vec<_> = (0..node.tracks.len())
            .map(|i| w.reserve_u32(format!("bone {} component {}", node.bone_index, i)))
            .collect();
        for (site, track) in component_sites.into_iter().zip(&node.tracks) {
            w.patch_relative(site, node_at)?;
            write_component(w, track, wide_frames, clip.float_precision)?;
        }
    }
    w.write_zeros(ANIMATION_TRAILER);
    Ok(())
}

fn write_component(
    w: &mut ByteWriter,
    track: &KeyframeTrack,
    wide_frames: bool,
    precision: FloatPrecision,
) -> Result<()> {
    let at = w.position();
    w.write_u8(track.channel.raw());
    w.write_u8(track.flags);
    w.write_i16(track.unknown_02);
    w.write_u32(track.keyframes.len() as u32);
    let frames_site = w.reserve_u32("keyframe indices");
    let values_site = w.reserve_u32("keyframe values");

    w.patch_relative(frames_site, at)?;
    for key in &track.keyframes {
        if wide_frames {
            w.write_u16(key.frame as u16);
        } else {
            w.write_u8(key.frame as u8);
        }
    }
    w.align(16);
    w.patch_relative(values_site, at)?;
    for key in &track.keyframes {
        for v in key.value {
            match precision {
                FloatPrecision::Half => w.write_f16(v),
                FloatPrecision::Single => w.write_f32(v),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Transform;
    use crate::skeleton::Bone;

    fn skeleton() -> Skeleton {
        Skeleton::new(vec![
            Bone::new("CHR", None, Transform::IDENTITY),
            Bone::new("b_C_Base", Some(0), Transform::IDENTITY),
            Bone::new("b_C_Head", Some(1), Transform::IDENTITY),
        ])
    }

    fn clip(name: &str, index: u32, bone: usize) -> AnimationClip {
        let mut clip = AnimationClip::new(name, index);
        clip.node_mut(bone).tracks.push(KeyframeTrack::new(
            Channel::Position,
            vec![
                Keyframe::new(0, [0.0, 0.0, 0.0, 1.0]),
                Keyframe::new(10, [0.5, 1.0, 0.0, 1.0]),
            ],
        ));
        clip
    }

    #[test]
    fn clips_come_back_with_names_and_keys() {
        let mut file = EanFile::new(skeleton());
        file.clips.push(clip("Idle", 0, 2));
        let bytes = encode_ean(&file).unwrap();
        let decoded = decode_ean(&bytes).unwrap();
        assert!(decoded.warnings.is_empty());
        let back = decoded.value;
        assert_eq!(back.clips.len(), 1);
        let idle = &back.clips[0];
        assert_eq!(idle.name, "Idle");
        assert_eq!(idle.frame_count, 11);
        assert_eq!(idle.nodes[0].bone_name, "b_C_Head");
        let track = idle.nodes[0].track(Channel::Position).unwrap();
        assert_eq!(track.keyframes[1].frame, 10);
        assert_eq!(track.keyframes[1].value, [0.5, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn gaps_in_indices_stay_empty() {
        let mut file = EanFile::new(skeleton());
        file.clips.push(clip("B", 3, 1));
        file.clips.push(clip("A", 1, 1));
        let bytes = encode_ean(&file).unwrap();
        assert_eq!(u16::from_le_bytes([bytes[18], bytes[19]]), 4);
        let back = decode_ean(&bytes).unwrap().value;
        let indices: Vec<_> = back.clips.iter().map(|c| (c.index, c.name.as_str())).collect();
        assert_eq!(indices, vec![(1, "A"), (3, "B")]);
    }

    #[test]
    fn duplicate_index_is_rejected() {
        let mut file = EanFile::new(skeleton());
        file.clips.push(clip("A", 2, 1));
        file.clips.push(clip("B", 2, 1));
        assert!(matches!(encode_ean(&file), Err(CodecError::CorruptOutput(_))));
    }

    #[test]
    fn long_clips_use_wide_frames() {
        let mut file = EanFile::new(skeleton());
        let mut long = clip("Long", 0, 1);
        long.nodes[0].tracks[0].keyframes.push(Keyframe::new(400, [1.0; 4]));
        long.float_precision = FloatPrecision::Single;
        file.clips.push(long);
        let bytes = encode_ean(&file).unwrap();
        let back = decode_ean(&bytes).unwrap().value;
        let track = &back.clips[0].nodes[0].tracks[0];
        assert_eq!(track.last_frame(), Some(400));
        assert_eq!(back.clips[0].float_precision, FloatPrecision::Single);
    }

    #[test]
    fn curves_need_auto_bake() {
        let mut file = EanFile::new(skeleton());
        let mut spin = AnimationClip::new("Spin", 0);
        spin.curves.push(crate::animation::ChannelCurve::new(1, Channel::Scale, 0..=3, |f| {
            [1.0 + f, 1.0, 1.0, 1.0]
        }));
        file.clips.push(spin);
        assert!(matches!(
            encode_ean(&file),
            Err(CodecError::UnsupportedEncoding(_))
        ));

        let options = ExportOptions {
            auto_bake: true,
            insert_dummy_keyframes: false,
        };
        let bytes = encode_ean_with(&file, &options).unwrap();
        let back = decode_ean(&bytes).unwrap().value;
        let track = back.clips[0].nodes[0].track(Channel::Scale).unwrap();
        assert_eq!(track.keyframes.len(), 4);
        assert_eq!(track.keyframes[3].value[0], 4.0);
    }

    #[test]
    fn node_past_skeleton_is_rejected() {
        let mut file = EanFile::new(skeleton());
        file.clips.push(clip("Bad", 0, 7));
        assert!(matches!(
            encode_ean(&file),
            Err(CodecError::BoneIndexOutOfRange { index: 7, .. })
        ));
    }

    #[test]
    fn unknown_component_kind_warns() {
        let mut file = EanFile::new(skeleton());
        let mut odd = clip("Odd", 0, 1);
        odd.nodes[0].tracks[0].channel = Channel::Unknown(5);
        file.clips.push(odd);
        let bytes = encode_ean(&file).unwrap();
        let decoded = decode_ean(&bytes).unwrap();
        assert!(decoded.warnings.has(WarningKind::UnknownComponent));
        assert_eq!(decoded.value.clips[0].nodes[0].tracks[0].channel, Channel::Unknown(5));
    }

    #[test]
    fn push_clip_assigns_next_index() {
        let mut file = EanFile::new(skeleton());
        file.clips.push(clip("A", 4, 1));
        assert_eq!(file.push_clip(clip("New", 0, 1)), 5);
        assert_eq!(file.clip_by_index(5).unwrap().name, "New");
    }
}
