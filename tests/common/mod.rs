// Common test utilities and builders shared by the integration tests
#![allow(dead_code)]

use xv2_tools_lib::math::Transform;
use xv2_tools_lib::mesh::emd::EmdFile;
use xv2_tools_lib::mesh::{Aabb, InfluenceVertex, Mesh, Model, Submesh};
use xv2_tools_lib::skeleton::{Bone, Skeleton};

/// Small character skeleton with non-trivial transforms and a thumb bone.
pub fn humanoid() -> Skeleton {
    let t = |x: f32, y: f32, z: f32| Transform {
        translation: [x, y, z],
        rotation: [0.0, 0.0, 0.0, 1.0],
        scale: [1.0, 1.0, 1.0],
    };
    let mut tilted = t(0.0, 0.1, 0.0);
    tilted.rotation = [0.0, 0.38268343, 0.0, 0.92387953];
    let mut scaled = t(0.05, 0.0, 0.02);
    scaled.scale = [0.9, 0.9, 0.9];

    Skeleton::new(vec![
        Bone::new("b_C_Base", None, t(0.0, 0.0, 0.0)),
        Bone::new("b_C_Pelvis", Some(0), t(0.0, 0.95, 0.0)),
        Bone::new("b_C_Spine1", Some(1), tilted),
        Bone::new("b_C_Chest", Some(2), t(0.0, 0.2, 0.01)),
        Bone::new("b_R_Hand", Some(3), t(-0.45, 0.1, 0.0)),
        Bone::new("b_R_Thumb1", Some(4), scaled),
    ])
}

pub fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(bytes[at..at + 4].try_into().expect("4 bytes"))
}

/// Overwrite bone parents inside an encoded ESK file.
pub fn set_esk_parents(bytes: &mut [u8], parents: &[(usize, i16)]) {
    let block = read_u32(bytes, 16) as usize;
    let links = block + read_u32(bytes, block + 4) as usize;
    for &(bone, parent) in parents {
        let at = links + bone * 8;
        bytes[at..at + 2].copy_from_slice(&parent.to_le_bytes());
    }
}

pub fn corner(position: [f32; 3], influences: &[(&str, f32)]) -> InfluenceVertex {
    InfluenceVertex {
        position,
        normal: [0.0, 0.0, 1.0],
        uv: [position[0], position[1]],
        color: [255, 255, 255, 255],
        influences: influences
            .iter()
            .map(|(name, w)| (name.to_string(), *w))
            .collect(),
        ..Default::default()
    }
}

/// One model holding one mesh holding `sub`.
pub fn single_submesh_file(sub: Submesh) -> EmdFile {
    let mut file = EmdFile::new(vec![Model {
        name: "body".into(),
        flags: 0,
        meshes: vec![Mesh {
            name: "body_mesh".into(),
            aabb: Aabb::default(),
            flags: 0,
            submeshes: vec![sub],
        }],
    }]);
    file.recompute_bounds();
    file
}

/// Uncompressed 32-bit RGBA DDS.
pub fn rgba_dds(width: u32, height: u32, pixel: impl Fn(u32, u32) -> [u8; 4]) -> Vec<u8> {
    let mut out = vec![0u8; 128];
    out[0..4].copy_from_slice(b"DDS ");
    out[4..8].copy_from_slice(&124u32.to_le_bytes());
    out[8..12].copy_from_slice(&0x100Fu32.to_le_bytes());
    out[12..16].copy_from_slice(&height.to_le_bytes());
    out[16..20].copy_from_slice(&width.to_le_bytes());
    out[28..32].copy_from_slice(&1u32.to_le_bytes());
    out[76..80].copy_from_slice(&32u32.to_le_bytes());
    out[80..84].copy_from_slice(&0x41u32.to_le_bytes());
    out[88..92].copy_from_slice(&32u32.to_le_bytes());
    out[92..96].copy_from_slice(&0x0000_00FFu32.to_le_bytes());
    out[96..100].copy_from_slice(&0x0000_FF00u32.to_le_bytes());
    out[100..104].copy_from_slice(&0x00FF_0000u32.to_le_bytes());
    out[104..108].copy_from_slice(&0xFF00_0000u32.to_le_bytes());
    for y in 0..height {
        for x in 0..width {
            out.extend_from_slice(&pixel(x, y));
        }
    }
    out
}

/// EMB container with the given (name, payload) entries.
pub fn build_emb(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let count = entries.len();
    let contents_at = 32usize;
    let names_at = contents_at + count * 8;
    let mut strings_at = names_at + count * 4;
    let mut name_offsets = Vec::new();
    let mut strings = Vec::new();
    for (name, _) in entries {
        name_offsets.push(strings_at as u32);
        strings.extend_from_slice(name.as_bytes());
        strings.push(0);
        strings_at += name.len() + 1;
    }
    let mut data_at = (strings_at + 15) & !15;

    let mut out = Vec::new();
    out.extend_from_slice(b"#EMB");
    out.extend_from_slice(&0xFFFEu16.to_le_bytes());
    out.extend_from_slice(&32u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(count as u32).to_le_bytes());
    out.extend_from_slice(&[0u8; 8]);
    out.extend_from_slice(&(contents_at as u32).to_le_bytes());
    out.extend_from_slice(&(names_at as u32).to_le_bytes());

    let mut payload = Vec::new();
    for (i, (_, bytes)) in entries.iter().enumerate() {
        let entry_at = contents_at + i * 8;
        out.extend_from_slice(&((data_at - entry_at) as u32).to_le_bytes());
        out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        payload.extend_from_slice(bytes);
        data_at += bytes.len();
    }
    for offset in name_offsets {
        out.extend_from_slice(&offset.to_le_bytes());
    }
    out.extend_from_slice(&strings);
    out.resize((out.len() + 15) & !15, 0);
    out.extend_from_slice(&payload);
    out
}

/// Describe the first byte difference between two buffers with a little context,
/// or `None` when they are identical.
pub fn diff_bytes(expected: &[u8], actual: &[u8]) -> Option<String> {
    let first = expected
        .iter()
        .zip(actual)
        .position(|(a, b)| a != b)
        .or_else(|| (expected.len() != actual.len()).then(|| expected.len().min(actual.len())))?;
    let from = first.saturating_sub(4);
    let window = |bytes: &[u8]| -> String {
        bytes[from.min(bytes.len())..(first + 8).min(bytes.len())]
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(" ")
    };
    Some(format!(
        "first difference at {:#x} (lengths {} vs {})\n  expected: {}\n  actual:   {}",
        first,
        expected.len(),
        actual.len(),
        window(expected),
        window(actual)
    ))
}

/// Assert two buffers are byte-identical, printing the first difference otherwise.
pub fn assert_same_bytes(expected: &[u8], actual: &[u8]) {
    if let Some(report) = diff_bytes(expected, actual) {
        panic!("buffers differ: {}", report);
    }
}
