//! EMD model files.
//!
//! ```text
//! header (28 bytes)
//!   magic "#EMD" | 0xFFFE | header_size u16 | version u32 | 6 reserved bytes
//!   model_count u16 | model_table u32 | model_name_table u32
//! model      flags u16 | mesh_count u16 | mesh_table_rel u32          (rel to model)
//! mesh       aabb 3×vec4 | name_rel | flags u16 | submesh_count u16
//!            submesh_table_rel                                        (rel to mesh)
//! submesh    aabb 3×vec4 | vertex_flags | vertex_size | vertex_count
//!            vertex_rel | name_rel | u8 | sampler_count u8
//!            group_count u16 | sampler_rel | group_table_rel         (rel to submesh)
//! group      index_count | bone_count | index_rel | bone_table_rel   (rel to group)
//! ```

use binrw::binrw;
use tracing::{debug, info};

use super::sharp::{detect_sharp_edges, split_sharp_edges};
use super::vertex::{read_vertex, write_vertex};
use super::{
    Aabb, Mesh, Model, Sampler, Submesh, Topology, TriangleGroup, Vertex, VertexFlags,
    WEIGHT_TOLERANCE,
};
use crate::cursor::{ByteReader, ByteWriter, FixedRecord};
use crate::error::{CodecError, Decoded, Result, WarningKind, Warnings};
use crate::skeleton::Skeleton;

pub const EMD_MAGIC: [u8; 4] = *b"#EMD";
pub const ENDIAN_MARK: u16 = 0xFFFE;
pub const EMD_HEADER_SIZE: u16 = 28;
pub const DEFAULT_EMD_VERSION: u32 = 0x201;
pub const KNOWN_EMD_VERSIONS: &[u32] = &[DEFAULT_EMD_VERSION];

/// Half-float weights may overshoot one by a few ulps; within this slack the implied
/// last weight is treated as zero.
const HALF_WEIGHT_SLACK: f32 = 2e-3;
const NULL_BONE_NAME: &str = "NULL";

#[binrw]
#[derive(Debug, Clone)]
#[brw(little, magic = b"#EMD")]
struct EmdHeader {
    endian: u16,
    header_size: u16,
    version: u32,
    reserved: [u8; 6],
    model_count: u16,
    model_table: u32,
    model_name_table: u32,
}

impl FixedRecord for EmdHeader {
    const SIZE: usize = 28;
}

#[binrw]
#[derive(Debug, Clone)]
#[brw(little)]
struct ModelHeader {
    flags: u16,
    mesh_count: u16,
    mesh_table_rel: u32,
}

impl FixedRecord for ModelHeader {
    const SIZE: usize = 8;
}

#[binrw]
#[derive(Debug, Clone, Copy)]
#[brw(little)]
struct AabbRecord {
    center: [f32; 4],
    min: [f32; 4],
    max: [f32; 4],
}

impl From<AabbRecord> for Aabb {
    fn from(r: AabbRecord) -> Self {
        Aabb {
            center: r.center,
            min: r.min,
            max: r.max,
        }
    }
}

impl From<&Aabb> for AabbRecord {
    fn from(a: &Aabb) -> Self {
        AabbRecord {
            center: a.center,
            min: a.min,
            max: a.max,
        }
    }
}

impl FixedRecord for AabbRecord {
    const SIZE: usize = 48;
}

#[binrw]
#[derive(Debug, Clone)]
#[brw(little)]
struct MeshHeader {
    aabb: AabbRecord,
    name_rel: u32,
    flags: u16,
    submesh_count: u16,
    submesh_table_rel: u32,
}

impl FixedRecord for MeshHeader {
    const SIZE: usize = 60;
}

#[binrw]
#[derive(Debug, Clone)]
#[brw(little)]
struct SubmeshHeader {
    aabb: AabbRecord,
    vertex_flags: u32,
    vertex_size: u32,
    vertex_count: u32,
    vertex_rel: u32,
    name_rel: u32,
    unknown_68: u8,
    sampler_count: u8,
    group_count: u16,
    sampler_rel: u32,
    group_table_rel: u32,
}

impl FixedRecord for SubmeshHeader {
    const SIZE: usize = 80;
}

#[binrw]
#[derive(Debug, Clone)]
#[brw(little)]
struct GroupHeader {
    index_count: u32,
    bone_count: u32,
    index_rel: u32,
    bone_table_rel: u32,
}

impl FixedRecord for GroupHeader {
    const SIZE: usize = 16;
}

#[binrw]
#[derive(Debug, Clone, Copy)]
#[brw(little)]
struct SamplerRecord {
    flag0: u8,
    texture_index: u8,
    /// v << 4 | u
    address: u8,
    /// mag << 4 | min
    filter: u8,
    scale_u: f32,
    scale_v: f32,
}

impl FixedRecord for SamplerRecord {
    const SIZE: usize = 12;
}

impl From<SamplerRecord> for Sampler {
    fn from(r: SamplerRecord) -> Self {
        Sampler {
            flag0: r.flag0,
            texture_index: r.texture_index,
            address_u: (r.address & 0x0F).into(),
            address_v: (r.address >> 4).into(),
            filter_min: (r.filter & 0x0F).into(),
            filter_mag: (r.filter >> 4).into(),
            scale_u: r.scale_u,
            scale_v: r.scale_v,
        }
    }
}

impl From<&Sampler> for SamplerRecord {
    fn from(s: &Sampler) -> Self {
        let nibble = |v: u8| v & 0x0F;
        SamplerRecord {
            flag0: s.flag0,
            texture_index: s.texture_index,
            address: nibble(s.address_v.into()) << 4 | nibble(s.address_u.into()),
            filter: nibble(s.filter_mag.into()) << 4 | nibble(s.filter_min.into()),
            scale_u: s.scale_u,
            scale_v: s.scale_v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EmdFile {
    pub version: u32,
    pub models: Vec<Model>,
}

impl EmdFile {
    pub fn new(models: Vec<Model>) -> Self {
        Self {
            version: DEFAULT_EMD_VERSION,
            models,
        }
    }

    pub fn submesh_count(&self) -> usize {
        self.models
            .iter()
            .flat_map(|m| &m.meshes)
            .map(|m| m.submeshes.len())
            .sum()
    }

    /// Recompute submesh and mesh bounds from the vertex positions.
    pub fn recompute_bounds(&mut self) {
        for mesh in self.models.iter_mut().flat_map(|m| m.meshes.iter_mut()) {
            for sub in &mut mesh.submeshes {
                sub.recompute_aabb();
            }
            mesh.aabb = Aabb::from_points(
                mesh.submeshes
                    .iter()
                    .flat_map(|s| s.vertices.iter().map(|v| &v.position)),
            );
        }
    }
}

// ============================================================================
// Decode
// ============================================================================

pub fn decode_emd(data: &[u8], skeleton: Option<&Skeleton>) -> Result<Decoded<EmdFile>> {
    let mut warnings = Warnings::new();
    let mut reader = ByteReader::new(data);
    if data.len() >= 4 && data[..4] != EMD_MAGIC {
        return Err(CodecError::unrecognized("EMD", "magic is not #EMD"));
    }
    let header: EmdHeader = reader.read_record()?;
    if header.endian != ENDIAN_MARK {
        return Err(CodecError::UnsupportedEncoding(format!(
            "EMD endian mark {:#06x}",
            header.endian
        )));
    }
    if !KNOWN_EMD_VERSIONS.contains(&header.version) {
        warnings.push(
            WarningKind::VersionDrift,
            format!("EMD version {:#x} is not a known version", header.version),
        );
    }

    let mut models = Vec::with_capacity(header.model_count as usize);
    for i in 0..header.model_count as usize {
        reader.seek(header.model_table as usize + i * 4)?;
        let model_off = reader.read_u32()? as usize;
        if model_off == 0 {
            continue;
        }
        let name = if header.model_name_table != 0 {
            reader.seek(header.model_name_table as usize + i * 4)?;
            let name_off = reader.read_u32()? as usize;
            reader.read_string_at(name_off)?
        } else {
            String::new()
        };
        let model = decode_model(&mut reader, model_off, name, skeleton, &mut warnings)?;
        models.push(model);
    }

    let file = EmdFile {
        version: header.version,
        models,
    };
    info!(
        models = file.models.len(),
        submeshes = file.submesh_count(),
        warnings = warnings.len(),
        "decoded EMD"
    );
    Ok(Decoded::new(file, warnings))
}

fn decode_model(
    reader: &mut ByteReader,
    model_off: usize,
    name: String,
    skeleton: Option<&Skeleton>,
    warnings: &mut Warnings,
) -> Result<Model> {
    reader.seek(model_off)?;
    let header: ModelHeader = reader.read_record()?;
    let mut meshes = Vec::with_capacity(header.mesh_count as usize);
    for m in 0..header.mesh_count as usize {
        reader.seek(model_off + header.mesh_table_rel as usize + m * 4)?;
        let mesh_off = model_off + reader.read_u32()? as usize;
        meshes.push(decode_mesh(reader, mesh_off, skeleton, warnings)?);
    }
    Ok(Model {
        name,
        flags: header.flags,
        meshes,
    })
}

fn decode_mesh(
    reader: &mut ByteReader,
    mesh_off: usize,
    skeleton: Option<&Skeleton>,
    warnings: &mut Warnings,
) -> Result<Mesh> {
    reader.seek(mesh_off)?;
    let header: MeshHeader = reader.read_record()?;
    let name = relative_string(reader, mesh_off, header.name_rel)?;
    let mut submeshes = Vec::with_capacity(header.submesh_count as usize);
    for s in 0..header.submesh_count as usize {
        reader.seek(mesh_off + header.submesh_table_rel as usize + s * 4)?;
        let sub_off = mesh_off + reader.read_u32()? as usize;
        submeshes.push(decode_submesh(reader, sub_off, skeleton, warnings)?);
    }
    debug!(mesh = %name, submeshes = submeshes.len(), "decoded mesh");
    Ok(Mesh {
        name,
        aabb: header.aabb.into(),
        flags: header.flags,
        submeshes,
    })
}

fn relative_string(reader: &ByteReader, base: usize, rel: u32) -> Result<String> {
    if rel == 0 {
        return Ok(String::new());
    }
    reader.read_string_at(base + rel as usize)
}

fn decode_submesh(
    reader: &mut ByteReader,
    sub_off: usize,
    skeleton: Option<&Skeleton>,
    warnings: &mut Warnings,
) -> Result<Submesh> {
    reader.seek(sub_off)?;
    let header: SubmeshHeader = reader.read_record()?;
    let name = relative_string(reader, sub_off, header.name_rel)?;
    let flags = VertexFlags(header.vertex_flags);
    flags.check(header.vertex_size as usize)?;

    let vertex_off = sub_off + header.vertex_rel as usize;
    let vertex_count = header.vertex_count as usize;
    reader.require(vertex_off, vertex_count * flags.vertex_size())?;
    reader.seek(vertex_off)?;
    let mut vertices = Vec::with_capacity(vertex_count);
    for _ in 0..vertex_count {
        vertices.push(read_vertex(reader, flags)?);
    }

    if flags.contains(VertexFlags::BLENDWEIGHT) {
        let invalid = vertices
            .iter_mut()
            .map(|v| {
                v.weights_valid = check_weights(v, flags.is_compressed());
                v.weights_valid
            })
            .filter(|valid| !valid)
            .count();
        if invalid > 0 {
            warnings.push(
                WarningKind::InvalidWeights,
                format!(
                    "submesh '{}': {} of {} vertices have weights that do not sum to 1",
                    name, invalid, vertex_count
                ),
            );
        }
    }

    let mut samplers = Vec::with_capacity(header.sampler_count as usize);
    if header.sampler_count > 0 && header.sampler_rel != 0 {
        reader.seek(sub_off + header.sampler_rel as usize)?;
        for _ in 0..header.sampler_count {
            samplers.push(reader.read_record::<SamplerRecord>()?.into());
        }
    }

    let mut triangle_groups = Vec::with_capacity(header.group_count as usize);
    for g in 0..header.group_count as usize {
        reader.seek(sub_off + header.group_table_rel as usize + g * 4)?;
        let group_off = sub_off + reader.read_u32()? as usize;
        let group = decode_group(reader, group_off)?;
        if let Some(&bad) = group.indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(CodecError::unrecognized(
                "EMD",
                format!(
                    "submesh '{}' triangle index {} past {} vertices",
                    name, bad, vertex_count
                ),
            ));
        }
        triangle_groups.push(group);
    }

    let mut sub = Submesh {
        name,
        vertex_flags: flags,
        aabb: header.aabb.into(),
        vertices,
        triangle_groups,
        samplers,
        sharp_edges: Vec::new(),
        unknown_68: header.unknown_68,
    };
    sub.resolve_skinning(skeleton, warnings)?;
    sub.sharp_edges = detect_sharp_edges(&sub);
    Ok(sub)
}

fn decode_group(reader: &mut ByteReader, group_off: usize) -> Result<TriangleGroup> {
    reader.seek(group_off)?;
    let header: GroupHeader = reader.read_record()?;
    let count = header.index_count as usize;
    let index_off = if header.index_rel != 0 {
        group_off + header.index_rel as usize
    } else {
        group_off + GroupHeader::SIZE
    };
    let wide = count > u16::MAX as usize;
    reader.require(index_off, count * if wide { 4 } else { 2 })?;
    reader.seek(index_off)?;
    let mut indices = Vec::with_capacity(count);
    for _ in 0..count {
        indices.push(if wide {
            reader.read_u32()?
        } else {
            reader.read_u16()? as u32
        });
    }

    let mut bone_names = Vec::with_capacity(header.bone_count as usize);
    if header.bone_count > 0 && header.bone_table_rel != 0 {
        for b in 0..header.bone_count as usize {
            reader.seek(group_off + header.bone_table_rel as usize + b * 4)?;
            let rel = reader.read_u32()?;
            bone_names.push(relative_string(reader, group_off, rel)?);
        }
    }
    Ok(TriangleGroup {
        topology: Topology::List,
        indices,
        bone_names,
    })
}

fn check_weights(v: &mut Vertex, compressed: bool) -> bool {
    let last = v.skin[3].weight;
    if compressed && (-HALF_WEIGHT_SLACK..0.0).contains(&last) {
        let total: f32 = v.skin[..3].iter().map(|s| s.weight).sum();
        if total > 0.0 {
            v.skin[..3].iter_mut().for_each(|s| s.weight /= total);
        }
        v.skin[3].weight = 0.0;
    }
    v.skin.iter().all(|s| s.weight >= -WEIGHT_TOLERANCE)
        && (v.weight_sum() - 1.0).abs() <= WEIGHT_TOLERANCE
}

// ============================================================================
// Encode
// ============================================================================

fn count_u16(n: usize, what: &str) -> Result<u16> {
    u16::try_from(n).map_err(|_| CodecError::CorruptOutput(format!("{} {} exceeds u16", what, n)))
}

fn count_u8(n: usize, what: &str) -> Result<u8> {
    u8::try_from(n).map_err(|_| CodecError::CorruptOutput(format!("{} {} exceeds u8", what, n)))
}

/// Reject what EMD cannot store and bring the submesh into writable shape.
fn prepare_submesh(sub: &Submesh) -> Result<Submesh> {
    if sub.vertex_flags.unknown_bits() != 0 {
        return Err(CodecError::UnsupportedEncoding(format!(
            "submesh '{}' vertex flags {:#x} carry unknown bits",
            sub.name, sub.vertex_flags.0
        )));
    }
    if sub
        .triangle_groups
        .iter()
        .any(|g| g.topology == Topology::Strip)
    {
        return Err(CodecError::UnsupportedEncoding(format!(
            "submesh '{}': EMD stores triangle lists only",
            sub.name
        )));
    }
    let mut out = sub.clone();
    split_sharp_edges(&mut out);
    if out.samplers.is_empty() {
        out.samplers = Sampler::defaults();
    }
    let count = out.vertices.len() as u64;
    for group in &out.triangle_groups {
        if let Some(bad) = group.indices.iter().find(|&&i| i as u64 >= count) {
            return Err(CodecError::CorruptOutput(format!(
                "submesh '{}' references vertex {} of {}",
                out.name, bad, count
            )));
        }
        if group.indices.len() <= u16::MAX as usize
            && group.indices.iter().any(|&i| i > u16::MAX as u32)
        {
            return Err(CodecError::UnsupportedEncoding(format!(
                "submesh '{}': vertex index past 65535 in a 16-bit triangle group",
                out.name
            )));
        }
    }
    Ok(out)
}

pub fn encode_emd(file: &EmdFile) -> Result<Vec<u8>> {
    if let Some(model) = file.models.iter().find(|m| m.is_scd()) {
        return Err(CodecError::UnsupportedEncoding(format!(
            "model '{}' is an scd physics model; scd export is not supported",
            model.name
        )));
    }

    let mut w = ByteWriter::new();
    w.write_bytes(&EMD_MAGIC);
    w.write_u16(ENDIAN_MARK);
    w.write_u16(EMD_HEADER_SIZE);
    w.write_u32(file.version);
    w.write_zeros(6);
    w.write_u16(count_u16(file.models.len(), "model count")?);
    let table = w.reserve_u32("model table");
    let names = w.reserve_u32("model name table");
    w.defer(names, |marks| marks.get("model names").map(|p| p as u32))?;

    w.patch_relative(table, 0)?;
    let model_sites: Vec<_> = (0..file.models.len())
        .map(|i| w.reserve_u32(format!("model {} offset", i)))
        .collect();
    w.align(16);

    for (model, site) in file.models.iter().zip(model_sites) {
        w.align(16);
        let model_off = w.position();
        w.patch_relative(site, 0)?;
        write_model(&mut w, model, model_off)?;
    }

    w.align(4);
    w.mark("model names");
    let name_sites: Vec<_> = (0..file.models.len())
        .map(|i| w.reserve_u32(format!("model {} name", i)))
        .collect();
    for (model, site) in file.models.iter().zip(name_sites) {
        w.patch_relative(site, 0)?;
        w.write_cstring(&model.name);
    }

    let bytes = w.finish()?;
    info!(models = file.models.len(), bytes = bytes.len(), "encoded EMD");
    Ok(bytes)
}

fn write_model(w: &mut ByteWriter, model: &Model, model_off: usize) -> Result<()> {
    w.write_u16(model.flags);
    w.write_u16(count_u16(model.meshes.len(), "mesh count")?);
    w.write_u32(ModelHeader::SIZE as u32);
    let mesh_sites: Vec<_> = (0..model.meshes.len())
        .map(|i| w.reserve_u32(format!("model '{}' mesh {}", model.name, i)))
        .collect();
    w.align(16);

    for (mesh, site) in model.meshes.iter().zip(mesh_sites) {
        w.align(16);
        let mesh_off = w.position();
        w.patch_relative(site, model_off)?;
        write_mesh(w, mesh, mesh_off)?;
    }
    Ok(())
}

fn write_mesh(w: &mut ByteWriter, mesh: &Mesh, mesh_off: usize) -> Result<()> {
    w.write_record(&AabbRecord::from(&mesh.aabb))?;
    let name_site = w.reserve_u32(format!("mesh '{}' name", mesh.name));
    w.write_u16(mesh.flags);
    w.write_u16(count_u16(mesh.submeshes.len(), "submesh count")?);
    let table_site = w.reserve_u32(format!("mesh '{}' submesh table", mesh.name));

    w.patch_relative(name_site, mesh_off)?;
    w.write_cstring(&mesh.name);
    w.align(4);

    w.patch_relative(table_site, mesh_off)?;
    let sub_sites: Vec<_> = (0..mesh.submeshes.len())
        .map(|i| w.reserve_u32(format!("mesh '{}' submesh {}", mesh.name, i)))
        .collect();
    w.align(16);

    for (sub, site) in mesh.submeshes.iter().zip(sub_sites) {
        let prepared = prepare_submesh(sub)?;
        w.align(16);
        let sub_off = w.position();
        w.patch_relative(site, mesh_off)?;
        write_submesh(w, &prepared, sub_off)?;
    }
    Ok(())
}

fn write_submesh(w: &mut ByteWriter, sub: &Submesh, sub_off: usize) -> Result<()> {
    let flags = sub.vertex_flags;
    w.write_record(&AabbRecord::from(&sub.aabb))?;
    w.write_u32(flags.0);
    w.write_u32(flags.vertex_size() as u32);
    w.write_u32(sub.vertices.len() as u32);
    let vertex_site = w.reserve_u32(format!("submesh '{}' vertices", sub.name));
    let name_site = w.reserve_u32(format!("submesh '{}' name", sub.name));
    w.write_u8(sub.unknown_68);
    w.write_u8(count_u8(sub.samplers.len(), "sampler count")?);
    w.write_u16(count_u16(sub.triangle_groups.len(), "triangle group count")?);
    let sampler_site = w.reserve_u32(format!("submesh '{}' samplers", sub.name));
    let group_table_site = w.reserve_u32(format!("submesh '{}' group table", sub.name));

    w.patch_relative(name_site, sub_off)?;
    w.write_cstring(&sub.name);
    w.align(4);

    w.patch_relative(sampler_site, sub_off)?;
    for sampler in &sub.samplers {
        w.write_record(&SamplerRecord::from(sampler))?;
    }

    w.patch_relative(group_table_site, sub_off)?;
    let group_sites: Vec<_> = (0..sub.triangle_groups.len())
        .map(|i| w.reserve_u32(format!("submesh '{}' group {}", sub.name, i)))
        .collect();

    for (group, site) in sub.triangle_groups.iter().zip(group_sites) {
        w.patch_relative(site, sub_off)?;
        write_group(w, group)?;
    }

    w.patch_relative(vertex_site, sub_off)?;
    for v in &sub.vertices {
        write_vertex(w, v, flags);
    }
    debug!(
        submesh = %sub.name,
        vertices = sub.vertices.len(),
        groups = sub.triangle_groups.len(),
        sharp_edges = sub.sharp_edges.len(),
        "encoded submesh"
    );
    Ok(())
}

fn write_group(w: &mut ByteWriter, group: &TriangleGroup) -> Result<()> {
    let start = w.position();
    let count = group.indices.len();
    w.write_u32(count as u32);
    w.write_u32(group.bone_names.len() as u32);
    w.write_u32(if count > 0 { GroupHeader::SIZE as u32 } else { 0 });
    let bone_table = w.reserve_u32("group bone table");

    if count > u16::MAX as usize {
        group.indices.iter().for_each(|&i| w.write_u32(i));
    } else {
        group.indices.iter().for_each(|&i| w.write_u16(i as u16));
    }
    w.align(4);

    if group.bone_names.is_empty() {
        w.patch(bone_table, 0)?;
        return Ok(());
    }
    w.patch_relative(bone_table, start)?;
    let name_sites: Vec<_> = group
        .bone_names
        .iter()
        .map(|name| w.reserve_u32(format!("palette bone '{}'", name)))
        .collect();
    for (name, site) in group.bone_names.iter().zip(name_sites) {
        if name.is_empty() || name == NULL_BONE_NAME {
            w.patch(site, 0)?;
        } else {
            w.patch_relative(site, start)?;
            w.write_cstring(name);
        }
    }
    w.align(4);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Transform;
    use crate::mesh::{SkinSlot, SubmeshBuilder, InfluenceVertex};
    use crate::skeleton::Bone;

    fn skeleton() -> Skeleton {
        Skeleton::new(vec![
            Bone::new("b_C_Base", None, Transform::IDENTITY),
            Bone::new("b_C_Pelvis", Some(0), Transform::IDENTITY),
            Bone::new("b_C_Spine1", Some(1), Transform::IDENTITY),
        ])
    }

    fn corner(p: [f32; 3], infl: &[(&str, f32)]) -> InfluenceVertex {
        InfluenceVertex {
            position: p,
            normal: [0.0, 0.0, 1.0],
            uv: [p[0], p[1]],
            color: [255, 128, 0, 255],
            influences: infl.iter().map(|(n, w)| (n.to_string(), *w)).collect(),
            ..Default::default()
        }
    }

    fn quad_file(flags: VertexFlags) -> EmdFile {
        let mut builder = SubmeshBuilder::new("body_skin", flags);
        let a = corner([0.0, 0.0, 0.0], &[("b_C_Pelvis", 1.0)]);
        let b = corner([1.0, 0.0, 0.0], &[("b_C_Pelvis", 0.75), ("b_C_Spine1", 0.25)]);
        let c = corner([0.0, 1.0, 0.0], &[("b_C_Spine1", 1.0)]);
        let d = corner([1.0, 1.0, 0.0], &[("b_C_Spine1", 0.5), ("b_C_Pelvis", 0.5)]);
        builder.add_triangle(&[a, b.clone(), c.clone()]);
        builder.add_triangle(&[b, d, c]);
        let sub = builder.build();
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

    #[test]
    fn header_fields() {
        let bytes = encode_emd(&quad_file(VertexFlags::SKINNED_COMPRESSED)).unwrap();
        assert_eq!(&bytes[0..4], b"#EMD");
        assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), 0xFFFE);
        assert_eq!(u16::from_le_bytes([bytes[6], bytes[7]]), 28);
        assert_eq!(u32::from_le_bytes(bytes[8..12].try_into().unwrap()), 0x201);
        assert_eq!(u16::from_le_bytes([bytes[18], bytes[19]]), 1);
        assert_eq!(u32::from_le_bytes(bytes[20..24].try_into().unwrap()), 28);
        // first model is 16-aligned
        let model = u32::from_le_bytes(bytes[28..32].try_into().unwrap());
        assert_eq!(model % 16, 0);
    }

    #[test]
    fn decode_restores_structure_and_skinning() {
        let file = quad_file(VertexFlags::SKINNED_COMPRESSED);
        let bytes = encode_emd(&file).unwrap();
        let skel = skeleton();
        let decoded = decode_emd(&bytes, Some(&skel)).unwrap();
        assert!(decoded.warnings.is_empty(), "{:?}", decoded.warnings);

        let model = &decoded.value.models[0];
        assert_eq!(model.name, "body");
        assert_eq!(model.meshes[0].name, "body_mesh");
        let sub = &model.meshes[0].submeshes[0];
        assert_eq!(sub.name, "body_skin");
        assert_eq!(sub.vertices.len(), 4);
        assert_eq!(sub.faces(), file.models[0].meshes[0].submeshes[0].faces());
        assert_eq!(sub.samplers, Sampler::defaults());
        assert_eq!(sub.vertices[1].color, [255, 128, 0, 255]);

        for v in &sub.vertices {
            assert!(v.weights_valid);
            assert!((v.weight_sum() - 1.0).abs() <= WEIGHT_TOLERANCE);
        }
        // b: Pelvis 0.75 in slot 0, Spine1 0.25 in slot 1
        let b = &sub.vertices[1];
        assert_eq!(b.skin[0].bone, Some(1));
        assert_eq!(b.skin[1].bone, Some(2));
        assert!((b.skin[0].weight - 0.75).abs() < 1e-3);
    }

    #[test]
    fn slot_order_survives_round_trip() {
        let mut file = quad_file(VertexFlags(
            VertexFlags::POSITION | VertexFlags::NORMAL | VertexFlags::BLENDWEIGHT,
        ));
        let sub = &mut file.models[0].meshes[0].submeshes[0];
        sub.vertices[0].skin = [
            SkinSlot { palette_index: 1, weight: 0.0, bone: None },
            SkinSlot { palette_index: 0, weight: 0.6, bone: None },
            SkinSlot { palette_index: 0, weight: 0.0, bone: None },
            SkinSlot { palette_index: 1, weight: 0.4, bone: None },
        ];
        let bytes = encode_emd(&file).unwrap();
        let decoded = decode_emd(&bytes, None).unwrap().value;
        let v = &decoded.models[0].meshes[0].submeshes[0].vertices[0];
        let ids: Vec<u8> = v.skin.iter().map(|s| s.palette_index).collect();
        assert_eq!(ids, vec![1, 0, 0, 1]);
        assert!((v.skin[1].weight - 0.6).abs() < 1e-6);
        assert!((v.skin[3].weight - 0.4).abs() < 1e-6);
    }

    #[test]
    fn overweight_vertex_is_flagged_not_rejected() {
        let mut file = quad_file(VertexFlags(
            VertexFlags::POSITION | VertexFlags::BLENDWEIGHT,
        ));
        let sub = &mut file.models[0].meshes[0].submeshes[0];
        sub.vertices[2].skin[0].weight = 0.9;
        sub.vertices[2].skin[1].weight = 0.9;
        sub.vertices[2].skin[1].palette_index = 0;
        let bytes = encode_emd(&file).unwrap();
        let decoded = decode_emd(&bytes, None).unwrap();
        let v = &decoded.value.models[0].meshes[0].submeshes[0].vertices[2];
        assert!(!v.weights_valid);
        assert!(decoded.warnings.has(WarningKind::InvalidWeights));
    }

    #[test]
    fn palette_index_past_skeleton_fails() {
        let mut file = quad_file(VertexFlags(
            VertexFlags::POSITION | VertexFlags::BLENDWEIGHT,
        ));
        let sub = &mut file.models[0].meshes[0].submeshes[0];
        sub.triangle_groups[0].bone_names.clear();
        sub.vertices[0].skin[0].palette_index = 9;
        let bytes = encode_emd(&file).unwrap();
        let err = decode_emd(&bytes, Some(&skeleton())).unwrap_err();
        assert!(matches!(
            err,
            CodecError::BoneIndexOutOfRange { index: 9, bone_count: 3, .. }
        ));
    }

    #[test]
    fn strips_and_scd_models_are_not_exported() {
        let mut file = quad_file(VertexFlags::SKINNED_COMPRESSED);
        let group = &mut file.models[0].meshes[0].submeshes[0].triangle_groups[0];
        *group = group.to_strip();
        assert!(matches!(
            encode_emd(&file),
            Err(CodecError::UnsupportedEncoding(_))
        ));

        let mut file = quad_file(VertexFlags::SKINNED_COMPRESSED);
        file.models[0].meshes[0].submeshes[0].triangle_groups[0].bone_names =
            vec!["scd_hair_00".into(), "scd_hair_01".into()];
        assert!(matches!(
            encode_emd(&file),
            Err(CodecError::UnsupportedEncoding(msg)) if msg.contains("scd")
        ));
    }

    #[test]
    fn unknown_vertex_flags_fail_decode() {
        let file = quad_file(VertexFlags(VertexFlags::POSITION));
        let mut bytes = encode_emd(&file).unwrap();
        // locate the submesh through the tables and flip an unknown bit
        let model = u32::from_le_bytes(bytes[28..32].try_into().unwrap()) as usize;
        let mesh = model + u32::from_le_bytes(bytes[model + 8..model + 12].try_into().unwrap()) as usize;
        let table = mesh + u32::from_le_bytes(bytes[mesh + 56..mesh + 60].try_into().unwrap()) as usize;
        let sub = mesh + u32::from_le_bytes(bytes[table..table + 4].try_into().unwrap()) as usize;
        bytes[sub + 48] |= 0x10;
        assert!(matches!(
            decode_emd(&bytes, None),
            Err(CodecError::UnsupportedEncoding(_))
        ));
    }

    #[test]
    fn wrong_magic_is_unrecognized() {
        let mut bytes = encode_emd(&quad_file(VertexFlags::SKINNED_COMPRESSED)).unwrap();
        bytes[1] = b'X';
        assert!(matches!(
            decode_emd(&bytes, None),
            Err(CodecError::UnrecognizedFormat { .. })
        ));
    }
}
