//! EMM material libraries. Decode only.
//!
//! ```text
//! header: magic "#EMM" | 0xFFFE | header_size u16 | version u32 | table_offset u32
//! table:  count u32 | count × entry_rel u32 (0 = empty slot)
//! entry:  name[32] | shader[32] | param_count i16 | u16 | params...
//! param:  name[32] | type i32 | value (4 bytes)
//! ```
//!
//! Entry offsets are relative to the low half of `table_offset`, which is also the
//! header size in every known file.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::cursor::ByteReader;
use crate::error::{CodecError, Decoded, Result, Warnings};

pub const EMM_MAGIC: [u8; 4] = *b"#EMM";
pub const ENDIAN_MARK: u16 = 0xFFFE;

const NAME_LEN: usize = 32;
const PARAMS_REL: usize = 68;
const PARAM_SIZE: usize = 40;

pub const PARAM_FLOAT: i32 = 0;
pub const PARAM_INT: i32 = 0x0001_0001;
pub const PARAM_FLOAT2: i32 = 0x0002_0002;
pub const PARAM_BOOL: i32 = 0x0003_0003;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Float(f32),
    Int(i32),
    Bool(bool),
}

impl ParamValue {
    fn decode(kind: i32, raw: [u8; 4]) -> ParamValue {
        let int = i32::from_le_bytes(raw);
        match kind {
            PARAM_FLOAT | PARAM_FLOAT2 => ParamValue::Float(f32::from_le_bytes(raw)),
            PARAM_BOOL if int == 0 || int == 1 => ParamValue::Bool(int == 1),
            _ => ParamValue::Int(int),
        }
    }

    pub fn as_f32(&self) -> f32 {
        match *self {
            ParamValue::Float(v) => v,
            ParamValue::Int(v) => v as f32,
            ParamValue::Bool(v) => f32::from(u8::from(v)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaterialParam {
    pub name: String,
    pub kind: i32,
    pub value: ParamValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Material {
    pub name: String,
    pub shader: String,
    pub params: Vec<MaterialParam>,
}

impl Material {
    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.iter().find(|p| p.name == name).map(|p| &p.value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaterialLibrary {
    pub version: u32,
    pub materials: Vec<Material>,
}

impl MaterialLibrary {
    pub fn material(&self, name: &str) -> Option<&Material> {
        self.materials.iter().find(|m| m.name == name)
    }
}

pub fn decode_emm(data: &[u8]) -> Result<Decoded<MaterialLibrary>> {
    let mut reader = ByteReader::new(data);
    if data.len() >= 4 && data[..4] != EMM_MAGIC {
        return Err(CodecError::unrecognized("EMM", "magic is not #EMM"));
    }
    reader.skip(4)?;
    let endian = reader.read_u16()?;
    if endian != ENDIAN_MARK {
        return Err(CodecError::UnsupportedEncoding(format!(
            "EMM endian mark {:#06x}",
            endian
        )));
    }
    reader.skip(2)?;
    let version = reader.read_u32()?;
    let table_at = reader.read_u32()? as usize;
    let base = table_at & 0xFFFF;

    reader.seek(table_at)?;
    let count = reader.read_u32()? as usize;
    reader.require(reader.position(), count * 4)?;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        entries.push(reader.read_u32()? as usize);
    }

    let mut materials = Vec::new();
    for (slot, rel) in entries.into_iter().enumerate() {
        if rel == 0 {
            continue;
        }
        let material = read_material(&mut reader, base + rel)?;
        tracing::trace!(slot, name = %material.name, params = material.params.len(), "material");
        materials.push(material);
    }
    tracing::debug!(materials = materials.len(), "decoded EMM");

    Ok(Decoded::new(MaterialLibrary { version, materials }, Warnings::new()))
}

fn read_material(reader: &mut ByteReader<'_>, at: usize) -> Result<Material> {
    reader.seek(at)?;
    let name = reader.read_fixed_string(NAME_LEN)?;
    let shader = reader.read_fixed_string(NAME_LEN)?;
    let count = reader.read_i16()?;
    if count < 0 {
        return Err(CodecError::unrecognized(
            "EMM",
            format!("material {} has parameter count {}", name, count),
        ));
    }
    let count = count as usize;
    let params_at = at + PARAMS_REL;
    reader.require(params_at, count * PARAM_SIZE)?;
    reader.seek(params_at)?;

    let mut params = Vec::with_capacity(count);
    for _ in 0..count {
        let name = reader.read_fixed_string(NAME_LEN)?;
        let kind = reader.read_i32()?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(reader.read_bytes(4)?);
        params.push(MaterialParam {
            name,
            kind,
            value: ParamValue::decode(kind, raw),
        });
    }
    Ok(Material { name, shader, params })
}

/// `{stem}.emm` next to the mesh, if it exists.
pub fn locate_emm(mesh_path: &Path) -> Option<PathBuf> {
    let stem = mesh_path.file_stem()?.to_str()?;
    let candidate = mesh_path.with_file_name(format!("{stem}.emm"));
    candidate.is_file().then_some(candidate)
}
