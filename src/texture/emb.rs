//! EMB texture containers.
//!
//! ```text
//! header (32 bytes)
//!   magic "#EMB" | 0xFFFE | header_size u16 | version u16 | u16
//!   entry_count u32 | 8 reserved bytes | contents_offset u32 | names_offset u32
//! contents: entry_count × (data_rel u32 relative to the entry, size u32)
//! names:    entry_count × absolute string offset u32
//! ```

use std::path::{Path, PathBuf};

use binrw::binrw;

use super::dds::{decode_dds, parse_dds_header, DDS_MAGIC};
use super::namespace::{build_image_name, emb_stem_from_path, is_dyt_path};
use super::palette::split_palette;
use super::{
    ImageEncoding, ImagePayload, ImportNamespace, NameOwner, SourceId, TextureContainer,
    TextureEntry,
};
use crate::config::ImportOptions;
use crate::cursor::{ByteReader, FixedRecord};
use crate::error::{CodecError, Decoded, Result, WarningKind, Warnings};

pub const EMB_MAGIC: [u8; 4] = *b"#EMB";
pub const ENDIAN_MARK: u16 = 0xFFFE;
pub const EMB_HEADER_SIZE: u16 = 32;

const ENTRY_SIZE: usize = 8;

#[binrw]
#[derive(Debug, Clone)]
#[brw(little, magic = b"#EMB")]
pub struct EmbHeader {
    pub endian: u16,
    pub header_size: u16,
    pub version: u16,
    pub unknown_0a: u16,
    pub entry_count: u32,
    pub reserved: [u32; 2],
    pub contents_offset: u32,
    pub names_offset: u32,
}

impl FixedRecord for EmbHeader {
    const SIZE: usize = 32;
}

#[binrw]
#[derive(Debug, Clone, Copy)]
#[brw(little)]
struct EntryRecord {
    data_rel: u32,
    size: u32,
}

impl FixedRecord for EntryRecord {
    const SIZE: usize = ENTRY_SIZE;
}

/// Decode a container with a fresh namespace of its own.
pub fn decode_emb(
    data: &[u8],
    source_path: &str,
    options: &ImportOptions,
) -> Result<Decoded<TextureContainer>> {
    let mut namespace = ImportNamespace::new();
    decode_emb_in(data, source_path, options, &mut namespace)
}

/// Decode a container, claiming texture names in a caller-owned namespace.
pub fn decode_emb_in(
    data: &[u8],
    source_path: &str,
    options: &ImportOptions,
    namespace: &mut ImportNamespace,
) -> Result<Decoded<TextureContainer>> {
    let mut warnings = Warnings::new();
    // some containers carry leading bytes; offsets are relative to the signature
    let start = match data.windows(4).position(|w| w == EMB_MAGIC) {
        Some(start) => start,
        None if data.len() < 4 => 0,
        None => return Err(CodecError::unrecognized("EMB", "no #EMB signature")),
    };
    if start > 0 {
        tracing::debug!(start, "EMB signature found past the start of the buffer");
    }
    let data = &data[start..];
    let mut reader = ByteReader::new(data);
    let header: EmbHeader = reader.read_record()?;
    if header.endian != ENDIAN_MARK {
        return Err(CodecError::UnsupportedEncoding(format!(
            "EMB endian mark {:#06x}",
            header.endian
        )));
    }
    if header.header_size != EMB_HEADER_SIZE {
        warnings.push(
            WarningKind::VersionDrift,
            format!(
                "EMB header size {} differs from {}",
                header.header_size, EMB_HEADER_SIZE
            ),
        );
    }

    let count = header.entry_count as usize;
    let contents_at = header.contents_offset as usize;
    let names_at = header.names_offset as usize;
    reader.require(contents_at, count * ENTRY_SIZE)?;
    if names_at != 0 {
        reader.require(names_at, count * 4)?;
    }

    let source = SourceId::from_path(source_path);
    let source_stem = emb_stem_from_path(source_path);
    let is_palette = is_dyt_path(source_path);
    tracing::debug!(count, %source, is_palette, "decoding EMB");

    let mut entries = Vec::with_capacity(count);
    for index in 0..count {
        let entry_at = contents_at + index * ENTRY_SIZE;
        reader.seek(entry_at)?;
        let record: EntryRecord = reader.read_record()?;
        let data_at = entry_at + record.data_rel as usize;
        reader.seek(data_at)?;
        let bytes = reader.read_bytes(record.size as usize)?;

        let stored_name = if names_at != 0 {
            reader.seek(names_at + index * 4)?;
            let name_at = reader.read_u32()? as usize;
            reader.read_string_at(name_at)?
        } else {
            String::new()
        };
        let entry_name = if stored_name.is_empty() {
            format!("DATA{:03}.dds", index)
        } else {
            stored_name
        };

        let payload = decode_image(bytes, &entry_name, &mut warnings)?;
        let clean = build_image_name(&source_stem, &entry_name, index);
        let name = namespace.claim(&clean, NameOwner::entry(source, index));
        tracing::trace!(index, %entry_name, %name, "texture entry");

        let mut entry = TextureEntry {
            index,
            entry_name,
            name,
            payload,
            variants: Vec::new(),
            preferred: None,
        };
        if is_palette {
            attach_variants(&mut entry, source, options, namespace, &mut warnings);
        }
        entries.push(entry);
    }

    Ok(Decoded::new(
        TextureContainer {
            version: header.version,
            unknown_0a: header.unknown_0a,
            source,
            source_stem,
            is_palette,
            entries,
        },
        warnings,
    ))
}

fn attach_variants(
    entry: &mut TextureEntry,
    source: SourceId,
    options: &ImportOptions,
    namespace: &mut ImportNamespace,
    warnings: &mut Warnings,
) {
    let Some(image) = entry.payload.image() else {
        return;
    };
    let mut variants = split_palette(image, &entry.name);
    for variant in variants.iter_mut() {
        variant.name = namespace.claim(
            &variant.name,
            NameOwner::variant(source, entry.index, variant.dyt_index),
        );
    }
    if variants.is_empty() {
        return;
    }
    entry.preferred = match variants.iter().position(|v| v.dyt_index == options.dyt_index) {
        Some(i) => Some(i),
        None => {
            warnings.push(
                WarningKind::DytIndexOutOfRange,
                format!(
                    "DYT index {} is outside the {} rows of '{}', using row 0",
                    options.dyt_index,
                    variants.len(),
                    entry.entry_name
                ),
            );
            Some(0)
        }
    };
    entry.variants = variants;
}

fn unsupported(
    bytes: &[u8],
    encoding: impl Into<String>,
    label: &str,
    warnings: &mut Warnings,
) -> ImagePayload {
    let encoding = encoding.into();
    warnings.push(
        WarningKind::UnsupportedImage,
        format!("texture '{}' uses unsupported encoding {}", label, encoding),
    );
    ImagePayload::Unsupported {
        encoding,
        raw: bytes.to_vec(),
    }
}

/// Decode one embedded image. Truncated DDS surfaces are fatal; anything that is
/// merely not understood comes back as [`ImagePayload::Unsupported`].
fn decode_image(bytes: &[u8], label: &str, warnings: &mut Warnings) -> Result<ImagePayload> {
    if bytes.is_empty() {
        return Ok(unsupported(bytes, "empty", label, warnings));
    }

    if let Some(start) = bytes.windows(4).position(|w| w == DDS_MAGIC) {
        let dds = &bytes[start..];
        let header = match parse_dds_header(dds) {
            Ok(header) => header,
            Err(CodecError::UnrecognizedFormat { reason, .. }) => {
                return Ok(unsupported(bytes, format!("DDS ({})", reason), label, warnings));
            }
            Err(err) => return Err(err),
        };
        let format = match &header.format {
            Ok(format) => *format,
            Err(description) => {
                return Ok(unsupported(bytes, format!("DDS {}", description), label, warnings));
            }
        };
        return Ok(match decode_dds(dds, &header, format)? {
            Some(image) => ImagePayload::Decoded {
                encoding: ImageEncoding::Dds(format),
                image,
            },
            None => unsupported(bytes, format!("DDS {:?}", format), label, warnings),
        });
    }

    match image::guess_format(bytes) {
        Ok(format) => match image::load_from_memory_with_format(bytes, format) {
            Ok(decoded) => Ok(ImagePayload::Decoded {
                encoding: ImageEncoding::Other(format),
                image: decoded.to_rgba8(),
            }),
            Err(err) => {
                tracing::debug!(label, %err, "image decoder failed");
                Ok(unsupported(bytes, format!("{:?}", format), label, warnings))
            }
        },
        Err(_) => Ok(unsupported(bytes, "unknown", label, warnings)),
    }
}

/// A texture container that may belong to a mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbCandidate {
    pub path: PathBuf,
    pub is_palette: bool,
}

/// Containers the game pairs with a mesh file, most specific first.
pub fn emb_candidates(mesh_path: &Path) -> Vec<EmbCandidate> {
    let folder = mesh_path.parent().unwrap_or_else(|| Path::new(""));
    let stem = mesh_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let char_code = stem.split('_').next().unwrap_or(&stem).to_string();

    let mut out = Vec::new();
    let mut push = |name: String, is_palette: bool| {
        out.push(EmbCandidate {
            path: folder.join(name),
            is_palette,
        });
    };
    for base in [stem.as_str(), char_code.as_str()] {
        push(format!("{}.emb", base), false);
        push(format!("{}_dyt.emb", base), true);
        push(format!("{}.dyt.emb", base), true);
    }
    push(format!("{}_000.emb", char_code), false);
    push(format!("{}_000_dyt.emb", char_code), true);
    push(format!("{}_000.dyt.emb", char_code), true);
    out
}

/// First existing main container and first existing palette container.
pub fn locate_emb_files(mesh_path: &Path) -> (Option<PathBuf>, Option<PathBuf>) {
    let mut main = None;
    let mut palette = None;
    for candidate in emb_candidates(mesh_path) {
        if !candidate.path.is_file() {
            continue;
        }
        let slot = if candidate.is_palette {
            &mut palette
        } else {
            &mut main
        };
        if slot.is_none() {
            *slot = Some(candidate.path);
        }
    }
    (main, palette)
}
