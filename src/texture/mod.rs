pub mod dds;
pub mod emb;
pub mod namespace;
pub mod palette;

use image::{ImageFormat, RgbaImage};

pub use dds::DdsFormat;
pub use emb::{decode_emb, decode_emb_in, emb_candidates, locate_emb_files, EmbCandidate};
pub use namespace::{ImportNamespace, NameOwner, SourceId};

/// How a decoded image was stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageEncoding {
    Dds(DdsFormat),
    Other(ImageFormat),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImagePayload {
    Decoded {
        encoding: ImageEncoding,
        image: RgbaImage,
    },
    /// Recognised as an image but not decodable here. The bytes are kept as stored.
    Unsupported { encoding: String, raw: Vec<u8> },
}

impl ImagePayload {
    pub fn image(&self) -> Option<&RgbaImage> {
        match self {
            ImagePayload::Decoded { image, .. } => Some(image),
            ImagePayload::Unsupported { .. } => None,
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, ImagePayload::Decoded { .. })
    }

    pub fn describe(&self) -> String {
        match self {
            ImagePayload::Decoded { encoding, image } => {
                format!("{:?} {}x{}", encoding, image.width(), image.height())
            }
            ImagePayload::Unsupported { encoding, raw } => {
                format!("unsupported {} ({} bytes)", encoding, raw.len())
            }
        }
    }
}

/// One palette row (or band) sliced out of a DYT image.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureVariant {
    pub name: String,
    pub dyt_index: u32,
    pub image: RgbaImage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureEntry {
    pub index: usize,
    /// Name stored in the container (`DATA000.dds` when it has none).
    pub entry_name: String,
    /// Collision-free name assigned by the import namespace.
    pub name: String,
    pub payload: ImagePayload,
    /// Palette variants, only filled for DYT containers.
    pub variants: Vec<TextureVariant>,
    /// Position in `variants` of the row selected by the import options.
    pub preferred: Option<usize>,
}

impl TextureEntry {
    pub fn preferred_variant(&self) -> Option<&TextureVariant> {
        self.preferred.and_then(|i| self.variants.get(i))
    }

    pub fn variant(&self, dyt_index: u32) -> Option<&TextureVariant> {
        self.variants.iter().find(|v| v.dyt_index == dyt_index)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureContainer {
    pub version: u16,
    pub unknown_0a: u16,
    pub source: SourceId,
    pub source_stem: String,
    pub is_palette: bool,
    pub entries: Vec<TextureEntry>,
}

impl TextureContainer {
    pub fn entry(&self, name: &str) -> Option<&TextureEntry> {
        self.entries
            .iter()
            .find(|e| e.name == name || e.entry_name == name)
    }

    pub fn unsupported_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.payload.is_supported()).count()
    }
}
