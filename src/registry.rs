//! Format dispatch: maps a format tag and a direction onto the matching codec.

use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::animation::{encode_ean_with, EanFile};
use crate::config::CodecOptions;
use crate::error::{CodecError, Decoded, Result};
use crate::material::{decode_emm, MaterialLibrary};
use crate::mesh::emd::{decode_emd, encode_emd, EmdFile};
use crate::skeleton::esk::{decode_esk, encode_esk, EskFile};
use crate::skeleton::Skeleton;
use crate::texture::{decode_emb_in, ImportNamespace, TextureContainer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FormatTag {
    Esk,
    Emd,
    Emb,
    Ean,
    Emm,
}

impl FormatTag {
    pub const ALL: [FormatTag; 5] = [
        FormatTag::Esk,
        FormatTag::Emd,
        FormatTag::Emb,
        FormatTag::Ean,
        FormatTag::Emm,
    ];

    pub fn magic(self) -> [u8; 4] {
        match self {
            FormatTag::Esk => *b"#ESK",
            FormatTag::Emd => *b"#EMD",
            FormatTag::Emb => *b"#EMB",
            FormatTag::Ean => *b"#EAN",
            FormatTag::Emm => *b"#EMM",
        }
    }

    /// Version numbers decoded without a drift warning. Empty for formats whose
    /// header layout is checked instead of a version field.
    pub fn known_versions(self) -> &'static [u32] {
        match self {
            FormatTag::Esk => &[1],
            FormatTag::Emd => crate::mesh::emd::KNOWN_EMD_VERSIONS,
            FormatTag::Ean => crate::animation::ean::KNOWN_EAN_VERSIONS,
            FormatTag::Emb | FormatTag::Emm => &[],
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            FormatTag::Esk => "esk",
            FormatTag::Emd => "emd",
            FormatTag::Emb => "emb",
            FormatTag::Ean => "ean",
            FormatTag::Emm => "emm",
        }
    }

    pub fn supports_export(self) -> bool {
        matches!(self, FormatTag::Esk | FormatTag::Emd | FormatTag::Ean)
    }

    /// Tag whose magic starts `bytes`.
    pub fn detect(bytes: &[u8]) -> Option<FormatTag> {
        let magic = bytes.get(..4)?;
        FormatTag::ALL.into_iter().find(|tag| tag.magic() == magic)
    }

    pub fn from_path(path: &Path) -> Option<FormatTag> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        FormatTag::ALL.into_iter().find(|tag| tag.extension() == ext)
    }

    fn label(self) -> &'static str {
        match self {
            FormatTag::Esk => "ESK",
            FormatTag::Emd => "EMD",
            FormatTag::Emb => "EMB",
            FormatTag::Ean => "EAN",
            FormatTag::Emm => "EMM",
        }
    }
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Decoded content of any supported file.
#[derive(Debug, Clone)]
pub enum Asset {
    Skeleton(EskFile),
    Mesh(EmdFile),
    Textures(TextureContainer),
    Animation(EanFile),
    Materials(MaterialLibrary),
}

impl Asset {
    pub fn tag(&self) -> FormatTag {
        match self {
            Asset::Skeleton(_) => FormatTag::Esk,
            Asset::Mesh(_) => FormatTag::Emd,
            Asset::Textures(_) => FormatTag::Emb,
            Asset::Animation(_) => FormatTag::Ean,
            Asset::Materials(_) => FormatTag::Emm,
        }
    }

    /// One-line description for logs and the inspector.
    pub fn summary(&self) -> String {
        match self {
            Asset::Skeleton(esk) => format!("skeleton, {} bones", esk.skeleton.len()),
            Asset::Mesh(emd) => format!(
                "mesh, {} models, {} submeshes",
                emd.models.len(),
                emd.submesh_count()
            ),
            Asset::Textures(emb) => format!(
                "{} textures ({} unsupported){}",
                emb.entries.len(),
                emb.unsupported_count(),
                if emb.is_palette { ", palette" } else { "" }
            ),
            Asset::Animation(ean) => format!(
                "{} animation, {} clips, {} bones",
                if ean.is_camera { "camera" } else { "character" },
                ean.clips.len(),
                ean.skeleton.len()
            ),
            Asset::Materials(emm) => format!("{} materials", emm.materials.len()),
        }
    }
}

/// Progress of one import or export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CodecState {
    Uninitialized,
    HeaderValidated,
    BodyDecoded,
    Done,
    Failed(String),
}

impl CodecState {
    fn allows(&self, next: &CodecState) -> bool {
        use CodecState::*;
        matches!(
            (self, next),
            (Uninitialized, HeaderValidated)
                | (HeaderValidated, BodyDecoded)
                | (HeaderValidated, Done)
                | (BodyDecoded, Done)
                | (Uninitialized | HeaderValidated | BodyDecoded, Failed(_))
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    Import,
    Export,
}

/// State of a single codec call, logged on every transition.
#[derive(Debug)]
pub struct Operation {
    pub tag: FormatTag,
    pub direction: Direction,
    state: CodecState,
}

impl Operation {
    pub fn new(tag: FormatTag, direction: Direction) -> Self {
        Self {
            tag,
            direction,
            state: CodecState::Uninitialized,
        }
    }

    pub fn state(&self) -> &CodecState {
        &self.state
    }

    pub fn advance(&mut self, next: CodecState) -> Result<()> {
        if !self.state.allows(&next) {
            return Err(CodecError::CorruptOutput(format!(
                "{} {:?}: illegal transition {:?} -> {:?}",
                self.tag, self.direction, self.state, next
            )));
        }
        tracing::debug!(
            format = %self.tag,
            direction = ?self.direction,
            from = ?self.state,
            to = ?next,
            "codec state"
        );
        self.state = next;
        Ok(())
    }

    /// Record `err` as the failure reason and hand it back.
    pub fn fail(&mut self, err: CodecError) -> CodecError {
        tracing::debug!(format = %self.tag, direction = ?self.direction, error = %err, "codec failed");
        self.state = CodecState::Failed(err.to_string());
        err
    }
}

/// Per-import inputs: the skeleton meshes resolve against, the source path used for
/// texture naming and the namespace texture names are claimed in. Reusing one
/// context across imports makes them share a namespace.
#[derive(Debug, Default)]
pub struct ImportContext<'a> {
    pub skeleton: Option<&'a Skeleton>,
    pub source_path: String,
    pub namespace: ImportNamespace,
}

impl<'a> ImportContext<'a> {
    pub fn new(source_path: impl Into<String>) -> Self {
        Self {
            skeleton: None,
            source_path: source_path.into(),
            namespace: ImportNamespace::new(),
        }
    }

    pub fn with_skeleton(mut self, skeleton: &'a Skeleton) -> Self {
        self.skeleton = Some(skeleton);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    pub options: CodecOptions,
}

impl Registry {
    pub fn new(options: CodecOptions) -> Self {
        Self { options }
    }

    pub fn import(
        &self,
        tag: FormatTag,
        bytes: &[u8],
        ctx: &mut ImportContext<'_>,
    ) -> Result<Decoded<Asset>> {
        let mut op = Operation::new(tag, Direction::Import);
        match self.run_import(&mut op, tag, bytes, ctx) {
            Ok(decoded) => {
                op.advance(CodecState::Done)?;
                Ok(decoded)
            }
            Err(err) => Err(op.fail(err)),
        }
    }

    fn run_import(
        &self,
        op: &mut Operation,
        tag: FormatTag,
        bytes: &[u8],
        ctx: &mut ImportContext<'_>,
    ) -> Result<Decoded<Asset>> {
        let magic = bytes.get(..4).ok_or(CodecError::TruncatedBuffer {
            offset: 0,
            needed: 4,
            available: bytes.len(),
        })?;
        if magic != tag.magic() {
            return Err(CodecError::unrecognized(
                tag.label(),
                match FormatTag::detect(bytes) {
                    Some(other) => format!("buffer holds {} data", other),
                    None => format!("magic {:02x?} does not match", magic),
                },
            ));
        }
        op.advance(CodecState::HeaderValidated)?;

        let decoded = match tag {
            FormatTag::Esk => decode_esk(bytes)?.map(Asset::Skeleton),
            FormatTag::Emd => decode_emd(bytes, ctx.skeleton)?.map(Asset::Mesh),
            FormatTag::Emb => decode_emb_in(
                bytes,
                &ctx.source_path,
                &self.options.import,
                &mut ctx.namespace,
            )?
            .map(Asset::Textures),
            FormatTag::Ean => crate::animation::decode_ean(bytes)?.map(Asset::Animation),
            FormatTag::Emm => decode_emm(bytes)?.map(Asset::Materials),
        };
        op.advance(CodecState::BodyDecoded)?;
        Ok(decoded)
    }

    pub fn export(&self, tag: FormatTag, asset: &Asset) -> Result<Vec<u8>> {
        let mut op = Operation::new(tag, Direction::Export);
        match self.run_export(&mut op, tag, asset) {
            Ok(bytes) => {
                op.advance(CodecState::Done)?;
                Ok(bytes)
            }
            Err(err) => Err(op.fail(err)),
        }
    }

    fn run_export(&self, op: &mut Operation, tag: FormatTag, asset: &Asset) -> Result<Vec<u8>> {
        if !tag.supports_export() {
            return Err(CodecError::UnsupportedEncoding(format!(
                "{} export is not supported",
                tag
            )));
        }
        if asset.tag() != tag {
            return Err(CodecError::UnsupportedEncoding(format!(
                "cannot write {} content as {}",
                asset.tag(),
                tag
            )));
        }
        op.advance(CodecState::HeaderValidated)?;

        match asset {
            Asset::Skeleton(esk) => encode_esk(esk),
            Asset::Mesh(emd) => encode_emd(emd),
            Asset::Animation(ean) => encode_ean_with(ean, &self.options.export),
            Asset::Textures(_) | Asset::Materials(_) => Err(CodecError::UnsupportedEncoding(
                format!("{} export is not supported", tag),
            )),
        }
    }
}
