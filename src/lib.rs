//! Codecs for XV2 skeleton (ESK), mesh (EMD), texture (EMB), animation (EAN) and
//! material (EMM) files, decoded into a host-independent asset representation.

pub mod animation;
pub mod config;
pub mod cursor;
pub mod error;
pub mod material;
pub mod math;
pub mod mesh;
pub mod registry;
pub mod skeleton;
pub mod texture;

pub use error::{CodecError, Decoded, Result, Warning, WarningKind, Warnings};
pub use registry::{Asset, FormatTag, ImportContext, Registry};
