use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Fatal codec errors. A decode or encode that returns one of these produced no asset
/// and no bytes.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    #[error("buffer truncated at offset {offset:#x}: needed {needed} bytes, {available} available")]
    TruncatedBuffer {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("unrecognized {format} data: {reason}")]
    UnrecognizedFormat { format: &'static str, reason: String },

    #[error("malformed skeleton: {0}")]
    MalformedSkeleton(String),

    #[error("bone index {index} out of range ({bone_count} bones) in {context}")]
    BoneIndexOutOfRange {
        index: usize,
        bone_count: usize,
        context: String,
    },

    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("corrupt output: {0}")]
    CorruptOutput(String),
}

impl CodecError {
    pub fn unrecognized(format: &'static str, reason: impl Into<String>) -> Self {
        CodecError::UnrecognizedFormat {
            format,
            reason: reason.into(),
        }
    }

    pub fn bone_out_of_range(index: usize, bone_count: usize, context: impl Into<String>) -> Self {
        CodecError::BoneIndexOutOfRange {
            index,
            bone_count,
            context: context.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CodecError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum WarningKind {
    VersionDrift,
    UnsupportedImage,
    UnresolvedBoneName,
    ForwardParentReference,
    DytIndexOutOfRange,
    InvalidWeights,
    UnknownComponent,
}

/// A non-fatal diagnostic surfaced next to a successful result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Side list of warnings collected during one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Warnings(Vec<Warning>);

impl Warnings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: WarningKind, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(?kind, "{}", message);
        self.0.push(Warning { kind, message });
    }

    pub fn extend(&mut self, other: Warnings) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Warning> {
        self.0.iter()
    }

    pub fn has(&self, kind: WarningKind) -> bool {
        self.0.iter().any(|w| w.kind == kind)
    }

    pub fn into_vec(self) -> Vec<Warning> {
        self.0
    }
}

/// Successful decode result plus the warnings raised while producing it.
#[derive(Debug, Clone)]
pub struct Decoded<T> {
    pub value: T,
    pub warnings: Warnings,
}

impl<T> Decoded<T> {
    pub fn new(value: T, warnings: Warnings) -> Self {
        Self { value, warnings }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Decoded<U> {
        Decoded {
            value: f(self.value),
            warnings: self.warnings,
        }
    }
}
