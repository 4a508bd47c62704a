use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;

use binrw::BinWrite;
use half::f16;

use crate::error::{CodecError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchWidth {
    U16,
    U32,
}

impl PatchWidth {
    fn bytes(self) -> usize {
        match self {
            PatchWidth::U16 => 2,
            PatchWidth::U32 => 4,
        }
    }
}

/// Location of a placeholder written by [`ByteWriter::reserve_u32`] or
/// [`ByteWriter::reserve_u16`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchSite {
    at: usize,
    width: PatchWidth,
}

impl PatchSite {
    pub fn offset(&self) -> usize {
        self.at
    }
}

/// Named positions recorded with [`ByteWriter::mark`], handed to deferred resolvers.
#[derive(Debug, Default)]
pub struct Marks(HashMap<String, usize>);

impl Marks {
    pub fn get(&self, key: &str) -> Option<usize> {
        self.0.get(key).copied()
    }
}

type Resolver = Box<dyn FnOnce(&Marks) -> Option<u32>>;

struct Pending {
    width: PatchWidth,
    label: String,
    resolver: Option<Resolver>,
}

/// Scratch output buffer with reserve-and-patch support.
///
/// Every reserved site must be patched directly or resolved through a deferred
/// resolver before [`finish`](ByteWriter::finish) hands the bytes back.
#[derive(Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
    pending: BTreeMap<usize, Pending>,
    marks: Marks,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> usize {
        self.buf.len()
    }

    // === Primitive writers ===

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_i8(&mut self, v: i8) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i16(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_f16(&mut self, v: f32) {
        self.write_u16(f16::from_f32(v).to_bits());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_zeros(&mut self, count: usize) {
        self.buf.resize(self.buf.len() + count, 0);
    }

    pub fn write_cstring(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }

    /// Write `s` into a fixed-width, null-padded field. Longer strings are cut so the
    /// terminator always fits.
    pub fn write_fixed_string(&mut self, s: &str, len: usize) {
        let bytes = s.as_bytes();
        let n = bytes.len().min(len.saturating_sub(1));
        self.buf.extend_from_slice(&bytes[..n]);
        self.write_zeros(len - n);
    }

    pub fn write_record<T>(&mut self, record: &T) -> Result<()>
    where
        T: for<'b> BinWrite<Args<'b> = ()>,
    {
        let mut cursor = Cursor::new(Vec::new());
        record
            .write_le_args(&mut cursor, ())
            .map_err(|e| CodecError::CorruptOutput(format!("record write failed: {}", e)))?;
        self.buf.extend_from_slice(cursor.get_ref());
        Ok(())
    }

    /// Pad with zeros up to the next multiple of `alignment`.
    pub fn align(&mut self, alignment: usize) {
        let target = super::align_up(self.buf.len(), alignment);
        self.buf.resize(target, 0);
    }

    // === Reserve and patch ===

    pub fn reserve_u32(&mut self, label: impl Into<String>) -> PatchSite {
        self.reserve(PatchWidth::U32, label.into())
    }

    pub fn reserve_u16(&mut self, label: impl Into<String>) -> PatchSite {
        self.reserve(PatchWidth::U16, label.into())
    }

    fn reserve(&mut self, width: PatchWidth, label: String) -> PatchSite {
        let at = self.buf.len();
        self.write_zeros(width.bytes());
        self.pending.insert(
            at,
            Pending {
                width,
                label,
                resolver: None,
            },
        );
        PatchSite { at, width }
    }

    /// Fill a reserved site with its final value.
    pub fn patch(&mut self, site: PatchSite, value: u32) -> Result<()> {
        let pending = self.pending.remove(&site.at).ok_or_else(|| {
            CodecError::CorruptOutput(format!("patch site {:#x} is not reserved", site.at))
        })?;
        Self::store(&mut self.buf, site.at, site.width, value, &pending.label)
    }

    /// Fill a reserved site with the current position minus `base`.
    pub fn patch_relative(&mut self, site: PatchSite, base: usize) -> Result<()> {
        let here = self.position();
        let rel = here.checked_sub(base).ok_or_else(|| {
            CodecError::CorruptOutput(format!(
                "relative offset base {:#x} lies after position {:#x}",
                base, here
            ))
        })?;
        let value = u32::try_from(rel)
            .map_err(|_| CodecError::CorruptOutput(format!("offset {:#x} exceeds u32", rel)))?;
        self.patch(site, value)
    }

    /// Record the current position under `key` for deferred resolvers.
    pub fn mark(&mut self, key: impl Into<String>) {
        let here = self.position();
        self.marks.0.insert(key.into(), here);
    }

    /// Attach a resolver that computes the site's value once all marks are known.
    pub fn defer(
        &mut self,
        site: PatchSite,
        resolver: impl FnOnce(&Marks) -> Option<u32> + 'static,
    ) -> Result<()> {
        let pending = self.pending.get_mut(&site.at).ok_or_else(|| {
            CodecError::CorruptOutput(format!("patch site {:#x} is not reserved", site.at))
        })?;
        pending.resolver = Some(Box::new(resolver));
        Ok(())
    }

    fn store(buf: &mut [u8], at: usize, width: PatchWidth, value: u32, label: &str) -> Result<()> {
        match width {
            PatchWidth::U16 => {
                let v = u16::try_from(value).map_err(|_| {
                    CodecError::CorruptOutput(format!(
                        "value {} does not fit the u16 field '{}'",
                        value, label
                    ))
                })?;
                buf[at..at + 2].copy_from_slice(&v.to_le_bytes());
            }
            PatchWidth::U32 => buf[at..at + 4].copy_from_slice(&value.to_le_bytes()),
        }
        Ok(())
    }

    /// Resolve deferred sites and return the finished buffer.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        let pending = std::mem::take(&mut self.pending);
        for (at, entry) in pending {
            let Some(resolver) = entry.resolver else {
                return Err(CodecError::CorruptOutput(format!(
                    "reserved field '{}' at {:#x} was never patched",
                    entry.label, at
                )));
            };
            let value = resolver(&self.marks).ok_or_else(|| {
                CodecError::CorruptOutput(format!(
                    "deferred field '{}' at {:#x} could not be resolved",
                    entry.label, at
                ))
            })?;
            Self::store(&mut self.buf, at, entry.width, value, &entry.label)?;
        }
        Ok(self.buf)
    }
}
