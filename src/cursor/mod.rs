//! Little-endian byte cursor shared by every codec.
//!
//! Reads never go past the end of the buffer: every accessor checks the remaining
//! length first and reports [`CodecError::TruncatedBuffer`] instead of zero-filling.

mod writer;

pub use writer::{ByteWriter, Marks, PatchSite, PatchWidth};

use std::io::Cursor;

use binrw::BinRead;
use half::f16;

use crate::error::{CodecError, Result};

/// Fixed-size on-disk record that can be parsed with binrw once its bytes are known
/// to be present.
pub trait FixedRecord {
    const SIZE: usize;
}

/// Reader over an in-memory buffer with a position and a saved-position stack.
pub struct ByteReader<'a> {
    data: &'a [u8],
    position: usize,
    saved_positions: Vec<usize>,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            position: 0,
            saved_positions: Vec::new(),
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Set an absolute position. Seeking exactly to the end is allowed.
    ///
    /// A target past the end reports the whole prefix up to it as needed, against the
    /// buffer length.
    pub fn seek(&mut self, offset: usize) -> Result<()> {
        if offset > self.data.len() {
            return Err(CodecError::TruncatedBuffer {
                offset,
                needed: offset,
                available: self.data.len(),
            });
        }
        self.position = offset;
        Ok(())
    }

    pub fn skip(&mut self, count: usize) -> Result<()> {
        self.take(count).map(|_| ())
    }

    /// Remember the current position so a detour can be undone with [`pop_position`].
    ///
    /// [`pop_position`]: ByteReader::pop_position
    pub fn push_position(&mut self) {
        self.saved_positions.push(self.position);
    }

    pub fn pop_position(&mut self) {
        if let Some(pos) = self.saved_positions.pop() {
            self.position = pos;
        }
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        let available = self.remaining();
        if count > available {
            return Err(CodecError::TruncatedBuffer {
                offset: self.position,
                needed: count,
                available,
            });
        }
        let start = self.position;
        self.position += count;
        Ok(&self.data[start..start + count])
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    // === Primitive readers ===

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(i8::from_le_bytes(self.take_array()?))
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take_array()?))
    }

    /// Read an IEEE half float and widen it.
    pub fn read_f16(&mut self) -> Result<f32> {
        Ok(f16::from_bits(self.read_u16()?).to_f32())
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        self.take(count)
    }

    /// Parse a fixed-size binrw record at the current position.
    pub fn read_record<T>(&mut self) -> Result<T>
    where
        T: FixedRecord + for<'b> BinRead<Args<'b> = ()>,
    {
        let start = self.position;
        let bytes = self.take(T::SIZE)?;
        T::read_le_args(&mut Cursor::new(bytes), ()).map_err(|e| {
            CodecError::unrecognized("record", format!("at offset {:#x}: {}", start, e))
        })
    }

    /// Read a null-terminated string at an absolute offset without moving the cursor.
    ///
    /// Offset 0 is the "no name" sentinel and yields an empty string.
    pub fn read_string_at(&self, offset: usize) -> Result<String> {
        if offset == 0 {
            return Ok(String::new());
        }
        if offset >= self.data.len() {
            return Err(CodecError::TruncatedBuffer {
                offset,
                needed: 1,
                available: 0,
            });
        }
        let tail = &self.data[offset..];
        let end = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or(CodecError::TruncatedBuffer {
                offset: self.data.len(),
                needed: 1,
                available: 0,
            })?;
        Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
    }

    /// Read a string stored in a fixed-width field, stopping at the first null.
    pub fn read_fixed_string(&mut self, len: usize) -> Result<String> {
        let bytes = self.take(len)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(len);
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    /// Ensure `count` bytes exist starting at `offset`.
    pub fn require(&self, offset: usize, count: usize) -> Result<()> {
        let available = self.data.len().saturating_sub(offset);
        if offset > self.data.len() || count > available {
            return Err(CodecError::TruncatedBuffer {
                offset,
                needed: count,
                available,
            });
        }
        Ok(())
    }
}

/// Round `value` up to the next multiple of `alignment`.
pub fn align_up(value: usize, alignment: usize) -> usize {
    if alignment <= 1 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}
