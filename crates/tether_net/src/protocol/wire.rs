//! # Wire Primitives
//!
//! Little-endian fixed-width integers plus two variable-length shapes:
//!
//! - strings: `len:u16` + UTF-8 bytes
//! - blobs: `len:u32` + raw bytes
//!
//! Readers never panic on short input; every read is bounds-checked and
//! reports how many bytes it wanted.

use crate::error::{CodecError, CodecResult};

/// Largest string a `u16` prefix can describe.
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

/// Largest blob a `u32` prefix can describe.
pub const MAX_BLOB_LEN: usize = u32::MAX as usize;

/// Growable little-endian writer.
#[derive(Clone, Debug, Default)]
pub struct WireWriter {
    buffer: Vec<u8>,
}

impl WireWriter {
    /// Creates a writer with room for `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Returns the number of bytes written.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if no bytes have been written.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Returns a slice of the written data.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Consumes the writer, returning the bytes.
    #[inline]
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Writes a single byte.
    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Writes a u16 in little-endian format.
    #[inline]
    pub fn write_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a u32 in little-endian format.
    #[inline]
    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a u64 in little-endian format.
    #[inline]
    pub fn write_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes an i64 in little-endian format.
    #[inline]
    pub fn write_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a `u16`-prefixed string.
    ///
    /// # Errors
    ///
    /// [`CodecError::FieldTooLong`] if the string exceeds 65535 bytes.
    pub fn write_str(&mut self, field: &'static str, value: &str) -> CodecResult<()> {
        let len = u16::try_from(value.len()).map_err(|_| CodecError::FieldTooLong {
            field,
            len: value.len(),
            max: MAX_STRING_LEN,
        })?;
        self.write_u16(len);
        self.buffer.extend_from_slice(value.as_bytes());
        Ok(())
    }

    /// Writes a `u32`-prefixed blob.
    ///
    /// # Errors
    ///
    /// [`CodecError::FieldTooLong`] if the blob exceeds `u32::MAX` bytes.
    pub fn write_blob(&mut self, field: &'static str, value: &[u8]) -> CodecResult<()> {
        let len = u32::try_from(value.len()).map_err(|_| CodecError::FieldTooLong {
            field,
            len: value.len(),
            max: MAX_BLOB_LEN,
        })?;
        self.write_u32(len);
        self.buffer.extend_from_slice(value);
        Ok(())
    }
}

/// Bounds-checked little-endian reader over a borrowed buffer.
#[derive(Clone, Debug)]
pub struct WireReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> WireReader<'a> {
    /// Creates a reader positioned at the start of `buffer`.
    #[must_use]
    pub const fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    /// Returns the number of bytes remaining.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// Returns the number of bytes consumed.
    #[inline]
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Fails with [`CodecError::Truncated`] unless `needed` bytes remain.
    ///
    /// # Errors
    ///
    /// See above.
    #[inline]
    pub fn require(&self, needed: usize) -> CodecResult<()> {
        let available = self.remaining();
        if available < needed {
            return Err(CodecError::Truncated { needed, available });
        }
        Ok(())
    }

    fn take(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        self.require(len)?;
        let slice = &self.buffer[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut raw = [0u8; N];
        raw.copy_from_slice(self.take(N)?);
        Ok(raw)
    }

    /// Reads a single byte.
    ///
    /// # Errors
    ///
    /// [`CodecError::Truncated`] at end of buffer.
    #[inline]
    pub fn read_u8(&mut self) -> CodecResult<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    /// Reads a u16 in little-endian format.
    ///
    /// # Errors
    ///
    /// [`CodecError::Truncated`] at end of buffer.
    #[inline]
    pub fn read_u16(&mut self) -> CodecResult<u16> {
        self.take_array().map(u16::from_le_bytes)
    }

    /// Reads a u32 in little-endian format.
    ///
    /// # Errors
    ///
    /// [`CodecError::Truncated`] at end of buffer.
    #[inline]
    pub fn read_u32(&mut self) -> CodecResult<u32> {
        self.take_array().map(u32::from_le_bytes)
    }

    /// Reads a u64 in little-endian format.
    ///
    /// # Errors
    ///
    /// [`CodecError::Truncated`] at end of buffer.
    #[inline]
    pub fn read_u64(&mut self) -> CodecResult<u64> {
        self.take_array().map(u64::from_le_bytes)
    }

    /// Reads an i64 in little-endian format.
    ///
    /// # Errors
    ///
    /// [`CodecError::Truncated`] at end of buffer.
    #[inline]
    pub fn read_i64(&mut self) -> CodecResult<i64> {
        self.take_array().map(i64::from_le_bytes)
    }

    /// Reads a `u16`-prefixed UTF-8 string.
    ///
    /// # Errors
    ///
    /// [`CodecError::Truncated`] or [`CodecError::InvalidUtf8`].
    pub fn read_str(&mut self, field: &'static str) -> CodecResult<String> {
        let len = usize::from(self.read_u16()?);
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8 { field })
    }

    /// Reads a `u32`-prefixed blob.
    ///
    /// # Errors
    ///
    /// [`CodecError::Truncated`] if the prefix promises more than remains.
    pub fn read_blob(&mut self) -> CodecResult<Vec<u8>> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }
}
