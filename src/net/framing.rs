//! Byte-level reader and writer for frame packets
//!
//! All multi-byte integers are little-endian. The packed u16 encoding is
//! base-128 little endian: 7 payload bits per byte, high bit set when another
//! byte follows.

use crate::game::constants::net::MAX_DATAGRAM_SIZE;

/// Maximum bytes a packed u16 may occupy (7 + 7 + 2 bits)
pub const MAX_PACKED_U16_LEN: usize = 3;

/// Errors raised while reading primitives from a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReadError {
    #[error("Buffer underrun at offset {offset}: needed {needed} bytes, {available} available")]
    Underrun {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("Packed u16 at offset {0} overflows 16 bits")]
    PackedOverflow(usize),
}

/// Errors raised while validating outgoing/incoming datagram sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Datagram too large: {0} bytes (max {1})")]
pub struct DatagramTooLarge(pub usize, pub usize);

/// Validate datagram size (for unreliable messages)
pub fn validate_datagram_size(data: &[u8]) -> Result<(), DatagramTooLarge> {
    if data.len() > MAX_DATAGRAM_SIZE {
        Err(DatagramTooLarge(data.len(), MAX_DATAGRAM_SIZE))
    } else {
        Ok(())
    }
}

/// Frame builder for constructing packets
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    buffer: Vec<u8>,
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(256),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Write raw bytes
    pub fn write(mut self, data: &[u8]) -> Self {
        self.buffer.extend_from_slice(data);
        self
    }

    /// Write a u8
    pub fn write_u8(mut self, value: u8) -> Self {
        self.buffer.push(value);
        self
    }

    /// Write an i8
    pub fn write_i8(self, value: i8) -> Self {
        self.write_u8(value as u8)
    }

    /// Write a u16 (little-endian)
    pub fn write_u16(mut self, value: u16) -> Self {
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Write an i16 (little-endian)
    pub fn write_i16(mut self, value: i16) -> Self {
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Write a u32 (little-endian)
    pub fn write_u32(mut self, value: u32) -> Self {
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Write a u16 using the packed base-128 encoding
    pub fn write_packed_u16(mut self, value: u16) -> Self {
        let mut remaining = value;
        loop {
            let byte = (remaining & 0x7f) as u8;
            remaining >>= 7;
            if remaining == 0 {
                self.buffer.push(byte);
                break;
            }
            self.buffer.push(byte | 0x80);
        }
        self
    }

    /// Get the built frame
    pub fn build(self) -> Vec<u8> {
        self.buffer
    }

    /// Get the current length
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for FrameBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Frame reader for parsing packets
#[derive(Debug, Clone)]
pub struct FrameReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> FrameReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Read n bytes
    pub fn read(&mut self, n: usize) -> Result<&'a [u8], ReadError> {
        let available = self.data.len() - self.position;
        if n > available {
            return Err(ReadError::Underrun {
                offset: self.position,
                needed: n,
                available,
            });
        }
        let slice = &self.data[self.position..self.position + n];
        self.position += n;
        Ok(slice)
    }

    /// Read a u8
    pub fn read_u8(&mut self) -> Result<u8, ReadError> {
        self.read(1).map(|b| b[0])
    }

    /// Read an i8
    pub fn read_i8(&mut self) -> Result<i8, ReadError> {
        self.read_u8().map(|b| b as i8)
    }

    /// Read a u16 (little-endian)
    pub fn read_u16(&mut self) -> Result<u16, ReadError> {
        self.read(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    /// Read an i16 (little-endian)
    pub fn read_i16(&mut self) -> Result<i16, ReadError> {
        self.read(2).map(|b| i16::from_le_bytes([b[0], b[1]]))
    }

    /// Read a u32 (little-endian)
    pub fn read_u32(&mut self) -> Result<u32, ReadError> {
        self.read(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a packed base-128 u16
    pub fn read_packed_u16(&mut self) -> Result<u16, ReadError> {
        let start = self.position;
        let mut value: u32 = 0;
        for i in 0..MAX_PACKED_U16_LEN {
            let byte = self.read_u8()?;
            value |= u32::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                return u16::try_from(value).map_err(|_| ReadError::PackedOverflow(start));
            }
        }
        Err(ReadError::PackedOverflow(start))
    }

    /// Check if there are more bytes to read
    pub fn has_remaining(&self) -> bool {
        self.position < self.data.len()
    }

    /// Get current position
    pub fn position(&self) -> usize {
        self.position
    }
}
