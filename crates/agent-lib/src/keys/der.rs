//! Minimal DER reader and writer
//!
//! Only the two constructs needed for RSA private keys are supported:
//! SEQUENCE (0x30) and INTEGER (0x02). Values are consumed strictly left to
//! right.

use thiserror::Error;

pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_SEQUENCE: u8 = 0x30;

/// Maximum number of big-endian length bytes in a long-form length
const MAX_LENGTH_BYTES: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DerError {
    #[error("unexpected end of input at offset {offset}")]
    UnexpectedEnd { offset: usize },

    #[error("expected tag 0x{expected:02x}, found 0x{found:02x} at offset {offset}")]
    UnexpectedTag {
        expected: u8,
        found: u8,
        offset: usize,
    },

    #[error("unsupported long-form length with {count} length bytes")]
    UnsupportedLength { count: usize },

    #[error("empty INTEGER at offset {offset}")]
    EmptyInteger { offset: usize },
}

/// Signed arbitrary-precision integer kept as minimal big-endian two's
/// complement bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DerInteger(Vec<u8>);

impl DerInteger {
    /// Wrap big-endian two's complement bytes, dropping redundant sign bytes
    pub fn from_signed_bytes(bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            return Self(vec![0]);
        }
        let mut start = 0;
        while start + 1 < bytes.len() {
            let (lead, next) = (bytes[start], bytes[start + 1]);
            let redundant = (lead == 0x00 && next & 0x80 == 0) || (lead == 0xff && next & 0x80 != 0);
            if !redundant {
                break;
            }
            start += 1;
        }
        Self(bytes[start..].to_vec())
    }

    /// Non-negative integer from unsigned big-endian magnitude bytes
    pub fn from_unsigned_bytes(magnitude: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(magnitude.len() + 1);
        bytes.push(0);
        bytes.extend_from_slice(magnitude);
        Self::from_signed_bytes(&bytes)
    }

    pub fn from_u64(value: u64) -> Self {
        Self::from_unsigned_bytes(&value.to_be_bytes())
    }

    pub fn is_negative(&self) -> bool {
        self.0[0] & 0x80 != 0
    }

    /// Minimal two's complement encoding, as it appears in DER content
    pub fn as_signed_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Magnitude without the sign byte, for non-negative values
    pub fn unsigned_magnitude(&self) -> Option<&[u8]> {
        if self.is_negative() {
            return None;
        }
        match self.0.as_slice() {
            [0, rest @ ..] if !rest.is_empty() => Some(rest),
            all => Some(all),
        }
    }

    /// Value as u64 when it is non-negative and fits
    pub fn to_u64(&self) -> Option<u64> {
        let magnitude = self.unsigned_magnitude()?;
        if magnitude.len() > 8 {
            return None;
        }
        Some(magnitude.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    /// Bit length of the magnitude of a non-negative value
    pub fn bit_len(&self) -> usize {
        match self.unsigned_magnitude() {
            Some(magnitude) => match magnitude.iter().position(|b| *b != 0) {
                Some(first) => {
                    (magnitude.len() - first - 1) * 8 + (8 - magnitude[first].leading_zeros() as usize)
                }
                None => 0,
            },
            None => self.0.len() * 8,
        }
    }
}

/// Cursor over DER-encoded bytes
#[derive(Debug, Clone)]
pub struct DerReader<'a> {
    data: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> DerReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            base: 0,
        }
    }

    /// True once every byte has been consumed
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Read a SEQUENCE and return a reader over its content bytes
    pub fn read_sequence(&mut self) -> Result<DerReader<'a>, DerError> {
        let offset = self.base + self.pos;
        let content = self.read_tlv(TAG_SEQUENCE)?;
        Ok(DerReader {
            data: content,
            pos: 0,
            base: offset,
        })
    }

    /// Read an INTEGER of any width
    pub fn read_integer(&mut self) -> Result<DerInteger, DerError> {
        let offset = self.base + self.pos;
        let content = self.read_tlv(TAG_INTEGER)?;
        if content.is_empty() {
            return Err(DerError::EmptyInteger { offset });
        }
        Ok(DerInteger::from_signed_bytes(content))
    }

    fn read_tlv(&mut self, expected: u8) -> Result<&'a [u8], DerError> {
        let tag_offset = self.base + self.pos;
        let tag = self.read_byte()?;
        if tag != expected {
            return Err(DerError::UnexpectedTag {
                expected,
                found: tag,
                offset: tag_offset,
            });
        }
        let length = self.read_length()?;
        self.take(length)
    }

    /// Short form (high bit clear) or long form with 1 to 4 length bytes
    fn read_length(&mut self) -> Result<usize, DerError> {
        let first = self.read_byte()?;
        if first & 0x80 == 0 {
            return Ok(usize::from(first));
        }

        let count = usize::from(first & 0x7f);
        if count == 0 || count > MAX_LENGTH_BYTES {
            return Err(DerError::UnsupportedLength { count });
        }

        let bytes = self.take(count)?;
        Ok(bytes
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | usize::from(*b)))
    }

    fn read_byte(&mut self) -> Result<u8, DerError> {
        let byte = *self.data.get(self.pos).ok_or(DerError::UnexpectedEnd {
            offset: self.base + self.pos,
        })?;
        self.pos += 1;
        Ok(byte)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DerError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(DerError::UnexpectedEnd {
                offset: self.base + self.data.len(),
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }
}

/// Builds DER output with definite minimal lengths
#[derive(Debug, Default)]
pub struct DerWriter {
    out: Vec<u8>,
}

impl DerWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_integer(&mut self, value: &DerInteger) -> &mut Self {
        self.write_tlv(TAG_INTEGER, value.as_signed_bytes())
    }

    /// Write a SEQUENCE whose content is produced by `build`
    pub fn write_sequence(&mut self, build: impl FnOnce(&mut DerWriter)) -> &mut Self {
        let mut inner = DerWriter::new();
        build(&mut inner);
        let content = inner.finish();
        self.write_tlv(TAG_SEQUENCE, &content)
    }

    pub fn finish(self) -> Vec<u8> {
        self.out
    }

    fn write_tlv(&mut self, tag: u8, content: &[u8]) -> &mut Self {
        self.out.push(tag);
        encode_length(content.len(), &mut self.out);
        self.out.extend_from_slice(content);
        self
    }
}

fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    let significant = &bytes[skip..];
    out.push(0x80 | significant.len() as u8);
    out.extend_from_slice(significant);
}
