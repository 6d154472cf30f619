use crate::layout::TypeTag;
use crate::types::DecodeError;

/// A cursor over a raw event block.
///
/// Every read checks the remaining length and fails with
/// [`DecodeError::UnexpectedEof`] rather than reading past the end.
pub(crate) struct RawReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RawReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// The bytes consumed since `start`.
    pub fn since(&self, start: usize) -> &'a [u8] {
        &self.data[start.min(self.pos)..self.pos]
    }

    fn ensure(&self, n: usize) -> Result<(), DecodeError> {
        if n > self.remaining() {
            Err(DecodeError::UnexpectedEof(self.pos))
        } else {
            Ok(())
        }
    }

    /// Read n bytes as a slice from the data.
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        self.ensure(n)?;
        let start = self.pos;
        self.pos += n;
        Ok(&self.data[start..self.pos])
    }

    /// Read a fixed-size array.
    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub fn byte(&mut self) -> Result<u8, DecodeError> {
        Ok(self.array::<1>()?[0])
    }

    /// Read a native-endian i32.
    pub fn i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_ne_bytes(self.array()?))
    }

    /// Read a variable-length unsigned integer, ignoring the encode type bits.
    pub fn uvarint(&mut self) -> Result<u64, DecodeError> {
        let start = self.pos;
        let first = self.byte()?;
        let mut result = (first & 0x1F) as u64;
        if first & 0x20 == 0 {
            return Ok(result);
        }
        let mut shift: u32 = 5;
        loop {
            let b = self.byte()?;
            result |= ((b & 0x7F) as u64) << shift;
            if b & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
            if shift >= 64 {
                return Err(DecodeError::VarintOverflow(start));
            }
        }
    }

    /// Read a zig-zag encoded variable-length signed integer.
    pub fn varint(&mut self) -> Result<i64, DecodeError> {
        let u = self.uvarint()?;
        Ok(zigzag_decode_i64(u))
    }

    /// Read a floating point number, widening single precision values.
    pub fn floating(&mut self) -> Result<f64, DecodeError> {
        let width = self.uvarint()?;
        match width {
            4 => Ok(f32::from_ne_bytes(self.array()?) as f64),
            8 => Ok(f64::from_ne_bytes(self.array()?)),
            n => Err(DecodeError::InvalidFloatWidth(n)),
        }
    }

    /// Read a length-prefixed UTF-8 string. Invalid UTF-8 is replaced.
    pub fn string(&mut self) -> Result<String, DecodeError> {
        let len = self.uvarint()?;
        if len == 0 {
            return Ok(String::new());
        }
        if len > self.remaining() as u64 {
            return Err(DecodeError::UnexpectedEof(self.pos));
        }
        let bytes = self.bytes(len as usize)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn type_tag(&mut self) -> Result<TypeTag, DecodeError> {
        let b = self.byte()?;
        TypeTag::from_byte(b).map_err(DecodeError::UnknownValueType)
    }
}

/// Decode a zigzag-encoded u64 to i64.
pub(crate) fn zigzag_decode_i64(u: u64) -> i64 {
    ((u >> 1) as i64) ^ (-((u & 1) as i64))
}
