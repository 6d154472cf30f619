use bytes::{BufMut, Bytes, BytesMut};

use crate::layout::{EncodeType, TypeTag};

/// Initial capacity of a fresh [`ByteBuffer`], and the minimum growth step.
pub const EXPAND_BUF_SIZE: usize = 512;

/// A growable byte buffer for encoding raw event blocks.
///
/// Besides appending, previously written bytes can be patched in place with
/// [`ByteBuffer::update`], which is how block size and parameter count are
/// filled in once all parameters have been written.
#[derive(Debug, Clone)]
pub struct ByteBuffer {
    scratch: [u8; 10],
    buf: BytesMut,
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<[u8]> for ByteBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

/// Copies `data` into a new buffer. The source is never aliased.
impl From<&[u8]> for ByteBuffer {
    fn from(data: &[u8]) -> Self {
        let mut b = Self::with_capacity(data.len().max(EXPAND_BUF_SIZE));
        b.buf.extend_from_slice(data);
        b
    }
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::with_capacity(EXPAND_BUF_SIZE)
    }

    pub fn with_capacity(size: usize) -> Self {
        ByteBuffer {
            scratch: [0; 10],
            buf: BytesMut::with_capacity(size),
        }
    }

    /// Appends `data` to the end of the buffer.
    pub fn append(&mut self, data: &[u8]) -> bool {
        if data.is_empty() {
            return true;
        }
        self.grow_for(data.len());
        self.buf.put_slice(data);
        true
    }

    /// Overwrites bytes starting at `pos`, extending the buffer if the write
    /// runs past its current end. Fails if `pos` lies beyond the end.
    pub fn update(&mut self, data: &[u8], pos: usize) -> bool {
        let len = self.buf.len();
        if pos > len {
            log::error!("rejecting update at offset {} past buffer end {}", pos, len);
            return false;
        }
        let overlap = data.len().min(len - pos);
        self.buf[pos..pos + overlap].copy_from_slice(&data[..overlap]);
        self.append(&data[overlap..])
    }

    pub(crate) fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    /// Returns the bytes written so far.
    pub fn read(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Discards the content but keeps the allocation.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    fn grow_for(&mut self, additional: usize) {
        let free = self.buf.capacity() - self.buf.len();
        if free < additional {
            self.buf.reserve(additional.max(EXPAND_BUF_SIZE));
        }
    }

    /// Writes a single byte.
    #[inline]
    pub fn byte(&mut self, byte: u8) {
        self.grow_for(1);
        self.buf.put_u8(byte);
    }

    /// Writes a type tag.
    #[inline]
    pub fn type_tag(&mut self, tag: TypeTag) {
        self.byte(tag.to_byte());
    }

    /// Writes a variable-length unsigned integer.
    ///
    /// The first byte holds the encode type in its two high bits, a
    /// continuation bit and the low five bits of the value. Every following
    /// byte carries seven more bits.
    #[inline]
    pub fn uvarint(&mut self, encode_type: EncodeType, u: u64) {
        let mut u = u;
        let mut i = 0;
        let more = if u >= 0x20 { 0x20 } else { 0 };
        self.scratch[i] = ((encode_type as u8) << 6) | more | (u as u8 & 0x1F);
        i += 1;
        u >>= 5;
        while u > 0 {
            let more = if u >= 0x80 { 0x80 } else { 0 };
            self.scratch[i] = more | (u as u8 & 0x7F);
            u >>= 7;
            i += 1;
        }
        let n = i;
        self.grow_for(n);
        self.buf.extend_from_slice(&self.scratch[..n]);
    }

    /// Writes a zig-zag encoded variable-length signed integer.
    #[inline]
    pub fn ivarint<I: Into<i64>>(&mut self, encode_type: EncodeType, i: I) {
        self.uvarint(encode_type, signed_to_unsigned_i64(i.into()));
    }

    /// Writes a single precision float as a byte count followed by its bytes.
    #[inline]
    pub fn f32(&mut self, f: f32) {
        self.floating(&f.to_ne_bytes());
    }

    /// Writes a double precision float as a byte count followed by its bytes.
    #[inline]
    pub fn f64(&mut self, f: f64) {
        self.floating(&f.to_ne_bytes());
    }

    fn floating(&mut self, raw: &[u8]) {
        self.uvarint(EncodeType::LengthDelimited, raw.len() as u64);
        self.append(raw);
    }

    /// Writes a length-prefixed string.
    #[inline]
    pub fn str<S: AsRef<str>>(&mut self, s: S) {
        let bytes = s.as_ref().as_bytes();
        self.grow_for(10 + bytes.len());
        self.uvarint(EncodeType::LengthDelimited, bytes.len() as u64);
        self.append(bytes);
    }

    /// Writes an element count for an array value.
    #[inline]
    pub fn count(&mut self, n: usize) {
        self.uvarint(EncodeType::LengthDelimited, n as u64);
    }
}

/// Zig-zag encodes a signed integer so small magnitudes stay short.
#[inline]
pub(crate) fn signed_to_unsigned_i64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}
