//! Canonical binary codec
//!
//! Every typed record in tornet (descriptors, store metadata, wire messages,
//! chain records) is encoded with this codec. The format is deterministic and
//! carries no version tag: fixed-width integers are little-endian, every
//! variable-length sequence is prefixed with a `u32` element count, digests
//! are 20 raw bytes. `encode(decode(x)) == x` byte-for-byte.
//!
//! Encoding writes through the [`Sink`] trait so the same code path can fill
//! a byte buffer or feed the streaming hasher (see [`crate::digest::DigestSink`]).

use crate::error::{Result, TornetError};

/// Destination for encoded bytes.
pub trait Sink {
    fn put(&mut self, bytes: &[u8]);

    fn put_u8(&mut self, v: u8) {
        self.put(&[v]);
    }

    fn put_u16(&mut self, v: u16) {
        self.put(&v.to_le_bytes());
    }

    fn put_u32(&mut self, v: u32) {
        self.put(&v.to_le_bytes());
    }

    fn put_u64(&mut self, v: u64) {
        self.put(&v.to_le_bytes());
    }

    fn put_i64(&mut self, v: i64) {
        self.put(&v.to_le_bytes());
    }

    /// Length-prefixed byte buffer.
    fn put_bytes(&mut self, bytes: &[u8]) {
        self.put_u32(bytes.len() as u32);
        self.put(bytes);
    }
}

impl Sink for Vec<u8> {
    fn put(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// A type with a canonical binary encoding.
pub trait Encode {
    fn encode<S: Sink + ?Sized>(&self, out: &mut S);
}

/// A type decodable from its canonical encoding.
///
/// Decoding consumes exactly the encoded bytes and leaves the reader
/// positioned after them; trailing bytes (e.g. cipher padding) are the
/// caller's concern.
pub trait Decode: Sized {
    fn decode(r: &mut Reader<'_>) -> Result<Self>;
}

/// Cursor over a byte slice; underruns are protocol errors.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(TornetError::Protocol(format!(
                "truncated record: wanted {} bytes, {} remaining",
                n,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut a = [0u8; 8];
        a.copy_from_slice(b);
        Ok(u64::from_le_bytes(a))
    }

    pub fn i64(&mut self) -> Result<i64> {
        let b = self.take(8)?;
        let mut a = [0u8; 8];
        a.copy_from_slice(b);
        Ok(i64::from_le_bytes(a))
    }

    /// Length-prefixed byte buffer.
    pub fn bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }
}

/// Encode a record into a fresh buffer.
pub fn encode_to_vec<T: Encode>(value: &T) -> Vec<u8> {
    let mut out = Vec::new();
    value.encode(&mut out);
    out
}

/// Decode a record from the front of a slice.
pub fn decode<T: Decode>(buf: &[u8]) -> Result<T> {
    T::decode(&mut Reader::new(buf))
}

// ===== Primitive impls =====

impl Encode for u8 {
    fn encode<S: Sink + ?Sized>(&self, out: &mut S) {
        out.put_u8(*self);
    }
}

impl Decode for u8 {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        r.u8()
    }
}

impl Encode for u16 {
    fn encode<S: Sink + ?Sized>(&self, out: &mut S) {
        out.put_u16(*self);
    }
}

impl Decode for u16 {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        r.u16()
    }
}

impl Encode for u32 {
    fn encode<S: Sink + ?Sized>(&self, out: &mut S) {
        out.put_u32(*self);
    }
}

impl Decode for u32 {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        r.u32()
    }
}

impl Encode for u64 {
    fn encode<S: Sink + ?Sized>(&self, out: &mut S) {
        out.put_u64(*self);
    }
}

impl Decode for u64 {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        r.u64()
    }
}

impl Encode for i64 {
    fn encode<S: Sink + ?Sized>(&self, out: &mut S) {
        out.put_i64(*self);
    }
}

impl Decode for i64 {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        r.i64()
    }
}

impl Encode for String {
    fn encode<S: Sink + ?Sized>(&self, out: &mut S) {
        out.put_bytes(self.as_bytes());
    }
}

impl Decode for String {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let raw = r.bytes()?;
        String::from_utf8(raw).map_err(|e| TornetError::Protocol(format!("invalid utf-8: {}", e)))
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode<S: Sink + ?Sized>(&self, out: &mut S) {
        out.put_u32(self.len() as u32);
        for item in self {
            item.encode(out);
        }
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let count = r.u32()? as usize;
        // Bound preallocation by what the buffer could possibly hold.
        let mut out = Vec::with_capacity(count.min(r.remaining()));
        for _ in 0..count {
            out.push(T::decode(r)?);
        }
        Ok(out)
    }
}
