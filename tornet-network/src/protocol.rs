//! Chunk RPC wire messages
//!
//! All arguments and results are canonical-codec encoded. Method numbers
//! follow service registration order; the chunk service registers
//! `store`, `fetch`, `query`.

use tornet_core::codec::{Decode, Encode, Reader, Sink};
use tornet_core::digest::Digest;
use tornet_core::error::{Result, TornetError};

pub const METHOD_STORE: u16 = 0;
pub const METHOD_FETCH: u16 = 1;
pub const METHOD_QUERY: u16 = 2;

/// Outcome of a `store` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StoreResult {
    Accepted = 0,
    Rejected = 1,
    Full = 2,
}

impl StoreResult {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::Accepted),
            1 => Ok(Self::Rejected),
            2 => Ok(Self::Full),
            other => Err(TornetError::Protocol(format!(
                "unknown store result {}",
                other
            ))),
        }
    }
}

/// `store` request carries the raw chunk bytes; the id is their digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreResponse {
    pub result: u8,
}

impl Encode for StoreResponse {
    fn encode<S: Sink + ?Sized>(&self, out: &mut S) {
        out.put_u8(self.result);
    }
}

impl Decode for StoreResponse {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self { result: r.u8()? })
    }
}

/// Outcome of a `fetch` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FetchResult {
    Ok = 0,
    NotFound = 1,
    OutOfCredit = 2,
}

impl FetchResult {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::Ok),
            1 => Ok(Self::NotFound),
            2 => Ok(Self::OutOfCredit),
            other => Err(TornetError::Protocol(format!(
                "unknown fetch result {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub target: Digest,
    pub length: u32,
    pub offset: u32,
}

impl Encode for FetchRequest {
    fn encode<S: Sink + ?Sized>(&self, out: &mut S) {
        self.target.encode(out);
        out.put_u32(self.length);
        out.put_u32(self.offset);
    }
}

impl Decode for FetchRequest {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            target: Digest::decode(r)?,
            length: r.u32()?,
            offset: r.u32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub result: u8,
    pub offset: u32,
    pub total_size: u32,
    pub data: Vec<u8>,
    pub balance: i64,
    /// Suggested delay before the peer should be queried again.
    pub query_interval: u32,
    /// Advisory hop count; carried on the wire, currently always 0.
    pub deadend_count: u16,
}

impl Encode for FetchResponse {
    fn encode<S: Sink + ?Sized>(&self, out: &mut S) {
        out.put_u8(self.result);
        out.put_u32(self.offset);
        out.put_u32(self.total_size);
        out.put_bytes(&self.data);
        out.put_i64(self.balance);
        out.put_u32(self.query_interval);
        out.put_u16(self.deadend_count);
    }
}

impl Decode for FetchResponse {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            result: r.u8()?,
            offset: r.u32()?,
            total_size: r.u32()?,
            data: r.bytes()?,
            balance: r.i64()?,
            query_interval: r.u32()?,
            deadend_count: r.u16()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub target: Digest,
}

impl Encode for QueryRequest {
    fn encode<S: Sink + ?Sized>(&self, out: &mut S) {
        self.target.encode(out);
    }
}

impl Decode for QueryRequest {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            target: Digest::decode(r)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResponse {
    pub present: u8,
    pub closer_peers: Vec<Digest>,
}

impl Encode for QueryResponse {
    fn encode<S: Sink + ?Sized>(&self, out: &mut S) {
        out.put_u8(self.present);
        self.closer_peers.encode(out);
    }
}

impl Decode for QueryResponse {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            present: r.u8()?,
            closer_peers: Vec::<Digest>::decode(r)?,
        })
    }
}
