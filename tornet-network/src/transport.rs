//! Transport seam
//!
//! The raw RPC transport is an external collaborator: it can connect to a
//! peer and invoke a numbered method with an opaque codec-encoded payload.
//! Dropping a session aborts its in-flight invocations.

use std::sync::Arc;

use async_trait::async_trait;

use tornet_core::digest::Digest;
use tornet_core::error::Result;

#[async_trait]
pub trait Session: Send + Sync {
    /// Invoke a method by its registration number; payload and response are
    /// codec-encoded records.
    async fn invoke(&self, method: u16, payload: Vec<u8>) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a session to a peer.
    async fn connect(&self, peer: &Digest) -> Result<Arc<dyn Session>>;
}
