//! Offline Cache Network Layer
//!
//! This crate provides the network side of the interception layer: the
//! request/response types exchanged with the origin, the [`Upstream`]
//! trait the core fetches through, and a reqwest-backed client.

pub mod client;
pub mod error;
pub mod message;

pub use client::{OriginClient, OriginClientConfig, Upstream};
pub use error::ProxyError;
pub use message::{FetchRequest, FetchResponse};
