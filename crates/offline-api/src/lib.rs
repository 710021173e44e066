//! Offline Cache Host Adapter
//!
//! This crate wires the cache core to an HTTP runtime: every request that
//! is not addressed to the worker's own endpoints is treated as an
//! intercepted fetch and answered by the [`offline_core::CacheManager`].

pub mod error;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::{AppState, MetricsHandle};
