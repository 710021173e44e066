//! Offline Cache Core Business Logic
//!
//! This crate provides the core functionality for Offline Cache:
//! generation lifecycle (install, activate), request classification and
//! the fetch strategies that answer intercepted requests.

pub mod cache;
pub mod error;
pub mod generation;
pub mod manifest;
pub mod routes;
pub mod update;

pub use cache::{
    ActivationReport, CacheConfig, CacheManager, FetchOutcome, Response, ResponseSource,
    WorkerStats, WorkerStatus,
};
pub use error::CoreError;
pub use generation::{Generation, GenerationState, cache_name};
pub use manifest::{AssetManifest, DeploymentManifest};
pub use routes::{RouteFamily, RouteTable, Strategy};
pub use update::{DeploymentSource, UpdateOutcome, check_for_update, spawn_update_task};

pub use offline_proxy::{FetchRequest, FetchResponse};
