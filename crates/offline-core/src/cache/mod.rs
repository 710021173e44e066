//! Cache lifecycle and request interception

mod manager;
mod response;
#[cfg(test)]
pub(crate) mod testing;

pub use manager::{ActivationReport, CacheConfig, CacheManager, WorkerStats, WorkerStatus};
pub use response::{FetchOutcome, Response, ResponseSource};
