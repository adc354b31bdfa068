use anyhow::Result;
use async_trait::async_trait;

use super::types::{ReadParams, ReadResponse};

/// The single external I/O capability the engine consumes.
///
/// Implementations are expected to enforce their own timeout (see
/// `TimeoutAdapter` for a ready-made wrapper); a timeout is an ordinary
/// `Err` and counts toward per-block backoff like any other failure.
#[async_trait]
pub trait DataAdapter<T>: Send + Sync {
    async fn read(&self, params: ReadParams) -> Result<ReadResponse<T>>;
}
