use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::time::Duration;

use crate::adapter::traits::DataAdapter;
use crate::adapter::types::{ReadParams, ReadResponse};

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(3);

/// Wraps any adapter with a per-read deadline.
///
/// The engine expects adapters to bound their own reads; this wrapper is
/// the stock way to do it. An elapsed deadline is an ordinary read error.
pub struct TimeoutAdapter<A> {
    inner: A,
    timeout: Duration,
}

impl<A> TimeoutAdapter<A> {
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn with_timeout(inner: A, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl<T, A> DataAdapter<T> for TimeoutAdapter<A>
where
    T: Send + 'static,
    A: DataAdapter<T>,
{
    async fn read(&self, params: ReadParams) -> Result<ReadResponse<T>> {
        match tokio::time::timeout(self.timeout, self.inner.read(params)).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!("adapter read timed out after {:?}", self.timeout)),
        }
    }
}
