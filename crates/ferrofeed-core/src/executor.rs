use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::adapter::Adapter;
use crate::catalog::SourceDescriptor;
use crate::outcome::{ErrorKind, FetchFailure, FetchOutcome};
use crate::transport::{FetchRequest, Transport};

/// Runs one attempt against one source and classifies the result.
#[derive(Clone)]
pub struct FetchExecutor {
    transport: Arc<dyn Transport>,
    adapter: Arc<dyn Adapter>,
}

impl FetchExecutor {
    pub fn new(transport: Arc<dyn Transport>, adapter: Arc<dyn Adapter>) -> Self {
        Self { transport, adapter }
    }

    /// Never fails: every error, including the per-attempt timeout, becomes a
    /// classified [`FetchOutcome`].
    pub async fn attempt(
        &self,
        descriptor: &SourceDescriptor,
        request: &FetchRequest,
        timeout: Duration,
    ) -> FetchOutcome {
        let started = Instant::now();
        let result = self.run(descriptor, request, timeout).await;
        let latency_ms = elapsed_ms(started);

        if let Err(failure) = &result {
            tracing::trace!(
                source = %descriptor.id,
                kind = %failure.kind(),
                latency_ms,
                message = failure.message(),
                "attempt failed"
            );
        }

        FetchOutcome {
            source: descriptor.id.clone(),
            result,
            latency_ms,
        }
    }

    async fn run(
        &self,
        descriptor: &SourceDescriptor,
        request: &FetchRequest,
        timeout: Duration,
    ) -> Result<crate::FeedValue, FetchFailure> {
        let response = tokio::time::timeout(timeout, self.transport.fetch(descriptor, request, timeout))
            .await
            .map_err(|_| {
                FetchFailure::new(
                    ErrorKind::Timeout,
                    format!("no response within {} ms", timeout.as_millis()),
                )
            })?
            .map_err(|err| FetchFailure::new(err.kind(), err.message()))?;

        if let Some(kind) = ErrorKind::from_status(response.status) {
            return Err(FetchFailure::new(
                kind,
                format!("upstream returned status {}", response.status),
            ));
        }

        self.adapter
            .parse(descriptor, request, &response)
            .map_err(|err| FetchFailure::new(ErrorKind::ParseError, err.to_string()))
    }
}

impl std::fmt::Debug for FetchExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchExecutor").finish_non_exhaustive()
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}
