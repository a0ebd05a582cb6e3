use crate::config::HopConfig;
use crate::error::HopError;
use crate::forward::Backoff;
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A remote service the relay talks to: accepts a typed request, returns
/// a typed response or a classified failure. Both model-server hops and
/// the publish sinks implement this, so the retry machinery below exists
/// exactly once.
#[async_trait]
pub trait RemoteHop: Send + Sync {
    type Request: Send + Sync;
    type Response: Send;

    /// Stage name used in per-attempt log records.
    fn stage(&self) -> &str;

    /// One attempt. The forwarder owns the per-attempt timeout; an
    /// implementation only reports what the remote did.
    async fn call(&self, request: &Self::Request) -> Result<Self::Response, HopError>;
}

/// Tri-state result of one retried network operation.
#[derive(Debug)]
pub enum ForwardOutcome<T> {
    Success(T),
    ExhaustedRetries(HopError),
    Aborted(HopError),
}

impl<T> ForwardOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, ForwardOutcome::Success(_))
    }

    /// Collapse the two failure arms into the error they carry.
    pub fn into_result(self) -> Result<T, HopError> {
        match self {
            ForwardOutcome::Success(payload) => Ok(payload),
            ForwardOutcome::ExhaustedRetries(err) | ForwardOutcome::Aborted(err) => Err(err),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub per_attempt_timeout: Duration,
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(per_attempt_timeout: Duration, max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            per_attempt_timeout,
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

impl From<&HopConfig> for RetryPolicy {
    fn from(hop: &HopConfig) -> Self {
        Self::new(hop.timeout(), hop.max_attempts, hop.backoff)
    }
}

/// Wraps any `RemoteHop` with a bounded retry budget. Transient failures
/// are retried with backoff; non-transient ones abort after the first
/// attempt, since retrying a bad request cannot change the answer.
#[derive(Debug, Clone)]
pub struct Forwarder {
    policy: RetryPolicy,
}

impl Forwarder {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub async fn forward<H: RemoteHop>(
        &self,
        hop: &H,
        request: &H::Request,
    ) -> ForwardOutcome<H::Response> {
        let max_attempts = self.policy.max_attempts;
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let started = Instant::now();
            let result = match tokio::time::timeout(
                self.policy.per_attempt_timeout,
                hop.call(request),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(HopError::Timeout),
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(response) => {
                    debug!(
                        stage = hop.stage(),
                        attempt, elapsed_ms, "attempt succeeded"
                    );
                    return ForwardOutcome::Success(response);
                }
                Err(error) if error.is_transient() => {
                    warn!(
                        stage = hop.stage(),
                        attempt,
                        elapsed_ms,
                        error = %error,
                        "transient failure"
                    );
                    last_error = Some(error);
                    if attempt < max_attempts {
                        tokio::time::sleep(self.policy.backoff.delay_for(attempt)).await;
                    }
                }
                Err(error) => {
                    warn!(
                        stage = hop.stage(),
                        attempt,
                        elapsed_ms,
                        error = %error,
                        "non-transient failure, aborting"
                    );
                    return ForwardOutcome::Aborted(error);
                }
            }
        }

        let error = last_error
            .unwrap_or_else(|| HopError::Request("retry budget allowed no attempts".to_string()));
        warn!(
            stage = hop.stage(),
            max_attempts,
            error = %error,
            "retries exhausted"
        );
        ForwardOutcome::ExhaustedRetries(error)
    }
}
