use crate::config::SinkConfig;
use crate::error::HopError;
use crate::forward::{ForwardOutcome, Forwarder, RemoteHop, RetryPolicy};
use crate::hops::status_error;
use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

/// One configured downstream sink (ingest API, dashboard refresh, ...).
/// Delivery is a JSON POST; the payload carries the capture event id so a
/// sink receiving the same record twice can key on it.
pub struct SinkHop {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl SinkHop {
    pub fn new(name: String, url: String) -> Self {
        Self {
            name,
            url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl RemoteHop for SinkHop {
    type Request = Value;
    type Response = ();

    fn stage(&self) -> &str {
        &self.name
    }

    async fn call(&self, payload: &Value) -> Result<(), HopError> {
        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(HopError::from_reqwest)?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SinkFailure {
    pub sink: String,
    pub error: String,
}

/// Per-sink result of one fan-out. Publish failure never unwinds the
/// pipeline; the record is processed either way and the failure list is
/// surfaced separately.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PublishOutcome {
    pub delivered: Vec<String>,
    pub failed: Vec<SinkFailure>,
}

impl PublishOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Best-effort fan-out of the final structured result. Sinks are
/// independent: each gets its own timeout and attempt budget, and one
/// sink's outage neither blocks nor fails the others.
pub struct Publisher {
    sinks: Vec<(SinkHop, Forwarder)>,
}

impl Publisher {
    pub fn from_config(sinks: &[SinkConfig]) -> Self {
        let sinks = sinks
            .iter()
            .map(|sink| {
                let hop = SinkHop::new(sink.name.clone(), sink.url.clone());
                let policy = RetryPolicy::new(
                    sink.timeout(),
                    sink.max_attempts,
                    crate::forward::Backoff::default(),
                );
                (hop, Forwarder::new(policy))
            })
            .collect();
        Self { sinks }
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub async fn publish(&self, payload: &Value) -> PublishOutcome {
        let deliveries = self.sinks.iter().map(|(hop, forwarder)| async move {
            match forwarder.forward(hop, payload).await {
                ForwardOutcome::Success(()) => {
                    info!(sink = hop.stage(), "published");
                    Ok(hop.stage().to_string())
                }
                ForwardOutcome::ExhaustedRetries(err) | ForwardOutcome::Aborted(err) => {
                    warn!(sink = hop.stage(), error = %err, "publish failed");
                    Err(SinkFailure {
                        sink: hop.stage().to_string(),
                        error: err.to_string(),
                    })
                }
            }
        });

        let mut outcome = PublishOutcome::default();
        for delivery in join_all(deliveries).await {
            match delivery {
                Ok(sink) => outcome.delivered.push(sink),
                Err(failure) => outcome.failed.push(failure),
            }
        }
        outcome
    }
}
