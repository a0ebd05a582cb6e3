use crate::annotate::{AnnotateRequest, AnnotationWriter};
use crate::captures;
use crate::common::{Caption, CaptionedCapture, ObjectQuery};
use crate::config::Configuration;
use crate::forward::Forwarder;
use crate::hops::{DetectionHop, DetectionRequest, PromptExtractionHop};
use crate::pipeline::{PipelineRecord, RecordSummary, Stage, StatusBoard, Terminal};
use crate::publish::Publisher;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tracing::{info, warn};

const RECORD_CHANNEL_CAPACITY: usize = 32;

/// Drives each captioned capture through the stage sequence: prompt
/// extraction, detection, annotation, publish. Every capture gets its own
/// task; one event's slowness or failure never blocks another's progress.
pub struct Coordinator {
    configuration: Configuration,
    prompt_hop: PromptExtractionHop,
    prompt_forwarder: Forwarder,
    detection_hop: DetectionHop,
    detection_forwarder: Forwarder,
    annotator: AnnotationWriter,
    publisher: Publisher,
    status: Arc<StatusBoard>,
    record_tx: broadcast::Sender<RecordSummary>,
}

impl Coordinator {
    pub fn status(&self) -> Arc<StatusBoard> {
        Arc::clone(&self.status)
    }

    /// Observe terminal record summaries as they are produced.
    pub fn subscribe(&self) -> broadcast::Receiver<RecordSummary> {
        self.record_tx.subscribe()
    }

    /// Consume captures until cancelled or the intake channel closes.
    /// In-flight captures keep running under their per-attempt timeouts;
    /// queued ones are simply not picked up after cancellation.
    pub fn spawn(
        self: Arc<Self>,
        mut event_rx: mpsc::Receiver<CaptionedCapture>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("coordinator shutting down");
                        break;
                    }
                    next = event_rx.recv() => match next {
                        Some(capture) => {
                            let coordinator = Arc::clone(&self);
                            tokio::spawn(async move {
                                coordinator.process(capture).await;
                            });
                        }
                        None => {
                            info!("intake channel closed");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Run one capture through the whole stage sequence and return its
    /// terminal record.
    pub async fn process(&self, capture: CaptionedCapture) -> PipelineRecord {
        let CaptionedCapture { event, caption } = capture;
        let mut record = PipelineRecord::new(event);
        info!(
            event = %record.event.id,
            image = %record.event.image_path.display(),
            caption = caption.as_str(),
            "processing capture"
        );

        record.caption = Some(caption.clone());
        record.advance(Stage::CaptionReady);

        // caption -> object list; a blank caption means nothing to
        // extract, so the hop is skipped entirely
        let query = if caption.is_blank() {
            info!(event = %record.event.id, "blank caption, nothing to extract");
            ObjectQuery::empty()
        } else {
            match self
                .prompt_forwarder
                .forward(&self.prompt_hop, &caption)
                .await
                .into_result()
            {
                Ok(query) => query,
                Err(err) => {
                    record.fail(Stage::ObjectsReady, err);
                    return self.finalize(record).await;
                }
            }
        };
        record.query = Some(query.clone());
        record.advance(Stage::ObjectsReady);

        // object list -> boxes; empty queries are still sent so the
        // pipeline stays uniform
        let request = DetectionRequest {
            image_path: record.event.image_path.clone(),
            query,
            annotate: self.configuration.annotate_in_service,
        };
        let detections = match self
            .detection_forwarder
            .forward(&self.detection_hop, &request)
            .await
            .into_result()
        {
            Ok(detections) => detections,
            Err(err) => {
                record.fail(Stage::DetectionReady, err);
                return self.finalize(record).await;
            }
        };
        record.detections = Some(detections.clone());
        record.advance(Stage::DetectionReady);

        self.merge_sidecar(&record);

        // boxes -> artifact on disk
        let annotate = AnnotateRequest {
            image_path: record.event.image_path.clone(),
            result: detections,
        };
        match self.annotator.clone().oneshot(annotate).await {
            Ok(artifact) => {
                record.artifact = Some(artifact);
                record.advance(Stage::AnnotatedReady);
            }
            Err(err) => {
                record.fail(Stage::AnnotatedReady, err);
                return self.finalize(record).await;
            }
        }

        // fan out the final result; sink failure degrades the record but
        // never undoes the work above
        let outcome = self.publisher.publish(&record.publish_payload()).await;
        let complete = outcome.is_complete();
        let failed_sinks = outcome.failed.iter().map(|f| f.sink.clone()).collect();
        record.publish = Some(outcome);
        if complete {
            record.advance(Stage::Published);
            record.finish(Terminal::Published);
        } else {
            record.finish(Terminal::PublishFailed { failed_sinks });
        }
        self.finalize(record).await
    }

    // Sidecar trouble is local metadata bookkeeping, not a pipeline
    // failure; log and move on.
    fn merge_sidecar(&self, record: &PipelineRecord) {
        let sidecar = captures::sidecar_path(&record.event.image_path);
        let mut updates = serde_json::Map::new();
        updates.insert(
            "caption".to_string(),
            json!(record.caption.as_ref().map(Caption::as_str)),
        );
        updates.insert(
            "detector".to_string(),
            json!({
                "event_id": record.event.id,
                "time": chrono::Utc::now(),
                "endpoint": self.configuration.detection_hop.endpoint,
                "prompts": record.query.as_ref().map(ObjectQuery::as_slice),
                "annotate": self.configuration.annotate_in_service,
                "detections": record.detections.as_ref().map(|d| &d.detections),
            }),
        );
        if let Err(err) = captures::update_sidecar(&sidecar, updates) {
            warn!(event = %record.event.id, error = %err, "sidecar update failed");
        }
    }

    async fn finalize(&self, record: PipelineRecord) -> PipelineRecord {
        let summary = record.summary();
        match &summary.terminal {
            Some(Terminal::Published) => {
                info!(event = %summary.id, "record published")
            }
            Some(Terminal::PublishFailed { failed_sinks }) => {
                warn!(event = %summary.id, ?failed_sinks, "record processed, publish degraded")
            }
            Some(Terminal::Failed { stage, error }) => {
                warn!(event = %summary.id, stage = stage.name(), error = %error, "record failed")
            }
            None => {}
        }
        self.status.record(summary.clone()).await;
        let _ = self.record_tx.send(summary);
        record
    }
}

pub struct CoordinatorBuilder {
    configuration: Configuration,
}

impl CoordinatorBuilder {
    pub fn new(configuration: Configuration) -> Self {
        Self { configuration }
    }

    // Overrides the configured prompt-extraction endpoint.
    pub fn prompt_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.configuration.prompt_hop.endpoint = endpoint.into();
        self
    }

    // Overrides the configured detection endpoint.
    pub fn detection_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.configuration.detection_hop.endpoint = endpoint.into();
        self
    }

    pub fn annotate_in_service(mut self, annotate: bool) -> Self {
        self.configuration.annotate_in_service = annotate;
        self
    }

    pub fn build(self) -> Coordinator {
        let configuration = self.configuration;
        let (record_tx, _) = broadcast::channel(RECORD_CHANNEL_CAPACITY);
        Coordinator {
            prompt_hop: PromptExtractionHop::new(configuration.prompt_hop.endpoint.clone()),
            prompt_forwarder: Forwarder::new((&configuration.prompt_hop).into()),
            detection_hop: DetectionHop::new(configuration.detection_hop.endpoint.clone()),
            detection_forwarder: Forwarder::new((&configuration.detection_hop).into()),
            annotator: AnnotationWriter::new(),
            publisher: Publisher::from_config(&configuration.sinks),
            status: Arc::new(StatusBoard::new()),
            record_tx,
            configuration,
        }
    }
}
