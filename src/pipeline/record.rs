use crate::annotate::AnnotatedArtifact;
use crate::common::{Caption, CaptureEvent, DetectionResult, ObjectQuery};
use crate::publish::PublishOutcome;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

/// Stages of one capture's journey through the relay. A record moves
/// through these strictly in order and never holds data for a stage it
/// has not reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Stage {
    Received,
    CaptionReady,
    ObjectsReady,
    DetectionReady,
    AnnotatedReady,
    Published,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Received => "Received",
            Stage::CaptionReady => "CaptionReady",
            Stage::ObjectsReady => "ObjectsReady",
            Stage::DetectionReady => "DetectionReady",
            Stage::AnnotatedReady => "AnnotatedReady",
            Stage::Published => "Published",
        }
    }

    /// Execution order (lower runs first).
    pub fn priority(&self) -> u8 {
        match self {
            Stage::Received => 0,
            Stage::CaptionReady => 1,
            Stage::ObjectsReady => 2,
            Stage::DetectionReady => 3,
            Stage::AnnotatedReady => 4,
            Stage::Published => 5,
        }
    }
}

impl PartialOrd for Stage {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Stage {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority().cmp(&other.priority())
    }
}

/// How a record ended. `PublishFailed` is degraded-but-processed: the
/// pipeline work is done and must not be confused with `Failed`.
#[derive(Debug, Clone, Serialize)]
pub enum Terminal {
    Published,
    PublishFailed { failed_sinks: Vec<String> },
    Failed { stage: Stage, error: String },
}

/// The coordinator's per-event working state. Created on arrival,
/// mutated only by the coordinator task that owns it, discarded after
/// the terminal summary is recorded.
#[derive(Debug, Clone)]
pub struct PipelineRecord {
    pub event: CaptureEvent,
    pub stage: Stage,
    pub caption: Option<Caption>,
    pub query: Option<ObjectQuery>,
    pub detections: Option<DetectionResult>,
    pub artifact: Option<AnnotatedArtifact>,
    pub publish: Option<PublishOutcome>,
    pub terminal: Option<Terminal>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRecord {
    pub fn new(event: CaptureEvent) -> Self {
        Self {
            event,
            stage: Stage::Received,
            caption: None,
            query: None,
            detections: None,
            artifact: None,
            publish: None,
            terminal: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Move the cursor forward. Stage order is fixed; skipping backwards
    /// would be a coordinator bug.
    pub fn advance(&mut self, stage: Stage) {
        debug_assert!(self.terminal.is_none(), "terminal records are frozen");
        debug_assert!(stage > self.stage, "stage order violation");
        self.stage = stage;
    }

    /// Freeze the record at the stage that could not be reached.
    pub fn fail(&mut self, stage: Stage, error: impl ToString) {
        self.terminal = Some(Terminal::Failed {
            stage,
            error: error.to_string(),
        });
        self.finished_at = Some(Utc::now());
    }

    pub fn finish(&mut self, terminal: Terminal) {
        self.terminal = Some(terminal);
        self.finished_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    /// Final structured result delivered to downstream sinks. Keyed by
    /// the capture event id so sinks can de-duplicate redeliveries.
    pub fn publish_payload(&self) -> serde_json::Value {
        json!({
            "event_id": self.event.id,
            "image_path": self.event.image_path,
            "captured_at": self.event.captured_at,
            "pose": self.event.pose,
            "caption": self.caption.as_ref().map(Caption::as_str),
            "objects": self.query.as_ref().map(ObjectQuery::as_slice),
            "detections": self.detections.as_ref().map(|d| &d.detections),
            "artifact_path": self.artifact.as_ref().map(|a| &a.path),
        })
    }

    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            id: self.event.id,
            image_path: self.event.image_path.display().to_string(),
            stage: self.stage,
            terminal: self.terminal.clone(),
            caption: self.caption.as_ref().map(|c| c.as_str().to_string()),
            objects: self
                .query
                .as_ref()
                .map(|q| q.as_slice().to_vec())
                .unwrap_or_default(),
            detection_count: self
                .detections
                .as_ref()
                .map(|d| d.detections.len())
                .unwrap_or(0),
            artifact_path: self
                .artifact
                .as_ref()
                .map(|a| a.path.display().to_string()),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// Compact, serializable view of a record for the status API and the
/// observer broadcast.
#[derive(Debug, Clone, Serialize)]
pub struct RecordSummary {
    pub id: Uuid,
    pub image_path: String,
    pub stage: Stage,
    pub terminal: Option<Terminal>,
    pub caption: Option<String>,
    pub objects: Vec<String>,
    pub detection_count: usize,
    pub artifact_path: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
