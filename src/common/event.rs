use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// One captured image plus its identifying metadata. Created once by the
/// intake layer and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureEvent {
    pub id: Uuid,
    pub image_path: PathBuf,
    pub captured_at: DateTime<Utc>,
    pub pose: Option<serde_json::Value>,
}

impl CaptureEvent {
    pub fn new(image_path: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            image_path,
            captured_at: Utc::now(),
            pose: None,
        }
    }
}

/// Free-text scene description produced by the captioning service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Caption(String);

impl Caption {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

/// A capture paired with its caption, as delivered by the upstream
/// captioning stage. This is the unit of work the coordinator consumes.
#[derive(Debug, Clone)]
pub struct CaptionedCapture {
    pub event: CaptureEvent,
    pub caption: Caption,
}

/// Ordered list of detection prompts derived from a caption. Duplicates
/// are dropped keeping the first occurrence; an empty query is valid and
/// means "nothing to detect".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectQuery {
    prompts: Vec<String>,
}

impl ObjectQuery {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_prompts<I, S>(prompts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let deduped: IndexSet<String> = prompts.into_iter().map(Into::into).collect();
        Self {
            prompts: deduped.into_iter().collect(),
        }
    }

    pub fn as_slice(&self) -> &[String] {
        &self.prompts
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }
}
