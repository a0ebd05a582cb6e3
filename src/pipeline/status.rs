use crate::pipeline::record::{RecordSummary, Terminal};
use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::Mutex;

const HISTORY_CAPACITY: usize = 200;

/// Rolling view of what the relay has processed, shared between the
/// coordinator (writer) and the status endpoint (reader). A downstream
/// outage shows up here as failed/degraded counts, never as an
/// unresponsive relay.
#[derive(Debug, Default)]
pub struct StatusBoard {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    last: Option<RecordSummary>,
    history: VecDeque<RecordSummary>,
    published: u64,
    publish_failed: u64,
    failed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub last: Option<RecordSummary>,
    pub history: Vec<RecordSummary>,
    pub published: u64,
    pub publish_failed: u64,
    pub failed: u64,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, summary: RecordSummary) {
        let mut inner = self.inner.lock().await;
        match summary.terminal {
            Some(Terminal::Published) => inner.published += 1,
            Some(Terminal::PublishFailed { .. }) => inner.publish_failed += 1,
            Some(Terminal::Failed { .. }) => inner.failed += 1,
            None => {}
        }
        if inner.history.len() == HISTORY_CAPACITY {
            inner.history.pop_back();
        }
        inner.history.push_front(summary.clone());
        inner.last = Some(summary);
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        let inner = self.inner.lock().await;
        StatusSnapshot {
            last: inner.last.clone(),
            history: inner.history.iter().cloned().collect(),
            published: inner.published,
            publish_failed: inner.publish_failed,
            failed: inner.failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::CaptureEvent;
    use crate::pipeline::record::{PipelineRecord, Stage};
    use std::path::PathBuf;

    fn terminal_summary(n: usize, terminal: Terminal) -> RecordSummary {
        let mut record =
            PipelineRecord::new(CaptureEvent::new(PathBuf::from(format!("/c/f{n}.jpg"))));
        record.finish(terminal);
        record.summary()
    }

    #[tokio::test]
    async fn counts_split_by_terminal_kind() {
        let board = StatusBoard::new();
        board.record(terminal_summary(0, Terminal::Published)).await;
        board
            .record(terminal_summary(
                1,
                Terminal::PublishFailed {
                    failed_sinks: vec!["ingest".to_string()],
                },
            ))
            .await;
        board
            .record(terminal_summary(
                2,
                Terminal::Failed {
                    stage: Stage::ObjectsReady,
                    error: "boom".to_string(),
                },
            ))
            .await;

        let snapshot = board.snapshot().await;
        assert_eq!(snapshot.published, 1);
        assert_eq!(snapshot.publish_failed, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.history.len(), 3);
    }

    #[tokio::test]
    async fn history_is_bounded_and_newest_first() {
        let board = StatusBoard::new();
        for n in 0..(HISTORY_CAPACITY + 10) {
            board.record(terminal_summary(n, Terminal::Published)).await;
        }
        let snapshot = board.snapshot().await;
        assert_eq!(snapshot.history.len(), HISTORY_CAPACITY);
        let newest = snapshot.last.expect("last is set");
        assert_eq!(snapshot.history[0].id, newest.id);
    }
}
