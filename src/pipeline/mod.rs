pub mod record;
pub mod status;

pub use record::{PipelineRecord, RecordSummary, Stage, Terminal};
pub use status::{StatusBoard, StatusSnapshot};
