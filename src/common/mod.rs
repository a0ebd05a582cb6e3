pub mod detection;
pub mod event;

pub use detection::{Detection, DetectionResult};
pub use event::{Caption, CaptionedCapture, CaptureEvent, ObjectQuery};
