pub mod publisher;

pub use publisher::{PublishOutcome, Publisher, SinkFailure, SinkHop};
