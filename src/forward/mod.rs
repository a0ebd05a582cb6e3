pub mod backoff;
pub mod forwarder;

pub use backoff::Backoff;
pub use forwarder::{ForwardOutcome, Forwarder, RemoteHop, RetryPolicy};
