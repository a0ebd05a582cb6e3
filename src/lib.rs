pub mod annotate;
pub mod captures;
pub mod common;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod forward;
pub mod hops;
pub mod intake;
pub mod pipeline;
pub mod publish;

pub use config::Configuration;
pub use coordinator::{Coordinator, CoordinatorBuilder};
pub use error::{AnnotateError, HopError, RelayError};
pub use forward::{Backoff, ForwardOutcome, Forwarder, RemoteHop, RetryPolicy};
