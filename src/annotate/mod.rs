pub mod writer;

pub use writer::{AnnotateRequest, AnnotatedArtifact, AnnotationWriter};
