pub mod detection;
pub mod prompts;

pub use detection::{DetectionHop, DetectionRequest};
pub use prompts::PromptExtractionHop;

use crate::error::HopError;

// Error bodies go into logs and failure records; keep them bounded.
const MAX_BODY_SNIPPET: usize = 512;

pub(crate) fn snippet(body: String) -> String {
    if body.len() <= MAX_BODY_SNIPPET {
        body
    } else {
        let mut end = MAX_BODY_SNIPPET;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body[..end].to_string()
    }
}

pub(crate) async fn status_error(response: reqwest::Response) -> HopError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    HopError::Status {
        status,
        body: snippet(body),
    }
}
