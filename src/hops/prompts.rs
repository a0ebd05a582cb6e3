use crate::common::{Caption, ObjectQuery};
use crate::error::HopError;
use crate::forward::RemoteHop;
use crate::hops::status_error;
use async_trait::async_trait;
use serde_json::Value;

/// Client for the caption-to-object-list service: one JSON POST per
/// attempt, no retries of its own.
pub struct PromptExtractionHop {
    client: reqwest::Client,
    endpoint: String,
}

impl PromptExtractionHop {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl RemoteHop for PromptExtractionHop {
    type Request = Caption;
    type Response = ObjectQuery;

    fn stage(&self) -> &str {
        "prompt_extraction"
    }

    async fn call(&self, caption: &Caption) -> Result<ObjectQuery, HopError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "caption": caption.as_str() }))
            .send()
            .await
            .map_err(HopError::from_reqwest)?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| HopError::Schema(format!("unparseable reply: {e}")))?;
        decode_objects(&value)
    }
}

// A reply without a usable "objects" list is a contract violation, not a
// flaky network. Entries are coerced to strings the way the deployed
// extractor's consumers do, then de-duplicated keeping first occurrence.
fn decode_objects(value: &Value) -> Result<ObjectQuery, HopError> {
    let objects = value
        .get("objects")
        .and_then(Value::as_array)
        .ok_or_else(|| HopError::Schema("reply is missing the 'objects' list".to_string()))?;
    let prompts = objects.iter().map(|entry| match entry.as_str() {
        Some(text) => text.to_string(),
        None => entry.to_string(),
    });
    Ok(ObjectQuery::from_prompts(prompts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::{Backoff, ForwardOutcome, Forwarder, RetryPolicy};
    use serde_json::json;
    use std::time::Duration;

    fn test_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(5),
            max_attempts,
            Backoff::Fixed { delay_secs: 0.0 },
        )
    }

    #[test]
    fn decode_deduplicates_and_keeps_order() {
        let value = json!({"objects": ["red chair", "window", "red chair"]});
        let query = decode_objects(&value).unwrap();
        assert_eq!(query.as_slice(), &["red chair", "window"]);
    }

    #[test]
    fn decode_rejects_missing_list() {
        let err = decode_objects(&json!({"prompts": ["x"]})).unwrap_err();
        assert!(matches!(err, HopError::Schema(_)));
    }

    #[tokio::test]
    async fn extracts_objects_from_remote_reply() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/prompts")
            .match_body(mockito::Matcher::Json(
                json!({"caption": "a red chair near the window"}),
            ))
            .with_status(200)
            .with_body(r#"{"objects": ["red chair", "window"]}"#)
            .create_async()
            .await;

        let hop = PromptExtractionHop::new(format!("{}/prompts", server.url()));
        let caption = Caption::new("a red chair near the window");
        let outcome = Forwarder::new(test_policy(3)).forward(&hop, &caption).await;

        mock.assert_async().await;
        match outcome {
            ForwardOutcome::Success(query) => {
                assert_eq!(query.as_slice(), &["red chair", "window"])
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn http_422_aborts_after_a_single_attempt() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/prompts")
            .with_status(422)
            .with_body("not json at all")
            .expect(1)
            .create_async()
            .await;

        let hop = PromptExtractionHop::new(format!("{}/prompts", server.url()));
        let caption = Caption::new("anything");
        let outcome = Forwarder::new(test_policy(5)).forward(&hop, &caption).await;

        mock.assert_async().await;
        match outcome {
            ForwardOutcome::Aborted(HopError::Status { status, .. }) => assert_eq!(status, 422),
            other => panic!("expected abort, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_errors_are_retried_within_budget() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/prompts")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let hop = PromptExtractionHop::new(format!("{}/prompts", server.url()));
        let caption = Caption::new("anything");
        let outcome = Forwarder::new(test_policy(3)).forward(&hop, &caption).await;

        mock.assert_async().await;
        assert!(matches!(outcome, ForwardOutcome::ExhaustedRetries(_)));
    }
}
