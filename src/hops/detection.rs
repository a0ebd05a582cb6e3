use crate::common::{DetectionResult, ObjectQuery};
use crate::error::HopError;
use crate::forward::RemoteHop;
use crate::hops::status_error;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct DetectionRequest {
    pub image_path: PathBuf,
    pub query: ObjectQuery,
    pub annotate: bool,
}

/// Client for the object-detection service. Each attempt re-reads the
/// source image and posts it as multipart form data together with the
/// JSON-encoded prompt list and the annotate flag. An empty prompt list
/// is still sent; "detect nothing" is a valid request.
pub struct DetectionHop {
    client: reqwest::Client,
    endpoint: String,
}

impl DetectionHop {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl RemoteHop for DetectionHop {
    type Request = DetectionRequest;
    type Response = DetectionResult;

    fn stage(&self) -> &str {
        "detection"
    }

    async fn call(&self, request: &DetectionRequest) -> Result<DetectionResult, HopError> {
        let image_bytes = tokio::fs::read(&request.image_path).await.map_err(|e| {
            HopError::Unreadable(format!("{}: {e}", request.image_path.display()))
        })?;
        let file_name = request
            .image_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "capture.jpg".to_string());

        let image_part = Part::bytes(image_bytes)
            .file_name(file_name)
            .mime_str("application/octet-stream")
            .map_err(|e| HopError::Request(e.to_string()))?;
        let prompts_json = serde_json::to_string(request.query.as_slice())
            .map_err(|e| HopError::Request(e.to_string()))?;
        let form = Form::new()
            .part("image", image_part)
            .text("prompts", prompts_json)
            .text("annotate", if request.annotate { "1" } else { "0" });

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
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
        DetectionResult::from_response(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::{Backoff, ForwardOutcome, Forwarder, RetryPolicy};
    use std::time::Duration;
    use tempfile::TempDir;

    fn write_test_image(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("frame001.jpg");
        let img = image::RgbImage::from_pixel(32, 24, image::Rgb([40, 80, 120]));
        img.save(&path).expect("test image should save");
        path
    }

    fn test_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(5),
            max_attempts,
            Backoff::Fixed { delay_secs: 0.0 },
        )
    }

    #[tokio::test]
    async fn posts_multipart_and_decodes_boxes() {
        let dir = TempDir::new().unwrap();
        let image_path = write_test_image(&dir);

        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/infer")
            .match_header(
                "content-type",
                mockito::Matcher::Regex("multipart/form-data.*".to_string()),
            )
            .with_status(200)
            .with_body(
                r#"{"image": {"width": 32, "height": 24},
                    "detections": [{"label": "red chair", "score": 0.82, "bbox": [1, 2, 10, 12]}],
                    "latency_sec": 0.05}"#,
            )
            .create_async()
            .await;

        let hop = DetectionHop::new(format!("{}/infer", server.url()));
        let request = DetectionRequest {
            image_path,
            query: ObjectQuery::from_prompts(vec!["red chair"]),
            annotate: false,
        };
        let outcome = Forwarder::new(test_policy(7)).forward(&hop, &request).await;

        mock.assert_async().await;
        match outcome {
            ForwardOutcome::Success(result) => {
                assert_eq!(result.detections.len(), 1);
                assert_eq!(result.detections[0].label, "red chair");
                assert_eq!(result.image_width, Some(32));
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_image_aborts_without_touching_the_network() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/infer")
            .expect(0)
            .create_async()
            .await;

        let hop = DetectionHop::new(format!("{}/infer", server.url()));
        let request = DetectionRequest {
            image_path: PathBuf::from("/nonexistent/frame.jpg"),
            query: ObjectQuery::empty(),
            annotate: false,
        };
        let outcome = Forwarder::new(test_policy(7)).forward(&hop, &request).await;

        mock.assert_async().await;
        assert!(matches!(
            outcome,
            ForwardOutcome::Aborted(HopError::Unreadable(_))
        ));
    }

    #[tokio::test]
    async fn remote_bad_image_reply_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let image_path = write_test_image(&dir);

        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/infer")
            .with_status(400)
            .with_body(r#"{"error": "bad image data"}"#)
            .expect(1)
            .create_async()
            .await;

        let hop = DetectionHop::new(format!("{}/infer", server.url()));
        let request = DetectionRequest {
            image_path,
            query: ObjectQuery::from_prompts(vec!["a mug"]),
            annotate: false,
        };
        let outcome = Forwarder::new(test_policy(7)).forward(&hop, &request).await;

        mock.assert_async().await;
        assert!(matches!(
            outcome,
            ForwardOutcome::Aborted(HopError::Status { status: 400, .. })
        ));
    }

    #[tokio::test]
    async fn empty_query_is_still_sent() {
        let dir = TempDir::new().unwrap();
        let image_path = write_test_image(&dir);

        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/infer")
            .with_status(200)
            .with_body(r#"{"detections": []}"#)
            .expect(1)
            .create_async()
            .await;

        let hop = DetectionHop::new(format!("{}/infer", server.url()));
        let request = DetectionRequest {
            image_path,
            query: ObjectQuery::empty(),
            annotate: false,
        };
        let outcome = Forwarder::new(test_policy(1)).forward(&hop, &request).await;

        mock.assert_async().await;
        match outcome {
            ForwardOutcome::Success(result) => assert!(result.is_empty()),
            other => panic!("expected success, got {other:?}"),
        }
    }
}
