use crate::error::HopError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One labeled bounding box. Coordinates are `[x1, y1, x2, y2]`, either in
/// pixels or normalized to `[0, 1]` depending on what the detector emits;
/// the annotation writer scales normalized boxes at draw time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub score: Option<f64>,
    pub bbox: [f64; 4],
}

/// Decoded reply of the object-detection service for one capture. Zero
/// detections is a valid, non-error outcome.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
    pub image_width: Option<u32>,
    pub image_height: Option<u32>,
    pub latency_sec: Option<f64>,
    /// Pre-annotated JPEG bytes, present when the detector was asked to
    /// annotate server-side.
    #[serde(skip)]
    pub annotated_image: Option<Vec<u8>>,
}

impl DetectionResult {
    /// Decode the detector's JSON reply. Deployed detectors have answered
    /// with `{"detections": [...]}`, a bare list, or `{"items": [...]}`,
    /// with per-box key variations; all three container shapes are
    /// accepted. Anything else is a schema mismatch and aborts the hop.
    pub fn from_response(value: Value) -> Result<Self, HopError> {
        let raw = raw_detections(&value)?;
        let detections = raw.iter().filter_map(parse_detection).collect();

        let image_width = value
            .get("image")
            .and_then(|i| i.get("width"))
            .and_then(Value::as_u64)
            .map(|w| w as u32);
        let image_height = value
            .get("image")
            .and_then(|i| i.get("height"))
            .and_then(Value::as_u64)
            .map(|h| h as u32);
        let latency_sec = value.get("latency_sec").and_then(Value::as_f64);

        let annotated_image = match value.get("annotated_image_b64").and_then(Value::as_str) {
            Some(b64) => Some(
                BASE64
                    .decode(b64)
                    .map_err(|e| HopError::Schema(format!("bad annotated image: {e}")))?,
            ),
            None => None,
        };

        Ok(Self {
            detections,
            image_width,
            image_height,
            latency_sec,
            annotated_image,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

fn raw_detections(value: &Value) -> Result<Vec<Value>, HopError> {
    if let Some(list) = value.as_array() {
        return Ok(list.clone());
    }
    for key in ["detections", "items"] {
        match value.get(key) {
            Some(Value::Array(list)) => return Ok(list.clone()),
            Some(Value::Null) => return Ok(Vec::new()),
            Some(other) => {
                return Err(HopError::Schema(format!(
                    "'{key}' is not a list: {other}"
                )))
            }
            None => {}
        }
    }
    Err(HopError::Schema(
        "reply has neither 'detections' nor 'items'".to_string(),
    ))
}

// Boxes that do not carry a usable 4-element box are dropped rather than
// failing the whole reply.
fn parse_detection(value: &Value) -> Option<Detection> {
    let obj = value.as_object()?;
    let label = obj
        .get("label")
        .or_else(|| obj.get("name"))
        .or_else(|| obj.get("text"))
        .and_then(Value::as_str)
        .unwrap_or("object")
        .to_string();
    let score = obj
        .get("score")
        .or_else(|| obj.get("confidence"))
        .and_then(Value::as_f64);
    let coords = obj
        .get("bbox")
        .or_else(|| obj.get("box"))
        .or_else(|| obj.get("xyxy"))?
        .as_array()?;
    if coords.len() != 4 {
        return None;
    }
    let mut bbox = [0.0f64; 4];
    for (slot, coord) in bbox.iter_mut().zip(coords) {
        *slot = coord.as_f64()?;
    }
    Some(Detection { label, score, bbox })
}
