use crate::common::DetectionResult;
use crate::error::AnnotateError;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use serde::Serialize;
use std::future::Future;
use std::io::{BufWriter, Write as _};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::Service;

const JPEG_QUALITY: u8 = 92;
const BOX_THICKNESS: u32 = 4;

// Same fixed palette the detection service draws with.
const PALETTE: [[u8; 3]; 8] = [
    [0, 255, 0],
    [0, 0, 255],
    [255, 0, 0],
    [255, 255, 0],
    [0, 255, 255],
    [255, 0, 255],
    [0, 128, 128],
    [128, 128, 0],
];

#[derive(Debug, Clone)]
pub struct AnnotateRequest {
    pub image_path: PathBuf,
    pub result: DetectionResult,
}

/// The annotated image written next to its source capture.
#[derive(Debug, Clone, Serialize)]
pub struct AnnotatedArtifact {
    pub path: PathBuf,
    pub boxes_drawn: usize,
}

/// Draws detection boxes onto the source image and writes the artifact
/// with tmp-then-rename visibility: a reader of the captures directory
/// either sees the finished file or nothing. Purely local, never retried.
///
/// With zero detections the original is re-encoded unchanged, so every
/// processed capture ends up with an artifact. When the detector already
/// annotated server-side, its bytes are written verbatim.
#[derive(Debug, Clone, Default)]
pub struct AnnotationWriter;

impl AnnotationWriter {
    pub fn new() -> Self {
        Self
    }

    /// `<dir>/<stem>_ann.jpg`, deterministic per source image.
    pub fn artifact_path(image_path: &Path) -> PathBuf {
        let stem = image_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "capture".to_string());
        image_path.with_file_name(format!("{stem}_ann.jpg"))
    }

    fn render(request: &AnnotateRequest) -> Result<AnnotatedArtifact, AnnotateError> {
        let out_path = Self::artifact_path(&request.image_path);
        let tmp_path = tmp_sibling(&out_path);

        let boxes_drawn = if let Some(bytes) = &request.result.annotated_image {
            std::fs::write(&tmp_path, bytes).map_err(|source| AnnotateError::Write {
                path: tmp_path.clone(),
                source,
            })?;
            request.result.detections.len()
        } else {
            match draw_into_tmp(request, &tmp_path) {
                Ok(count) => count,
                Err(err) => {
                    let _ = std::fs::remove_file(&tmp_path);
                    return Err(err);
                }
            }
        };

        if let Err(source) = std::fs::rename(&tmp_path, &out_path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(AnnotateError::Write {
                path: out_path,
                source,
            });
        }
        tracing::debug!(path = %out_path.display(), boxes_drawn, "artifact written");
        Ok(AnnotatedArtifact {
            path: out_path,
            boxes_drawn,
        })
    }
}

impl Service<AnnotateRequest> for AnnotationWriter {
    type Response = AnnotatedArtifact;
    type Error = AnnotateError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: AnnotateRequest) -> Self::Future {
        Box::pin(async move { Self::render(&request) })
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

fn draw_into_tmp(request: &AnnotateRequest, tmp_path: &Path) -> Result<usize, AnnotateError> {
    let image = image::open(&request.image_path).map_err(|source| AnnotateError::Decode {
        path: request.image_path.clone(),
        source,
    })?;
    let mut canvas = image.to_rgb8();
    let (width, height) = canvas.dimensions();

    let mut boxes_drawn = 0;
    for detection in &request.result.detections {
        if let Some(rect) = pixel_rect(detection.bbox, width, height) {
            draw_box(&mut canvas, rect, color_for_label(&detection.label));
            boxes_drawn += 1;
        }
    }

    let file = std::fs::File::create(tmp_path).map_err(|source| AnnotateError::Write {
        path: tmp_path.to_path_buf(),
        source,
    })?;
    let mut writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY)
        .encode_image(&canvas)
        .map_err(AnnotateError::Encode)?;
    writer.flush().map_err(|source| AnnotateError::Write {
        path: tmp_path.to_path_buf(),
        source,
    })?;
    Ok(boxes_drawn)
}

fn color_for_label(label: &str) -> Rgb<u8> {
    let index = label
        .bytes()
        .fold(0usize, |acc, byte| acc.wrapping_add(byte as usize))
        % PALETTE.len();
    Rgb(PALETTE[index])
}

// Boxes arrive either in pixels or normalized to [0, 1]; scale the latter
// up, clamp everything to the frame, and drop degenerate rectangles.
fn pixel_rect(bbox: [f64; 4], width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let [mut x1, mut y1, mut x2, mut y2] = bbox;
    if bbox.iter().all(|v| (0.0..=1.0).contains(v)) {
        x1 *= f64::from(width);
        x2 *= f64::from(width);
        y1 *= f64::from(height);
        y2 *= f64::from(height);
    }
    let clamp_x = |v: f64| (v.round().max(0.0) as u32).min(width.saturating_sub(1));
    let clamp_y = |v: f64| (v.round().max(0.0) as u32).min(height.saturating_sub(1));
    let (x1, y1, x2, y2) = (clamp_x(x1), clamp_y(y1), clamp_x(x2), clamp_y(y2));
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some((x1, y1, x2, y2))
}

fn draw_box(canvas: &mut RgbImage, rect: (u32, u32, u32, u32), color: Rgb<u8>) {
    let (x1, y1, x2, y2) = rect;
    for t in 0..BOX_THICKNESS {
        let top = y1.saturating_add(t).min(y2);
        let bottom = y2.saturating_sub(t).max(y1);
        for x in x1..=x2 {
            canvas.put_pixel(x, top, color);
            canvas.put_pixel(x, bottom, color);
        }
        let left = x1.saturating_add(t).min(x2);
        let right = x2.saturating_sub(t).max(x1);
        for y in y1..=y2 {
            canvas.put_pixel(left, y, color);
            canvas.put_pixel(right, y, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Detection;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn capture_with_image(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("frame001.jpg");
        let img = RgbImage::from_pixel(64, 48, Rgb([10, 10, 10]));
        img.save(&path).expect("test image should save");
        path
    }

    fn one_box(label: &str, bbox: [f64; 4]) -> DetectionResult {
        DetectionResult {
            detections: vec![Detection {
                label: label.to_string(),
                score: Some(0.82),
                bbox,
            }],
            ..DetectionResult::default()
        }
    }

    #[tokio::test]
    async fn writes_artifact_next_to_source_with_ann_suffix() {
        let dir = TempDir::new().unwrap();
        let image_path = capture_with_image(&dir);

        let artifact = AnnotationWriter::new()
            .oneshot(AnnotateRequest {
                image_path: image_path.clone(),
                result: one_box("red chair", [5.0, 5.0, 40.0, 30.0]),
            })
            .await
            .expect("annotation should succeed");

        assert_eq!(artifact.path, dir.path().join("frame001_ann.jpg"));
        assert_eq!(artifact.boxes_drawn, 1);
        assert!(artifact.path.is_file());
        // the temporary never survives a successful write
        assert!(!tmp_sibling(&artifact.path).exists());
        // the drawn artifact still decodes as an image
        let reread = image::open(&artifact.path).unwrap();
        assert_eq!(reread.to_rgb8().dimensions(), (64, 48));
    }

    #[tokio::test]
    async fn empty_detections_still_produce_an_artifact() {
        let dir = TempDir::new().unwrap();
        let image_path = capture_with_image(&dir);

        let artifact = AnnotationWriter::new()
            .oneshot(AnnotateRequest {
                image_path,
                result: DetectionResult::default(),
            })
            .await
            .expect("pass-through should succeed");

        assert_eq!(artifact.boxes_drawn, 0);
        assert!(artifact.path.is_file());
    }

    #[tokio::test]
    async fn remote_annotated_bytes_are_written_verbatim() {
        let dir = TempDir::new().unwrap();
        let image_path = capture_with_image(&dir);
        let remote_bytes = std::fs::read(&image_path).unwrap();

        let mut result = one_box("mug", [1.0, 1.0, 10.0, 10.0]);
        result.annotated_image = Some(remote_bytes.clone());

        let artifact = AnnotationWriter::new()
            .oneshot(AnnotateRequest { image_path, result })
            .await
            .expect("verbatim write should succeed");

        assert_eq!(std::fs::read(&artifact.path).unwrap(), remote_bytes);
    }

    #[tokio::test]
    async fn failed_write_leaves_no_file_at_the_final_path() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("gone.jpg");

        let err = AnnotationWriter::new()
            .oneshot(AnnotateRequest {
                image_path: missing.clone(),
                result: one_box("chair", [0.0, 0.0, 5.0, 5.0]),
            })
            .await
            .expect_err("decoding a missing image must fail");

        assert!(matches!(err, AnnotateError::Decode { .. }));
        let final_path = AnnotationWriter::artifact_path(&missing);
        assert!(!final_path.exists());
        assert!(!tmp_sibling(&final_path).exists());
    }

    #[test]
    fn normalized_boxes_are_scaled_to_pixels() {
        assert_eq!(
            pixel_rect([0.25, 0.5, 0.75, 1.0], 100, 100),
            Some((25, 50, 75, 99))
        );
        // pixel-space boxes pass through with clamping only
        assert_eq!(
            pixel_rect([10.0, 10.0, 500.0, 500.0], 100, 80),
            Some((10, 10, 99, 79))
        );
    }

    #[test]
    fn degenerate_boxes_are_dropped() {
        assert_eq!(pixel_rect([50.0, 50.0, 50.0, 60.0], 100, 100), None);
        assert_eq!(pixel_rect([30.0, 70.0, 20.0, 60.0], 100, 100), None);
    }

    #[test]
    fn label_colors_are_deterministic() {
        assert_eq!(color_for_label("red chair"), color_for_label("red chair"));
    }
}
