//! Filesystem view of the shared captures directory: newest-capture
//! lookup for events that arrive without an image path, and the atomic
//! sidecar-JSON merge that keeps per-image metadata next to the image.

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::warn;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Newest capture image under `root`, by modification time. Annotated
/// artifacts (`*_ann.*`) and run-level `*_ann` folders are never
/// candidates, so the relay cannot feed its own output back in.
pub fn latest_capture(root: &Path) -> Option<PathBuf> {
    let mut newest: Option<(SystemTime, PathBuf)> = None;
    scan(root, &mut newest);
    newest.map(|(_, path)| path)
}

fn scan(dir: &Path, newest: &mut Option<(SystemTime, PathBuf)>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "cannot scan captures directory");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if !is_ann_name(&path) {
                scan(&path, newest);
            }
            continue;
        }
        if !is_capture_image(&path) {
            continue;
        }
        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => continue,
        };
        let newer = match newest {
            Some((best, _)) => modified > *best,
            None => true,
        };
        if newer {
            *newest = Some((modified, path));
        }
    }
}

fn is_capture_image(path: &Path) -> bool {
    let has_image_ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false);
    has_image_ext && !is_ann_name(path)
}

fn is_ann_name(path: &Path) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase().ends_with("_ann"))
        .unwrap_or(false)
}

/// Sidecar JSON path for a capture: same stem, `.json` extension.
pub fn sidecar_path(image_path: &Path) -> PathBuf {
    image_path.with_extension("json")
}

/// Merge `updates` into the sidecar document, tolerating a missing or
/// corrupt existing file, and swap the result into place via a temporary
/// so concurrent readers never see a half-written document.
pub fn update_sidecar(
    sidecar: &Path,
    updates: Map<String, Value>,
) -> Result<(), std::io::Error> {
    let mut document = match std::fs::read(sidecar) {
        Ok(bytes) => serde_json::from_slice::<Value>(&bytes)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default(),
        Err(_) => Map::new(),
    };
    for (key, value) in updates {
        document.insert(key, value);
    }

    let mut tmp = sidecar.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let bytes = serde_json::to_vec_pretty(&Value::Object(document))
        .map_err(std::io::Error::other)?;
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, sidecar)
}

/// Current sidecar contents, if any.
pub fn read_sidecar(sidecar: &Path) -> Option<Value> {
    let bytes = std::fs::read(sidecar).ok()?;
    serde_json::from_slice(&bytes).ok()
}
