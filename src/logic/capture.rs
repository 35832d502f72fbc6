//! Capture Provider
//!
//! Frame acquisition is external. The pipeline only sees `CaptureProvider`;
//! `SpoolDirCapture` reads frames an external capture tool drops into a
//! directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use image::DynamicImage;
use parking_lot::Mutex;

use crate::logic::error::{PipelineError, PipelineResult};

const FRAME_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

/// Sidecar with the frame's source context (e.g. foreground app)
const CONTEXT_EXTENSION: &str = "ctx";

/// One sampled frame
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub image: DynamicImage,
    /// Capture time (epoch millis)
    pub captured_at: i64,
    pub source_context: Option<String>,
}

impl CapturedFrame {
    pub fn now(image: DynamicImage) -> Self {
        Self {
            image,
            captured_at: chrono::Utc::now().timestamp_millis(),
            source_context: None,
        }
    }
}

pub trait CaptureProvider: Send + Sync {
    /// `CaptureUnavailable` when no frame can be supplied right now
    fn capture_frame(&self) -> PipelineResult<CapturedFrame>;

    fn name(&self) -> &str {
        "capture"
    }
}

// ============================================================================
// SPOOL DIRECTORY
// ============================================================================

pub struct SpoolDirCapture {
    dir: PathBuf,
    /// Remove frames once decoded
    consume: bool,
    last_seen: Mutex<Option<(PathBuf, SystemTime)>>,
}

impl SpoolDirCapture {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), consume: false, last_seen: Mutex::new(None) }
    }

    pub fn consuming(mut self) -> Self {
        self.consume = true;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn newest_frame(&self) -> PipelineResult<(PathBuf, SystemTime)> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            PipelineError::CaptureUnavailable(format!("spool dir {:?}: {}", self.dir, e))
        })?;

        entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| is_frame(path))
            .filter_map(|path| {
                let modified = fs::metadata(&path).and_then(|m| m.modified()).ok()?;
                Some((path, modified))
            })
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
            .ok_or_else(|| PipelineError::CaptureUnavailable("no frame in spool dir".to_string()))
    }
}

impl CaptureProvider for SpoolDirCapture {
    fn capture_frame(&self) -> PipelineResult<CapturedFrame> {
        let (path, modified) = self.newest_frame()?;

        {
            let mut last = self.last_seen.lock();
            if last.as_ref() == Some(&(path.clone(), modified)) {
                return Err(PipelineError::CaptureUnavailable("no new frame".to_string()));
            }
            *last = Some((path.clone(), modified));
        }

        let image = image::open(&path).map_err(|e| {
            PipelineError::CaptureUnavailable(format!("cannot decode {:?}: {}", path, e))
        })?;

        let captured_at = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_else(|_| chrono::Utc::now().timestamp_millis());

        let context_path = path.with_extension(CONTEXT_EXTENSION);
        let source_context = fs::read_to_string(&context_path)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        if self.consume {
            if let Err(e) = fs::remove_file(&path) {
                log::warn!("[Capture] Failed to remove consumed frame {:?}: {}", path, e);
            }
            fs::remove_file(&context_path).ok();
        }

        log::debug!("[Capture] Frame {:?} ({}x{})", path, image.width(), image.height());
        Ok(CapturedFrame { image, captured_at, source_context })
    }

    fn name(&self) -> &str {
        "spool"
    }
}

fn is_frame(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| FRAME_EXTENSIONS.iter().any(|f| f.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_frame(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(8, 6, Rgb([200, 10, 10])).save(&path).unwrap();
        path
    }

    #[test]
    fn test_empty_dir_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let capture = SpoolDirCapture::new(dir.path());
        assert!(matches!(capture.capture_frame(), Err(PipelineError::CaptureUnavailable(_))));
    }

    #[test]
    fn test_missing_dir_unavailable() {
        let capture = SpoolDirCapture::new("/nonexistent/oathkeeper/spool");
        assert!(matches!(capture.capture_frame(), Err(PipelineError::CaptureUnavailable(_))));
    }

    #[test]
    fn test_reads_frame_with_context_once() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), "frame.png");
        fs::write(dir.path().join("frame.ctx"), "Browser\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let capture = SpoolDirCapture::new(dir.path());
        let frame = capture.capture_frame().unwrap();
        assert_eq!((frame.image.width(), frame.image.height()), (8, 6));
        assert_eq!(frame.source_context.as_deref(), Some("Browser"));
        assert!(frame.captured_at > 0);

        // Same file, unchanged: not re-classified
        assert!(matches!(capture.capture_frame(), Err(PipelineError::CaptureUnavailable(_))));
    }

    #[test]
    fn test_consuming_removes_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_frame(dir.path(), "a.png");

        let capture = SpoolDirCapture::new(dir.path()).consuming();
        assert!(capture.capture_frame().unwrap().source_context.is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_corrupt_frame_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.jpg"), b"not an image").unwrap();
        let capture = SpoolDirCapture::new(dir.path());
        assert!(matches!(capture.capture_frame(), Err(PipelineError::CaptureUnavailable(_))));
    }
}
