use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use headless_chrome::Tab;
use headless_chrome::protocol::cdp::Page;
use tracing::{debug, warn};

use crate::types::Screenshot;

/// Captures full-page screenshots at run checkpoints. A failed capture is
/// logged and dropped; it never fails the run or discards collected results.
#[derive(Clone)]
pub struct EvidenceCollector {
    dir: PathBuf,
}

impl EvidenceCollector {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating screenshot directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn capture(&self, tab: &Arc<Tab>, label: &str) -> Option<Screenshot> {
        match self.try_capture(tab, label) {
            Ok(shot) => {
                debug!("screenshot captured: {label}");
                Some(shot)
            }
            Err(e) => {
                warn!("screenshot {label} failed: {e:#}");
                None
            }
        }
    }

    fn try_capture(&self, tab: &Arc<Tab>, label: &str) -> Result<Screenshot> {
        let png = tab.capture_screenshot(
            Page::CaptureScreenshotFormatOption::Png,
            None,
            full_page_clip(tab),
            true,
        )?;

        let label = sanitize_label(label);
        let name = format!("{label}_{}.png", now_millis());
        let file = match std::fs::write(self.dir.join(&name), &png) {
            Ok(()) => Some(format!("/screenshots/{name}")),
            Err(e) => {
                warn!("could not write screenshot {name}: {e}");
                None
            }
        };

        Ok(Screenshot {
            label,
            file,
            data: BASE64.encode(&png),
        })
    }
}

/// Clip covering the whole scrollable document rather than the viewport.
/// Falls back to a plain viewport shot when the body box model is not
/// available (e.g. about:blank).
fn full_page_clip(tab: &Arc<Tab>) -> Option<Page::Viewport> {
    let body = tab.wait_for_element("body").ok()?;
    let model = body.get_box_model().ok()?;
    Some(model.margin_viewport())
}

/// Labels end up in filenames; anything outside [A-Za-z0-9_-] is replaced.
fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_filename_safe() {
        assert_eq!(sanitize_label("after_action_click"), "after_action_click");
        assert_eq!(sanitize_label("after_action_../../etc"), "after_action_______etc");
        assert_eq!(sanitize_label("final shot"), "final_shot");
    }

    #[test]
    fn collector_creates_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("shots").join("deep");
        EvidenceCollector::new(nested.clone()).unwrap();
        assert!(nested.is_dir());
    }
}
