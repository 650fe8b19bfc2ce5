use std::collections::VecDeque;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, DetectionRecord};
use crate::frame::Frame;

#[derive(Debug, Deserialize)]
struct ReplayLine {
    #[serde(default)]
    detections: Vec<DetectionRecord>,
}

/// Replays pre-computed detections, one entry per frame in stream order.
///
/// Useful for field replays of a recorded session and for driving the loop in
/// tests without a model. Once the script runs out every frame yields nothing.
pub struct ReplayBackend {
    script: VecDeque<Vec<Detection>>,
}

impl ReplayBackend {
    pub fn new(script: Vec<Vec<Detection>>) -> Self {
        Self {
            script: script.into(),
        }
    }

    /// Loads a JSON-lines file: `{"detections":[{"bbox":[x1,y1,x2,y2],"class":0,"confidence":0.9}]}`.
    pub fn open(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read replay file {}", path.display()))?;
        let mut script = Vec::new();
        for (line_no, line) in raw.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let parsed: ReplayLine = serde_json::from_str(trimmed).with_context(|| {
                format!("invalid replay entry at {}:{}", path.display(), line_no + 1)
            })?;
            script.push(parsed.detections.into_iter().map(Detection::from).collect());
        }
        log::info!(
            "ReplayBackend: loaded {} frames of detections from {}",
            script.len(),
            path.display()
        );
        Ok(Self::new(script))
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl DetectorBackend for ReplayBackend {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        Ok(self.script.pop_front().unwrap_or_default())
    }
}
