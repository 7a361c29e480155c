//! Recorded detections played back as a camera + model pair.
//!
//! A replay file is JSON lines, one frame per line:
//! `{"faces":[{"bounds":{...},"landmarks":[[x,y],...],"embedding":[...]}]}`.
//! Blank lines are skipped. The feed hands out one frame per pull and the
//! provider answers with the faces recorded for that frame.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rollcall_core::{
    Detection, Embedding, EmbeddingProvider, Frame, FrameSource, ProviderError, Readiness,
};
use serde::Deserialize;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Default, Deserialize)]
struct ReplayFrame {
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
    #[serde(default)]
    faces: Vec<Detection>,
}

fn parse(text: &str) -> Result<Vec<ReplayFrame>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).with_context(|| format!("replay line {}", idx + 1))
        })
        .collect()
}

/// Read a replay file and build the feed/provider pair over it.
///
/// `readiness` is marked once the file has parsed.
pub async fn load(path: &Path, readiness: &Readiness) -> Result<(ReplayFeed, ReplayProvider)> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read replay {}", path.display()))?;
    let frames = Arc::new(parse(&text)?);
    tracing::info!(path = %path.display(), frames = frames.len(), "replay loaded");
    readiness.mark_ready();

    Ok((
        ReplayFeed {
            frames: Arc::clone(&frames),
            cursor: AtomicUsize::new(0),
        },
        ReplayProvider { frames },
    ))
}

/// Frame source that yields each recorded frame once, in file order.
#[derive(Debug)]
pub struct ReplayFeed {
    frames: Arc<Vec<ReplayFrame>>,
    cursor: AtomicUsize,
}

impl ReplayFeed {
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor.load(Ordering::Acquire) >= self.frames.len()
    }
}

impl FrameSource for ReplayFeed {
    fn current_frame(&self) -> Option<Frame> {
        let idx = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |i| {
                (i < self.frames.len()).then_some(i + 1)
            })
            .ok()?;
        let recorded = &self.frames[idx];
        Some(Frame {
            data: Vec::new(),
            width: recorded.width,
            height: recorded.height,
            timestamp: Instant::now(),
            sequence: u32::try_from(idx).unwrap_or(u32::MAX),
        })
    }
}

/// Answers detection requests from the recording, keyed by frame sequence.
#[derive(Debug)]
pub struct ReplayProvider {
    frames: Arc<Vec<ReplayFrame>>,
}

impl ReplayProvider {
    fn faces(&self, frame: &Frame) -> Result<&[Detection], ProviderError> {
        self.frames
            .get(frame.sequence as usize)
            .map(|f| f.faces.as_slice())
            .ok_or_else(|| {
                ProviderError::InferenceFailed(format!("no recorded frame {}", frame.sequence))
            })
    }
}

#[async_trait]
impl EmbeddingProvider for ReplayProvider {
    async fn detect_all(&self, frame: &Frame) -> Result<Vec<Detection>, ProviderError> {
        Ok(self.faces(frame)?.to_vec())
    }

    async fn detect_best(&self, frame: &Frame) -> Result<Option<Embedding>, ProviderError> {
        Ok(self
            .faces(frame)?
            .iter()
            .max_by(|a, b| a.bounds.confidence.total_cmp(&b.bounds.confidence))
            .map(|d| d.embedding.clone()))
    }
}
