//! Attendance sink contract and a JSON-lines file implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("attendance rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMethod {
    Ai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
}

/// One attendance mark produced by live recognition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: Uuid,
    pub identity_id: String,
    pub session_id: String,
    /// Match confidence scaled to [0, 1].
    pub confidence: f32,
    pub method: DetectionMethod,
    pub status: AttendanceStatus,
    pub location: String,
    pub timestamp: DateTime<Utc>,
}

impl AttendanceRecord {
    /// Record for an identity recognised by the camera.
    ///
    /// `display_confidence` is the 0–100 match score.
    pub fn recognized(
        identity_id: &str,
        session_id: &str,
        display_confidence: f32,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity_id: identity_id.to_string(),
            session_id: session_id.to_string(),
            confidence: display_confidence / 100.0,
            method: DetectionMethod::Ai,
            status: AttendanceStatus::Present,
            location: "Live Recognition".to_string(),
            timestamp,
        }
    }
}

/// Receiver of attendance marks. Failures are reported, never retried.
#[async_trait]
pub trait AttendanceSink: Send + Sync {
    async fn record(&self, record: AttendanceRecord) -> Result<(), SinkError>;
}

/// Appends each record as one JSON line.
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AttendanceSink for JsonlSink {
    async fn record(&self, record: AttendanceRecord) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;

        tracing::debug!(
            path = %self.path.display(),
            identity_id = %record.identity_id,
            session_id = %record.session_id,
            "attendance appended"
        );
        Ok(())
    }
}
