//! Multi-sample face enrollment.
//!
//! `Idle -> Capturing -> Succeeded | Failed`. A run takes a fixed number of
//! samples, each after a fixed delay, averages their embeddings and writes
//! one descriptor for the target identity. Any sample without a face aborts
//! the run; nothing is stored and nothing is retried.

use crate::config::EnrollmentConfig;
use crate::lock_store;
use rollcall_core::{Embedding, EmbeddingProvider, FrameSource, ProviderError, Readiness};
use rollcall_store::{SharedStore, StoreError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("Models not loaded")]
    NotReady,
    #[error("No camera frame available for sample {sample}/{total}")]
    NoFrame { sample: usize, total: usize },
    #[error(
        "Failed to detect face in sample {sample}/{total}. Please ensure your face is clearly visible."
    )]
    NoFaceDetected { sample: usize, total: usize },
    #[error("Face detection failed in sample {sample}/{total}: {source}")]
    Provider {
        sample: usize,
        total: usize,
        #[source]
        source: ProviderError,
    },
    #[error("Failed to save face data")]
    Store(#[source] StoreError),
    #[error("Enrollment cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollmentState {
    Idle,
    /// `sample` is 1-based and counts the sample being taken.
    Capturing {
        identity_id: String,
        sample: usize,
        total: usize,
    },
    Succeeded {
        message: String,
    },
    Failed {
        message: String,
    },
}

impl EnrollmentState {
    /// Human-readable progress line.
    pub fn message(&self) -> String {
        match self {
            Self::Idle => String::new(),
            Self::Capturing { sample, total, .. } => {
                format!("Capturing sample {sample} of {total}...")
            }
            Self::Succeeded { message } | Self::Failed { message } => message.clone(),
        }
    }

    /// Completion in percent, for progress bars.
    pub fn progress(&self) -> f32 {
        match self {
            Self::Idle | Self::Failed { .. } => 0.0,
            Self::Capturing { sample, total, .. } => *sample as f32 / *total as f32 * 100.0,
            Self::Succeeded { .. } => 100.0,
        }
    }
}

/// Terminal result of one enrollment run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollOutcome {
    pub success: bool,
    pub message: String,
}

/// Enrollment protocol bound to one frame source and provider.
pub struct Enrollment {
    provider: Arc<dyn EmbeddingProvider>,
    frames: Arc<dyn FrameSource>,
    readiness: Readiness,
    store: SharedStore,
    config: EnrollmentConfig,
    capturing: AtomicBool,
    cancelled: AtomicBool,
    state: watch::Sender<EnrollmentState>,
}

/// Clears the capturing flag on every exit path.
struct CaptureGuard<'a>(&'a AtomicBool);

impl Drop for CaptureGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Enrollment {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        frames: Arc<dyn FrameSource>,
        readiness: Readiness,
        store: SharedStore,
        config: EnrollmentConfig,
    ) -> Self {
        let (state, _) = watch::channel(EnrollmentState::Idle);
        Self {
            provider,
            frames,
            readiness,
            store,
            config,
            capturing: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            state,
        }
    }

    /// Watch progress and terminal state.
    pub fn subscribe(&self) -> watch::Receiver<EnrollmentState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> EnrollmentState {
        self.state.borrow().clone()
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::Acquire)
    }

    /// Run one enrollment for `identity_id`.
    ///
    /// Returns `None` without side effects if a run is already capturing.
    pub async fn start(&self, identity_id: &str, display_name: &str) -> Option<EnrollOutcome> {
        if self
            .capturing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(identity_id, "enrollment already in progress; start ignored");
            return None;
        }
        let _guard = CaptureGuard(&self.capturing);
        self.cancelled.store(false, Ordering::Release);

        tracing::info!(identity_id, display_name, samples = self.config.samples, "enrollment started");

        let outcome = match self.capture(identity_id, display_name).await {
            Ok(total) => {
                let message =
                    format!("Successfully enrolled {display_name} with {total} face samples");
                tracing::info!(identity_id, samples = total, "enrollment succeeded");
                self.state.send_replace(EnrollmentState::Succeeded {
                    message: message.clone(),
                });
                EnrollOutcome {
                    success: true,
                    message,
                }
            }
            Err(EnrollError::Cancelled) => {
                tracing::info!(identity_id, "enrollment cancelled");
                self.state.send_replace(EnrollmentState::Idle);
                EnrollOutcome {
                    success: false,
                    message: EnrollError::Cancelled.to_string(),
                }
            }
            Err(err) => {
                tracing::warn!(identity_id, error = %err, "enrollment failed");
                let message = err.to_string();
                self.state.send_replace(EnrollmentState::Failed {
                    message: message.clone(),
                });
                EnrollOutcome {
                    success: false,
                    message,
                }
            }
        };

        Some(outcome)
    }

    /// Stop a running capture. Nothing is stored once the flag is observed.
    pub fn cancel(&self) {
        if self.is_capturing() {
            self.cancelled.store(true, Ordering::Release);
        }
    }

    /// Return a finished protocol to `Idle`. No effect while capturing.
    pub fn reset(&self) {
        if !self.is_capturing() {
            self.state.send_replace(EnrollmentState::Idle);
        }
    }

    /// Take every sample, average, persist. Returns the sample count.
    async fn capture(&self, identity_id: &str, display_name: &str) -> Result<usize, EnrollError> {
        let total = self.config.samples.max(1);
        let mut samples = Vec::with_capacity(total);

        for sample in 1..=total {
            self.state.send_replace(EnrollmentState::Capturing {
                identity_id: identity_id.to_string(),
                sample,
                total,
            });

            tokio::time::sleep(self.config.sample_delay).await;
            if self.cancelled.load(Ordering::Acquire) {
                return Err(EnrollError::Cancelled);
            }
            if !self.readiness.is_ready() {
                return Err(EnrollError::NotReady);
            }

            let frame = self
                .frames
                .current_frame()
                .ok_or(EnrollError::NoFrame { sample, total })?;
            let embedding = self
                .provider
                .detect_best(&frame)
                .await
                .map_err(|source| EnrollError::Provider {
                    sample,
                    total,
                    source,
                })?
                .ok_or(EnrollError::NoFaceDetected { sample, total })?;
            if self.cancelled.load(Ordering::Acquire) {
                return Err(EnrollError::Cancelled);
            }

            tracing::debug!(identity_id, sample, total, "enrollment sample captured");
            samples.push(embedding);
        }

        let averaged =
            Embedding::mean(&samples).ok_or(EnrollError::NoFaceDetected { sample: 1, total })?;

        if self.cancelled.load(Ordering::Acquire) {
            return Err(EnrollError::Cancelled);
        }
        lock_store(&self.store)
            .put(identity_id, display_name, &averaged)
            .map_err(EnrollError::Store)?;

        Ok(total)
    }
}
