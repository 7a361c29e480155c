//! Contracts for the external pieces the engine drives: a pull-based frame
//! source and the face embedding model.

use crate::types::{Detection, Embedding, Frame};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("invalid embedding from model: {0}")]
    InvalidEmbedding(#[from] crate::types::EmbeddingError),
}

/// Shared "model is loaded" flag.
///
/// Created by whoever constructs the embedding provider and handed to every
/// component that must not call the provider before it is ready. Clones
/// observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct Readiness {
    ready: Arc<AtomicBool>,
}

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    /// A readiness flag that is already set.
    pub fn ready() -> Self {
        let readiness = Self::new();
        readiness.mark_ready();
        readiness
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn mark_unready(&self) {
        self.ready.store(false, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

/// Pull-based video source. Camera lifecycle belongs to the implementor.
pub trait FrameSource: Send + Sync {
    /// The current frame, or `None` if the source has nothing ready.
    fn current_frame(&self) -> Option<Frame>;
}

/// Face detector + landmark + embedding model, treated as a black box.
///
/// Callers check the associated [`Readiness`] before invoking either method.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Every face in the frame, in detector order.
    async fn detect_all(&self, frame: &Frame) -> Result<Vec<Detection>, ProviderError>;

    /// The embedding of the single most prominent face, if any.
    async fn detect_best(&self, frame: &Frame) -> Result<Option<Embedding>, ProviderError>;
}
