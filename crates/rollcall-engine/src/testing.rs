//! Scripted fakes shared by the engine's unit tests.

use async_trait::async_trait;
use rollcall_core::{
    BoundingBox, Detection, Embedding, EmbeddingProvider, Frame, FrameSource, ProviderError,
    EMBEDDING_DIM,
};
use rollcall_store::{DescriptorStore, StoreError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn unit(idx: usize) -> Embedding {
    let mut values = vec![0.0; EMBEDDING_DIM];
    values[idx] = 1.0;
    Embedding::new(values).unwrap()
}

pub fn filled(value: f32) -> Embedding {
    Embedding::new(vec![value; EMBEDDING_DIM]).unwrap()
}

pub fn detection(embedding: Embedding) -> Detection {
    Detection {
        bounds: BoundingBox {
            x: 10.0,
            y: 20.0,
            width: 100.0,
            height: 120.0,
            confidence: 0.9,
        },
        landmarks: vec![(40.0, 60.0), (80.0, 60.0)],
        embedding,
    }
}

/// Always has a frame; sequence numbers increase per pull.
#[derive(Default)]
pub struct CountingFrames {
    next: AtomicU32,
}

impl FrameSource for CountingFrames {
    fn current_frame(&self) -> Option<Frame> {
        Some(Frame {
            data: Vec::new(),
            width: 640,
            height: 480,
            timestamp: std::time::Instant::now(),
            sequence: self.next.fetch_add(1, Ordering::SeqCst),
        })
    }
}

pub struct NoFrames;

impl FrameSource for NoFrames {
    fn current_frame(&self) -> Option<Frame> {
        None
    }
}

/// Plays back queued results, then repeats `fallback_all` for `detect_all`.
#[derive(Default)]
pub struct ScriptedProvider {
    best: Mutex<VecDeque<Option<Embedding>>>,
    all: Mutex<VecDeque<Result<Vec<Detection>, String>>>,
    fallback_all: Mutex<Vec<Detection>>,
    delay: Option<Duration>,
    pub best_calls: AtomicUsize,
    pub all_calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn push_best(&self, embedding: Option<Embedding>) {
        self.best.lock().unwrap().push_back(embedding);
    }

    pub fn push_all(&self, result: Result<Vec<Detection>, String>) {
        self.all.lock().unwrap().push_back(result);
    }

    pub fn set_fallback_all(&self, detections: Vec<Detection>) {
        *self.fallback_all.lock().unwrap() = detections;
    }

    async fn pause(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbeddingProvider for ScriptedProvider {
    async fn detect_all(&self, _frame: &Frame) -> Result<Vec<Detection>, ProviderError> {
        self.all_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        let next = self.all.lock().unwrap().pop_front();
        match next {
            Some(Ok(detections)) => Ok(detections),
            Some(Err(msg)) => Err(ProviderError::InferenceFailed(msg)),
            None => Ok(self.fallback_all.lock().unwrap().clone()),
        }
    }

    async fn detect_best(&self, _frame: &Frame) -> Result<Option<Embedding>, ProviderError> {
        self.best_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Ok(self.best.lock().unwrap().pop_front().flatten())
    }
}

/// Store whose every call fails.
pub struct BrokenStore;

fn broken() -> StoreError {
    StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
}

impl DescriptorStore for BrokenStore {
    fn put(&mut self, _: &str, _: &str, _: &Embedding) -> Result<rollcall_core::EnrolledDescriptor, StoreError> {
        Err(broken())
    }
    fn get(&self, _: &str) -> Result<Option<rollcall_core::EnrolledDescriptor>, StoreError> {
        Err(broken())
    }
    fn remove(&mut self, _: &str) -> Result<bool, StoreError> {
        Err(broken())
    }
    fn all(&self) -> Result<Vec<rollcall_core::EnrolledDescriptor>, StoreError> {
        Err(broken())
    }
    fn count(&self) -> Result<usize, StoreError> {
        Err(broken())
    }
    fn clear(&mut self) -> Result<usize, StoreError> {
        Err(broken())
    }
    fn replace_all(&mut self, _: Vec<rollcall_core::EnrolledDescriptor>) -> Result<(), StoreError> {
        Err(broken())
    }
}
