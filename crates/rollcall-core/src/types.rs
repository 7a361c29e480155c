use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length of every face embedding produced by the recognition model.
pub const EMBEDDING_DIM: usize = 128;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("expected {EMBEDDING_DIM}-dim embedding, got {0}")]
    Dimension(usize),
    #[error("embedding value at index {0} is not finite")]
    NonFinite(usize),
}

/// Fixed-length face embedding (128 x f32).
///
/// The length is checked once at construction, so every `Embedding` in the
/// system can be compared element-wise without further validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Result<Self, EmbeddingError> {
        if values.len() != EMBEDDING_DIM {
            return Err(EmbeddingError::Dimension(values.len()));
        }
        if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
            return Err(EmbeddingError::NonFinite(idx));
        }
        Ok(Self { values })
    }

    /// The all-zero embedding.
    pub fn zeros() -> Self {
        Self {
            values: vec![0.0; EMBEDDING_DIM],
        }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Element-wise arithmetic mean of several embeddings.
    ///
    /// Returns `None` for an empty slice. Sums are accumulated in f64 so that
    /// averaging many samples does not drift.
    pub fn mean(samples: &[Embedding]) -> Option<Embedding> {
        if samples.is_empty() {
            return None;
        }

        let mut sums = [0.0f64; EMBEDDING_DIM];
        for sample in samples {
            for (sum, v) in sums.iter_mut().zip(sample.values.iter()) {
                *sum += f64::from(*v);
            }
        }

        let n = samples.len() as f64;
        let values = sums.iter().map(|s| (s / n) as f32).collect();
        Some(Embedding { values })
    }
}

impl TryFrom<Vec<f32>> for Embedding {
    type Error = EmbeddingError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Embedding::new(values)
    }
}

impl From<Embedding> for Vec<f32> {
    fn from(embedding: Embedding) -> Self {
        embedding.values
    }
}

/// Bounding box for a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector score in [0, 1].
    pub confidence: f32,
}

/// One face found in one frame. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bounds: BoundingBox,
    /// Facial landmark points as (x, y); the count depends on the landmark model.
    #[serde(default)]
    pub landmarks: Vec<(f32, f32)>,
    pub embedding: Embedding,
}

/// A persisted embedding bound to one identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrolledDescriptor {
    pub identity_id: String,
    pub display_name: String,
    pub embedding: Embedding,
    pub enrolled_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

/// Best gallery match for one detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub identity_id: String,
    pub display_name: String,
    /// Euclidean distance to the enrolled embedding.
    pub distance: f32,
    /// Display score in [0, 100], one decimal place. Derived from distance
    /// only; it is not a calibrated probability.
    pub confidence: f32,
}

/// A captured camera frame, as handed to the embedding provider.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw pixel data; layout is agreed between frame source and provider.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}
