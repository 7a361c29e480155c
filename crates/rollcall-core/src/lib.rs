//! rollcall-core — Face embedding types and nearest-neighbour matching.
//!
//! Embeddings come from an external model through [`EmbeddingProvider`];
//! this crate only defines how they are compared, averaged and described.

pub mod matcher;
pub mod provider;
pub mod types;

pub use matcher::{
    confidence_from_distance, find_best_match, EuclideanMatcher, Matcher, DEFAULT_MATCH_THRESHOLD,
};
pub use provider::{EmbeddingProvider, FrameSource, ProviderError, Readiness};
pub use types::{
    BoundingBox, Detection, Embedding, EmbeddingError, EnrolledDescriptor, Frame, Match,
    EMBEDDING_DIM,
};
