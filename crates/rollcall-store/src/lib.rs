//! rollcall-store — Persistent mapping from identity to enrolled face embedding.
//!
//! At most one descriptor exists per identity: `put` replaces, never appends.
//! Every mutating call persists before returning and either fully succeeds
//! or leaves the store as it was.

pub mod backup;
pub mod memory;
pub mod sqlite;

use rollcall_core::{Embedding, EnrolledDescriptor};
use std::sync::{Arc, Mutex};
use thiserror::Error;

pub use backup::{export_json, import_json};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("identity id must not be empty")]
    EmptyIdentity,
    #[error("identity {0} appears more than once")]
    DuplicateIdentity(String),
    #[error("corrupt embedding for {identity_id}: {reason}")]
    CorruptEmbedding { identity_id: String, reason: String },
    #[error("invalid timestamp for {identity_id}: {value}")]
    InvalidTimestamp { identity_id: String, value: String },
}

/// Storage contract for enrolled face descriptors.
///
/// Iteration order of [`all`](Self::all) is stable for display but carries
/// no meaning; callers must not rely on it for correctness.
pub trait DescriptorStore: Send {
    /// Insert or replace the descriptor for `identity_id`.
    ///
    /// On replacement the original `enrolled_at` is kept and
    /// `last_updated_at` moves forward.
    fn put(
        &mut self,
        identity_id: &str,
        display_name: &str,
        embedding: &Embedding,
    ) -> Result<EnrolledDescriptor, StoreError>;

    fn get(&self, identity_id: &str) -> Result<Option<EnrolledDescriptor>, StoreError>;

    /// Returns `true` if a descriptor was removed.
    fn remove(&mut self, identity_id: &str) -> Result<bool, StoreError>;

    fn all(&self) -> Result<Vec<EnrolledDescriptor>, StoreError>;

    fn count(&self) -> Result<usize, StoreError>;

    /// Remove every descriptor, returning how many were deleted.
    fn clear(&mut self) -> Result<usize, StoreError>;

    /// Atomically swap the whole contents for `descriptors`.
    fn replace_all(&mut self, descriptors: Vec<EnrolledDescriptor>) -> Result<(), StoreError>;

    fn has(&self, identity_id: &str) -> Result<bool, StoreError> {
        Ok(self.get(identity_id)?.is_some())
    }
}

/// Store handle shared between enrollment and recognition.
pub type SharedStore = Arc<Mutex<dyn DescriptorStore>>;

pub fn shared<S: DescriptorStore + 'static>(store: S) -> SharedStore {
    Arc::new(Mutex::new(store))
}

fn check_identity(identity_id: &str) -> Result<(), StoreError> {
    if identity_id.trim().is_empty() {
        return Err(StoreError::EmptyIdentity);
    }
    Ok(())
}

/// Reject empty or repeated identity ids before a bulk replace.
fn check_unique(descriptors: &[EnrolledDescriptor]) -> Result<(), StoreError> {
    let mut seen = std::collections::HashSet::with_capacity(descriptors.len());
    for d in descriptors {
        check_identity(&d.identity_id)?;
        if !seen.insert(d.identity_id.as_str()) {
            return Err(StoreError::DuplicateIdentity(d.identity_id.clone()));
        }
    }
    Ok(())
}
