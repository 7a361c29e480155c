//! Volatile descriptor store. Nothing survives the process.

use crate::{check_identity, check_unique, DescriptorStore, StoreError};
use chrono::Utc;
use rollcall_core::{Embedding, EnrolledDescriptor};

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Vec<EnrolledDescriptor>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DescriptorStore for MemoryStore {
    fn put(
        &mut self,
        identity_id: &str,
        display_name: &str,
        embedding: &Embedding,
    ) -> Result<EnrolledDescriptor, StoreError> {
        check_identity(identity_id)?;
        let now = Utc::now();

        if let Some(existing) = self.entries.iter_mut().find(|d| d.identity_id == identity_id) {
            existing.display_name = display_name.to_string();
            existing.embedding = embedding.clone();
            existing.last_updated_at = now;
            return Ok(existing.clone());
        }

        let descriptor = EnrolledDescriptor {
            identity_id: identity_id.to_string(),
            display_name: display_name.to_string(),
            embedding: embedding.clone(),
            enrolled_at: now,
            last_updated_at: now,
        };
        self.entries.push(descriptor.clone());
        Ok(descriptor)
    }

    fn get(&self, identity_id: &str) -> Result<Option<EnrolledDescriptor>, StoreError> {
        Ok(self
            .entries
            .iter()
            .find(|d| d.identity_id == identity_id)
            .cloned())
    }

    fn remove(&mut self, identity_id: &str) -> Result<bool, StoreError> {
        let before = self.entries.len();
        self.entries.retain(|d| d.identity_id != identity_id);
        Ok(self.entries.len() < before)
    }

    fn all(&self) -> Result<Vec<EnrolledDescriptor>, StoreError> {
        Ok(self.entries.clone())
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.entries.len())
    }

    fn clear(&mut self) -> Result<usize, StoreError> {
        let n = self.entries.len();
        self.entries.clear();
        Ok(n)
    }

    fn replace_all(&mut self, descriptors: Vec<EnrolledDescriptor>) -> Result<(), StoreError> {
        check_unique(&descriptors)?;
        self.entries = descriptors;
        Ok(())
    }
}
