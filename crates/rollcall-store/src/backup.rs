//! JSON export and import of the whole descriptor set.
//!
//! The export is a pretty-printed array of descriptors. Import parses and
//! validates everything first, so a bad file never touches the store.

use crate::{DescriptorStore, StoreError};
use rollcall_core::EnrolledDescriptor;

pub fn export_json(store: &dyn DescriptorStore) -> Result<String, StoreError> {
    let descriptors = store.all()?;
    Ok(serde_json::to_string_pretty(&descriptors)?)
}

/// Replace the store contents with the descriptors in `json`.
///
/// Returns the number of descriptors imported.
pub fn import_json(store: &mut dyn DescriptorStore, json: &str) -> Result<usize, StoreError> {
    // Embedding's deserializer enforces dimension and finiteness.
    let descriptors: Vec<EnrolledDescriptor> = serde_json::from_str(json)?;
    let count = descriptors.len();
    store.replace_all(descriptors)?;
    tracing::info!(count, "imported descriptors");
    Ok(count)
}
