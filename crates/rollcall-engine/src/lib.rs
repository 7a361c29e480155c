//! rollcall-engine — Enrollment protocol and live recognition loop.
//!
//! Drives an external frame source and embedding model against the
//! descriptor store, and hands confirmed matches to an attendance sink.

pub mod attendance;
pub mod config;
pub mod dispatch;
pub mod enrollment;
pub mod notify;
pub mod recognition;

#[cfg(test)]
mod testing;

use rollcall_store::{DescriptorStore, SharedStore};
use std::sync::{MutexGuard, PoisonError};

pub use attendance::{AttendanceRecord, AttendanceSink, JsonlSink, SinkError};
pub use config::{Config, ConfigError, EnrollmentConfig, RecognitionConfig};
pub use dispatch::{DispatchStats, Dispatcher, RecognitionEvent};
pub use enrollment::{EnrollError, EnrollOutcome, Enrollment, EnrollmentState};
pub use notify::{Notification, NotificationKind, Notifier, TracingNotifier};
pub use recognition::{
    FaceReport, FrameReport, RecognizedMatch, Recognizer, SessionSnapshot, StartError, TickOutcome,
};

/// Lock the shared store. A panic in another holder does not leave the
/// store half-written, so a poisoned lock is still usable.
pub fn lock_store(store: &SharedStore) -> MutexGuard<'_, dyn DescriptorStore + 'static> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}
