//! Consumer side of the recognition event queue.
//!
//! Records attendance and raises notifications for each confirmed match.
//! Runs apart from the recognition loop so a slow sink only delays this
//! queue, never frame processing.

use crate::attendance::{AttendanceRecord, AttendanceSink};
use crate::notify::{Notification, NotificationKind, Notifier};
use chrono::{DateTime, Utc};
use rollcall_core::Match;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    /// First match for an identity in the current session.
    MatchConfirmed {
        matched: Match,
        session_id: Option<String>,
        recognized_at: DateTime<Utc>,
    },
}

/// Totals for one dispatcher run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub confirmed: usize,
    pub recorded: usize,
    pub failed: usize,
}

pub struct Dispatcher {
    sink: Option<Arc<dyn AttendanceSink>>,
    notifier: Arc<dyn Notifier>,
}

impl Dispatcher {
    /// Without a sink, matches are only notified.
    pub fn new(sink: Option<Arc<dyn AttendanceSink>>, notifier: Arc<dyn Notifier>) -> Self {
        Self { sink, notifier }
    }

    /// Drain `events` until every sender is dropped.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<RecognitionEvent>) -> DispatchStats {
        let mut stats = DispatchStats::default();
        while let Some(event) = events.recv().await {
            self.handle(event, &mut stats).await;
        }
        tracing::debug!(?stats, "dispatcher drained");
        stats
    }

    async fn handle(&self, event: RecognitionEvent, stats: &mut DispatchStats) {
        match event {
            RecognitionEvent::MatchConfirmed {
                matched,
                session_id,
                recognized_at,
            } => {
                stats.confirmed += 1;

                let recording = match (&self.sink, session_id.as_deref()) {
                    (Some(sink), Some(session_id)) => Some(
                        sink.record(AttendanceRecord::recognized(
                            &matched.identity_id,
                            session_id,
                            matched.confidence,
                            recognized_at,
                        ))
                        .await,
                    ),
                    _ => None,
                };

                let notification = match recording {
                    Some(Ok(())) => {
                        stats.recorded += 1;
                        Notification::new(
                            NotificationKind::Success,
                            format!("{} recognized", matched.display_name),
                        )
                        .with_description(format!(
                            "Confidence: {:.1}% - Attendance marked",
                            matched.confidence
                        ))
                    }
                    Some(Err(err)) => {
                        stats.failed += 1;
                        tracing::warn!(
                            identity_id = %matched.identity_id,
                            error = %err,
                            "attendance record failed"
                        );
                        Notification::new(NotificationKind::Error, "Failed to record attendance")
                            .with_description(format!("{}: {err}", matched.display_name))
                    }
                    None => Notification::new(
                        NotificationKind::Success,
                        format!("{} recognized", matched.display_name),
                    )
                    .with_description(format!("Confidence: {:.1}%", matched.confidence)),
                };

                self.notifier.notify(notification);
            }
        }
    }
}
