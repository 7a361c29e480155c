//! Live recognition loop.
//!
//! A fixed-period timer pulls the current frame, detects every face, matches
//! each against the enrolled descriptors and confirms identities not yet
//! seen in the current session. Confirmed matches leave the loop as
//! [`RecognitionEvent`]s; recording and notifying happen elsewhere, so sink
//! latency never stalls the timer.
//!
//! At most one frame is processed at a time. A tick that arrives while the
//! previous frame is still in flight is dropped, not queued.

use crate::config::RecognitionConfig;
use crate::dispatch::RecognitionEvent;
use crate::lock_store;
use crate::notify::{Notification, NotificationKind};
use chrono::{DateTime, Utc};
use rollcall_core::{
    Detection, EmbeddingProvider, EuclideanMatcher, FrameSource, Match, Matcher, Readiness,
};
use rollcall_store::{SharedStore, StoreError};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

#[derive(Error, Debug)]
pub enum StartError {
    #[error("AI models not loaded")]
    ProviderNotReady,
    #[error("No enrolled students")]
    NoEnrolledIdentities,
    #[error("failed to read enrolled descriptors: {0}")]
    Store(#[from] StoreError),
}

impl StartError {
    /// The warning a UI should show for this refusal.
    pub fn notification(&self) -> Notification {
        match self {
            Self::ProviderNotReady => Notification::new(NotificationKind::Error, self.to_string())
                .with_description("Please wait for models to load before starting recognition"),
            Self::NoEnrolledIdentities => {
                Notification::new(NotificationKind::Warning, self.to_string()).with_description(
                    "Please enroll at least one student before starting recognition",
                )
            }
            Self::Store(err) => Notification::new(
                NotificationKind::Error,
                "Could not read enrolled faces",
            )
            .with_description(err.to_string()),
        }
    }
}

/// A confirmed match and when it was confirmed.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedMatch {
    pub matched: Match,
    pub recognized_at: DateTime<Utc>,
}

/// Per-session recognition state. Reset on every start, kept after stop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub active: bool,
    pub session_id: Option<String>,
    pub seen_identities: HashSet<String>,
    /// Newest first.
    pub recent_matches: Vec<RecognizedMatch>,
}

#[derive(Debug, Default)]
struct SessionState {
    /// Bumped on every start; frames captured under an older value are not confirmed.
    generation: u64,
    session_id: Option<String>,
    seen: HashSet<String>,
    recent: VecDeque<RecognizedMatch>,
}

/// One detected face and its match, if any. Input for overlays.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceReport {
    pub detection: Detection,
    pub matched: Option<Match>,
}

/// Everything learned from one processed frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub sequence: u32,
    pub faces: Vec<FaceReport>,
    /// Matches confirmed for the first time this session, in detector order.
    pub confirmed: Vec<Match>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Recognition is stopped.
    Inactive,
    /// A previous frame is still being processed.
    Skipped,
    /// The embedding provider has not finished loading.
    NotReady,
    /// The frame source had nothing ready.
    NoFrame,
    Processed(FrameReport),
}

/// Held while one frame is processed; clears the flag on drop.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl<'a> ProcessingGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Recognizer {
    provider: Arc<dyn EmbeddingProvider>,
    frames: Arc<dyn FrameSource>,
    readiness: Readiness,
    store: SharedStore,
    matcher: EuclideanMatcher,
    config: RecognitionConfig,
    active: AtomicBool,
    processing: AtomicBool,
    session: Mutex<SessionState>,
    events: mpsc::UnboundedSender<RecognitionEvent>,
    reports: watch::Sender<Option<FrameReport>>,
}

impl Recognizer {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        frames: Arc<dyn FrameSource>,
        readiness: Readiness,
        store: SharedStore,
        config: RecognitionConfig,
        events: mpsc::UnboundedSender<RecognitionEvent>,
    ) -> Self {
        let (reports, _) = watch::channel(None);
        Self {
            provider,
            frames,
            readiness,
            store,
            matcher: EuclideanMatcher::new(config.match_threshold),
            config,
            active: AtomicBool::new(false),
            processing: AtomicBool::new(false),
            session: Mutex::new(SessionState::default()),
            events,
            reports,
        }
    }

    /// Begin a new session.
    ///
    /// Refused while the provider is loading or no identity is enrolled.
    /// Clears the previous session's seen set and recent matches.
    pub fn start(&self, session_id: Option<String>) -> Result<(), StartError> {
        if !self.readiness.is_ready() {
            return Err(StartError::ProviderNotReady);
        }
        let enrolled = lock_store(&self.store).count()?;
        if enrolled == 0 {
            return Err(StartError::NoEnrolledIdentities);
        }

        {
            let mut session = self.lock_session();
            session.generation += 1;
            session.seen.clear();
            session.recent.clear();
            session.session_id = session_id;
            tracing::info!(
                enrolled,
                session_id = session.session_id.as_deref().unwrap_or("-"),
                "recognition started"
            );
        }
        self.active.store(true, Ordering::Release);
        Ok(())
    }

    /// Stop scheduling frames. Session results stay readable until the next start.
    pub fn stop(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            let seen = self.lock_session().seen.len();
            tracing::info!(recognized = seen, "recognition stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    pub fn session(&self) -> SessionSnapshot {
        let session = self.lock_session();
        SessionSnapshot {
            active: self.is_active(),
            session_id: session.session_id.clone(),
            seen_identities: session.seen.clone(),
            recent_matches: session.recent.iter().cloned().collect(),
        }
    }

    /// Latest processed frame, for drawing overlays.
    pub fn subscribe_reports(&self) -> watch::Receiver<Option<FrameReport>> {
        self.reports.subscribe()
    }

    /// Drive the loop until [`stop`](Self::stop) is observed at a tick.
    ///
    /// Each tick spawns one processing task; ticks that find a task still
    /// running are dropped. Returns once in-flight work has finished.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight = JoinSet::new();

        loop {
            ticker.tick().await;
            while in_flight.try_join_next().is_some() {}
            if !self.is_active() {
                break;
            }
            if self.is_processing() {
                tracing::trace!("previous frame still processing; tick dropped");
                continue;
            }
            let this = Arc::clone(&self);
            in_flight.spawn(async move { this.process_tick().await });
        }

        while in_flight.join_next().await.is_some() {}
        tracing::debug!("recognition loop exited");
    }

    /// Process the current frame once.
    pub async fn process_tick(&self) -> TickOutcome {
        if !self.is_active() {
            return TickOutcome::Inactive;
        }
        let Some(_guard) = ProcessingGuard::try_acquire(&self.processing) else {
            return TickOutcome::Skipped;
        };
        if !self.readiness.is_ready() {
            return TickOutcome::NotReady;
        }
        let generation = self.lock_session().generation;
        let Some(frame) = self.frames.current_frame() else {
            return TickOutcome::NoFrame;
        };

        let detections = match self.provider.detect_all(&frame).await {
            Ok(detections) => detections,
            Err(err) => {
                tracing::warn!(seq = frame.sequence, error = %err, "detection failed; frame skipped");
                Vec::new()
            }
        };

        let gallery = if detections.is_empty() {
            Vec::new()
        } else {
            match lock_store(&self.store).all() {
                Ok(gallery) => gallery,
                Err(err) => {
                    tracing::warn!(error = %err, "descriptor read failed; no matches this frame");
                    Vec::new()
                }
            }
        };

        let faces: Vec<FaceReport> = detections
            .into_iter()
            .map(|detection| {
                let matched = self.matcher.find_best_match(&detection.embedding, &gallery);
                FaceReport { detection, matched }
            })
            .collect();

        let confirmed = self.confirm(generation, &faces);

        tracing::trace!(
            seq = frame.sequence,
            faces = faces.len(),
            confirmed = confirmed.len(),
            "frame processed"
        );

        let report = FrameReport {
            sequence: frame.sequence,
            faces,
            confirmed,
        };
        self.reports.send_replace(Some(report.clone()));
        TickOutcome::Processed(report)
    }

    /// Record first-time matches in the session and emit their events.
    fn confirm(&self, generation: u64, faces: &[FaceReport]) -> Vec<Match> {
        let mut session = self.lock_session();
        if session.generation != generation {
            tracing::debug!("session restarted during frame; matches not confirmed");
            return Vec::new();
        }
        let now = Utc::now();
        let mut confirmed = Vec::new();

        for matched in faces.iter().filter_map(|f| f.matched.as_ref()) {
            if !session.seen.insert(matched.identity_id.clone()) {
                continue;
            }

            session.recent.push_front(RecognizedMatch {
                matched: matched.clone(),
                recognized_at: now,
            });
            session.recent.truncate(self.config.recent_matches);

            tracing::info!(
                identity_id = %matched.identity_id,
                name = %matched.display_name,
                distance = matched.distance,
                confidence = matched.confidence,
                "identity recognized"
            );

            let event = RecognitionEvent::MatchConfirmed {
                matched: matched.clone(),
                session_id: session.session_id.clone(),
                recognized_at: now,
            };
            if self.events.send(event).is_err() {
                tracing::warn!("event channel closed; match not dispatched");
            }
            confirmed.push(matched.clone());
        }

        confirmed
    }

    fn lock_session(&self) -> MutexGuard<'_, SessionState> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{detection, unit, BrokenStore, CountingFrames, NoFrames, ScriptedProvider};
    use rollcall_core::Embedding;
    use rollcall_store::{shared, DescriptorStore, MemoryStore};
    use std::time::Duration;

    struct Fixture {
        provider: Arc<ScriptedProvider>,
        readiness: Readiness,
        recognizer: Arc<Recognizer>,
        events: mpsc::UnboundedReceiver<RecognitionEvent>,
    }

    fn enrolled_store(ids: &[(&str, Embedding)]) -> SharedStore {
        let mut store = MemoryStore::new();
        for (id, embedding) in ids {
            store.put(id, &format!("Student {id}"), embedding).unwrap();
        }
        shared(store)
    }

    fn fixture(provider: ScriptedProvider, store: SharedStore) -> Fixture {
        let provider = Arc::new(provider);
        let readiness = Readiness::ready();
        let (tx, rx) = mpsc::unbounded_channel();
        let recognizer = Arc::new(Recognizer::new(
            provider.clone(),
            Arc::new(CountingFrames::default()),
            readiness.clone(),
            store,
            RecognitionConfig::default(),
            tx,
        ));
        Fixture {
            provider,
            readiness,
            recognizer,
            events: rx,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<RecognitionEvent>) -> Vec<String> {
        let mut ids = Vec::new();
        while let Ok(RecognitionEvent::MatchConfirmed { matched, .. }) = rx.try_recv() {
            ids.push(matched.identity_id);
        }
        ids
    }

    #[tokio::test]
    async fn test_start_refused_when_provider_not_ready() {
        let f = fixture(ScriptedProvider::new(), enrolled_store(&[("A", unit(0))]));
        f.readiness.mark_unready();
        assert!(matches!(f.recognizer.start(None), Err(StartError::ProviderNotReady)));
        assert!(!f.recognizer.is_active());
    }

    #[tokio::test]
    async fn test_start_refused_with_empty_store() {
        let f = fixture(ScriptedProvider::new(), shared(MemoryStore::new()));
        let err = f.recognizer.start(None).unwrap_err();
        assert!(matches!(err, StartError::NoEnrolledIdentities));
        assert_eq!(err.notification().kind, NotificationKind::Warning);
        assert_eq!(err.notification().message, "No enrolled students");
    }

    #[tokio::test]
    async fn test_start_reports_store_failure() {
        let f = fixture(ScriptedProvider::new(), shared(BrokenStore));
        assert!(matches!(f.recognizer.start(None), Err(StartError::Store(_))));
    }

    #[tokio::test]
    async fn test_inactive_tick_does_nothing() {
        let f = fixture(ScriptedProvider::new(), enrolled_store(&[("A", unit(0))]));
        assert_eq!(f.recognizer.process_tick().await, TickOutcome::Inactive);
        assert_eq!(f.provider.all_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_each_identity_confirmed_once_per_session() {
        let provider = ScriptedProvider::new();
        provider.set_fallback_all(vec![detection(unit(0)), detection(unit(1))]);
        let mut f = fixture(provider, enrolled_store(&[("A", unit(0)), ("B", unit(1))]));
        f.recognizer.start(Some("lecture-1".into())).unwrap();

        for _ in 0..10 {
            f.recognizer.process_tick().await;
        }

        assert_eq!(drain(&mut f.events), vec!["A", "B"]);
        let session = f.recognizer.session();
        assert_eq!(session.seen_identities.len(), 2);
        assert_eq!(session.recent_matches[0].matched.identity_id, "B");
        assert_eq!(session.recent_matches[1].matched.identity_id, "A");
    }

    #[tokio::test]
    async fn test_unknown_face_is_reported_without_match() {
        let provider = ScriptedProvider::new();
        provider.push_all(Ok(vec![detection(unit(7)), detection(unit(0))]));
        let mut f = fixture(provider, enrolled_store(&[("A", unit(0))]));
        f.recognizer.start(None).unwrap();

        let TickOutcome::Processed(report) = f.recognizer.process_tick().await else {
            panic!("frame should be processed");
        };
        assert_eq!(report.faces.len(), 2);
        assert!(report.faces[0].matched.is_none());
        let m = report.faces[1].matched.as_ref().unwrap();
        assert_eq!(m.identity_id, "A");
        assert_eq!(m.confidence, 100.0);
        assert_eq!(report.confirmed.len(), 1);
        assert_eq!(drain(&mut f.events), vec!["A"]);
    }

    #[tokio::test]
    async fn test_recent_matches_are_bounded() {
        let ids: Vec<(String, Embedding)> =
            (0..8).map(|i| (format!("S{i}"), unit(i))).collect();
        let refs: Vec<(&str, Embedding)> =
            ids.iter().map(|(id, e)| (id.as_str(), e.clone())).collect();
        let provider = ScriptedProvider::new();
        for (_, e) in &ids {
            provider.push_all(Ok(vec![detection(e.clone())]));
        }
        let f = fixture(provider, enrolled_store(&refs));
        f.recognizer.start(None).unwrap();

        for _ in 0..8 {
            f.recognizer.process_tick().await;
        }

        let session = f.recognizer.session();
        assert_eq!(session.seen_identities.len(), 8);
        let recent: Vec<_> = session
            .recent_matches
            .iter()
            .map(|m| m.matched.identity_id.as_str())
            .collect();
        assert_eq!(recent, vec!["S7", "S6", "S5", "S4", "S3"]);
    }

    #[tokio::test]
    async fn test_stop_keeps_session_until_restart() {
        let provider = ScriptedProvider::new();
        provider.set_fallback_all(vec![detection(unit(0))]);
        let mut f = fixture(provider, enrolled_store(&[("A", unit(0))]));

        f.recognizer.start(None).unwrap();
        f.recognizer.process_tick().await;
        f.recognizer.stop();

        let after_stop = f.recognizer.session();
        assert!(!after_stop.active);
        assert!(after_stop.seen_identities.contains("A"));
        assert_eq!(after_stop.recent_matches.len(), 1);

        f.recognizer.start(None).unwrap();
        assert!(f.recognizer.session().seen_identities.is_empty());
        f.recognizer.process_tick().await;

        assert_eq!(drain(&mut f.events), vec!["A", "A"]);
    }

    #[tokio::test]
    async fn test_provider_error_is_swallowed() {
        let provider = ScriptedProvider::new();
        provider.push_all(Err("model crashed".into()));
        provider.set_fallback_all(vec![detection(unit(0))]);
        let mut f = fixture(provider, enrolled_store(&[("A", unit(0))]));
        f.recognizer.start(None).unwrap();

        let TickOutcome::Processed(first) = f.recognizer.process_tick().await else {
            panic!("frame should be processed");
        };
        assert!(first.faces.is_empty());

        let TickOutcome::Processed(second) = f.recognizer.process_tick().await else {
            panic!("frame should be processed");
        };
        assert_eq!(second.confirmed.len(), 1);
        assert_eq!(drain(&mut f.events), vec!["A"]);
    }

    #[tokio::test]
    async fn test_store_read_failure_yields_no_matches() {
        let provider = ScriptedProvider::new();
        provider.set_fallback_all(vec![detection(unit(0))]);
        let mut f = fixture(provider, shared(BrokenStore));
        // start() refuses an unreadable store, so force the session active.
        f.recognizer.active.store(true, Ordering::Release);

        let TickOutcome::Processed(report) = f.recognizer.process_tick().await else {
            panic!("frame should be processed");
        };
        assert_eq!(report.faces.len(), 1);
        assert!(report.faces[0].matched.is_none());
        assert!(drain(&mut f.events).is_empty());

        assert!(matches!(f.recognizer.process_tick().await, TickOutcome::Processed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_from_previous_session_is_not_confirmed() {
        let provider = ScriptedProvider::with_delay(Duration::from_millis(300));
        provider.set_fallback_all(vec![detection(unit(0))]);
        let mut f = fixture(provider, enrolled_store(&[("A", unit(0))]));
        f.recognizer.start(Some("session-1".into())).unwrap();

        let recognizer = Arc::clone(&f.recognizer);
        let tick = tokio::spawn(async move { recognizer.process_tick().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        f.recognizer.stop();
        f.recognizer.start(Some("session-2".into())).unwrap();

        let TickOutcome::Processed(report) = tick.await.unwrap() else {
            panic!("frame should be processed");
        };
        assert_eq!(report.faces.len(), 1);
        assert!(report.confirmed.is_empty());
        assert!(drain(&mut f.events).is_empty());

        let session = f.recognizer.session();
        assert_eq!(session.session_id.as_deref(), Some("session-2"));
        assert!(session.seen_identities.is_empty());
        assert!(session.recent_matches.is_empty());

        f.recognizer.process_tick().await;
        assert_eq!(drain(&mut f.events), vec!["A"]);
    }

    #[tokio::test]
    async fn test_not_ready_tick_skips_provider() {
        let f = fixture(ScriptedProvider::new(), enrolled_store(&[("A", unit(0))]));
        f.recognizer.start(None).unwrap();
        f.readiness.mark_unready();

        assert_eq!(f.recognizer.process_tick().await, TickOutcome::NotReady);
        assert_eq!(f.provider.all_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_frame_tick() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let recognizer = Recognizer::new(
            Arc::new(ScriptedProvider::new()),
            Arc::new(NoFrames),
            Readiness::ready(),
            enrolled_store(&[("A", unit(0))]),
            RecognitionConfig::default(),
            tx,
        );
        recognizer.start(None).unwrap();
        assert_eq!(recognizer.process_tick().await, TickOutcome::NoFrame);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_ticks_are_dropped() {
        let provider = ScriptedProvider::with_delay(Duration::from_millis(250));
        provider.set_fallback_all(vec![detection(unit(0))]);
        let f = fixture(provider, enrolled_store(&[("A", unit(0))]));
        f.recognizer.start(None).unwrap();

        let (first, second) =
            tokio::join!(f.recognizer.process_tick(), f.recognizer.process_tick());
        assert!(matches!(first, TickOutcome::Processed(_)));
        assert_eq!(second, TickOutcome::Skipped);
        assert!(!f.recognizer.is_processing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_never_overlaps_in_run_loop() {
        let provider = ScriptedProvider::with_delay(Duration::from_millis(350));
        provider.set_fallback_all(vec![detection(unit(0))]);
        let f = fixture(provider, enrolled_store(&[("A", unit(0))]));
        f.recognizer.start(None).unwrap();

        let handle = tokio::spawn(Arc::clone(&f.recognizer).run());
        tokio::time::sleep(Duration::from_secs(3)).await;
        f.recognizer.stop();
        handle.await.unwrap();

        let calls = f.provider.all_calls.load(Ordering::SeqCst);
        assert!(calls >= 2, "expected several frames, got {calls}");
        assert!(calls < 30, "slow frames must drop ticks, got {calls}");
        assert_eq!(f.provider.max_in_flight.load(Ordering::SeqCst), 1);
        assert!(!f.recognizer.is_processing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_publishes_frame_reports() {
        let provider = ScriptedProvider::new();
        provider.set_fallback_all(vec![detection(unit(0))]);
        let f = fixture(provider, enrolled_store(&[("A", unit(0))]));
        let mut reports = f.recognizer.subscribe_reports();
        f.recognizer.start(None).unwrap();

        let handle = tokio::spawn(Arc::clone(&f.recognizer).run());
        reports.changed().await.unwrap();
        let report = reports.borrow_and_update().clone().unwrap();
        assert_eq!(report.faces.len(), 1);

        f.recognizer.stop();
        handle.await.unwrap();
    }
}
