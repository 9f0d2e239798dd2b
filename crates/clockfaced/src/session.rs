//! Attendance session actor.
//!
//! One task owns the entire kiosk session: phase, selected mode, presence
//! debounce, the descriptor gallery, the identification cooldown, and the
//! pending auto-reset deadline. Requests arrive over an mpsc mailbox and
//! are processed to completion one at a time, so state transitions are
//! serialized and at most one identification attempt is ever in flight.
//! The auto-reset is a deadline polled by the select loop; any competing
//! transition overwrites or clears it, so a stale timer can never touch a
//! newer session.

use std::time::Duration;

use chrono::Local;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use uuid::Uuid;

use clockface_core::authorize::{self, AuthorizeError};
use clockface_core::{
    fallback, matcher, AttendanceRecord, CaptureSample, DescriptorExtractor, DescriptorMatcher,
    Direction, Embedding, Gallery, GalleryError, MatchPath, MatchResult, ModeSelection,
    PresenceDetector, SessionPhase, Shift, ShiftWindows, SlotName, Store,
};

/// Unaccepted results surface their best similarity only above this floor.
pub const NEAR_MISS_SIMILARITY_FLOOR: f32 = 0.5;

/// Tunables for one kiosk session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub windows: ShiftWindows,
    pub distance_threshold: f32,
    pub fallback_threshold: f32,
    pub identify_cooldown: Duration,
    pub complete_reset: Duration,
    pub rejected_reset: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            windows: ShiftWindows::default(),
            distance_threshold: matcher::DISTANCE_ACCEPT_THRESHOLD,
            fallback_threshold: fallback::FALLBACK_ACCEPT_THRESHOLD,
            identify_cooldown: Duration::from_secs(3),
            complete_reset: Duration::from_secs(3),
            rejected_reset: Duration::from_secs(4),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Authorize(#[from] AuthorizeError),
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("session task exited")]
    ChannelClosed,
}

/// What one identification attempt produced, as the UI should render it.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IdentificationOutcome {
    #[serde(rename_all = "camelCase")]
    Accepted {
        enrollee_id: String,
        display_name: String,
        slot: Option<SlotName>,
        distance: f32,
        similarity: f32,
        path: MatchPath,
    },
    #[serde(rename_all = "camelCase")]
    NearMiss {
        similarity: f32,
        distance: f32,
        path: MatchPath,
    },
    NoMatch,
    /// Neither a descriptor nor image bytes arrived; nothing was matched.
    NoUsableSignal,
}

/// Reply to one submitted capture frame.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameOutcome {
    pub present: bool,
    pub phase: SessionPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identification: Option<IdentificationOutcome>,
    /// Reason when this frame drove the session into `Rejected`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<String>,
}

/// Point-in-time session state for the status surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub mode: Option<ModeSelection>,
    pub present: bool,
    pub enrollees: usize,
    pub vectors: usize,
}

/// Gallery listing entry: which slots an enrollee has filled.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrolleeSummary {
    pub id: String,
    pub display_name: String,
    pub slots: Vec<SlotName>,
}

/// One enrollment call: a single slot for one enrollee.
///
/// `image_b64` is what the store keeps; `image_rgb` is the same image
/// decoded to packed RGB for the in-memory gallery. Callers supply both
/// or neither.
#[derive(Debug, Clone)]
pub struct EnrollmentUpdate {
    /// Absent for a brand-new enrollee; an id is minted.
    pub enrollee_id: Option<String>,
    pub display_name: String,
    pub slot: SlotName,
    pub embedding: Option<Embedding>,
    pub image_b64: Option<String>,
    pub image_rgb: Option<Vec<u8>>,
}

/// UI-facing session events, broadcast as they happen.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    PresenceChanged { present: bool },
    IdentificationResult { outcome: IdentificationOutcome },
    AttendanceCommitted { record: AttendanceRecord },
    Rejected { reason: String },
}

/// Messages sent from D-Bus handlers to the session task.
enum SessionRequest {
    SelectMode {
        mode: ModeSelection,
        reply: oneshot::Sender<Result<SessionPhase, SessionError>>,
    },
    Frame {
        sample: CaptureSample,
        reply: oneshot::Sender<FrameOutcome>,
    },
    Cancel {
        reply: oneshot::Sender<SessionPhase>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Enroll {
        update: EnrollmentUpdate,
        reply: oneshot::Sender<Result<String, SessionError>>,
    },
    ListEnrollees {
        reply: oneshot::Sender<Vec<EnrolleeSummary>>,
    },
}

/// Clone-safe handle to the session task.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionRequest>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    /// Choose shift and direction for the next attempt, subject to the
    /// shift's time window.
    pub async fn select_mode(
        &self,
        shift: Shift,
        direction: Direction,
    ) -> Result<SessionPhase, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionRequest::SelectMode {
                mode: ModeSelection { shift, direction },
                reply: reply_tx,
            })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        reply_rx.await.map_err(|_| SessionError::ChannelClosed)?
    }

    /// Feed one capture frame through presence tracking and, when the
    /// session is armed, identification.
    pub async fn frame(&self, sample: CaptureSample) -> Result<FrameOutcome, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionRequest::Frame {
                sample,
                reply: reply_tx,
            })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        reply_rx.await.map_err(|_| SessionError::ChannelClosed)
    }

    /// Drop the session back to idle, discarding in-flight state and any
    /// pending auto-reset.
    pub async fn cancel(&self) -> Result<SessionPhase, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionRequest::Cancel { reply: reply_tx })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        reply_rx.await.map_err(|_| SessionError::ChannelClosed)
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionRequest::Snapshot { reply: reply_tx })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        reply_rx.await.map_err(|_| SessionError::ChannelClosed)
    }

    /// Create or replace one descriptor slot; returns the enrollee id.
    pub async fn enroll(&self, update: EnrollmentUpdate) -> Result<String, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionRequest::Enroll {
                update,
                reply: reply_tx,
            })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        reply_rx.await.map_err(|_| SessionError::ChannelClosed)?
    }

    pub async fn list_enrollees(&self) -> Result<Vec<EnrolleeSummary>, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionRequest::ListEnrollees { reply: reply_tx })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        reply_rx.await.map_err(|_| SessionError::ChannelClosed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

/// Spawn the session task.
///
/// The actor takes ownership of the gallery; enrollments flow through it
/// so matcher scans never observe a half-written slot.
pub fn spawn_session<S, E>(
    config: SessionConfig,
    store: S,
    extractor: E,
    gallery: Gallery,
) -> SessionHandle
where
    S: Store,
    E: DescriptorExtractor + 'static,
{
    let (tx, rx) = mpsc::channel(16);
    let (events, _) = broadcast::channel(32);
    let actor = SessionActor {
        matcher: DescriptorMatcher::new(config.distance_threshold),
        config,
        store,
        extractor,
        gallery,
        presence: PresenceDetector::new(),
        phase: SessionPhase::Idle,
        mode: None,
        last_attempt: None,
        reset_at: None,
        events: events.clone(),
    };
    tokio::spawn(actor.run(rx));
    SessionHandle { tx, events }
}

struct SessionActor<S, E> {
    config: SessionConfig,
    store: S,
    extractor: E,
    gallery: Gallery,
    matcher: DescriptorMatcher,
    presence: PresenceDetector,
    phase: SessionPhase,
    mode: Option<ModeSelection>,
    last_attempt: Option<Instant>,
    reset_at: Option<Instant>,
    events: broadcast::Sender<SessionEvent>,
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    if let Some(deadline) = deadline {
        tokio::time::sleep_until(deadline).await;
    }
}

impl<S, E> SessionActor<S, E>
where
    S: Store,
    E: DescriptorExtractor,
{
    async fn run(mut self, mut rx: mpsc::Receiver<SessionRequest>) {
        tracing::info!(
            enrollees = self.gallery.len(),
            vectors = self.gallery.vector_count(),
            "session task started"
        );
        loop {
            // Copied out so the select arm does not borrow self.
            let reset_at = self.reset_at;
            tokio::select! {
                req = rx.recv() => {
                    match req {
                        Some(req) => self.handle(req).await,
                        None => break,
                    }
                }
                _ = sleep_until_deadline(reset_at), if reset_at.is_some() => {
                    self.reset_to_idle();
                }
            }
        }
        tracing::info!("session task exiting");
    }

    async fn handle(&mut self, req: SessionRequest) {
        match req {
            SessionRequest::SelectMode { mode, reply } => {
                let _ = reply.send(self.handle_select_mode(mode));
            }
            SessionRequest::Frame { sample, reply } => {
                let outcome = self.handle_frame(sample).await;
                let _ = reply.send(outcome);
            }
            SessionRequest::Cancel { reply } => {
                self.handle_cancel();
                let _ = reply.send(self.phase);
            }
            SessionRequest::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            SessionRequest::Enroll { update, reply } => {
                let result = self.handle_enroll(update).await;
                let _ = reply.send(result);
            }
            SessionRequest::ListEnrollees { reply } => {
                let _ = reply.send(self.list_enrollees());
            }
        }
    }

    fn handle_select_mode(&mut self, mode: ModeSelection) -> Result<SessionPhase, SessionError> {
        let now = Local::now().time();
        if let Err(err) = authorize::check_window(&self.config.windows, mode.shift, now) {
            let reason = err.to_string();
            tracing::info!(
                shift = %mode.shift,
                direction = %mode.direction,
                %reason,
                "mode selection outside shift window"
            );
            self.emit(SessionEvent::Rejected { reason });
            return Err(err.into());
        }
        // A competing selection replaces any pending auto-reset.
        self.reset_at = None;
        self.mode = Some(mode);
        self.phase = SessionPhase::ModeSelected;
        tracing::info!(shift = %mode.shift, direction = %mode.direction, "mode selected");
        Ok(self.phase)
    }

    async fn handle_frame(&mut self, sample: CaptureSample) -> FrameOutcome {
        if let Some(present) = self.presence.observe(&sample.frame) {
            self.emit(SessionEvent::PresenceChanged { present });
        }
        if self.phase == SessionPhase::ModeSelected {
            self.phase = SessionPhase::AwaitingPresence;
        }

        let mut identification = None;
        let mut rejection = None;
        if self.phase == SessionPhase::AwaitingPresence
            && self.presence.present()
            && self.cooldown_elapsed()
        {
            if let Some(mode) = self.mode {
                let (outcome, reason) = self.run_attempt(mode, &sample).await;
                identification = Some(outcome);
                rejection = reason;
            }
        }

        FrameOutcome {
            present: self.presence.present(),
            phase: self.phase,
            identification,
            rejection,
        }
    }

    fn cooldown_elapsed(&self) -> bool {
        match self.last_attempt {
            Some(at) => at.elapsed() >= self.config.identify_cooldown,
            None => true,
        }
    }

    /// One identification attempt: match, verify against today's ledger,
    /// commit. Returns what the attempt produced plus a rejection reason
    /// when the attempt ended in `Rejected`.
    async fn run_attempt(
        &mut self,
        mode: ModeSelection,
        sample: &CaptureSample,
    ) -> (IdentificationOutcome, Option<String>) {
        self.phase = SessionPhase::Identifying;
        self.last_attempt = Some(Instant::now());

        let Some(result) = self.match_sample(sample) else {
            tracing::debug!("capture sample carries no usable signal");
            self.phase = SessionPhase::AwaitingPresence;
            let outcome = IdentificationOutcome::NoUsableSignal;
            self.emit(SessionEvent::IdentificationResult {
                outcome: outcome.clone(),
            });
            return (outcome, None);
        };

        if !result.accepted {
            self.phase = SessionPhase::AwaitingPresence;
            let outcome = if result.similarity > NEAR_MISS_SIMILARITY_FLOOR {
                IdentificationOutcome::NearMiss {
                    similarity: result.similarity,
                    distance: result.distance,
                    path: result.path,
                }
            } else {
                IdentificationOutcome::NoMatch
            };
            tracing::info!(
                similarity = result.similarity,
                distance = result.distance,
                path = ?result.path,
                "identification not accepted"
            );
            self.emit(SessionEvent::IdentificationResult {
                outcome: outcome.clone(),
            });
            return (outcome, None);
        }

        let Some(enrollee_id) = result.enrollee_id.clone() else {
            // Accepted results always carry an identity; treat a bare one
            // as a non-match rather than crash the kiosk.
            self.phase = SessionPhase::AwaitingPresence;
            return (IdentificationOutcome::NoMatch, None);
        };
        let display_name = self
            .gallery
            .find(&enrollee_id)
            .map(|e| e.display_name.clone())
            .unwrap_or_else(|| enrollee_id.clone());
        let outcome = IdentificationOutcome::Accepted {
            enrollee_id: enrollee_id.clone(),
            display_name,
            slot: result.slot,
            distance: result.distance,
            similarity: result.similarity,
            path: result.path,
        };
        tracing::info!(
            enrollee = %enrollee_id,
            distance = result.distance,
            path = ?result.path,
            "identification accepted"
        );
        self.emit(SessionEvent::IdentificationResult {
            outcome: outcome.clone(),
        });

        self.phase = SessionPhase::Verifying;
        let today = Local::now().date_naive();
        let lookup = self.store.find_today_records(&enrollee_id, today).await;
        let records = match lookup {
            Ok(records) => records,
            Err(err) => {
                let reason = format!("attendance lookup failed: {err}");
                tracing::error!(enrollee = %enrollee_id, error = %err, "today-record lookup failed");
                self.reject(reason.clone(), Some(self.config.rejected_reset));
                return (outcome, Some(reason));
            }
        };
        if let Err(err) = authorize::check_duplicates(&records, mode.shift, mode.direction) {
            let reason = err.to_string();
            tracing::info!(enrollee = %enrollee_id, %reason, "attendance rejected");
            self.reject(reason.clone(), Some(self.config.rejected_reset));
            return (outcome, Some(reason));
        }

        self.phase = SessionPhase::Committing;
        let record = AttendanceRecord {
            id: Uuid::new_v4().to_string(),
            enrollee_id: enrollee_id.clone(),
            shift: mode.shift,
            direction: mode.direction,
            timestamp: Local::now(),
            verified: true,
            reference_image: sample.encoded.clone(),
        };
        let committed = self.store.commit_attendance(&record).await;
        match committed {
            Ok(id) => {
                tracing::info!(
                    record = %id,
                    enrollee = %enrollee_id,
                    shift = %mode.shift,
                    direction = %mode.direction,
                    "attendance committed"
                );
                self.phase = SessionPhase::Complete;
                self.reset_at = Some(Instant::now() + self.config.complete_reset);
                self.emit(SessionEvent::AttendanceCommitted { record });
                (outcome, None)
            }
            Err(err) => {
                let reason = format!("attendance commit failed: {err}");
                tracing::error!(
                    enrollee = %enrollee_id,
                    error = %err,
                    "attendance commit failed; session stays rejected until cancelled"
                );
                // The identification succeeded but the record may not be
                // durable: no auto-reset, the operator must act.
                self.reject(reason.clone(), None);
                (outcome, Some(reason))
            }
        }
    }

    /// Descriptor path when a vector is available (from the sample or the
    /// local extractor), image fallback otherwise. `None` when the sample
    /// carries no usable signal at all.
    fn match_sample(&self, sample: &CaptureSample) -> Option<MatchResult> {
        let embedding = sample
            .embedding
            .clone()
            .or_else(|| self.extractor.extract(&sample.frame));
        if let Some(probe) = embedding {
            return Some(self.matcher.identify(&probe, &self.gallery));
        }
        if sample.frame.is_empty() {
            return None;
        }
        Some(fallback::identify(
            &sample.frame.data,
            &self.gallery,
            self.config.fallback_threshold,
        ))
    }

    fn reject(&mut self, reason: String, auto_reset: Option<Duration>) {
        self.phase = SessionPhase::Rejected;
        self.reset_at = auto_reset.map(|delay| Instant::now() + delay);
        self.emit(SessionEvent::Rejected { reason });
    }

    fn reset_to_idle(&mut self) {
        tracing::debug!(phase = ?self.phase, "display delay elapsed, session reset");
        self.phase = SessionPhase::Idle;
        self.mode = None;
        self.reset_at = None;
    }

    fn handle_cancel(&mut self) {
        tracing::info!(phase = ?self.phase, "session cancelled");
        self.phase = SessionPhase::Idle;
        self.mode = None;
        self.reset_at = None;
        self.last_attempt = None;
    }

    async fn handle_enroll(&mut self, update: EnrollmentUpdate) -> Result<String, SessionError> {
        // Validate before the store write so a rejected vector is never
        // persisted.
        if let Some(vector) = &update.embedding {
            if vector.len() != self.gallery.descriptor_dim() {
                return Err(GalleryError::DimensionMismatch {
                    expected: self.gallery.descriptor_dim(),
                    actual: vector.len(),
                }
                .into());
            }
        }
        let enrollee_id = update
            .enrollee_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        self.store
            .upsert_enrollee_slot(
                &enrollee_id,
                &update.display_name,
                update.slot,
                update.embedding.as_ref(),
                update.image_b64.as_deref(),
            )
            .await
            .map_err(|err| SessionError::Persistence(err.to_string()))?;
        self.gallery.add_or_replace_slot(
            &enrollee_id,
            &update.display_name,
            update.slot,
            update.embedding,
            update.image_rgb,
        )?;
        tracing::info!(enrollee = %enrollee_id, slot = %update.slot, "enrollment slot updated");
        Ok(enrollee_id)
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            mode: self.mode,
            present: self.presence.present(),
            enrollees: self.gallery.len(),
            vectors: self.gallery.vector_count(),
        }
    }

    fn list_enrollees(&self) -> Vec<EnrolleeSummary> {
        self.gallery
            .enrollees()
            .iter()
            .map(|e| EnrolleeSummary {
                id: e.id.clone(),
                display_name: e.display_name.clone(),
                slots: e
                    .slots
                    .iter()
                    .filter(|(_, slot)| !slot.is_empty())
                    .map(|(name, _)| name)
                    .collect(),
            })
            .collect()
    }

    fn emit(&self, event: SessionEvent) {
        // A send error only means nobody is subscribed right now.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};

    use chrono::{NaiveDate, NaiveTime};
    use clockface_core::{Enrollee, NullExtractor, RgbFrame, TimeWindow};

    #[derive(Debug, Error)]
    #[error("mem store failure")]
    struct MemStoreError;

    #[derive(Default)]
    struct MemState {
        records: Vec<AttendanceRecord>,
        fail_commit: bool,
        fail_lookup: bool,
    }

    #[derive(Clone, Default)]
    struct MemStore {
        state: Arc<Mutex<MemState>>,
    }

    impl MemStore {
        fn committed(&self) -> Vec<AttendanceRecord> {
            self.state.lock().unwrap().records.clone()
        }

        fn seed_record(&self, record: AttendanceRecord) {
            self.state.lock().unwrap().records.push(record);
        }

        fn set_fail_commit(&self, fail: bool) {
            self.state.lock().unwrap().fail_commit = fail;
        }

        fn set_fail_lookup(&self, fail: bool) {
            self.state.lock().unwrap().fail_lookup = fail;
        }
    }

    impl Store for MemStore {
        type Error = MemStoreError;

        async fn find_today_records(
            &self,
            enrollee_id: &str,
            date: NaiveDate,
        ) -> Result<Vec<AttendanceRecord>, MemStoreError> {
            let state = self.state.lock().unwrap();
            if state.fail_lookup {
                return Err(MemStoreError);
            }
            Ok(state
                .records
                .iter()
                .filter(|r| r.enrollee_id == enrollee_id && r.timestamp.date_naive() == date)
                .cloned()
                .collect())
        }

        async fn commit_attendance(
            &self,
            record: &AttendanceRecord,
        ) -> Result<String, MemStoreError> {
            let mut state = self.state.lock().unwrap();
            if state.fail_commit {
                return Err(MemStoreError);
            }
            state.records.push(record.clone());
            Ok(record.id.clone())
        }

        async fn find_enrollee(&self, _: &str) -> Result<Option<Enrollee>, MemStoreError> {
            Ok(None)
        }

        async fn list_enrollees_with_descriptors(&self) -> Result<Vec<Enrollee>, MemStoreError> {
            Ok(Vec::new())
        }

        async fn upsert_enrollee_slot(
            &self,
            _: &str,
            _: &str,
            _: SlotName,
            _: Option<&Embedding>,
            _: Option<&str>,
        ) -> Result<(), MemStoreError> {
            Ok(())
        }
    }

    fn wall(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    /// Windows that admit any wall-clock time, so tests pass at any hour.
    fn open_windows() -> ShiftWindows {
        let all_day = TimeWindow::new(wall(0, 0, 0), wall(23, 59, 59));
        ShiftWindows {
            morning: all_day,
            afternoon: all_day,
        }
    }

    /// Empty windows: every selection is a violation.
    fn closed_windows() -> ShiftWindows {
        let never = TimeWindow::new(wall(12, 0, 0), wall(12, 0, 0));
        ShiftWindows {
            morning: never,
            afternoon: never,
        }
    }

    fn test_config() -> SessionConfig {
        SessionConfig {
            windows: open_windows(),
            ..SessionConfig::default()
        }
    }

    fn checkerboard(w: u32, h: u32, a: (u8, u8, u8), b: (u8, u8, u8)) -> RgbFrame {
        let mut data = Vec::with_capacity((w * h * 3) as usize);
        for y in 0..h {
            for x in 0..w {
                let c = if (x + y) % 2 == 0 { a } else { b };
                data.extend_from_slice(&[c.0, c.1, c.2]);
            }
        }
        RgbFrame::new(data, w, h).unwrap()
    }

    /// Skin-toned textured frame that passes the presence heuristic.
    fn face_frame() -> RgbFrame {
        checkerboard(100, 100, (150, 100, 60), (170, 120, 80))
    }

    fn face_sample(embedding: &[f32]) -> CaptureSample {
        CaptureSample {
            frame: face_frame(),
            embedding: Some(Embedding::new(embedding.to_vec())),
            encoded: Some("ZmFrZQ==".to_string()),
        }
    }

    fn image_only_sample() -> CaptureSample {
        CaptureSample {
            frame: face_frame(),
            embedding: None,
            encoded: Some("ZmFrZQ==".to_string()),
        }
    }

    fn empty_sample() -> CaptureSample {
        CaptureSample {
            frame: RgbFrame::default(),
            embedding: None,
            encoded: None,
        }
    }

    fn gallery_with_front(id: &str, name: &str, vector: &[f32]) -> Gallery {
        let mut gallery = Gallery::new(vector.len());
        gallery
            .add_or_replace_slot(id, name, SlotName::Front, Some(Embedding::new(vector.to_vec())), None)
            .unwrap();
        gallery
    }

    fn spawn(store: MemStore, gallery: Gallery) -> SessionHandle {
        spawn_session(test_config(), store, NullExtractor, gallery)
    }

    /// Advance the paused clock and let the actor drain timer wakeups.
    async fn pass_time(duration: Duration) {
        tokio::time::advance(duration).await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    /// Drive presence up and trigger one attempt; returns the attempt's
    /// frame outcome (the second frame, where the debounce flips).
    async fn drive_attempt(handle: &SessionHandle, sample: CaptureSample) -> FrameOutcome {
        handle.frame(sample.clone()).await.unwrap();
        handle.frame(sample).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_mode_requires_open_window() {
        let config = SessionConfig {
            windows: closed_windows(),
            ..SessionConfig::default()
        };
        let handle = spawn_session(
            config,
            MemStore::default(),
            NullExtractor,
            Gallery::new(2),
        );
        let mut events = handle.subscribe();

        let err = handle
            .select_mode(Shift::Morning, Direction::In)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Authorize(AuthorizeError::OutsideWindow { .. })
        ));

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.phase, SessionPhase::Idle);
        assert!(snapshot.mode.is_none());
        assert!(matches!(
            events.try_recv().unwrap(),
            SessionEvent::Rejected { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_accepted_match_commits_record() {
        let store = MemStore::default();
        let gallery = gallery_with_front("alice", "Alice", &[1.0, 0.0]);
        let handle = spawn(store.clone(), gallery);
        let mut events = handle.subscribe();

        let phase = handle
            .select_mode(Shift::Morning, Direction::In)
            .await
            .unwrap();
        assert_eq!(phase, SessionPhase::ModeSelected);

        let outcome = drive_attempt(&handle, face_sample(&[1.0, 0.05])).await;
        assert!(outcome.present);
        assert_eq!(outcome.phase, SessionPhase::Complete);
        assert!(outcome.rejection.is_none());
        match outcome.identification {
            Some(IdentificationOutcome::Accepted {
                enrollee_id,
                display_name,
                slot,
                distance,
                path,
                ..
            }) => {
                assert_eq!(enrollee_id, "alice");
                assert_eq!(display_name, "Alice");
                assert_eq!(slot, Some(SlotName::Front));
                assert!(distance < 0.4);
                assert_eq!(path, MatchPath::Descriptor);
            }
            other => panic!("unexpected identification: {other:?}"),
        }

        let committed = store.committed();
        assert_eq!(committed.len(), 1);
        let record = &committed[0];
        assert_eq!(record.enrollee_id, "alice");
        assert_eq!(record.shift, Shift::Morning);
        assert_eq!(record.direction, Direction::In);
        assert!(record.verified);
        assert_eq!(record.reference_image.as_deref(), Some("ZmFrZQ=="));

        assert!(matches!(
            events.try_recv().unwrap(),
            SessionEvent::PresenceChanged { present: true }
        ));
        assert!(matches!(
            events.try_recv().unwrap(),
            SessionEvent::IdentificationResult {
                outcome: IdentificationOutcome::Accepted { .. }
            }
        ));
        assert!(matches!(
            events.try_recv().unwrap(),
            SessionEvent::AttendanceCommitted { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_auto_resets_to_idle() {
        let store = MemStore::default();
        let handle = spawn(store, gallery_with_front("alice", "Alice", &[1.0, 0.0]));
        handle
            .select_mode(Shift::Morning, Direction::In)
            .await
            .unwrap();
        let outcome = drive_attempt(&handle, face_sample(&[1.0, 0.0])).await;
        assert_eq!(outcome.phase, SessionPhase::Complete);

        pass_time(Duration::from_secs(3)).await;
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.phase, SessionPhase::Idle);
        assert!(snapshot.mode.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_presence_gates_identification() {
        let handle = spawn(
            MemStore::default(),
            gallery_with_front("alice", "Alice", &[1.0, 0.0]),
        );
        handle
            .select_mode(Shift::Morning, Direction::In)
            .await
            .unwrap();

        // One qualifying frame is below the debounce threshold.
        let first = handle.frame(face_sample(&[1.0, 0.0])).await.unwrap();
        assert!(!first.present);
        assert!(first.identification.is_none());
        assert_eq!(first.phase, SessionPhase::AwaitingPresence);

        let second = handle.frame(face_sample(&[1.0, 0.0])).await.unwrap();
        assert!(second.present);
        assert!(second.identification.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_suppresses_repeat_attempts() {
        let handle = spawn(
            MemStore::default(),
            gallery_with_front("alice", "Alice", &[1.0, 0.0]),
        );
        handle
            .select_mode(Shift::Morning, Direction::In)
            .await
            .unwrap();

        // Far probe: the attempt runs and misses.
        let outcome = drive_attempt(&handle, face_sample(&[5.0, 0.0])).await;
        assert!(matches!(
            outcome.identification,
            Some(IdentificationOutcome::NoMatch)
        ));
        assert_eq!(outcome.phase, SessionPhase::AwaitingPresence);

        // Within the cooldown no new attempt starts.
        let muted = handle.frame(face_sample(&[5.0, 0.0])).await.unwrap();
        assert!(muted.identification.is_none());

        pass_time(Duration::from_secs(3)).await;
        let retried = handle.frame(face_sample(&[5.0, 0.0])).await.unwrap();
        assert!(retried.identification.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_near_miss_feedback_allows_retry() {
        let handle = spawn(
            MemStore::default(),
            gallery_with_front("alice", "Alice", &[1.0, 0.0]),
        );
        handle
            .select_mode(Shift::Morning, Direction::In)
            .await
            .unwrap();

        // Distance 0.45: above the accept threshold, under the near-miss floor.
        let outcome = drive_attempt(&handle, face_sample(&[1.45, 0.0])).await;
        match outcome.identification {
            Some(IdentificationOutcome::NearMiss { similarity, .. }) => {
                assert!(similarity > 0.5 && similarity < 0.7);
            }
            other => panic!("unexpected identification: {other:?}"),
        }
        assert_eq!(outcome.phase, SessionPhase::AwaitingPresence);

        // Still armed: a better capture after the cooldown succeeds.
        pass_time(Duration::from_secs(3)).await;
        let retried = handle.frame(face_sample(&[1.0, 0.0])).await.unwrap();
        assert_eq!(retried.phase, SessionPhase::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_rejection_auto_resets() {
        let store = MemStore::default();
        store.seed_record(AttendanceRecord {
            id: "r0".into(),
            enrollee_id: "alice".into(),
            shift: Shift::Morning,
            direction: Direction::In,
            timestamp: Local::now(),
            verified: true,
            reference_image: None,
        });
        let handle = spawn(
            store.clone(),
            gallery_with_front("alice", "Alice", &[1.0, 0.0]),
        );
        handle
            .select_mode(Shift::Morning, Direction::In)
            .await
            .unwrap();

        let outcome = drive_attempt(&handle, face_sample(&[1.0, 0.0])).await;
        // Identification succeeded; the attendance rule rejected it.
        assert!(matches!(
            outcome.identification,
            Some(IdentificationOutcome::Accepted { .. })
        ));
        assert_eq!(outcome.phase, SessionPhase::Rejected);
        assert!(outcome.rejection.unwrap().contains("already clocked in"));
        assert_eq!(store.committed().len(), 1);

        pass_time(Duration::from_secs(4)).await;
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.phase, SessionPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_failure_sticks_until_cancelled() {
        let store = MemStore::default();
        store.set_fail_commit(true);
        let handle = spawn(
            store.clone(),
            gallery_with_front("alice", "Alice", &[1.0, 0.0]),
        );
        handle
            .select_mode(Shift::Morning, Direction::In)
            .await
            .unwrap();

        let outcome = drive_attempt(&handle, face_sample(&[1.0, 0.0])).await;
        assert_eq!(outcome.phase, SessionPhase::Rejected);
        assert!(outcome.rejection.unwrap().contains("commit failed"));
        assert!(store.committed().is_empty());

        // No auto-reset, however long we wait.
        pass_time(Duration::from_secs(60)).await;
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.phase, SessionPhase::Rejected);

        let phase = handle.cancel().await.unwrap();
        assert_eq!(phase, SessionPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_failure_rejects_with_reset() {
        let store = MemStore::default();
        store.set_fail_lookup(true);
        let handle = spawn(
            store.clone(),
            gallery_with_front("alice", "Alice", &[1.0, 0.0]),
        );
        handle
            .select_mode(Shift::Morning, Direction::In)
            .await
            .unwrap();

        let outcome = drive_attempt(&handle, face_sample(&[1.0, 0.0])).await;
        assert_eq!(outcome.phase, SessionPhase::Rejected);
        assert!(outcome.rejection.unwrap().contains("lookup failed"));

        pass_time(Duration::from_secs(4)).await;
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.phase, SessionPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_mode_during_complete_cancels_reset() {
        let handle = spawn(
            MemStore::default(),
            gallery_with_front("alice", "Alice", &[1.0, 0.0]),
        );
        handle
            .select_mode(Shift::Morning, Direction::In)
            .await
            .unwrap();
        let outcome = drive_attempt(&handle, face_sample(&[1.0, 0.0])).await;
        assert_eq!(outcome.phase, SessionPhase::Complete);

        // A new selection during the display delay must invalidate the
        // pending reset; nothing may later yank the session back to idle.
        handle
            .select_mode(Shift::Morning, Direction::Out)
            .await
            .unwrap();
        pass_time(Duration::from_secs(10)).await;

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.phase, SessionPhase::ModeSelected);
        assert_eq!(
            snapshot.mode,
            Some(ModeSelection {
                shift: Shift::Morning,
                direction: Direction::Out
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_clears_session() {
        let handle = spawn(
            MemStore::default(),
            gallery_with_front("alice", "Alice", &[1.0, 0.0]),
        );
        handle
            .select_mode(Shift::Morning, Direction::In)
            .await
            .unwrap();
        drive_attempt(&handle, face_sample(&[5.0, 0.0])).await;

        let phase = handle.cancel().await.unwrap();
        assert_eq!(phase, SessionPhase::Idle);
        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.mode.is_none());

        // Cancellation also clears the cooldown stamp: a fresh attempt
        // may start immediately.
        handle
            .select_mode(Shift::Morning, Direction::In)
            .await
            .unwrap();
        let outcome = handle.frame(face_sample(&[1.0, 0.0])).await.unwrap();
        assert!(outcome.identification.is_some());
        assert_eq!(outcome.phase, SessionPhase::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_sample_yields_no_usable_signal() {
        let handle = spawn(
            MemStore::default(),
            gallery_with_front("alice", "Alice", &[1.0, 0.0]),
        );
        handle
            .select_mode(Shift::Morning, Direction::In)
            .await
            .unwrap();

        // Build presence with image-only frames (fallback misses: no
        // legacy images enrolled), then submit a bare sample.
        drive_attempt(&handle, image_only_sample()).await;
        pass_time(Duration::from_secs(3)).await;

        let outcome = handle.frame(empty_sample()).await.unwrap();
        assert!(matches!(
            outcome.identification,
            Some(IdentificationOutcome::NoUsableSignal)
        ));
        assert_eq!(outcome.phase, SessionPhase::AwaitingPresence);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_path_identifies_by_image() {
        let store = MemStore::default();
        let mut gallery = Gallery::new(2);
        gallery
            .add_or_replace_slot("bob", "Bob", SlotName::Legacy, None, Some(face_frame().data))
            .unwrap();
        let handle = spawn(store.clone(), gallery);
        handle
            .select_mode(Shift::Afternoon, Direction::In)
            .await
            .unwrap();

        let outcome = drive_attempt(&handle, image_only_sample()).await;
        match outcome.identification {
            Some(IdentificationOutcome::Accepted {
                enrollee_id,
                slot,
                path,
                similarity,
                ..
            }) => {
                assert_eq!(enrollee_id, "bob");
                assert_eq!(slot, Some(SlotName::Legacy));
                assert_eq!(path, MatchPath::FallbackImage);
                assert_eq!(similarity, 1.0);
            }
            other => panic!("unexpected identification: {other:?}"),
        }
        assert_eq!(outcome.phase, SessionPhase::Complete);
        assert_eq!(store.committed().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enroll_updates_live_gallery() {
        let handle = spawn(MemStore::default(), Gallery::new(2));

        let id = handle
            .enroll(EnrollmentUpdate {
                enrollee_id: None,
                display_name: "Carol".into(),
                slot: SlotName::Front,
                embedding: Some(Embedding::new(vec![0.5, 0.5])),
                image_b64: None,
                image_rgb: None,
            })
            .await
            .unwrap();
        assert!(!id.is_empty());

        let listed = handle.list_enrollees().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].display_name, "Carol");
        assert_eq!(listed[0].slots, vec![SlotName::Front]);

        // The new template is matchable without a restart.
        handle
            .select_mode(Shift::Morning, Direction::In)
            .await
            .unwrap();
        let outcome = drive_attempt(&handle, face_sample(&[0.5, 0.5])).await;
        match outcome.identification {
            Some(IdentificationOutcome::Accepted { enrollee_id, .. }) => {
                assert_eq!(enrollee_id, id);
            }
            other => panic!("unexpected identification: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_enroll_rejects_dimension_mismatch() {
        let handle = spawn(MemStore::default(), Gallery::new(2));
        let err = handle
            .enroll(EnrollmentUpdate {
                enrollee_id: Some("dave".into()),
                display_name: "Dave".into(),
                slot: SlotName::Front,
                embedding: Some(Embedding::new(vec![1.0, 2.0, 3.0])),
                image_b64: None,
                image_rgb: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Gallery(GalleryError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
        assert!(handle.list_enrollees().await.unwrap().is_empty());
    }
}
