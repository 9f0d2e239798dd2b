//! D-Bus surface for the attendance kiosk.
//!
//! Bus name: org.freedesktop.Clockface1
//! Object path: /org/freedesktop/Clockface1
//!
//! Methods reply with JSON strings; session events are re-emitted as
//! signals by [`forward_events`].

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Local;
use tokio::sync::broadcast;
use zbus::object_server::SignalEmitter;
use zbus::{fdo, interface};

use clockface_core::{CaptureSample, Direction, Embedding, RgbFrame, Shift, SlotName};
use clockface_store::SqliteStore;

use crate::session::{EnrollmentUpdate, SessionError, SessionEvent, SessionHandle};

pub const BUS_NAME: &str = "org.freedesktop.Clockface1";
pub const OBJECT_PATH: &str = "/org/freedesktop/Clockface1";

pub struct KioskService {
    session: SessionHandle,
    store: SqliteStore,
}

impl KioskService {
    pub fn new(session: SessionHandle, store: SqliteStore) -> Self {
        Self { session, store }
    }
}

#[interface(name = "org.freedesktop.Clockface1")]
impl KioskService {
    /// Choose shift ("Morning"/"Afternoon") and direction ("In"/"Out")
    /// for the next attempt. Fails outside the shift's clock window.
    async fn select_mode(&self, shift: &str, direction: &str) -> fdo::Result<String> {
        let shift = Shift::from_name(shift)
            .ok_or_else(|| fdo::Error::InvalidArgs(format!("unknown shift '{shift}'")))?;
        let direction = Direction::from_name(direction)
            .ok_or_else(|| fdo::Error::InvalidArgs(format!("unknown direction '{direction}'")))?;
        let phase = self
            .session
            .select_mode(shift, direction)
            .await
            .map_err(to_fdo)?;
        to_json(&phase)
    }

    /// Submit one capture frame: a base64 image (no data-URI prefix) and
    /// an optional descriptor as a JSON float array ("" when the capture
    /// client has none). Replies with the frame outcome as JSON.
    async fn presence_frame(&self, image_b64: &str, descriptor_json: &str) -> fdo::Result<String> {
        let sample = decode_sample(image_b64, descriptor_json)?;
        let outcome = self.session.frame(sample).await.map_err(to_fdo)?;
        to_json(&outcome)
    }

    /// Return to idle immediately, discarding in-flight state.
    async fn cancel(&self) -> fdo::Result<String> {
        let phase = self.session.cancel().await.map_err(to_fdo)?;
        to_json(&phase)
    }

    /// Daemon and session status as JSON.
    async fn status(&self) -> fdo::Result<String> {
        let snapshot = self.session.snapshot().await.map_err(to_fdo)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "phase": snapshot.phase,
            "mode": snapshot.mode,
            "present": snapshot.present,
            "enrollees": snapshot.enrollees,
            "vectors": snapshot.vectors,
        })
        .to_string())
    }

    /// Create or replace one descriptor slot. An empty `enrollee_id`
    /// creates a new enrollee; the enrollee id is returned either way.
    async fn enroll(
        &self,
        enrollee_id: &str,
        display_name: &str,
        slot: &str,
        image_b64: &str,
        descriptor_json: &str,
    ) -> fdo::Result<String> {
        let slot = SlotName::from_name(slot)
            .ok_or_else(|| fdo::Error::InvalidArgs(format!("unknown slot '{slot}'")))?;
        let embedding = parse_descriptor(descriptor_json)?;
        let image_rgb = if image_b64.is_empty() {
            None
        } else {
            Some(decode_image(image_b64)?.data)
        };
        tracing::info!(enrollee = enrollee_id, slot = %slot, "enroll requested");
        self.session
            .enroll(EnrollmentUpdate {
                enrollee_id: (!enrollee_id.is_empty()).then(|| enrollee_id.to_string()),
                display_name: display_name.to_string(),
                slot,
                embedding,
                image_b64: (!image_b64.is_empty()).then(|| image_b64.to_string()),
                image_rgb,
            })
            .await
            .map_err(to_fdo)
    }

    /// Enrolled people and their filled slots, as JSON.
    async fn list_enrollees(&self) -> fdo::Result<String> {
        let listed = self.session.list_enrollees().await.map_err(to_fdo)?;
        to_json(&listed)
    }

    /// Today's committed records as JSON, without image payloads.
    async fn today_records(&self) -> fdo::Result<String> {
        let mut records = self
            .store
            .list_today(Local::now().date_naive())
            .await
            .map_err(|err| fdo::Error::Failed(err.to_string()))?;
        for record in &mut records {
            record.reference_image = None;
        }
        to_json(&records)
    }

    #[zbus(signal)]
    async fn presence_changed(emitter: &SignalEmitter<'_>, present: bool) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn identification_result(
        emitter: &SignalEmitter<'_>,
        outcome_json: &str,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn attendance_committed(
        emitter: &SignalEmitter<'_>,
        record_json: &str,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn rejected(emitter: &SignalEmitter<'_>, reason: &str) -> zbus::Result<()>;
}

/// Re-emit session events as D-Bus signals until the session closes.
pub async fn forward_events(
    conn: zbus::Connection,
    mut events: broadcast::Receiver<SessionEvent>,
) -> anyhow::Result<()> {
    let iface = conn
        .object_server()
        .interface::<_, KioskService>(OBJECT_PATH)
        .await?;
    loop {
        match events.recv().await {
            Ok(event) => {
                let emitter = iface.signal_emitter();
                let sent = match event {
                    SessionEvent::PresenceChanged { present } => {
                        KioskService::presence_changed(emitter, present).await
                    }
                    SessionEvent::IdentificationResult { outcome } => {
                        let payload = serde_json::to_string(&outcome)?;
                        KioskService::identification_result(emitter, &payload).await
                    }
                    SessionEvent::AttendanceCommitted { record } => {
                        let payload = serde_json::to_string(&record)?;
                        KioskService::attendance_committed(emitter, &payload).await
                    }
                    SessionEvent::Rejected { reason } => {
                        KioskService::rejected(emitter, &reason).await
                    }
                };
                if let Err(err) = sent {
                    tracing::warn!(error = %err, "signal emission failed");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event forwarder lagged behind the session");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    Ok(())
}

fn decode_sample(image_b64: &str, descriptor_json: &str) -> fdo::Result<CaptureSample> {
    let embedding = parse_descriptor(descriptor_json)?;
    let (frame, encoded) = if image_b64.is_empty() {
        (RgbFrame::default(), None)
    } else {
        (decode_image(image_b64)?, Some(image_b64.to_string()))
    };
    Ok(CaptureSample {
        frame,
        embedding,
        encoded,
    })
}

fn decode_image(image_b64: &str) -> fdo::Result<RgbFrame> {
    let bytes = BASE64
        .decode(image_b64)
        .map_err(|err| fdo::Error::InvalidArgs(format!("image is not valid base64: {err}")))?;
    RgbFrame::decode(&bytes)
        .map_err(|err| fdo::Error::InvalidArgs(format!("image does not decode: {err}")))
}

/// "" and "null" mean no descriptor; anything else must be a JSON float
/// array.
fn parse_descriptor(descriptor_json: &str) -> fdo::Result<Option<Embedding>> {
    let trimmed = descriptor_json.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(None);
    }
    let values: Vec<f32> = serde_json::from_str(trimmed).map_err(|err| {
        fdo::Error::InvalidArgs(format!("descriptor is not a JSON float array: {err}"))
    })?;
    Ok(Some(Embedding::new(values)))
}

fn to_fdo(err: SessionError) -> fdo::Error {
    match &err {
        SessionError::Gallery(_) => fdo::Error::InvalidArgs(err.to_string()),
        _ => fdo::Error::Failed(err.to_string()),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value)
        .map_err(|err| fdo::Error::Failed(format!("serialize reply: {err}")))
}
