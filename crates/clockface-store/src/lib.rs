//! clockface-store — SQLite persistence for the attendance kiosk.
//!
//! Three tables: enrollees, their descriptor slots, and the attendance
//! ledger. Descriptor vectors are sealed with AES-256-GCM before they
//! touch disk; reference images and attendance rows are stored plain.
//! Attendance rows are insert-only.

mod crypto;

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Local, NaiveDate};
use rusqlite::{params, OptionalExtension};
use thiserror::Error;
use tokio_rusqlite::Connection;

use clockface_core::collaborators::Store;
use clockface_core::types::{
    AttendanceRecord, Direction, Embedding, Enrollee, Shift, SlotName,
};
use clockface_core::RgbFrame;

pub use crypto::DescriptorCipher;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS enrollees (
    id           TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS descriptor_slots (
    enrollee_id     TEXT NOT NULL REFERENCES enrollees(id) ON DELETE CASCADE,
    slot            TEXT NOT NULL,
    descriptor      BLOB,
    reference_image TEXT,
    updated_at      TEXT NOT NULL,
    PRIMARY KEY (enrollee_id, slot)
);
CREATE TABLE IF NOT EXISTS attendance (
    id              TEXT PRIMARY KEY,
    enrollee_id     TEXT NOT NULL REFERENCES enrollees(id),
    shift           TEXT NOT NULL,
    direction       TEXT NOT NULL,
    timestamp       TEXT NOT NULL,
    verified        INTEGER NOT NULL,
    reference_image TEXT
);
CREATE INDEX IF NOT EXISTS idx_attendance_enrollee_day
    ON attendance (enrollee_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_slots_enrollee
    ON descriptor_slots (enrollee_id);
";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("key file {path}: {source}")]
    KeyFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("descriptor cipher failure")]
    Cipher,
    #[error("invalid stored value: {0}")]
    Invalid(String),
}

struct SlotRow {
    slot: String,
    descriptor: Option<Vec<u8>>,
    reference_image: Option<String>,
}

struct EnrolleeRows {
    id: String,
    display_name: String,
    slots: Vec<SlotRow>,
}

struct RecordRow {
    id: String,
    enrollee_id: String,
    shift: String,
    direction: String,
    timestamp: String,
    verified: bool,
    reference_image: Option<String>,
}

impl RecordRow {
    fn into_record(self) -> Result<AttendanceRecord, StoreError> {
        let shift = Shift::from_name(&self.shift)
            .ok_or_else(|| StoreError::Invalid(format!("shift '{}'", self.shift)))?;
        let direction = Direction::from_name(&self.direction)
            .ok_or_else(|| StoreError::Invalid(format!("direction '{}'", self.direction)))?;
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| StoreError::Invalid(format!("timestamp '{}': {e}", self.timestamp)))?
            .with_timezone(&Local);
        Ok(AttendanceRecord {
            id: self.id,
            enrollee_id: self.enrollee_id,
            shift,
            direction,
            timestamp,
            verified: self.verified,
            reference_image: self.reference_image,
        })
    }
}

/// SQLite-backed store. Cheap to clone; all clones share one background
/// connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Connection,
    cipher: DescriptorCipher,
}

impl SqliteStore {
    /// Open (or create) the database and the descriptor key file.
    pub async fn open(db_path: &Path, key_path: &Path) -> Result<Self, StoreError> {
        let cipher = DescriptorCipher::from_key_file(key_path)?;
        let conn = Connection::open(db_path).await?;
        let store = Self { conn, cipher };
        store.initialize().await?;
        Ok(store)
    }

    /// In-memory store with a random key.
    pub async fn in_memory() -> Result<Self, StoreError> {
        use rand::RngCore;
        let mut secret = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut secret);
        let store = Self {
            conn: Connection::open_in_memory().await?,
            cipher: DescriptorCipher::from_secret(&secret),
        };
        store.initialize().await?;
        Ok(store)
    }

    async fn initialize(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                // journal_mode and busy_timeout report their value back,
                // which in-memory databases turn into a benign error.
                let _ = conn.pragma_update(None, "journal_mode", "WAL");
                let _ = conn.pragma_update(None, "synchronous", "NORMAL");
                let _ = conn.pragma_update(None, "busy_timeout", "5000");
                let _ = conn.pragma_update(None, "foreign_keys", "ON");
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Every record committed on `date`, across all enrollees.
    pub async fn list_today(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, StoreError> {
        let prefix = date.format("%Y-%m-%d").to_string();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, enrollee_id, shift, direction, timestamp, verified, reference_image
                     FROM attendance
                     WHERE substr(timestamp, 1, 10) = ?1
                     ORDER BY timestamp",
                )?;
                let rows = stmt
                    .query_map(params![prefix], record_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(RecordRow::into_record).collect()
    }

    fn seal_embedding(&self, embedding: &Embedding) -> Result<Vec<u8>, StoreError> {
        let json = serde_json::to_vec(&embedding.values)
            .map_err(|e| StoreError::Invalid(format!("descriptor not serializable: {e}")))?;
        self.cipher.seal(&json)
    }

    /// Turn raw rows into an [`Enrollee`]. Undecodable slots degrade to
    /// absent rather than failing the whole load.
    fn decode_enrollee(&self, rows: EnrolleeRows) -> Enrollee {
        let mut enrollee = Enrollee::new(rows.id, rows.display_name);
        for row in rows.slots {
            let Some(slot) = SlotName::from_name(&row.slot) else {
                tracing::warn!(enrollee = %enrollee.id, slot = %row.slot, "unknown slot name, ignoring");
                continue;
            };
            let embedding = row.descriptor.and_then(|sealed| {
                match self.cipher.open(&sealed) {
                    Ok(plain) => match serde_json::from_slice::<Vec<f32>>(&plain) {
                        Ok(values) => Some(Embedding::new(values)),
                        Err(err) => {
                            tracing::warn!(enrollee = %enrollee.id, %slot, error = %err, "stored descriptor is not valid JSON, ignoring");
                            None
                        }
                    },
                    Err(_) => {
                        tracing::warn!(enrollee = %enrollee.id, %slot, "cannot unseal stored descriptor, ignoring");
                        None
                    }
                }
            });
            let reference_image = row
                .reference_image
                .as_deref()
                .and_then(|b64| decode_reference_image(b64, &enrollee.id, slot));
            let target = enrollee.slots.get_mut(slot);
            target.embedding = embedding;
            target.reference_image = reference_image;
        }
        enrollee
    }
}

fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordRow> {
    Ok(RecordRow {
        id: row.get(0)?,
        enrollee_id: row.get(1)?,
        shift: row.get(2)?,
        direction: row.get(3)?,
        timestamp: row.get(4)?,
        verified: row.get(5)?,
        reference_image: row.get(6)?,
    })
}

/// Base64 then image decode, to packed RGB. Failures degrade to absent.
fn decode_reference_image(b64: &str, enrollee_id: &str, slot: SlotName) -> Option<Vec<u8>> {
    let bytes = match BASE64.decode(b64) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(enrollee = %enrollee_id, %slot, error = %err, "reference image is not valid base64, ignoring");
            return None;
        }
    };
    match RgbFrame::decode(&bytes) {
        Ok(frame) => Some(frame.data),
        Err(err) => {
            tracing::warn!(enrollee = %enrollee_id, %slot, error = %err, "reference image does not decode, ignoring");
            None
        }
    }
}

impl Store for SqliteStore {
    type Error = StoreError;

    async fn find_today_records(
        &self,
        enrollee_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let enrollee_id = enrollee_id.to_string();
        let prefix = date.format("%Y-%m-%d").to_string();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, enrollee_id, shift, direction, timestamp, verified, reference_image
                     FROM attendance
                     WHERE enrollee_id = ?1 AND substr(timestamp, 1, 10) = ?2
                     ORDER BY timestamp",
                )?;
                let rows = stmt
                    .query_map(params![enrollee_id, prefix], record_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(RecordRow::into_record).collect()
    }

    async fn commit_attendance(&self, record: &AttendanceRecord) -> Result<String, StoreError> {
        let id = record.id.clone();
        let row = (
            record.id.clone(),
            record.enrollee_id.clone(),
            record.shift.as_str(),
            record.direction.as_str(),
            record.timestamp.to_rfc3339(),
            record.verified,
            record.reference_image.clone(),
        );
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO attendance
                         (id, enrollee_id, shift, direction, timestamp, verified, reference_image)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![row.0, row.1, row.2, row.3, row.4, row.5, row.6],
                )?;
                Ok(())
            })
            .await?;
        Ok(id)
    }

    async fn find_enrollee(&self, enrollee_id: &str) -> Result<Option<Enrollee>, StoreError> {
        let id = enrollee_id.to_string();
        let rows = self
            .conn
            .call(move |conn| {
                let header: Option<(String, String)> = conn
                    .query_row(
                        "SELECT id, display_name FROM enrollees WHERE id = ?1",
                        params![id],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                let Some((id, display_name)) = header else {
                    return Ok(None);
                };
                let mut stmt = conn.prepare(
                    "SELECT slot, descriptor, reference_image
                     FROM descriptor_slots WHERE enrollee_id = ?1",
                )?;
                let slots = stmt
                    .query_map(params![id], |row| {
                        Ok(SlotRow {
                            slot: row.get(0)?,
                            descriptor: row.get(1)?,
                            reference_image: row.get(2)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(Some(EnrolleeRows {
                    id,
                    display_name,
                    slots,
                }))
            })
            .await?;
        Ok(rows.map(|rows| self.decode_enrollee(rows)))
    }

    async fn list_enrollees_with_descriptors(&self) -> Result<Vec<Enrollee>, StoreError> {
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT e.id, e.display_name, s.slot, s.descriptor, s.reference_image
                     FROM enrollees e
                     JOIN descriptor_slots s ON s.enrollee_id = e.id
                     WHERE e.id IN
                         (SELECT enrollee_id FROM descriptor_slots WHERE descriptor IS NOT NULL)
                     ORDER BY e.rowid, s.rowid",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            SlotRow {
                                slot: row.get(2)?,
                                descriptor: row.get(3)?,
                                reference_image: row.get(4)?,
                            },
                        ))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        // Rows arrive grouped by enrollee in enrollment order.
        let mut grouped: Vec<EnrolleeRows> = Vec::new();
        for (id, display_name, slot) in rows {
            match grouped.last_mut() {
                Some(last) if last.id == id => last.slots.push(slot),
                _ => grouped.push(EnrolleeRows {
                    id,
                    display_name,
                    slots: vec![slot],
                }),
            }
        }
        Ok(grouped
            .into_iter()
            .map(|rows| self.decode_enrollee(rows))
            .collect())
    }

    async fn upsert_enrollee_slot(
        &self,
        enrollee_id: &str,
        display_name: &str,
        slot: SlotName,
        embedding: Option<&Embedding>,
        image_b64: Option<&str>,
    ) -> Result<(), StoreError> {
        let sealed = embedding.map(|e| self.seal_embedding(e)).transpose()?;
        let now = Local::now().to_rfc3339();
        let id = enrollee_id.to_string();
        let name = display_name.to_string();
        let slot = slot.as_str();
        let image = image_b64.map(str::to_string);
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                // An empty display name keeps the one already stored.
                tx.execute(
                    "INSERT INTO enrollees (id, display_name, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?3)
                     ON CONFLICT(id) DO UPDATE SET
                         display_name = CASE
                             WHEN excluded.display_name != '' THEN excluded.display_name
                             ELSE display_name
                         END,
                         updated_at = excluded.updated_at",
                    params![id, name, now],
                )?;
                tx.execute(
                    "INSERT INTO descriptor_slots
                         (enrollee_id, slot, descriptor, reference_image, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(enrollee_id, slot) DO UPDATE SET
                         descriptor = excluded.descriptor,
                         reference_image = excluded.reference_image,
                         updated_at = excluded.updated_at",
                    params![id, slot, sealed, image, now],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}
