//! Contracts for the persistence and descriptor-extraction collaborators.

use std::future::Future;

use chrono::NaiveDate;

use crate::frame::RgbFrame;
use crate::types::{AttendanceRecord, Embedding, Enrollee, SlotName};

/// Persistence operations the session depends on.
///
/// The session never issues raw queries; everything it needs from
/// storage goes through these five operations.
pub trait Store: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Committed records for one enrollee on the kiosk-local date.
    fn find_today_records(
        &self,
        enrollee_id: &str,
        date: NaiveDate,
    ) -> impl Future<Output = Result<Vec<AttendanceRecord>, Self::Error>> + Send;

    /// Persist one record and return its id. Records are never updated.
    fn commit_attendance(
        &self,
        record: &AttendanceRecord,
    ) -> impl Future<Output = Result<String, Self::Error>> + Send;

    fn find_enrollee(
        &self,
        enrollee_id: &str,
    ) -> impl Future<Output = Result<Option<Enrollee>, Self::Error>> + Send;

    /// Every enrollee holding at least one stored descriptor vector, in
    /// enrollment order.
    fn list_enrollees_with_descriptors(
        &self,
    ) -> impl Future<Output = Result<Vec<Enrollee>, Self::Error>> + Send;

    /// Create or replace one descriptor slot, creating the enrollee when
    /// unknown. `image_b64` is the encoded reference image without a
    /// data-URI prefix.
    fn upsert_enrollee_slot(
        &self,
        enrollee_id: &str,
        display_name: &str,
        slot: SlotName,
        embedding: Option<&Embedding>,
        image_b64: Option<&str>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Local descriptor extraction from a capture frame.
///
/// `None` means no usable face, not an error.
pub trait DescriptorExtractor: Send + Sync {
    fn extract(&self, frame: &RgbFrame) -> Option<Embedding>;
}

/// Extraction disabled: descriptors must arrive with the capture sample,
/// as in deployments where the capture client runs the extraction model.
#[derive(Debug, Default)]
pub struct NullExtractor;

impl DescriptorExtractor for NullExtractor {
    fn extract(&self, _frame: &RgbFrame) -> Option<Embedding> {
        None
    }
}
