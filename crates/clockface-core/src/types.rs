use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::frame::RgbFrame;

/// Default descriptor dimensionality (128 for the deployed extraction model).
pub const DESCRIPTOR_DIM: usize = 128;

/// Face descriptor vector produced by the extraction collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance between two descriptors.
    ///
    /// Returns `None` when dimensions disagree; vectors of mismatched
    /// length are never compared.
    pub fn distance(&self, other: &Embedding) -> Option<f32> {
        if self.values.len() != other.values.len() {
            return None;
        }
        let sum: f32 = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum();
        Some(sum.sqrt())
    }
}

/// Named descriptor slot: the capture angle a template was enrolled under.
///
/// `Legacy` holds a single-pose template from older enrollments and is
/// only consulted by the matcher when no angled slot comes reasonably
/// close (see [`crate::matcher`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotName {
    Legacy,
    Front,
    Left,
    Right,
    Tilt,
}

impl SlotName {
    /// Angled slots in matcher evaluation order.
    pub const ANGLED: [SlotName; 4] = [
        SlotName::Front,
        SlotName::Left,
        SlotName::Right,
        SlotName::Tilt,
    ];

    /// Every slot in canonical storage order.
    pub const ALL: [SlotName; 5] = [
        SlotName::Legacy,
        SlotName::Front,
        SlotName::Left,
        SlotName::Right,
        SlotName::Tilt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SlotName::Legacy => "legacy",
            SlotName::Front => "front",
            SlotName::Left => "left",
            SlotName::Right => "right",
            SlotName::Tilt => "tilt",
        }
    }

    pub fn from_name(name: &str) -> Option<SlotName> {
        match name {
            "legacy" => Some(SlotName::Legacy),
            "front" => Some(SlotName::Front),
            "left" => Some(SlotName::Left),
            "right" => Some(SlotName::Right),
            "tilt" => Some(SlotName::Tilt),
            _ => None,
        }
    }
}

impl std::fmt::Display for SlotName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work shift a clock event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Shift {
    Morning,
    Afternoon,
}

impl Shift {
    pub fn as_str(&self) -> &'static str {
        match self {
            Shift::Morning => "Morning",
            Shift::Afternoon => "Afternoon",
        }
    }

    pub fn from_name(name: &str) -> Option<Shift> {
        match name {
            "Morning" => Some(Shift::Morning),
            "Afternoon" => Some(Shift::Afternoon),
            _ => None,
        }
    }
}

impl std::fmt::Display for Shift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clock direction: into or out of a shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "In",
            Direction::Out => "Out",
        }
    }

    pub fn from_name(name: &str) -> Option<Direction> {
        match name {
            "In" => Some(Direction::In),
            "Out" => Some(Direction::Out),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One descriptor storage slot: an optional template vector plus an
/// optional reference image (packed RGB bytes, used only by the
/// fallback comparator).
#[derive(Debug, Clone, Default)]
pub struct DescriptorSlot {
    pub embedding: Option<Embedding>,
    pub reference_image: Option<Vec<u8>>,
}

impl DescriptorSlot {
    pub fn is_empty(&self) -> bool {
        self.embedding.is_none() && self.reference_image.is_none()
    }
}

/// Fixed per-enrollee slot record, one slot per capture angle.
#[derive(Debug, Clone, Default)]
pub struct SlotSet {
    pub legacy: DescriptorSlot,
    pub front: DescriptorSlot,
    pub left: DescriptorSlot,
    pub right: DescriptorSlot,
    pub tilt: DescriptorSlot,
}

impl SlotSet {
    pub fn get(&self, name: SlotName) -> &DescriptorSlot {
        match name {
            SlotName::Legacy => &self.legacy,
            SlotName::Front => &self.front,
            SlotName::Left => &self.left,
            SlotName::Right => &self.right,
            SlotName::Tilt => &self.tilt,
        }
    }

    pub fn get_mut(&mut self, name: SlotName) -> &mut DescriptorSlot {
        match name {
            SlotName::Legacy => &mut self.legacy,
            SlotName::Front => &mut self.front,
            SlotName::Left => &mut self.left,
            SlotName::Right => &mut self.right,
            SlotName::Tilt => &mut self.tilt,
        }
    }

    /// Iterate slots in canonical storage order.
    pub fn iter(&self) -> impl Iterator<Item = (SlotName, &DescriptorSlot)> {
        SlotName::ALL.iter().map(move |&name| (name, self.get(name)))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().all(|(_, slot)| slot.is_empty())
    }
}

/// An enrolled person with their descriptor templates.
#[derive(Debug, Clone)]
pub struct Enrollee {
    pub id: String,
    pub display_name: String,
    pub slots: SlotSet,
}

impl Enrollee {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            slots: SlotSet::default(),
        }
    }
}

/// Payload of a single identification attempt. Ephemeral; never persisted
/// except as the reference image of a committed record.
#[derive(Debug, Clone)]
pub struct CaptureSample {
    /// Decoded capture frame.
    pub frame: RgbFrame,
    /// Descriptor extracted by the capture client, if extraction succeeded.
    pub embedding: Option<Embedding>,
    /// Original encoded image, base64 without a data-URI prefix.
    pub encoded: Option<String>,
}

/// Which engine produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPath {
    Descriptor,
    FallbackImage,
}

/// Outcome of matching one capture sample against the gallery.
///
/// An unaccepted result is not an error: it carries the best-effort
/// distance and similarity for near-miss feedback, but never the
/// candidate's identity.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub accepted: bool,
    pub enrollee_id: Option<String>,
    pub slot: Option<SlotName>,
    /// Metric distance on the descriptor path; `1 - similarity` on the
    /// fallback path, where it is not a true metric.
    pub distance: f32,
    pub similarity: f32,
    pub path: MatchPath,
}

impl MatchResult {
    pub fn none(path: MatchPath) -> Self {
        Self {
            accepted: false,
            enrollee_id: None,
            slot: None,
            distance: 1.0,
            similarity: 0.0,
            path,
        }
    }
}

/// Committed clock event. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub enrollee_id: String,
    pub shift: Shift,
    pub direction: Direction,
    /// RFC 3339 with local offset.
    pub timestamp: DateTime<Local>,
    pub verified: bool,
    /// Base64 capture image, no data-URI prefix.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_image: Option<String>,
}
