//! clockface-core — face-identification attendance engine.
//!
//! Matches capture samples against a gallery of enrolled descriptor
//! templates (Euclidean nearest neighbor with per-angle slot precedence),
//! falls back to a raw-pixel comparator when a capture has no descriptor,
//! tracks face presence with a debounced region heuristic, and enforces
//! the shift-window and duplicate rules that authorize a clock event.

pub mod authorize;
pub mod collaborators;
pub mod fallback;
pub mod frame;
pub mod gallery;
pub mod matcher;
pub mod presence;
pub mod types;

pub use authorize::{ModeSelection, SessionPhase, ShiftWindows, TimeWindow};
pub use collaborators::{DescriptorExtractor, NullExtractor, Store};
pub use frame::RgbFrame;
pub use gallery::{Gallery, GalleryError};
pub use matcher::DescriptorMatcher;
pub use presence::PresenceDetector;
pub use types::{
    AttendanceRecord, CaptureSample, Direction, Embedding, Enrollee, MatchPath, MatchResult,
    Shift, SlotName, DESCRIPTOR_DIM,
};
