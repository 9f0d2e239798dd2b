//! Attendance authorization rules: shift time windows and duplicate checks.
//!
//! These are pure decisions over wall-clock time and today's committed
//! records; the session supplies both.

use chrono::{DateTime, Local, NaiveTime};
use serde::Serialize;
use thiserror::Error;

use crate::types::{AttendanceRecord, Direction, Shift};

fn wall_time(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).expect("valid wall-clock time")
}

/// Half-open local-time window: start inclusive, end exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        t >= self.start && t < self.end
    }
}

/// Per-shift clock windows. Morning and afternoon overlap across midday
/// so both shifts can clock around noon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftWindows {
    pub morning: TimeWindow,
    pub afternoon: TimeWindow,
}

impl Default for ShiftWindows {
    fn default() -> Self {
        Self {
            morning: TimeWindow::new(wall_time(6, 0), wall_time(13, 0)),
            afternoon: TimeWindow::new(wall_time(12, 0), wall_time(22, 0)),
        }
    }
}

impl ShiftWindows {
    pub fn window(&self, shift: Shift) -> TimeWindow {
        match shift {
            Shift::Morning => self.morning,
            Shift::Afternoon => self.afternoon,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthorizeError {
    #[error("{shift} attendance is only available between {start} and {end} (current time {now})")]
    OutsideWindow {
        shift: Shift,
        start: NaiveTime,
        end: NaiveTime,
        now: NaiveTime,
    },
    #[error("already clocked in for the {shift} shift today at {at}")]
    AlreadyClockedIn { shift: Shift, at: DateTime<Local> },
    #[error("no {shift} clock-in today; clock in before clocking out")]
    OutBeforeIn { shift: Shift },
    #[error("already clocked out for the {shift} shift today at {at}")]
    AlreadyClockedOut { shift: Shift, at: DateTime<Local> },
}

/// Reject mode selection outside the shift's window.
pub fn check_window(
    windows: &ShiftWindows,
    shift: Shift,
    now: NaiveTime,
) -> Result<(), AuthorizeError> {
    let window = windows.window(shift);
    if window.contains(now) {
        Ok(())
    } else {
        Err(AuthorizeError::OutsideWindow {
            shift,
            start: window.start,
            end: window.end,
            now,
        })
    }
}

/// Duplicate and ordering rules over one enrollee's records for today.
///
/// Clock-in requires no prior clock-in for the shift; clock-out requires
/// a prior clock-in and no prior clock-out. Shifts are independent.
pub fn check_duplicates(
    records: &[AttendanceRecord],
    shift: Shift,
    direction: Direction,
) -> Result<(), AuthorizeError> {
    match direction {
        Direction::In => {
            if let Some(existing) = records
                .iter()
                .find(|r| r.shift == shift && r.direction == Direction::In)
            {
                return Err(AuthorizeError::AlreadyClockedIn {
                    shift,
                    at: existing.timestamp,
                });
            }
        }
        Direction::Out => {
            if !records
                .iter()
                .any(|r| r.shift == shift && r.direction == Direction::In)
            {
                return Err(AuthorizeError::OutBeforeIn { shift });
            }
            if let Some(existing) = records
                .iter()
                .find(|r| r.shift == shift && r.direction == Direction::Out)
            {
                return Err(AuthorizeError::AlreadyClockedOut {
                    shift,
                    at: existing.timestamp,
                });
            }
        }
    }
    Ok(())
}

/// Kiosk session phase.
///
/// One identification attempt is in flight from `Identifying` through
/// `Committing`; every phase can reach `Idle` through cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    ModeSelected,
    AwaitingPresence,
    Identifying,
    Verifying,
    Committing,
    Complete,
    Rejected,
}

/// Shift and direction chosen for the current attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModeSelection {
    pub shift: Shift,
    pub direction: Direction,
}
