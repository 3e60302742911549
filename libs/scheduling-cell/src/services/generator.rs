// libs/scheduling-cell/src/services/generator.rs
use chrono::{NaiveTime, Timelike};

/// Clinic opening hours used when a generation request does not name a
/// window.
pub fn default_business_hours() -> (NaiveTime, NaiveTime) {
    (
        NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
    )
}

/// One candidate window produced by the generator. Half-open: a slot
/// ending at 10:00 does not collide with one starting at 10:00.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

pub struct SlotGenerator;

impl SlotGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Walk the window emitting back-to-back slots of `duration_minutes`.
    /// A trailing partial window is dropped; no slot ever crosses the
    /// window end.
    pub fn generate_windows(
        &self,
        window_start: NaiveTime,
        window_end: NaiveTime,
        duration_minutes: i64,
    ) -> Vec<SlotWindow> {
        let mut windows = Vec::new();

        if duration_minutes <= 0 || window_end <= window_start {
            return windows;
        }

        let step = (duration_minutes * 60) as u32;
        let mut cursor = window_start.num_seconds_from_midnight();
        let end = window_end.num_seconds_from_midnight();

        while cursor + step <= end {
            let start = NaiveTime::from_num_seconds_from_midnight_opt(cursor, 0).unwrap();
            let slot_end = NaiveTime::from_num_seconds_from_midnight_opt(cursor + step, 0).unwrap();
            windows.push(SlotWindow { start, end: slot_end });
            cursor += step;
        }

        windows
    }
}

impl Default for SlotGenerator {
    fn default() -> Self {
        Self::new()
    }
}
