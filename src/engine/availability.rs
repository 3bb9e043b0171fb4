use std::collections::HashSet;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

use crate::model::*;
use crate::schedule::{BusinessCalendar, StaffShift};

use super::EngineError;

// ── Availability Algorithm ────────────────────────────────────────

/// Why a slot cannot be booked. Declaration order is reporting priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotReason {
    Reserved,
    Cutoff,
    Closed,
    Shift,
}

impl SlotReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotReason::Reserved => "reserved",
            SlotReason::Cutoff => "cutoff",
            SlotReason::Closed => "closed",
            SlotReason::Shift => "shift",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotAvailability {
    pub time: NaiveTime,
    pub available: bool,
    pub reason: Option<SlotReason>,
}

/// Whole minutes from `now` until the slot starts, in the operating timezone.
/// Sub-minute precision of `now` is dropped. Negative once the slot has begun.
pub fn lead_minutes(date: NaiveDate, time: NaiveTime, now: NaiveDateTime) -> i64 {
    let days = (date - now.date()).num_days();
    days * MINUTES_PER_DAY as i64 + minute_of_day(time) as i64 - minute_of_day(now.time()) as i64
}

/// A slot is inside the booking cutoff unless it starts strictly more than
/// `cutoff_minutes` after now.
pub fn within_cutoff(date: NaiveDate, time: NaiveTime, cutoff_minutes: u32, now: NaiveDateTime) -> bool {
    lead_minutes(date, time, now) <= cutoff_minutes as i64
}

/// Slot list for one day.
///
/// Each slot keeps only the first unavailability condition that fires, in
/// the order reserved > cutoff > closed > shift. A day closed outright
/// yields no slots at all.
pub fn compute_day_slots(
    date: NaiveDate,
    calendar: &BusinessCalendar,
    shift: Option<&StaffShift>,
    reserved: &HashSet<NaiveTime>,
    cutoff_minutes: u32,
    now: NaiveDateTime,
) -> Result<Vec<SlotAvailability>, EngineError> {
    calendar.validate().map_err(EngineError::InvalidSchedule)?;

    let Some(window) = calendar.day_window(date) else {
        return Ok(Vec::new());
    };
    let working = shift.map(|s| s.hours_on(date));

    let mut slots = Vec::new();
    for minute in calendar.grid(window.grid_start, window.grid_end) {
        let Some(time) = time_of_minute(minute) else {
            break;
        };

        let reason = if reserved.contains(&time) {
            Some(SlotReason::Reserved)
        } else if within_cutoff(date, time, cutoff_minutes, now) {
            Some(SlotReason::Cutoff)
        } else if !window.is_open_at(minute) {
            Some(SlotReason::Closed)
        } else if matches!(working, Some(hours) if !hours.is_some_and(|h| h.covers(minute))) {
            Some(SlotReason::Shift)
        } else {
            None
        };

        slots.push(SlotAvailability {
            time,
            available: reason.is_none(),
            reason,
        });
    }
    Ok(slots)
}
