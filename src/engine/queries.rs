use std::collections::HashSet;

use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::schedule::{BusinessCalendar, StaffShift};

use super::availability::{compute_day_slots, SlotAvailability};
use super::{Engine, EngineError};

impl Engine {
    pub fn reverse_lookup(&self, id: &Ulid) -> Option<ReverseIndexEntry> {
        self.store.index_get(id)
    }

    pub fn record_at(&self, date: NaiveDate, time: NaiveTime, id: &Ulid) -> Option<ReservationRecord> {
        self.store.record_in_slot(date, time, id)
    }

    pub fn reserved_times(&self, date: NaiveDate) -> HashSet<NaiveTime> {
        self.store.reserved_times(date)
    }

    /// Lock-free snapshot of one day's slots.
    pub fn day_slots(
        &self,
        date: NaiveDate,
        calendar: &BusinessCalendar,
        shift: Option<&StaffShift>,
        cutoff_minutes: u32,
        now: NaiveDateTime,
    ) -> Result<Vec<SlotAvailability>, EngineError> {
        let reserved = self.store.reserved_times(date);
        compute_day_slots(date, calendar, shift, &reserved, cutoff_minutes, now)
    }

    /// Fallback for records without an index entry: probe every slot the
    /// calendar could have produced on each day of `from..=to`.
    ///
    /// The window is clamped to `MAX_HEAL_WINDOW_DAYS`.
    pub fn scan_for(
        &self,
        id: &Ulid,
        calendar: &BusinessCalendar,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Option<ReservationRecord> {
        let span = (to - from).num_days().clamp(0, MAX_HEAL_WINDOW_DAYS);
        let mut date = from;
        for _ in 0..=span {
            for time in calendar.known_slot_times(date) {
                if let Some(record) = self.store.record_in_slot(date, time, id) {
                    return Some(record);
                }
            }
            date = date.checked_add_days(Days::new(1))?;
        }
        None
    }
}
