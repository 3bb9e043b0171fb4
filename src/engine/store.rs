use std::collections::{BTreeMap, HashSet};

use chrono::{NaiveDate, NaiveTime};
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

type DayRecords = BTreeMap<NaiveTime, Vec<ReservationRecord>>;

/// In-memory projection of the WAL: records by (date, time) plus the
/// id → slot reverse index.
///
/// Map operations are individually atomic. Cross-call consistency for a
/// slot comes from holding that slot's turn, not from this type.
pub struct ReservationStore {
    days: DashMap<NaiveDate, DayRecords>,
    index: DashMap<Ulid, ReverseIndexEntry>,
}

impl Default for ReservationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReservationStore {
    pub fn new() -> Self {
        Self {
            days: DashMap::new(),
            index: DashMap::new(),
        }
    }

    // ── Slot reads ───────────────────────────────────────────

    pub fn records_at(&self, date: NaiveDate, time: NaiveTime) -> Vec<ReservationRecord> {
        self.days
            .get(&date)
            .and_then(|day| day.get(&time).cloned())
            .unwrap_or_default()
    }

    pub fn active_at(&self, date: NaiveDate, time: NaiveTime) -> Option<ReservationRecord> {
        self.days.get(&date).and_then(|day| {
            day.get(&time)
                .and_then(|records| records.iter().find(|r| r.is_active()).cloned())
        })
    }

    pub fn record_in_slot(&self, date: NaiveDate, time: NaiveTime, id: &Ulid) -> Option<ReservationRecord> {
        self.days.get(&date).and_then(|day| {
            day.get(&time)
                .and_then(|records| records.iter().find(|r| r.id == *id).cloned())
        })
    }

    pub fn slot_len(&self, date: NaiveDate, time: NaiveTime) -> usize {
        self.days
            .get(&date)
            .and_then(|day| day.get(&time).map(Vec::len))
            .unwrap_or(0)
    }

    /// Times on `date` holding an active reservation.
    pub fn reserved_times(&self, date: NaiveDate) -> HashSet<NaiveTime> {
        self.days
            .get(&date)
            .map(|day| {
                day.iter()
                    .filter(|(_, records)| records.iter().any(ReservationRecord::is_active))
                    .map(|(time, _)| *time)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn record_count(&self) -> usize {
        self.days
            .iter()
            .map(|day| day.values().map(Vec::len).sum::<usize>())
            .sum()
    }

    // ── Reverse index ────────────────────────────────────────

    pub fn index_get(&self, id: &Ulid) -> Option<ReverseIndexEntry> {
        self.index.get(id).map(|e| *e.value())
    }

    pub fn index_len(&self) -> usize {
        self.index.len()
    }

    // ── Event application ────────────────────────────────────

    pub fn apply(&self, event: &Event) {
        match event {
            Event::ReservationCreated { record } => {
                self.index.insert(record.id, record.index_entry());
                self.insert_record(record.clone());
            }
            Event::LegacyRecordImported { record } => {
                self.insert_record(record.clone());
            }
            Event::ReservationCanceled {
                id,
                date,
                time,
                canceled_at,
            } => {
                if let Some(mut day) = self.days.get_mut(date)
                    && let Some(records) = day.get_mut(time)
                    && let Some(record) = records.iter_mut().find(|r| r.id == *id)
                {
                    record.status = ReservationStatus::Canceled;
                    record.canceled_at = Some(*canceled_at);
                }
                if let Some(mut entry) = self.index.get_mut(id) {
                    entry.status = ReservationStatus::Canceled;
                }
            }
            Event::ReverseIndexRepaired { entry } => {
                self.index.insert(entry.id, *entry);
            }
        }
    }

    fn insert_record(&self, record: ReservationRecord) {
        let mut day = self.days.entry(record.date).or_default();
        let records = day.entry(record.time).or_default();
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }

    /// Minimal event list that rebuilds the current state. Records without
    /// an index entry stay index-less.
    pub fn snapshot(&self) -> Vec<Event> {
        let mut dates: Vec<NaiveDate> = self.days.iter().map(|e| *e.key()).collect();
        dates.sort_unstable();

        let mut events = Vec::new();
        for date in dates {
            let Some(day) = self.days.get(&date) else {
                continue;
            };
            for record in day.values().flatten() {
                match self.index.get(&record.id) {
                    Some(entry) if *entry.value() == record.index_entry() => {
                        events.push(Event::ReservationCreated { record: record.clone() });
                    }
                    Some(entry) => {
                        events.push(Event::LegacyRecordImported { record: record.clone() });
                        events.push(Event::ReverseIndexRepaired { entry: *entry.value() });
                    }
                    None => events.push(Event::LegacyRecordImported { record: record.clone() }),
                }
            }
        }
        events
    }
}
