use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::model::*;

use super::store::ReservationStore;
use super::EngineError;

/// The slot must not hold an active reservation.
pub(crate) fn check_slot_free(store: &ReservationStore, date: NaiveDate, time: NaiveTime) -> Result<(), EngineError> {
    match store.active_at(date, time) {
        Some(existing) => Err(EngineError::DuplicateSlot(existing.id)),
        None => Ok(()),
    }
}

/// Canceled history stays in the slot; bound how much of it piles up.
pub(crate) fn check_slot_room(store: &ReservationStore, date: NaiveDate, time: NaiveTime) -> Result<(), EngineError> {
    if store.slot_len(date, time) >= crate::limits::MAX_RECORDS_PER_SLOT {
        return Err(EngineError::LimitExceeded("too many records in slot"));
    }
    Ok(())
}

/// Find `id` in the slot and make sure it is still active.
pub(crate) fn check_cancelable(
    store: &ReservationStore,
    date: NaiveDate,
    time: NaiveTime,
    id: Ulid,
) -> Result<ReservationRecord, EngineError> {
    let record = store
        .record_in_slot(date, time, &id)
        .ok_or(EngineError::NotFound(id))?;
    if !record.is_active() {
        return Err(EngineError::AlreadyCanceled(id));
    }
    Ok(record)
}
