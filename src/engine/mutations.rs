use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use tracing::{debug, info};
use ulid::Ulid;

use crate::model::*;

use super::conflict::{check_cancelable, check_slot_free, check_slot_room};
use super::{Engine, EngineError};

/// Validated booking request, minus the id and timestamp the engine assigns.
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub customer_name: String,
    pub phone: Option<String>,
    pub staff_id: Option<String>,
}

impl Engine {
    /// Book the slot under its turn.
    ///
    /// Checked in order once the turn is held: no active record, then
    /// `recheck` (fresh-clock cutoff), then the slot history bound.
    pub async fn acquire_and_reserve<F>(
        self: &Arc<Self>,
        request: NewReservation,
        recheck: F,
    ) -> Result<ReservationRecord, EngineError>
    where
        F: FnOnce() -> Result<(), EngineError> + Send + 'static,
    {
        let key = self.slot_key(request.date, request.time);
        self.run_in_turn(key, move |engine| async move {
            check_slot_free(&engine.store, request.date, request.time)?;
            recheck()?;
            check_slot_room(&engine.store, request.date, request.time)?;

            let record = ReservationRecord {
                id: Ulid::new(),
                date: request.date,
                time: request.time,
                customer_name: request.customer_name,
                phone: request.phone,
                staff_id: request.staff_id,
                status: ReservationStatus::Active,
                created_at: engine.clock.now(),
                canceled_at: None,
            };
            engine
                .persist_and_apply(Event::ReservationCreated { record: record.clone() })
                .await?;
            info!(tenant = engine.tenant(), id = %record.id, date = %record.date, time = %record.time.format("%H:%M"), "reservation created");
            Ok(record)
        })
        .await
    }

    /// Cancel `id` in the given slot under its turn. Returns the canceled record.
    pub async fn acquire_and_cancel<F>(
        self: &Arc<Self>,
        date: NaiveDate,
        time: NaiveTime,
        id: Ulid,
        recheck: F,
    ) -> Result<ReservationRecord, EngineError>
    where
        F: FnOnce() -> Result<(), EngineError> + Send + 'static,
    {
        let key = self.slot_key(date, time);
        self.run_in_turn(key, move |engine| async move {
            let mut record = check_cancelable(&engine.store, date, time, id)?;
            recheck()?;

            let canceled_at = engine.clock.now();
            engine
                .persist_and_apply(Event::ReservationCanceled {
                    id,
                    date,
                    time,
                    canceled_at,
                })
                .await?;
            record.status = ReservationStatus::Canceled;
            record.canceled_at = Some(canceled_at);
            info!(tenant = engine.tenant(), id = %id, date = %date, time = %time.format("%H:%M"), "reservation canceled");
            Ok(record)
        })
        .await
    }

    /// Rebuild the reverse-index entry for a record found by the fallback scan.
    ///
    /// Returns `None` if the record is no longer in the slot. An entry written
    /// meanwhile by another caller is returned as-is.
    pub async fn repair_index(
        self: &Arc<Self>,
        date: NaiveDate,
        time: NaiveTime,
        id: Ulid,
    ) -> Result<Option<ReverseIndexEntry>, EngineError> {
        let key = self.slot_key(date, time);
        self.run_in_turn(key, move |engine| async move {
            if let Some(existing) = engine.store.index_get(&id) {
                return Ok(Some(existing));
            }
            let Some(record) = engine.store.record_in_slot(date, time, &id) else {
                return Ok(None);
            };
            let entry = record.index_entry();
            engine
                .persist_and_apply(Event::ReverseIndexRepaired { entry })
                .await?;
            metrics::counter!(crate::observability::INDEX_REPAIRS_TOTAL).increment(1);
            debug!(tenant = engine.tenant(), id = %id, "reverse index repaired");
            Ok(Some(entry))
        })
        .await
    }

    /// Load a record that predates the reverse index, leaving it index-less.
    pub async fn import_legacy(self: &Arc<Self>, record: ReservationRecord) -> Result<(), EngineError> {
        let key = self.slot_key(record.date, record.time);
        self.run_in_turn(key, move |engine| async move {
            if engine.store.record_in_slot(record.date, record.time, &record.id).is_none() {
                if record.is_active() {
                    check_slot_free(&engine.store, record.date, record.time)?;
                }
                check_slot_room(&engine.store, record.date, record.time)?;
            }
            engine
                .persist_and_apply(Event::LegacyRecordImported { record })
                .await
        })
        .await
    }
}
