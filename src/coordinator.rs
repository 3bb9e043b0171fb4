use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate, NaiveTime};
use chrono_tz::Tz;
use tracing::{debug, error};
use ulid::Ulid;

use crate::clock::Clock;
use crate::engine::{compute_day_slots, lead_minutes, within_cutoff, Engine, EngineError, NewReservation, SlotAvailability};
use crate::limits::*;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability::record_request;
use crate::schedule::{CalendarSource, StaffShift, TenantCalendar};
use crate::tenant::{TenantError, TenantManager};

/// Machine-readable conflict outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictCode {
    DuplicateSlot,
    AlreadyCanceled,
    CutoffPassed,
}

impl ConflictCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictCode::DuplicateSlot => "duplicate_slot",
            ConflictCode::AlreadyCanceled => "already_canceled",
            ConflictCode::CutoffPassed => "cutoff_passed",
        }
    }

    /// Text a booking UI can show as-is.
    pub fn message(&self) -> &'static str {
        match self {
            ConflictCode::DuplicateSlot => "That time just became unavailable. Please pick another time.",
            ConflictCode::AlreadyCanceled => "This reservation has already been canceled.",
            ConflictCode::CutoffPassed => "It is too close to the appointment time to make this change.",
        }
    }
}

#[derive(Debug)]
pub enum BookingError {
    Validation(String),
    Conflict(ConflictCode),
    NotFound(Ulid),
    /// The caller stopped waiting. The operation itself still completes.
    Timeout,
    /// The service cannot take this request now (tenant limit reached).
    Unavailable(String),
    Internal(String),
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::Validation(msg) => write!(f, "validation error: {msg}"),
            BookingError::Conflict(code) => write!(f, "conflict: {}", code.as_str()),
            BookingError::NotFound(id) => write!(f, "reservation not found: {id}"),
            BookingError::Timeout => write!(f, "timed out waiting for the slot"),
            BookingError::Unavailable(msg) => write!(f, "unavailable: {msg}"),
            BookingError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for BookingError {}

impl From<EngineError> for BookingError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotFound(id) => BookingError::NotFound(id),
            EngineError::DuplicateSlot(_) => BookingError::Conflict(ConflictCode::DuplicateSlot),
            EngineError::AlreadyCanceled(_) => BookingError::Conflict(ConflictCode::AlreadyCanceled),
            EngineError::CutoffPassed => BookingError::Conflict(ConflictCode::CutoffPassed),
            EngineError::InvalidSchedule(msg) => BookingError::Validation(format!("invalid schedule: {msg}")),
            EngineError::LimitExceeded(msg) => BookingError::Validation(msg.to_string()),
            EngineError::WalError(msg) | EngineError::Internal(msg) => BookingError::Internal(msg),
        }
    }
}

/// Input to `reserve`. Dates and times are already parsed; text fields are
/// checked here.
#[derive(Debug, Clone)]
pub struct ReserveRequest {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub customer_name: String,
    pub phone: Option<String>,
    pub staff_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub timezone: Tz,
    pub request_timeout: Duration,
    pub heal_past_days: u32,
    pub heal_future_days: u32,
    pub default_recipient: String,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::Asia::Tokyo,
            request_timeout: Duration::from_secs(5),
            heal_past_days: 30,
            heal_future_days: 90,
            default_recipient: "owner".into(),
        }
    }
}

/// Boundary operations: list a day's slots, reserve, cancel.
pub struct ReservationCoordinator {
    tenants: Arc<TenantManager>,
    calendars: Arc<dyn CalendarSource>,
    notify: Arc<NotifyHub>,
    clock: Arc<dyn Clock>,
    settings: CoordinatorSettings,
}

impl ReservationCoordinator {
    pub fn new(
        tenants: Arc<TenantManager>,
        calendars: Arc<dyn CalendarSource>,
        notify: Arc<NotifyHub>,
        clock: Arc<dyn Clock>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            tenants,
            calendars,
            notify,
            clock,
            settings,
        }
    }

    pub fn notify_hub(&self) -> &NotifyHub {
        &self.notify
    }

    pub async fn day_slots(
        &self,
        tenant: &str,
        date: NaiveDate,
        staff_id: Option<&str>,
    ) -> Result<Vec<SlotAvailability>, BookingError> {
        let started = Instant::now();
        let result = self.day_slots_inner(tenant, date, staff_id).await;
        record_request("day_slots", started, &result);
        result
    }

    async fn day_slots_inner(
        &self,
        tenant: &str,
        date: NaiveDate,
        staff_id: Option<&str>,
    ) -> Result<Vec<SlotAvailability>, BookingError> {
        let schedule = self.schedule(tenant).await?;
        let shift = self.shift(tenant, staff_id).await?;
        let now = self.clock.local_now(self.settings.timezone);
        let cutoff = schedule.policy.booking_cutoff_minutes;
        // Reads never create a tenant; no engine means nothing is booked.
        let slots = match self.existing_engine(tenant)? {
            Some(engine) => engine.day_slots(date, &schedule.calendar, shift.as_ref(), cutoff, now)?,
            None => compute_day_slots(date, &schedule.calendar, shift.as_ref(), &HashSet::new(), cutoff, now)?,
        };
        Ok(slots)
    }

    pub async fn reserve(&self, tenant: &str, request: ReserveRequest) -> Result<ReservationRecord, BookingError> {
        let started = Instant::now();
        let result = self.reserve_inner(tenant, request).await;
        record_request("reserve", started, &result);
        if let Err(ref e) = result {
            self.log_failure("reserve", tenant, e);
        }
        result
    }

    async fn reserve_inner(&self, tenant: &str, request: ReserveRequest) -> Result<ReservationRecord, BookingError> {
        let request = normalize(request)?;
        let schedule = self.schedule(tenant).await?;
        let shift = self.shift(tenant, request.staff_id.as_deref()).await?;
        check_bookable(&schedule, shift.as_ref(), request.date, request.time)?;
        let engine = self.tenants.get_or_create(tenant).map_err(|e| tenant_error(tenant, e))?;

        let recheck = {
            let clock = self.clock.clone();
            let tz = self.settings.timezone;
            let cutoff = schedule.policy.booking_cutoff_minutes;
            let (date, time) = (request.date, request.time);
            move || {
                if within_cutoff(date, time, cutoff, clock.local_now(tz)) {
                    Err(EngineError::CutoffPassed)
                } else {
                    Ok(())
                }
            }
        };
        let new = NewReservation {
            date: request.date,
            time: request.time,
            customer_name: request.customer_name,
            phone: request.phone,
            staff_id: request.staff_id,
        };
        let record = self.within_deadline(engine.acquire_and_reserve(new, recheck)).await?;

        self.notify.dispatch(
            format!(
                "reservation {}: {} {} {}",
                record.id,
                record.date,
                record.time.format("%H:%M"),
                record.customer_name
            ),
            self.recipient(record.staff_id.as_deref()),
        );
        Ok(record)
    }

    pub async fn cancel(&self, tenant: &str, id: Ulid) -> Result<ReservationRecord, BookingError> {
        let started = Instant::now();
        let result = self.cancel_inner(tenant, id).await;
        record_request("cancel", started, &result);
        if let Err(ref e) = result {
            self.log_failure("cancel", tenant, e);
        }
        result
    }

    async fn cancel_inner(&self, tenant: &str, id: Ulid) -> Result<ReservationRecord, BookingError> {
        let schedule = self.schedule(tenant).await?;
        let engine = self.existing_engine(tenant)?.ok_or(BookingError::NotFound(id))?;

        let (date, time) = match engine.reverse_lookup(&id) {
            Some(entry) if entry.status == ReservationStatus::Canceled => {
                return Err(BookingError::Conflict(ConflictCode::AlreadyCanceled));
            }
            Some(entry) => {
                let record = engine
                    .record_at(entry.date, entry.time, &id)
                    .ok_or(BookingError::NotFound(id))?;
                if !record.is_active() {
                    return Err(BookingError::Conflict(ConflictCode::AlreadyCanceled));
                }
                (entry.date, entry.time)
            }
            None => {
                let record = self.heal_index(&engine, &schedule, id).await?;
                if !record.is_active() {
                    return Err(BookingError::Conflict(ConflictCode::AlreadyCanceled));
                }
                (record.date, record.time)
            }
        };

        let cancel_cutoff = i64::from(schedule.policy.cancel_cutoff_minutes);
        let tz = self.settings.timezone;
        if lead_minutes(date, time, self.clock.local_now(tz)) < cancel_cutoff {
            return Err(BookingError::Conflict(ConflictCode::CutoffPassed));
        }
        let recheck = {
            let clock = self.clock.clone();
            move || {
                if lead_minutes(date, time, clock.local_now(tz)) < cancel_cutoff {
                    Err(EngineError::CutoffPassed)
                } else {
                    Ok(())
                }
            }
        };
        let record = self
            .within_deadline(engine.acquire_and_cancel(date, time, id, recheck))
            .await?;

        self.notify.dispatch(
            format!("cancellation {}: {} {}", record.id, record.date, record.time.format("%H:%M")),
            self.recipient(record.staff_id.as_deref()),
        );
        Ok(record)
    }

    /// Find an index-less record by scanning the heal window, then write its
    /// reverse-index entry so the next lookup is direct.
    async fn heal_index(
        &self,
        engine: &Arc<Engine>,
        schedule: &TenantCalendar,
        id: Ulid,
    ) -> Result<ReservationRecord, BookingError> {
        let today = self.clock.local_now(self.settings.timezone).date();
        let from = today
            .checked_sub_days(Days::new(u64::from(self.settings.heal_past_days)))
            .unwrap_or(NaiveDate::MIN);
        let to = today
            .checked_add_days(Days::new(u64::from(self.settings.heal_future_days)))
            .unwrap_or(NaiveDate::MAX);

        let record = engine
            .scan_for(&id, &schedule.calendar, from, to)
            .ok_or(BookingError::NotFound(id))?;
        let repaired = self
            .within_deadline(engine.repair_index(record.date, record.time, id))
            .await?;
        if repaired.is_none() {
            return Err(BookingError::NotFound(id));
        }
        debug!(tenant = engine.tenant(), id = %id, date = %record.date, "legacy reservation indexed");
        // Re-read: a cancel may have landed between the scan and the repair.
        engine
            .record_at(record.date, record.time, &id)
            .ok_or(BookingError::NotFound(id))
    }

    async fn within_deadline<T>(
        &self,
        op: impl Future<Output = Result<T, EngineError>>,
    ) -> Result<T, BookingError> {
        match tokio::time::timeout(self.settings.request_timeout, op).await {
            Ok(result) => result.map_err(BookingError::from),
            Err(_) => Err(BookingError::Timeout),
        }
    }

    fn existing_engine(&self, tenant: &str) -> Result<Option<Arc<Engine>>, BookingError> {
        self.tenants.get_existing(tenant).map_err(|e| tenant_error(tenant, e))
    }

    async fn schedule(&self, tenant: &str) -> Result<TenantCalendar, BookingError> {
        let schedule = self
            .calendars
            .calendar(tenant)
            .await
            .ok_or_else(|| BookingError::Validation(format!("no schedule configured for {tenant}")))?;
        schedule
            .calendar
            .validate()
            .map_err(|e| BookingError::Validation(format!("invalid schedule: {e}")))?;
        Ok(schedule)
    }

    async fn shift(&self, tenant: &str, staff_id: Option<&str>) -> Result<Option<StaffShift>, BookingError> {
        let Some(staff_id) = staff_id else {
            return Ok(None);
        };
        self.calendars
            .staff_shift(tenant, staff_id)
            .await
            .map(Some)
            .ok_or_else(|| BookingError::Validation(format!("unknown staff: {staff_id}")))
    }

    fn recipient(&self, staff_id: Option<&str>) -> String {
        staff_id.unwrap_or(&self.settings.default_recipient).to_string()
    }

    fn log_failure(&self, operation: &str, tenant: &str, e: &BookingError) {
        match e {
            BookingError::Internal(msg) => error!(operation, tenant, "internal failure: {msg}"),
            other => debug!(operation, tenant, "{other}"),
        }
    }
}

fn tenant_error(tenant: &str, e: TenantError) -> BookingError {
    match e {
        TenantError::InvalidName(_) => BookingError::Validation(e.to_string()),
        TenantError::AtCapacity => BookingError::Unavailable(e.to_string()),
        TenantError::Io(e) => BookingError::Internal(format!("tenant {tenant}: {e}")),
    }
}

/// Trim text fields and enforce presence and length limits.
fn normalize(mut request: ReserveRequest) -> Result<ReserveRequest, BookingError> {
    request.customer_name = request.customer_name.trim().to_string();
    if request.customer_name.is_empty() {
        return Err(BookingError::Validation("customerName is required".into()));
    }
    if request.customer_name.chars().count() > MAX_CUSTOMER_NAME_LEN {
        return Err(BookingError::Validation(format!(
            "customerName exceeds {MAX_CUSTOMER_NAME_LEN} characters"
        )));
    }
    request.phone = request
        .phone
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty());
    if request.phone.as_ref().is_some_and(|p| p.chars().count() > MAX_PHONE_LEN) {
        return Err(BookingError::Validation(format!("phone exceeds {MAX_PHONE_LEN} characters")));
    }
    request.staff_id = request
        .staff_id
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    if request.staff_id.as_ref().is_some_and(|s| s.len() > MAX_STAFF_ID_LEN) {
        return Err(BookingError::Validation(format!("staffId exceeds {MAX_STAFF_ID_LEN} bytes")));
    }
    Ok(request)
}

/// Static checks that need no lock: the time is a grid slot on an open day,
/// inside opening hours and the staff member's shift.
fn check_bookable(
    schedule: &TenantCalendar,
    shift: Option<&StaffShift>,
    date: NaiveDate,
    time: NaiveTime,
) -> Result<(), BookingError> {
    let calendar = &schedule.calendar;
    let window = calendar
        .day_window(date)
        .ok_or_else(|| BookingError::Validation(format!("closed on {date}")))?;
    let minute = minute_of_day(time);
    if time_of_minute(minute) != Some(time)
        || !calendar.grid(window.grid_start, window.grid_end).any(|m| m == minute)
    {
        return Err(BookingError::Validation(format!(
            "{} is not a bookable slot on {date}",
            time.format("%H:%M")
        )));
    }
    if !window.is_open_at(minute) {
        return Err(BookingError::Validation(format!(
            "closed at {} on {date}",
            time.format("%H:%M")
        )));
    }
    if let Some(shift) = shift
        && !shift.works_at(date, minute)
    {
        return Err(BookingError::Validation(format!(
            "{} is not working at {} on {date}",
            shift.staff_id,
            time.format("%H:%M")
        )));
    }
    Ok(())
}
