//! Business hours, staff shifts, and the read-only source the core consumes.
//!
//! Schedules are owned by the admin side of the system. The booking core only
//! reads them, without locking; a stale read is picked up on the next request.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::limits::*;
use crate::model::{hhmm, minute_of_day, time_of_minute, Minute};

fn default_slot_interval() -> u32 {
    30
}

fn default_booking_cutoff() -> u32 {
    60
}

fn default_cancel_cutoff() -> u32 {
    120
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExceptionKind {
    Closed,
    Short,
    Special,
}

/// A dated override of the weekly hours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateException {
    pub date: NaiveDate,
    pub kind: ExceptionKind,
    #[serde(with = "hhmm::option", default)]
    pub open: Option<NaiveTime>,
    #[serde(with = "hhmm::option", default)]
    pub close: Option<NaiveTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessCalendar {
    #[serde(with = "hhmm")]
    pub open: NaiveTime,
    #[serde(with = "hhmm")]
    pub close: NaiveTime,
    #[serde(default = "default_slot_interval")]
    pub slot_interval_min: u32,
    #[serde(default)]
    pub closed_weekdays: Vec<Weekday>,
    #[serde(default)]
    pub exceptions: Vec<DateException>,
}

/// Resolved hours for one calendar day, in minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub open: Minute,
    pub close: Minute,
    /// Range the slot grid covers. Wider than `open..close` only on
    /// override days, where the extra grid slots report `closed`.
    pub grid_start: Minute,
    pub grid_end: Minute,
}

impl DayWindow {
    pub fn is_open_at(&self, m: Minute) -> bool {
        self.open <= m && m < self.close
    }
}

impl BusinessCalendar {
    pub fn new(open: NaiveTime, close: NaiveTime, slot_interval_min: u32) -> Self {
        Self {
            open,
            close,
            slot_interval_min,
            closed_weekdays: Vec::new(),
            exceptions: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(MIN_SLOT_INTERVAL_MIN..=MAX_SLOT_INTERVAL_MIN).contains(&self.slot_interval_min) {
            return Err(format!(
                "slot interval {} out of range {MIN_SLOT_INTERVAL_MIN}..={MAX_SLOT_INTERVAL_MIN}",
                self.slot_interval_min
            ));
        }
        if self.open >= self.close {
            return Err(format!(
                "open {} must be before close {}",
                self.open.format("%H:%M"),
                self.close.format("%H:%M")
            ));
        }
        for ex in &self.exceptions {
            if ex.kind == ExceptionKind::Closed {
                continue;
            }
            let open = ex.open.unwrap_or(self.open);
            let close = ex.close.unwrap_or(self.close);
            if open >= close {
                return Err(format!("exception on {}: open must be before close", ex.date));
            }
        }
        Ok(())
    }

    pub fn exception_on(&self, date: NaiveDate) -> Option<&DateException> {
        self.exceptions.iter().find(|ex| ex.date == date)
    }

    pub fn is_closed_weekday(&self, date: NaiveDate) -> bool {
        self.closed_weekdays.contains(&date.weekday())
    }

    /// Hours for `date`, or `None` when the salon is closed all day.
    ///
    /// A dated exception wins over the weekly rules; a closed weekday only
    /// applies when no exception exists for that date.
    pub fn day_window(&self, date: NaiveDate) -> Option<DayWindow> {
        let weekly_open = minute_of_day(self.open);
        let weekly_close = minute_of_day(self.close);

        match self.exception_on(date) {
            Some(ex) if ex.kind == ExceptionKind::Closed => None,
            Some(ex) => {
                let open = ex.open.map(minute_of_day).unwrap_or(weekly_open);
                let close = ex.close.map(minute_of_day).unwrap_or(weekly_close);
                let (grid_start, grid_end) = if self.is_closed_weekday(date) {
                    (open, close)
                } else {
                    (open.min(weekly_open), close.max(weekly_close))
                };
                Some(DayWindow { open, close, grid_start, grid_end })
            }
            None if self.is_closed_weekday(date) => None,
            None => Some(DayWindow {
                open: weekly_open,
                close: weekly_close,
                grid_start: weekly_open,
                grid_end: weekly_close,
            }),
        }
    }

    /// Slot start minutes from `start` (inclusive) to `end` (exclusive).
    pub fn grid(&self, start: Minute, end: Minute) -> impl Iterator<Item = Minute> {
        let step = self.slot_interval_min.max(MIN_SLOT_INTERVAL_MIN) as usize;
        (start..end).step_by(step)
    }

    /// Every time a record could plausibly sit at on `date`, ignoring
    /// closures: the weekly grid plus any override grid.
    pub fn known_slot_times(&self, date: NaiveDate) -> Vec<NaiveTime> {
        let mut minutes: Vec<Minute> = self
            .grid(minute_of_day(self.open), minute_of_day(self.close))
            .collect();
        if let Some(ex) = self.exception_on(date)
            && ex.kind != ExceptionKind::Closed
        {
            let open = ex.open.map(minute_of_day).unwrap_or(minute_of_day(self.open));
            let close = ex.close.map(minute_of_day).unwrap_or(minute_of_day(self.close));
            minutes.extend(self.grid(open, close));
            if let Some(window) = self.day_window(date) {
                minutes.extend(self.grid(window.grid_start, window.grid_end));
            }
        }
        minutes.sort_unstable();
        minutes.dedup();
        minutes.into_iter().filter_map(time_of_minute).collect()
    }
}

// ── Staff shifts ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyShift {
    pub weekday: Weekday,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
    #[serde(with = "hhmm::option", default)]
    pub break_start: Option<NaiveTime>,
    #[serde(with = "hhmm::option", default)]
    pub break_end: Option<NaiveTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShiftExceptionKind {
    Off,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftException {
    pub date: NaiveDate,
    pub kind: ShiftExceptionKind,
    #[serde(with = "hhmm::option", default)]
    pub start: Option<NaiveTime>,
    #[serde(with = "hhmm::option", default)]
    pub end: Option<NaiveTime>,
    #[serde(with = "hhmm::option", default)]
    pub break_start: Option<NaiveTime>,
    #[serde(with = "hhmm::option", default)]
    pub break_end: Option<NaiveTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffShift {
    pub staff_id: String,
    #[serde(default)]
    pub weekly: Vec<WeeklyShift>,
    #[serde(default)]
    pub exceptions: Vec<ShiftException>,
}

/// A staff member's resolved hours for one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkingHours {
    pub start: Minute,
    pub end: Minute,
    pub break_span: Option<(Minute, Minute)>,
}

impl WorkingHours {
    fn from_parts(
        start: NaiveTime,
        end: NaiveTime,
        break_start: Option<NaiveTime>,
        break_end: Option<NaiveTime>,
    ) -> Self {
        let break_span = match (break_start, break_end) {
            (Some(bs), Some(be)) if bs < be => Some((minute_of_day(bs), minute_of_day(be))),
            _ => None,
        };
        Self {
            start: minute_of_day(start),
            end: minute_of_day(end),
            break_span,
        }
    }

    /// True if `m` is inside working hours and outside the break.
    pub fn covers(&self, m: Minute) -> bool {
        if m < self.start || m >= self.end {
            return false;
        }
        !matches!(self.break_span, Some((bs, be)) if bs <= m && m < be)
    }
}

impl StaffShift {
    /// Dated exception if present, else the weekly template. `None` is a day off.
    pub fn hours_on(&self, date: NaiveDate) -> Option<WorkingHours> {
        if let Some(ex) = self.exceptions.iter().find(|ex| ex.date == date) {
            return match (ex.kind, ex.start, ex.end) {
                (ShiftExceptionKind::Custom, Some(start), Some(end)) if start < end => Some(
                    WorkingHours::from_parts(start, end, ex.break_start, ex.break_end),
                ),
                _ => None,
            };
        }
        self.weekly
            .iter()
            .find(|w| w.weekday == date.weekday())
            .filter(|w| w.enabled && w.start < w.end)
            .map(|w| WorkingHours::from_parts(w.start, w.end, w.break_start, w.break_end))
    }

    pub fn works_at(&self, date: NaiveDate, m: Minute) -> bool {
        self.hours_on(date).is_some_and(|h| h.covers(m))
    }
}

// ── Per-tenant schedule + source ─────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingPolicy {
    /// Minimum lead time for a new booking.
    #[serde(default = "default_booking_cutoff")]
    pub booking_cutoff_minutes: u32,
    /// Minimum lead time for a cancellation.
    #[serde(default = "default_cancel_cutoff")]
    pub cancel_cutoff_minutes: u32,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            booking_cutoff_minutes: default_booking_cutoff(),
            cancel_cutoff_minutes: default_cancel_cutoff(),
        }
    }
}

/// Calendar plus the policy that goes with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantCalendar {
    pub calendar: BusinessCalendar,
    pub policy: BookingPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantSchedule {
    pub calendar: BusinessCalendar,
    #[serde(default)]
    pub policy: BookingPolicy,
    #[serde(default)]
    pub staff: Vec<StaffShift>,
}

impl TenantSchedule {
    pub fn new(calendar: BusinessCalendar) -> Self {
        Self {
            calendar,
            policy: BookingPolicy::default(),
            staff: Vec::new(),
        }
    }

    pub fn with_policy(mut self, policy: BookingPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_staff(mut self, shift: StaffShift) -> Self {
        self.staff.retain(|s| s.staff_id != shift.staff_id);
        self.staff.push(shift);
        self
    }
}

/// Read-only accessor for schedules. No write path is exposed to the core.
#[async_trait]
pub trait CalendarSource: Send + Sync {
    async fn calendar(&self, tenant: &str) -> Option<TenantCalendar>;

    async fn staff_shift(&self, tenant: &str, staff_id: &str) -> Option<StaffShift>;
}

/// On-disk layout of the schedule file.
#[derive(Debug, Default, Deserialize)]
struct ScheduleFile {
    default: Option<TenantSchedule>,
    #[serde(default)]
    tenants: HashMap<String, TenantSchedule>,
}

/// Schedules held in memory, optionally seeded from a JSON file.
/// Tenants without their own entry fall back to `default`.
#[derive(Default)]
pub struct InMemorySchedules {
    default: Option<TenantSchedule>,
    tenants: DashMap<String, TenantSchedule>,
}

impl InMemorySchedules {
    pub fn new(default: Option<TenantSchedule>) -> Self {
        Self {
            default,
            tenants: DashMap::new(),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, String> {
        let file: ScheduleFile =
            serde_json::from_str(raw).map_err(|e| format!("invalid schedule file: {e}"))?;
        if let Some(ref d) = file.default {
            d.calendar.validate().map_err(|e| format!("default schedule: {e}"))?;
        }
        let schedules = Self::new(file.default);
        for (tenant, schedule) in file.tenants {
            schedule
                .calendar
                .validate()
                .map_err(|e| format!("schedule for {tenant}: {e}"))?;
            schedules.tenants.insert(tenant, schedule);
        }
        Ok(schedules)
    }

    pub fn from_file(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        Self::from_json(&raw)
    }

    pub fn set_tenant(&self, tenant: impl Into<String>, schedule: TenantSchedule) {
        self.tenants.insert(tenant.into(), schedule);
    }

    fn schedule_for(&self, tenant: &str) -> Option<TenantSchedule> {
        self.tenants
            .get(tenant)
            .map(|s| s.value().clone())
            .or_else(|| self.default.clone())
    }
}

#[async_trait]
impl CalendarSource for InMemorySchedules {
    async fn calendar(&self, tenant: &str) -> Option<TenantCalendar> {
        self.schedule_for(tenant).map(|s| TenantCalendar {
            calendar: s.calendar,
            policy: s.policy,
        })
    }

    async fn staff_shift(&self, tenant: &str, staff_id: &str) -> Option<StaffShift> {
        self.schedule_for(tenant)?
            .staff
            .into_iter()
            .find(|s| s.staff_id == staff_id)
    }
}
