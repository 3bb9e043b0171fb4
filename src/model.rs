use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Minutes since local midnight.
pub type Minute = u32;

pub const MINUTES_PER_DAY: Minute = 24 * 60;

pub fn minute_of_day(t: NaiveTime) -> Minute {
    t.num_seconds_from_midnight() / 60
}

pub fn time_of_minute(m: Minute) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(m / 60, m % 60, 0)
}

pub fn parse_hhmm(s: &str) -> Result<NaiveTime, chrono::ParseError> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
}

pub fn parse_date(s: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
}

/// The unit of mutual exclusion: one wall-clock slot of one tenant.
///
/// Staff is not part of the key: unassigned and staff-specific reservations
/// compete for the same slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub tenant: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl SlotKey {
    pub fn new(tenant: impl Into<String>, date: NaiveDate, time: NaiveTime) -> Self {
        Self {
            tenant: tenant.into(),
            date,
            time,
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.tenant, self.date, self.time.format("%H:%M"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Active,
    Canceled,
}

/// A confirmed or canceled booking. Never physically deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRecord {
    pub id: Ulid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub customer_name: String,
    pub phone: Option<String>,
    /// `None` means unassigned.
    pub staff_id: Option<String>,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub canceled_at: Option<DateTime<Utc>>,
}

impl ReservationRecord {
    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    pub fn index_entry(&self) -> ReverseIndexEntry {
        ReverseIndexEntry {
            id: self.id,
            date: self.date,
            time: self.time,
            status: self.status,
        }
    }
}

/// Reservation id → slot + status, so cancel-by-id needs no scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseIndexEntry {
    pub id: Ulid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: ReservationStatus,
}

/// WAL record format. Flat, one variant per durable transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// Record and its reverse-index entry, written together.
    ReservationCreated { record: ReservationRecord },
    /// Flips both the record and its index entry to canceled.
    ReservationCanceled {
        id: Ulid,
        date: NaiveDate,
        time: NaiveTime,
        canceled_at: DateTime<Utc>,
    },
    /// A migrated record that predates the reverse index. No index entry.
    LegacyRecordImported { record: ReservationRecord },
    /// Index entry rebuilt by the fallback scan.
    ReverseIndexRepaired { entry: ReverseIndexEntry },
}

/// `HH:MM` wire format for `NaiveTime`.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&t.format("%H:%M"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_hhmm(&raw).map_err(|e| de::Error::custom(format!("invalid time {raw:?}: {e}")))
    }

    pub mod option {
        use chrono::NaiveTime;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(t: &Option<NaiveTime>, s: S) -> Result<S::Ok, S::Error> {
            match t {
                Some(t) => s.collect_str(&t.format("%H:%M")),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
            let raw: Option<String> = Option::deserialize(d)?;
            raw.map(|r| {
                super::super::parse_hhmm(&r)
                    .map_err(|e| serde::de::Error::custom(format!("invalid time {r:?}: {e}")))
            })
            .transpose()
        }
    }
}
