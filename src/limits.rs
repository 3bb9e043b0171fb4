/// Max tenants (engines) per process.
pub const MAX_TENANTS: usize = 1024;

/// Max tenant name length; also bounds the WAL file name.
pub const MAX_TENANT_NAME_LEN: usize = 64;

/// Max customer name length in characters.
pub const MAX_CUSTOMER_NAME_LEN: usize = 100;

/// Max phone number length in characters.
pub const MAX_PHONE_LEN: usize = 32;

/// Max staff identifier length.
pub const MAX_STAFF_ID_LEN: usize = 64;

/// Max records (active + canceled) retained for one slot.
pub const MAX_RECORDS_PER_SLOT: usize = 64;

/// Smallest accepted slot interval in minutes.
pub const MIN_SLOT_INTERVAL_MIN: u32 = 1;

/// Largest accepted slot interval in minutes (one day).
pub const MAX_SLOT_INTERVAL_MIN: u32 = 24 * 60;

/// Upper bound on days scanned by the legacy reverse-index fallback.
pub const MAX_HEAL_WINDOW_DAYS: i64 = 3 * 366;
