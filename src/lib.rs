pub mod api;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod schedule;
pub mod tenant;
pub mod wal;
