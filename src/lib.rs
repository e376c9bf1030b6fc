//! P1 smart meter reader library
//!
//! Reads DSMR telegrams from the P1 port, validates and decodes them and hands
//! the latest reading to any number of live subscribers.

pub mod config;
pub mod hub;
pub mod metering_p1;
pub mod models;
#[cfg(feature = "api")]
pub mod api;

// Re-export common types for easier access
pub use config::{Config, CONFIG};
pub use hub::{ReadingHub, Subscription};
pub use metering_p1::{P1Error, P1Manager, ReaderExit, ReaderSettings};
pub use models::MeterReading;
#[cfg(feature = "api")]
pub use api::ApiManager;

pub fn get_unix_ts() -> u64 {
    return std::time::SystemTime::now().duration_since(std::time::SystemTime::UNIX_EPOCH).unwrap_or_default().as_secs();
}
