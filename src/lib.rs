//! # Phoebus - SunSpec solar inverter polling engine
//!
//! A Rust polling-and-decoding engine for solar inverters speaking the
//! SunSpec register layout over Modbus TCP (ABB/FIMER PVI and similar
//! single-string units). It owns the Modbus connection, reads the
//! device's register block on a timer, decodes the raw 16/32-bit words
//! into scaled engineering-unit measurements and hands out a consistent
//! snapshot to subscribers.
//!
//! ## Architecture
//!
//! The crate follows a modular architecture with clear separation of concerns:
//!
//! - `config`: plain settings structure with YAML helpers
//! - `logging`: structured logging and tracing
//! - `modbus`: Modbus TCP transport for inverter communication
//! - `registers`: static per-family SunSpec register maps
//! - `decoder`: pure register-block to snapshot decoding
//! - `hub`: polling timer, snapshot ownership and subscriptions
//!
//! ## Usage
//!
//! ```no_run
//! use phoebus::{DeviceFamily, PollingHub, Settings};
//!
//! # async fn example() -> phoebus::Result<()> {
//! let settings = Settings::new("192.168.1.50", DeviceFamily::ThreePhase);
//! let hub = PollingHub::new(settings);
//!
//! let id = hub.subscribe(|| { /* pull updated values */ }).await?;
//! let power = hub.get_value("ac_power");
//! hub.unsubscribe(id).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod decoder;
pub mod error;
pub mod hub;
pub mod logging;
pub mod modbus;
pub mod registers;

// Re-export commonly used types
pub use config::Settings;
pub use decoder::{Snapshot, Value, decode};
pub use error::{DecodeError, PhoebusError, Result, TransportError};
pub use hub::{PollingHub, SubscriberId};
pub use registers::{DeviceFamily, status_description};
