#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # Trainerlink 🚴
//!
//! A Rust library for streaming live cycling metrics from Bluetooth Low Energy
//! smart trainers and heart-rate sensors.
//!
//! Trainers that implement the Fitness Machine Service (FTMS) publish an
//! *Indoor Bike Data* characteristic: a variable-length little-endian record
//! whose leading 16-bit flags field decides which optional fields follow.
//! Heart-rate straps publish the *Heart Rate Measurement* characteristic of the
//! Heart Rate Service (HRS). This crate finds those devices, walks the GATT
//! handshake, and turns each notification into a [`TrainerSample`].
//!
//! The crate is receive-only: it never writes to the FTMS control point.
//!
//! ## Architecture
//!
//! - [`protocol`]: pure frame decoders and identifier predicates
//! - [`classifier`]: heuristic fitness-device filter for scan results
//! - [`scanner::DeviceScanner`]: time-bounded discovery with incremental events
//! - [`session::DeviceSession`]: the connect → discover → subscribe → stream
//!   state machine for one device
//! - [`manager::TrainerManager`]: owns the scanner and at most one session
//! - [`link`]: the async radio-stack seam; [`ble`] implements it over `btleplug`
//!
//! ## Quick Start
//!
//! ```no_run
//! use trainerlink::{SessionEvent, TrainerManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (mut manager, _scan_events) = TrainerManager::with_btleplug().await?;
//!
//!     let devices = manager.scan_to_completion().await;
//!     let Some(device) = devices.into_iter().next() else {
//!         return Ok(());
//!     };
//!
//!     let mut session_events = manager.connect_to(device).await;
//!     loop {
//!         tokio::select! {
//!             Some(event) = session_events.recv() => match event {
//!                 SessionEvent::Sample(sample) => {
//!                     println!("{} W @ {} rpm", sample.power_watts, sample.cadence_rpm);
//!                 }
//!                 SessionEvent::Error(report) => {
//!                     eprintln!("{report}");
//!                     break;
//!                 }
//!                 SessionEvent::StateChanged(state) => println!("{state}"),
//!             },
//!             () = manager.process_next() => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```

/// btleplug implementation of the radio-stack seam
pub mod ble;
/// Fitness device classification heuristics
pub mod classifier;
/// Error types and handling
pub mod error;
/// Async radio-stack seam used by the scanner and session
pub mod link;
/// Scanner plus single-session ownership
pub mod manager;
/// FTMS / HRS frame decoding
pub mod protocol;
/// Device discovery
pub mod scanner;
/// Device connection state machine
pub mod session;
/// Type definitions and data structures
pub mod types;

#[cfg(test)]
mod test_support;

// Re-export the main types for convenient usage
pub use classifier::is_fitness_device;
pub use error::{ErrorKind, ErrorReport, LinkErrorKind, Result, TrainerError};
pub use manager::TrainerManager;
pub use protocol::{
    decode_heart_rate_data, decode_indoor_bike_data, is_valid_ftms_service,
    is_valid_heart_rate_service,
};
pub use scanner::DeviceScanner;
pub use session::DeviceSession;
pub use types::{
    ConnectionParams, ConnectionState, DeviceDescriptor, SampleFields, SampleSource, ScanEvent,
    ScanParams, ScanState, SessionEvent, TrainerSample,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Fitness Machine Service UUID (0x1826)
pub const FTMS_SERVICE_UUID: &str = "00001826-0000-1000-8000-00805f9b34fb";

/// Indoor Bike Data characteristic UUID (0x2AD2)
///
/// Notify-only. Every trainer frame arrives here.
pub const INDOOR_BIKE_DATA_UUID: &str = "00002ad2-0000-1000-8000-00805f9b34fb";

/// Fitness Machine Feature characteristic UUID (0x2ACC)
pub const FITNESS_MACHINE_FEATURE_UUID: &str = "00002acc-0000-1000-8000-00805f9b34fb";

/// Fitness Machine Control Point characteristic UUID (0x2AD9)
///
/// Listed for completeness; this crate never writes to it.
pub const FITNESS_MACHINE_CONTROL_POINT_UUID: &str = "00002ad9-0000-1000-8000-00805f9b34fb";

/// Training Status characteristic UUID (0x2AD3)
pub const TRAINING_STATUS_UUID: &str = "00002ad3-0000-1000-8000-00805f9b34fb";

/// Heart Rate Service UUID (0x180D)
pub const HEART_RATE_SERVICE_UUID: &str = "0000180d-0000-1000-8000-00805f9b34fb";

/// Heart Rate Measurement characteristic UUID (0x2A37)
pub const HEART_RATE_MEASUREMENT_UUID: &str = "00002a37-0000-1000-8000-00805f9b34fb";
