use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

use crate::error::ErrorReport;

/// A device seen during discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Opaque link address (MAC on most platforms, a UUID on macOS)
    pub address: String,
    /// Display name, empty when the device does not advertise one
    pub name: String,
    /// Advertised service identifiers
    pub services: Vec<String>,
    /// Whether the device supports Bluetooth Low Energy
    pub low_energy: bool,
    /// Signal strength (RSSI), if reported
    pub rssi: Option<i16>,
}

impl DeviceDescriptor {
    /// Create a Low-Energy descriptor with no advertised services
    #[must_use]
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
            services: Vec::new(),
            low_energy: true,
            rssi: None,
        }
    }

    /// Add an advertised service identifier
    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.services.push(service.into());
        self
    }
}

/// Connection state of a device session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConnectionState {
    /// No link
    #[default]
    Disconnected,
    /// Link requested
    Connecting,
    /// Link up, enumerating services
    DiscoveringServices,
    /// FTMS found, resolving and subscribing the Indoor Bike Data characteristic
    SubscribingNotifications,
    /// Notifications enabled, samples flowing
    Streaming,
    /// Handshake failed; a new connect attempt is required
    Error,
}

impl ConnectionState {
    /// Whether a new connect attempt may start from this state
    #[must_use]
    pub const fn accepts_connect(self) -> bool {
        matches!(self, Self::Disconnected | Self::Error)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::DiscoveringServices => write!(f, "Discovering Services"),
            Self::SubscribingNotifications => write!(f, "Subscribing Notifications"),
            Self::Streaming => write!(f, "Streaming"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// Which characteristic a sample was decoded from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SampleSource {
    /// FTMS Indoor Bike Data
    #[default]
    IndoorBikeData,
    /// HRS Heart Rate Measurement
    HeartRate,
}

/// Bitmask of the fields actually decoded into a [`TrainerSample`]
///
/// Field values default to zero when absent, so `power_watts == 0` alone cannot
/// tell "no power field" from "0 W". This mask can.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SampleFields(u16);

impl SampleFields {
    /// Instantaneous speed
    pub const SPEED: Self = Self(0x0001);
    /// Instantaneous cadence
    pub const CADENCE: Self = Self(0x0002);
    /// Total distance
    pub const DISTANCE: Self = Self(0x0004);
    /// Resistance level
    pub const RESISTANCE: Self = Self(0x0008);
    /// Instantaneous power
    pub const POWER: Self = Self(0x0010);
    /// Total expended energy
    pub const ENERGY: Self = Self(0x0020);
    /// Heart rate
    pub const HEART_RATE: Self = Self(0x0040);
    /// Elapsed time
    pub const ELAPSED_TIME: Self = Self(0x0080);

    /// No fields
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Whether every field in `other` is present
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Mark fields as present
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Whether no field is present
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Decoded metric snapshot from one notification frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct TrainerSample {
    /// Speed in km/h (0.01 resolution)
    pub speed_kmh: f64,
    /// Cadence in whole RPM
    pub cadence_rpm: u16,
    /// Power in watts
    pub power_watts: i16,
    /// Heart rate in BPM
    pub heart_rate_bpm: u16,
    /// Total distance in meters (24-bit)
    pub distance_m: u32,
    /// Resistance level (unitless, signed)
    pub resistance_level: i16,
    /// Total expended energy in kcal
    pub energy_kcal: u16,
    /// Elapsed time in seconds
    pub elapsed_time_s: u16,
    /// Whether the frame carried its mandatory prefix
    pub valid: bool,
    /// Fields that were present in the frame
    pub present: SampleFields,
    /// Characteristic the frame came from
    pub source: SampleSource,
}

impl TrainerSample {
    /// Elapsed time as a [`Duration`]
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        Duration::from_secs(u64::from(self.elapsed_time_s))
    }
}

/// Notification emitted by a device session to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The connection state changed
    StateChanged(ConnectionState),
    /// A valid sample was decoded
    Sample(TrainerSample),
    /// The session hit an error
    Error(ErrorReport),
}

/// Notification emitted by the device scanner
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// A plausible fitness device was discovered
    Discovered(DeviceDescriptor),
    /// The scan finished
    Finished {
        /// Number of candidates found
        count: usize,
    },
    /// Discovery failed
    Error(ErrorReport),
}

/// Scanner state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ScanState {
    /// Not scanning
    #[default]
    Idle,
    /// Scan in progress
    Scanning,
}

/// Session connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Link establishment timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Service enumeration timeout in milliseconds
    pub service_discovery_timeout_ms: u64,
    /// How long to wait on a characteristic that cannot notify before failing
    pub subscribe_timeout_ms: u64,
    /// Also subscribe Heart Rate Measurement when the device exposes HRS
    pub subscribe_heart_rate: bool,
}

impl ConnectionParams {
    /// Link establishment timeout
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Service enumeration timeout
    #[must_use]
    pub const fn service_discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.service_discovery_timeout_ms)
    }

    /// Subscription stall timeout
    #[must_use]
    pub const fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            service_discovery_timeout_ms: 10_000,
            subscribe_timeout_ms: 10_000,
            subscribe_heart_rate: true,
        }
    }
}

/// Discovery parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanParams {
    /// Scan duration in milliseconds
    pub scan_timeout_ms: u64,
    /// Collapse repeated advertisements of one address into a single candidate
    pub deduplicate_by_address: bool,
}

impl ScanParams {
    /// Scan duration
    #[must_use]
    pub const fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            scan_timeout_ms: 10_000,
            deduplicate_by_address: true,
        }
    }
}
