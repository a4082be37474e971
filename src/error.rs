use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Reason a link to a remote device failed or dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkErrorKind {
    /// The remote device is unknown to the adapter
    UnknownRemoteDevice,
    /// The local adapter is invalid or unusable
    InvalidAdapter,
    /// Radio/network level failure
    Network,
    /// The remote side closed the connection
    RemoteClosed,
    /// Generic connection failure
    Connection,
}

impl fmt::Display for LinkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownRemoteDevice => write!(f, "Unknown remote device error"),
            Self::InvalidAdapter => write!(f, "Invalid Bluetooth adapter"),
            Self::Network => write!(f, "Network error"),
            Self::RemoteClosed => write!(f, "Remote host closed connection"),
            Self::Connection => write!(f, "Connection error"),
        }
    }
}

impl From<&btleplug::Error> for LinkErrorKind {
    fn from(error: &btleplug::Error) -> Self {
        match error {
            btleplug::Error::DeviceNotFound => Self::UnknownRemoteDevice,
            btleplug::Error::PermissionDenied => Self::InvalidAdapter,
            btleplug::Error::NotConnected => Self::RemoteClosed,
            btleplug::Error::TimedOut(_) => Self::Network,
            _ => Self::Connection,
        }
    }
}

/// Taxonomy tag attached to every reported error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Adapter powered off, invalid, or platform unsupported
    AdapterUnavailable,
    /// I/O failure while discovering devices
    DiscoveryIo,
    /// Location services must be enabled for discovery
    LocationServicesDisabled,
    /// Link level failure (connect, network, remote closed, unknown remote)
    LinkError,
    /// The FTMS service is missing on the remote device
    ServiceNotFound,
    /// The FTMS service could not be used
    ServiceInvalid,
    /// The Indoor Bike Data characteristic is missing or unusable
    CharacteristicNotFound,
    /// A notification frame was dropped by the decoder (never surfaced)
    DecodeSkipped,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AdapterUnavailable => write!(f, "AdapterUnavailable"),
            Self::DiscoveryIo => write!(f, "DiscoveryIO"),
            Self::LocationServicesDisabled => write!(f, "LocationServicesDisabled"),
            Self::LinkError => write!(f, "LinkError"),
            Self::ServiceNotFound => write!(f, "ServiceNotFound"),
            Self::ServiceInvalid => write!(f, "ServiceInvalid"),
            Self::CharacteristicNotFound => write!(f, "CharacteristicNotFound"),
            Self::DecodeSkipped => write!(f, "DecodeSkipped"),
        }
    }
}

/// Errors that can occur while discovering or streaming from fitness devices
#[derive(Error, Debug)]
pub enum TrainerError {
    /// Bluetooth Low Energy related errors
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// Bluetooth adapter is powered off, invalid, or unsupported
    #[error("Bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),

    /// I/O error during device discovery
    #[error("Input/Output error during discovery: {0}")]
    DiscoveryIo(String),

    /// Location services are turned off
    ///
    /// Reserved for platforms that gate discovery on location permission;
    /// btleplug never reports it.
    #[error("Location services are turned off")]
    LocationServicesDisabled,

    /// Link to the device failed
    #[error("{kind}")]
    Link {
        /// Mapped link failure reason
        kind: LinkErrorKind,
    },

    /// FTMS service not present on the device
    #[error("FTMS service not found on device")]
    ServiceNotFound,

    /// FTMS service could not be set up
    #[error("Invalid FTMS service")]
    ServiceInvalid,

    /// Indoor Bike Data characteristic not present
    #[error("Indoor bike data characteristic not found")]
    CharacteristicNotFound,

    /// Indoor Bike Data characteristic present but cannot notify
    #[error("Indoor bike data characteristic does not support notifications")]
    NotificationsUnsupported,

    /// Operation timeout
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },
}

/// Result type for trainer operations
pub type Result<T> = std::result::Result<T, TrainerError>;

impl TrainerError {
    /// Create a link error with the given reason
    #[must_use]
    pub const fn link(kind: LinkErrorKind) -> Self {
        Self::Link { kind }
    }

    /// Map a discovery-side btleplug error into the discovery taxonomy
    #[must_use]
    pub fn from_discovery(error: btleplug::Error) -> Self {
        match error {
            btleplug::Error::PermissionDenied | btleplug::Error::NotSupported(_) => {
                Self::AdapterUnavailable(error.to_string())
            }
            other => Self::DiscoveryIo(other.to_string()),
        }
    }

    /// Taxonomy tag for this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::AdapterUnavailable(_) => ErrorKind::AdapterUnavailable,
            Self::DiscoveryIo(_) => ErrorKind::DiscoveryIo,
            Self::LocationServicesDisabled => ErrorKind::LocationServicesDisabled,
            Self::Ble(_) | Self::Link { .. } | Self::Timeout { .. } => ErrorKind::LinkError,
            Self::ServiceNotFound => ErrorKind::ServiceNotFound,
            Self::ServiceInvalid => ErrorKind::ServiceInvalid,
            Self::CharacteristicNotFound | Self::NotificationsUnsupported => {
                ErrorKind::CharacteristicNotFound
            }
        }
    }

    /// Link failure reason, if this error happened on the link
    #[must_use]
    pub fn link_kind(&self) -> Option<LinkErrorKind> {
        match self {
            Self::Link { kind } => Some(*kind),
            Self::Ble(e) => Some(LinkErrorKind::from(e)),
            Self::Timeout { .. } => Some(LinkErrorKind::Connection),
            _ => None,
        }
    }

    /// Check if this error indicates a connection issue
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(self, Self::Ble(_) | Self::Link { .. } | Self::Timeout { .. })
    }

    /// Check if this error clears once the underlying condition goes away
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::AdapterUnavailable(_)
                | Self::DiscoveryIo(_)
                | Self::LocationServicesDisabled
                | Self::Timeout { .. }
        )
    }

    /// Human-readable report with taxonomy tag
    #[must_use]
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Error as delivered to the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Taxonomy tag
    pub kind: ErrorKind,
    /// Human-readable message
    pub message: String,
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}
