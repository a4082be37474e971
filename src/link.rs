use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::{error::Result, types::DeviceDescriptor};

/// A characteristic resolved on a remote service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    /// Characteristic identifier
    pub uuid: String,
    /// Whether the characteristic supports notifications
    pub notify: bool,
}

impl CharacteristicInfo {
    /// Create characteristic info
    #[must_use]
    pub fn new(uuid: impl Into<String>, notify: bool) -> Self {
        Self {
            uuid: uuid.into(),
            notify,
        }
    }
}

/// One value pushed by the peripheral
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattNotification {
    /// Characteristic the value belongs to
    pub characteristic: String,
    /// Raw payload
    pub value: Vec<u8>,
}

/// Item yielded by a running discovery
#[derive(Debug)]
pub enum RadioDiscovery {
    /// The radio saw a device
    Found(DeviceDescriptor),
    /// Discovery failed; the stream ends after this item
    Failed(crate::error::TrainerError),
}

/// GATT operations against one remote device
///
/// Every method is a request whose completion is awaited; the session runs each
/// one on its own task so the caller never blocks on the radio.
#[async_trait]
pub trait GattLink: Send + Sync + 'static {
    /// Open a link to the device
    async fn connect(&self, device: &DeviceDescriptor) -> Result<()>;

    /// Enumerate the services of the connected device
    async fn discover_services(&self) -> Result<Vec<String>>;

    /// Enumerate the characteristics of one service
    async fn discover_characteristics(&self, service: &str) -> Result<Vec<CharacteristicInfo>>;

    /// Write the client configuration descriptor to enable notifications
    async fn enable_notifications(&self, characteristic: &str) -> Result<()>;

    /// Stream of notifications for every subscribed characteristic
    async fn notifications(&self) -> Result<BoxStream<'static, GattNotification>>;

    /// Resolve once the remote side drops the link
    async fn wait_for_disconnect(&self) -> Result<()>;

    /// Close the link and release its resources
    async fn disconnect(&self) -> Result<()>;
}

/// Device discovery on the local adapter
#[async_trait]
pub trait DiscoveryRadio: Send + Sync + 'static {
    /// Start discovering; the stream ends when the radio stops
    async fn start_discovery(&self) -> Result<BoxStream<'static, RadioDiscovery>>;

    /// Stop discovering
    async fn stop_discovery(&self) -> Result<()>;
}
