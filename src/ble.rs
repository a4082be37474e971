use async_trait::async_trait;
use btleplug::{
    api::{
        Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
        ScanFilter,
    },
    platform::{Adapter, Manager, Peripheral},
};
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    error::{LinkErrorKind, Result, TrainerError},
    link::{CharacteristicInfo, DiscoveryRadio, GattLink, GattNotification, RadioDiscovery},
    types::DeviceDescriptor,
};

/// Discovery over the first local Bluetooth adapter
pub struct BtleplugRadio {
    adapter: Adapter,
}

impl BtleplugRadio {
    /// Open the Bluetooth stack and take the first adapter
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::AdapterUnavailable`] if the stack cannot be opened
    /// or no adapter is present.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|e| TrainerError::AdapterUnavailable(e.to_string()))?;

        let adapter = manager
            .adapters()
            .await
            .map_err(TrainerError::from_discovery)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                TrainerError::AdapterUnavailable("no Bluetooth adapters found".to_string())
            })?;

        Ok(Self { adapter })
    }

    /// The adapter discovery runs on
    #[must_use]
    pub const fn adapter(&self) -> &Adapter {
        &self.adapter
    }
}

#[async_trait]
impl DiscoveryRadio for BtleplugRadio {
    async fn start_discovery(&self) -> Result<BoxStream<'static, RadioDiscovery>> {
        let events = self
            .adapter
            .events()
            .await
            .map_err(TrainerError::from_discovery)?;

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(TrainerError::from_discovery)?;

        let adapter = self.adapter.clone();
        let stream = events.filter_map(move |event| {
            let adapter = adapter.clone();
            async move {
                let CentralEvent::DeviceDiscovered(id) = event else {
                    return None;
                };
                let peripheral = adapter.peripheral(&id).await.ok()?;
                describe(&peripheral).await.map(RadioDiscovery::Found)
            }
        });

        Ok(stream.boxed())
    }

    async fn stop_discovery(&self) -> Result<()> {
        self.adapter
            .stop_scan()
            .await
            .map_err(TrainerError::from_discovery)
    }
}

/// Build a descriptor from what the peripheral advertised
///
/// btleplug only reports Low-Energy devices.
async fn describe(peripheral: &Peripheral) -> Option<DeviceDescriptor> {
    let properties = peripheral.properties().await.ok()??;

    Some(DeviceDescriptor {
        address: peripheral.id().to_string(),
        name: properties.local_name.unwrap_or_default(),
        services: properties.services.iter().map(Uuid::to_string).collect(),
        low_energy: true,
        rssi: properties.rssi,
    })
}

/// GATT link to one peripheral over btleplug
pub struct BtleplugLink {
    adapter: Adapter,
    peripheral: Mutex<Option<Peripheral>>,
}

impl BtleplugLink {
    /// Create an unconnected link on `adapter`
    #[must_use]
    pub fn new(adapter: Adapter) -> Self {
        Self {
            adapter,
            peripheral: Mutex::new(None),
        }
    }

    async fn peripheral(&self) -> Result<Peripheral> {
        self.peripheral
            .lock()
            .await
            .clone()
            .ok_or(TrainerError::link(LinkErrorKind::RemoteClosed))
    }

    async fn find_characteristic(&self, uuid: &str) -> Result<(Peripheral, Characteristic)> {
        let uuid = Uuid::parse_str(uuid).map_err(|_| TrainerError::CharacteristicNotFound)?;
        let peripheral = self.peripheral().await?;

        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(TrainerError::CharacteristicNotFound)?;

        Ok((peripheral, characteristic))
    }
}

fn link_error(error: &btleplug::Error) -> TrainerError {
    TrainerError::link(LinkErrorKind::from(error))
}

#[async_trait]
impl GattLink for BtleplugLink {
    async fn connect(&self, device: &DeviceDescriptor) -> Result<()> {
        let peripheral = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| link_error(&e))?
            .into_iter()
            .find(|p| p.id().to_string() == device.address)
            .ok_or(TrainerError::link(LinkErrorKind::UnknownRemoteDevice))?;

        peripheral.connect().await.map_err(|e| link_error(&e))?;
        info!("Link up: {} ({})", device.name, device.address);

        *self.peripheral.lock().await = Some(peripheral);
        Ok(())
    }

    async fn discover_services(&self) -> Result<Vec<String>> {
        let peripheral = self.peripheral().await?;
        peripheral.discover_services().await?;

        Ok(peripheral
            .services()
            .iter()
            .map(|s| s.uuid.to_string())
            .collect())
    }

    async fn discover_characteristics(&self, service: &str) -> Result<Vec<CharacteristicInfo>> {
        let uuid = Uuid::parse_str(service).map_err(|_| TrainerError::ServiceInvalid)?;
        let peripheral = self.peripheral().await?;

        let service = peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == uuid)
            .ok_or(TrainerError::ServiceNotFound)?;

        Ok(service
            .characteristics
            .iter()
            .map(|c| {
                CharacteristicInfo::new(
                    c.uuid.to_string(),
                    c.properties.contains(CharPropFlags::NOTIFY),
                )
            })
            .collect())
    }

    async fn enable_notifications(&self, characteristic: &str) -> Result<()> {
        let (peripheral, characteristic) = self.find_characteristic(characteristic).await?;
        debug!("Subscribing to {}", characteristic.uuid);
        peripheral.subscribe(&characteristic).await?;
        Ok(())
    }

    async fn notifications(&self) -> Result<BoxStream<'static, GattNotification>> {
        let peripheral = self.peripheral().await?;
        let stream = peripheral.notifications().await?;

        Ok(stream
            .map(|n| GattNotification {
                characteristic: n.uuid.to_string(),
                value: n.value,
            })
            .boxed())
    }

    async fn wait_for_disconnect(&self) -> Result<()> {
        let id = self.peripheral().await?.id();
        let mut events = self.adapter.events().await?;

        while let Some(event) = events.next().await {
            if let CentralEvent::DeviceDisconnected(gone) = event {
                if gone == id {
                    return Ok(());
                }
            }
        }

        Err(TrainerError::link(LinkErrorKind::Network))
    }

    async fn disconnect(&self) -> Result<()> {
        let Some(peripheral) = self.peripheral.lock().await.take() else {
            return Ok(());
        };

        peripheral.disconnect().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        FITNESS_MACHINE_CONTROL_POINT_UUID, FITNESS_MACHINE_FEATURE_UUID, FTMS_SERVICE_UUID,
        HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE_UUID, INDOOR_BIKE_DATA_UUID,
        TRAINING_STATUS_UUID,
    };

    #[test]
    fn test_uuid_parsing() {
        let uuids = [
            FTMS_SERVICE_UUID,
            INDOOR_BIKE_DATA_UUID,
            FITNESS_MACHINE_FEATURE_UUID,
            FITNESS_MACHINE_CONTROL_POINT_UUID,
            TRAINING_STATUS_UUID,
            HEART_RATE_SERVICE_UUID,
            HEART_RATE_MEASUREMENT_UUID,
        ];

        for uuid in uuids {
            let parsed = Uuid::parse_str(uuid);
            assert!(parsed.is_ok(), "{uuid} should parse");
        }
    }

    #[test]
    fn test_uuid_display_matches_constants() {
        // Identifiers reported by btleplug go through Uuid's Display
        let parsed = Uuid::parse_str(&INDOOR_BIKE_DATA_UUID.to_uppercase()).unwrap();
        assert_eq!(parsed.to_string(), INDOOR_BIKE_DATA_UUID);

        let short = Uuid::from_u128(0x0000_1826_0000_1000_8000_0080_5f9b_34fb);
        assert_eq!(short.to_string(), FTMS_SERVICE_UUID);
    }
}
