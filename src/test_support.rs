//! Scripted in-memory radio and link used by the unit tests

use async_trait::async_trait;
use futures::{channel::mpsc as feed, stream::BoxStream, StreamExt};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::sync::{mpsc, Notify};

use crate::{
    error::{LinkErrorKind, Result, TrainerError},
    link::{CharacteristicInfo, DiscoveryRadio, GattLink, GattNotification, RadioDiscovery},
    scanner::DeviceScanner,
    session::DeviceSession,
    types::DeviceDescriptor,
    FTMS_SERVICE_UUID, HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE_UUID,
    INDOOR_BIKE_DATA_UUID,
};

/// Quiet period after which a driven state machine counts as settled
const SETTLE_WINDOW: Duration = Duration::from_millis(100);

pub const HEART_RATE_ONLY_SERVICES: &[&str] = &[
    "00001800-0000-1000-8000-00805f9b34fb",
    HEART_RATE_SERVICE_UUID,
];

pub fn trainer() -> DeviceDescriptor {
    DeviceDescriptor::new("C7:52:A1:6E:0B:01", "KICKR CORE 5A1B").with_service(FTMS_SERVICE_UUID)
}

pub fn strap() -> DeviceDescriptor {
    DeviceDescriptor::new("E4:11:9C:20:7D:02", "Polar H10 8C2F4A")
}

pub fn speaker() -> DeviceDescriptor {
    DeviceDescriptor::new("10:94:BB:01:02:03", "Kitchen Speaker")
}

/// Drain every queued event without waiting
pub fn drain<T>(events: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Drive a session until no completion arrives for a while
pub async fn settle(session: &mut DeviceSession<FakeLink>) {
    while tokio::time::timeout(SETTLE_WINDOW, session.process_next())
        .await
        .is_ok()
    {}
}

/// Drive a scanner until no completion arrives for a while
pub async fn settle_scanner(scanner: &mut DeviceScanner<FakeRadio>) {
    while tokio::time::timeout(SETTLE_WINDOW, scanner.process_next())
        .await
        .is_ok()
    {}
}

#[derive(Debug, Clone)]
pub struct FakeLinkScript {
    connect_error: Option<LinkErrorKind>,
    connect_hangs: bool,
    services: Vec<String>,
    characteristics: HashMap<String, Vec<CharacteristicInfo>>,
    characteristic_discovery_fails: bool,
    discovery_hangs: bool,
    enable_fails: bool,
}

impl FakeLinkScript {
    /// A trainer exposing FTMS with a notifying Indoor Bike Data characteristic
    pub fn trainer() -> Self {
        let mut characteristics = HashMap::new();
        characteristics.insert(
            FTMS_SERVICE_UUID.to_string(),
            vec![
                CharacteristicInfo::new("00002acc-0000-1000-8000-00805f9b34fb", false),
                CharacteristicInfo::new(INDOOR_BIKE_DATA_UUID, true),
            ],
        );

        Self {
            connect_error: None,
            connect_hangs: false,
            services: vec![
                "00001800-0000-1000-8000-00805f9b34fb".to_string(),
                FTMS_SERVICE_UUID.to_string(),
            ],
            characteristics,
            characteristic_discovery_fails: false,
            discovery_hangs: false,
            enable_fails: false,
        }
    }

    pub fn with_heart_rate(mut self) -> Self {
        self.services.push(HEART_RATE_SERVICE_UUID.to_string());
        self.characteristics.insert(
            HEART_RATE_SERVICE_UUID.to_string(),
            vec![CharacteristicInfo::new(HEART_RATE_MEASUREMENT_UUID, true)],
        );
        self
    }

    pub fn with_services(mut self, services: &[&str]) -> Self {
        self.services = services.iter().map(ToString::to_string).collect();
        self
    }

    pub fn with_ftms_characteristics(mut self, characteristics: Vec<CharacteristicInfo>) -> Self {
        self.characteristics
            .insert(FTMS_SERVICE_UUID.to_string(), characteristics);
        self
    }

    pub fn failing_connect(mut self, kind: LinkErrorKind) -> Self {
        self.connect_error = Some(kind);
        self
    }

    pub fn hanging_connect(mut self) -> Self {
        self.connect_hangs = true;
        self
    }

    pub fn failing_characteristic_discovery(mut self) -> Self {
        self.characteristic_discovery_fails = true;
        self
    }

    pub fn hanging_discovery(mut self) -> Self {
        self.discovery_hangs = true;
        self
    }

    pub fn failing_enable(mut self) -> Self {
        self.enable_fails = true;
        self
    }
}

pub struct FakeLink {
    script: FakeLinkScript,
    notifications_tx: feed::UnboundedSender<GattNotification>,
    notifications_rx: Mutex<Option<feed::UnboundedReceiver<GattNotification>>>,
    remote: Arc<Notify>,
    pub connect_calls: AtomicUsize,
    pub enable_calls: AtomicUsize,
    pub disconnect_calls: AtomicUsize,
}

impl FakeLink {
    pub fn new(script: FakeLinkScript) -> Self {
        let (notifications_tx, notifications_rx) = feed::unbounded();
        Self {
            script,
            notifications_tx,
            notifications_rx: Mutex::new(Some(notifications_rx)),
            remote: Arc::new(Notify::new()),
            connect_calls: AtomicUsize::new(0),
            enable_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
        }
    }

    /// Sender that feeds the notification stream
    pub fn notification_feed(&self) -> feed::UnboundedSender<GattNotification> {
        self.notifications_tx.clone()
    }

    /// Notify handle that simulates the remote dropping the link
    pub fn remote_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.remote)
    }
}

#[async_trait]
impl GattLink for FakeLink {
    async fn connect(&self, _device: &DeviceDescriptor) -> Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.script.connect_hangs {
            futures::future::pending::<()>().await;
        }
        match self.script.connect_error {
            Some(kind) => Err(TrainerError::link(kind)),
            None => Ok(()),
        }
    }

    async fn discover_services(&self) -> Result<Vec<String>> {
        if self.script.discovery_hangs {
            futures::future::pending::<()>().await;
        }
        Ok(self.script.services.clone())
    }

    async fn discover_characteristics(&self, service: &str) -> Result<Vec<CharacteristicInfo>> {
        if self.script.characteristic_discovery_fails {
            return Err(TrainerError::link(LinkErrorKind::Network));
        }
        Ok(self
            .script
            .characteristics
            .get(service)
            .cloned()
            .unwrap_or_default())
    }

    async fn enable_notifications(&self, _characteristic: &str) -> Result<()> {
        self.enable_calls.fetch_add(1, Ordering::SeqCst);
        if self.script.enable_fails {
            return Err(TrainerError::link(LinkErrorKind::RemoteClosed));
        }
        Ok(())
    }

    async fn notifications(&self) -> Result<BoxStream<'static, GattNotification>> {
        let rx = self
            .notifications_rx
            .lock()
            .unwrap()
            .take()
            .expect("notification stream opened twice");
        Ok(rx.boxed())
    }

    async fn wait_for_disconnect(&self) -> Result<()> {
        self.remote.notified().await;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeRadio {
    feed: Mutex<Option<feed::UnboundedSender<RadioDiscovery>>>,
    start_error: Mutex<Option<TrainerError>>,
    stop_delay: Duration,
    pub start_calls: AtomicUsize,
    pub stop_calls: AtomicUsize,
}

impl FakeRadio {
    pub fn failing_start(error: TrainerError) -> Self {
        Self {
            start_error: Mutex::new(Some(error)),
            ..Self::default()
        }
    }

    /// A radio that takes `delay` to acknowledge a stop
    pub fn with_stop_delay(delay: Duration) -> Self {
        Self {
            stop_delay: delay,
            ..Self::default()
        }
    }

    /// Report a device on the running discovery
    pub fn discover(&self, device: DeviceDescriptor) {
        self.send(RadioDiscovery::Found(device));
    }

    /// Fail the running discovery
    pub fn fail(&self, error: TrainerError) {
        self.send(RadioDiscovery::Failed(error));
    }

    /// End the running discovery stream
    pub fn finish(&self) {
        self.feed.lock().unwrap().take();
    }

    fn send(&self, item: RadioDiscovery) {
        self.feed
            .lock()
            .unwrap()
            .as_ref()
            .expect("discovery not running")
            .unbounded_send(item)
            .unwrap();
    }
}

#[async_trait]
impl DiscoveryRadio for FakeRadio {
    async fn start_discovery(&self) -> Result<BoxStream<'static, RadioDiscovery>> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.start_error.lock().unwrap().take() {
            return Err(error);
        }

        let (tx, rx) = feed::unbounded();
        *self.feed.lock().unwrap() = Some(tx);
        Ok(rx.boxed())
    }

    async fn stop_discovery(&self) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.stop_delay).await;
        Ok(())
    }
}

/// Link factory handed to the manager in tests
pub fn trainer_link() -> FakeLink {
    FakeLink::new(FakeLinkScript::trainer())
}
