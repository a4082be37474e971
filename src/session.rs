use futures::StreamExt;
use std::{fmt, sync::Arc};
use tokio::{sync::mpsc, task::JoinHandle, time::timeout};
use tracing::{debug, error, info, warn};

use crate::{
    error::{LinkErrorKind, TrainerError},
    link::{CharacteristicInfo, GattLink, GattNotification},
    protocol::{is_valid_ftms_service, is_valid_heart_rate_service, CharacteristicKind},
    types::{ConnectionParams, ConnectionState, DeviceDescriptor, SessionEvent},
    HEART_RATE_MEASUREMENT_UUID, INDOOR_BIKE_DATA_UUID,
};

/// A request issued to the link; failures carry it back so the session knows
/// which stage broke
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkRequest {
    /// Open the link
    Connect,
    /// Enumerate services
    DiscoverServices,
    /// Enumerate characteristics of a service
    DiscoverCharacteristics(String),
    /// Write the client configuration descriptor of a characteristic
    EnableNotifications(String),
}

/// Completion delivered to the session, one variant per kind
#[derive(Debug)]
pub enum LinkEvent {
    /// Link established
    LinkUp,
    /// Link dropped by the remote side
    LinkDown,
    /// Service enumeration finished
    ServicesDiscovered(Vec<String>),
    /// Characteristic enumeration of one service finished
    CharacteristicsResolved {
        /// Service the characteristics belong to
        service: String,
        /// Resolved characteristics
        characteristics: Vec<CharacteristicInfo>,
    },
    /// Notifications enabled on a characteristic
    DescriptorWritten {
        /// Characteristic now notifying
        characteristic: String,
    },
    /// A notification value arrived
    Notification(GattNotification),
    /// The Indoor Bike Data characteristic never became notifiable in time
    SubscribeStalled,
    /// A request failed
    Failed {
        /// The request that failed
        request: LinkRequest,
        /// Why it failed
        error: TrainerError,
    },
}

impl fmt::Display for LinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LinkUp => write!(f, "link up"),
            Self::LinkDown => write!(f, "link down"),
            Self::ServicesDiscovered(s) => write!(f, "{} service(s) discovered", s.len()),
            Self::CharacteristicsResolved { service, .. } => {
                write!(f, "characteristics resolved for {service}")
            }
            Self::DescriptorWritten { characteristic } => {
                write!(f, "descriptor written for {characteristic}")
            }
            Self::Notification(n) => write!(f, "notification on {}", n.characteristic),
            Self::SubscribeStalled => write!(f, "subscription stalled"),
            Self::Failed { request, error } => write!(f, "{request:?} failed: {error}"),
        }
    }
}

#[derive(Debug)]
struct Completion {
    epoch: u64,
    event: LinkEvent,
}

/// Connection state machine for one fitness device
///
/// The session walks `Connecting → DiscoveringServices →
/// SubscribingNotifications → Streaming`. Every link request runs on its own
/// task and posts its result back as a [`LinkEvent`]; the owner feeds those
/// into the machine by awaiting [`DeviceSession::process_next`]. All
/// transitions happen on the owner's task, so the machine needs no locks.
///
/// Each connect or disconnect starts a new epoch. Completions from an older
/// epoch are dropped, so a late callback can never move the state backward.
///
/// Outbound notifications ([`SessionEvent`]) go to the receiver returned by
/// [`DeviceSession::new`].
pub struct DeviceSession<L: GattLink> {
    link: Arc<L>,
    params: ConnectionParams,
    state: ConnectionState,
    device: Option<DeviceDescriptor>,
    link_open: bool,
    epoch: u64,
    subscribed: Vec<(String, CharacteristicKind)>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl<L: GattLink> DeviceSession<L> {
    /// Create a disconnected session over `link`
    ///
    /// Returns the session together with the receiver of its events.
    pub fn new(link: L, params: ConnectionParams) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let session = Self {
            link: Arc::new(link),
            params,
            state: ConnectionState::Disconnected,
            device: None,
            link_open: false,
            epoch: 0,
            subscribed: Vec::new(),
            completion_tx,
            completion_rx,
            event_tx,
            tasks: Vec::new(),
        };

        (session, event_rx)
    }

    /// Current connection state
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Device of the current or last connect attempt
    #[must_use]
    pub const fn device(&self) -> Option<&DeviceDescriptor> {
        self.device.as_ref()
    }

    /// Connection parameters
    #[must_use]
    pub const fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// Start the handshake with `device`
    ///
    /// Ignored unless the session is `Disconnected` or `Error`; returns whether
    /// the request was accepted. When restarting from `Error`, the previous link
    /// is closed first. The call returns as soon as the connect request is
    /// issued; progress arrives through [`DeviceSession::process_next`].
    pub async fn connect_to_device(&mut self, device: DeviceDescriptor) -> bool {
        if !self.state.accepts_connect() {
            debug!("Ignoring connect to {} while {}", device.name, self.state);
            return false;
        }

        self.release();
        self.close_link().await;

        info!("Connecting to device: {} ({})", device.name, device.address);
        self.device = Some(device.clone());
        self.link_open = true;
        self.set_state(ConnectionState::Connecting);
        self.spawn_connect(device);
        true
    }

    /// Tear the session down to `Disconnected`
    ///
    /// Safe in every state and idempotent. Pending completions are invalidated
    /// and the link is closed before this returns, so the session can be reused.
    pub async fn disconnect_from_device(&mut self) {
        self.release();
        self.close_link().await;
        if self.state != ConnectionState::Disconnected {
            info!("Disconnected from device");
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Wait for the next link completion and apply it
    ///
    /// Returns `false` when the completion was stale and got discarded.
    pub async fn process_next(&mut self) -> bool {
        // The session keeps a sender alive, so the channel never closes
        let Some(completion) = self.completion_rx.recv().await else {
            return false;
        };

        if completion.epoch != self.epoch {
            debug!(
                "Discarding stale completion ({}) from epoch {}",
                completion.event, completion.epoch
            );
            return false;
        }

        self.handle_event(completion.event);
        true
    }

    /// Apply one link completion to the state machine
    pub fn handle_event(&mut self, event: LinkEvent) {
        match (self.state, event) {
            (ConnectionState::Disconnected, LinkEvent::LinkDown) => {}
            (_, LinkEvent::LinkDown) => {
                info!("Device disconnected");
                self.release();
                self.link_open = false;
                self.set_state(ConnectionState::Disconnected);
            }
            (ConnectionState::Connecting, LinkEvent::LinkUp) => {
                info!("Device connected, starting service discovery");
                self.set_state(ConnectionState::DiscoveringServices);
                self.spawn_disconnect_watch();
                self.spawn_service_discovery();
            }
            (ConnectionState::DiscoveringServices, LinkEvent::ServicesDiscovered(services)) => {
                self.on_services_discovered(&services);
            }
            (
                ConnectionState::SubscribingNotifications | ConnectionState::Streaming,
                LinkEvent::CharacteristicsResolved {
                    service,
                    characteristics,
                },
            ) => self.on_characteristics_resolved(&service, &characteristics),
            (
                ConnectionState::SubscribingNotifications | ConnectionState::Streaming,
                LinkEvent::DescriptorWritten { characteristic },
            ) => self.on_descriptor_written(characteristic),
            (ConnectionState::Streaming, LinkEvent::Notification(notification)) => {
                self.on_notification(&notification);
            }
            (ConnectionState::SubscribingNotifications, LinkEvent::SubscribeStalled) => {
                self.fail(TrainerError::NotificationsUnsupported);
            }
            (state, LinkEvent::Failed { request, error }) => {
                self.on_failed(state, &request, error);
            }
            (state, event) => debug!("Ignoring {} while {}", event, state),
        }
    }

    fn on_services_discovered(&mut self, services: &[String]) {
        debug!("Services discovered: {:?}", services);

        let Some(ftms) = services.iter().find(|s| is_valid_ftms_service(s)) else {
            self.fail(TrainerError::ServiceNotFound);
            return;
        };

        info!("Found FTMS service, discovering characteristics");
        self.set_state(ConnectionState::SubscribingNotifications);
        self.spawn_characteristic_discovery(ftms.clone());

        if self.params.subscribe_heart_rate {
            if let Some(hrs) = services.iter().find(|s| is_valid_heart_rate_service(s)) {
                debug!("Heart rate service present, discovering characteristics");
                self.spawn_characteristic_discovery(hrs.clone());
            }
        }
    }

    fn on_characteristics_resolved(
        &mut self,
        service: &str,
        characteristics: &[CharacteristicInfo],
    ) {
        if is_valid_ftms_service(service) {
            if self.state != ConnectionState::SubscribingNotifications {
                debug!("Ignoring repeated FTMS characteristic resolution");
                return;
            }

            match find_characteristic(characteristics, INDOOR_BIKE_DATA_UUID) {
                None => self.fail(TrainerError::CharacteristicNotFound),
                Some(c) if !c.notify => {
                    warn!(
                        "Indoor bike data characteristic does not support notifications, \
                         failing in {}ms",
                        self.params.subscribe_timeout_ms
                    );
                    self.spawn_stall_timer();
                }
                Some(c) => {
                    info!("Enabling notifications for indoor bike data");
                    self.spawn_subscribe(c.uuid.clone());
                }
            }
        } else if is_valid_heart_rate_service(service) {
            match find_characteristic(characteristics, HEART_RATE_MEASUREMENT_UUID) {
                Some(c) if c.notify => {
                    debug!("Enabling notifications for heart rate measurement");
                    self.spawn_subscribe(c.uuid.clone());
                }
                _ => warn!("Heart rate measurement characteristic unusable, skipping"),
            }
        }
    }

    fn on_descriptor_written(&mut self, characteristic: String) {
        let Some(kind) = CharacteristicKind::classify(&characteristic) else {
            debug!("Descriptor written for unexpected characteristic {characteristic}");
            return;
        };

        self.subscribed.push((characteristic, kind));

        if kind == CharacteristicKind::IndoorBikeData
            && self.state == ConnectionState::SubscribingNotifications
        {
            self.set_state(ConnectionState::Streaming);
        }
    }

    fn on_notification(&self, notification: &GattNotification) {
        let Some(kind) = self
            .subscribed
            .iter()
            .find(|(uuid, _)| uuid.eq_ignore_ascii_case(&notification.characteristic))
            .map(|(_, kind)| *kind)
        else {
            return;
        };

        let sample = kind.decode(&notification.value);
        if sample.valid {
            self.emit(SessionEvent::Sample(sample));
        } else {
            debug!(
                "Dropping undecodable {:?} frame: {:02X?}",
                kind, notification.value
            );
        }
    }

    fn on_failed(&mut self, state: ConnectionState, request: &LinkRequest, error: TrainerError) {
        match (state, request) {
            (ConnectionState::Connecting, LinkRequest::Connect) => {
                let error = match error {
                    TrainerError::Ble(e) => TrainerError::link(LinkErrorKind::from(&e)),
                    other => other,
                };
                self.fail(error);
            }
            (ConnectionState::DiscoveringServices, LinkRequest::DiscoverServices) => {
                self.fail(error);
            }
            (
                ConnectionState::SubscribingNotifications,
                LinkRequest::DiscoverCharacteristics(service),
            ) if is_valid_ftms_service(service) => {
                warn!("FTMS characteristic discovery failed: {error}");
                self.fail(TrainerError::ServiceInvalid);
            }
            (
                ConnectionState::SubscribingNotifications,
                LinkRequest::EnableNotifications(characteristic),
            ) if characteristic.eq_ignore_ascii_case(INDOOR_BIKE_DATA_UUID) => {
                self.fail(error);
            }
            (state, request) => {
                warn!("{request:?} failed while {state}: {error}");
            }
        }
    }

    fn fail(&mut self, error: TrainerError) {
        error!("Device session error: {error}");
        self.release();
        // The link stays up in Error; keep watching it in the new epoch
        if self.link_open {
            self.spawn_disconnect_watch();
        }
        self.set_state(ConnectionState::Error);
        self.emit(SessionEvent::Error(error.report()));
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }

        debug!("Connection state {} -> {}", self.state, state);
        self.state = state;
        self.emit(SessionEvent::StateChanged(state));
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Abort in-flight work and invalidate its completions
    fn release(&mut self) {
        self.epoch += 1;
        self.subscribed.clear();
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    async fn close_link(&mut self) {
        if !self.link_open {
            return;
        }

        self.link_open = false;
        if let Err(e) = self.link.disconnect().await {
            warn!("Failed to disconnect cleanly: {e}");
        }
    }

    fn post(tx: &mpsc::UnboundedSender<Completion>, epoch: u64, event: LinkEvent) -> bool {
        tx.send(Completion { epoch, event }).is_ok()
    }

    fn spawn_connect(&mut self, device: DeviceDescriptor) {
        let link = Arc::clone(&self.link);
        let tx = self.completion_tx.clone();
        let epoch = self.epoch;
        let limit = self.params.connect_timeout();
        let timeout_ms = self.params.connect_timeout_ms;

        self.tasks.push(tokio::spawn(async move {
            let event = match timeout(limit, link.connect(&device)).await {
                Ok(Ok(())) => LinkEvent::LinkUp,
                Ok(Err(error)) => LinkEvent::Failed {
                    request: LinkRequest::Connect,
                    error,
                },
                Err(_) => LinkEvent::Failed {
                    request: LinkRequest::Connect,
                    error: TrainerError::Timeout { timeout_ms },
                },
            };
            Self::post(&tx, epoch, event);
        }));
    }

    fn spawn_service_discovery(&mut self) {
        let link = Arc::clone(&self.link);
        let tx = self.completion_tx.clone();
        let epoch = self.epoch;
        let limit = self.params.service_discovery_timeout();
        let timeout_ms = self.params.service_discovery_timeout_ms;

        self.tasks.push(tokio::spawn(async move {
            let event = match timeout(limit, link.discover_services()).await {
                Ok(Ok(services)) => LinkEvent::ServicesDiscovered(services),
                Ok(Err(error)) => LinkEvent::Failed {
                    request: LinkRequest::DiscoverServices,
                    error,
                },
                Err(_) => LinkEvent::Failed {
                    request: LinkRequest::DiscoverServices,
                    error: TrainerError::Timeout { timeout_ms },
                },
            };
            Self::post(&tx, epoch, event);
        }));
    }

    fn spawn_characteristic_discovery(&mut self, service: String) {
        let link = Arc::clone(&self.link);
        let tx = self.completion_tx.clone();
        let epoch = self.epoch;

        self.tasks.push(tokio::spawn(async move {
            let event = match link.discover_characteristics(&service).await {
                Ok(characteristics) => LinkEvent::CharacteristicsResolved {
                    service,
                    characteristics,
                },
                Err(error) => LinkEvent::Failed {
                    request: LinkRequest::DiscoverCharacteristics(service),
                    error,
                },
            };
            Self::post(&tx, epoch, event);
        }));
    }

    fn spawn_subscribe(&mut self, characteristic: String) {
        let link = Arc::clone(&self.link);
        let tx = self.completion_tx.clone();
        let epoch = self.epoch;

        self.tasks.push(tokio::spawn(async move {
            Self::subscribe(link.as_ref(), &tx, epoch, characteristic).await;
        }));
    }

    /// Enable notifications; for Indoor Bike Data also forward the
    /// notification stream, opened before the write so no frame is missed
    async fn subscribe(
        link: &L,
        tx: &mpsc::UnboundedSender<Completion>,
        epoch: u64,
        characteristic: String,
    ) {
        let forward = characteristic.eq_ignore_ascii_case(INDOOR_BIKE_DATA_UUID);
        let failed = |error| LinkEvent::Failed {
            request: LinkRequest::EnableNotifications(characteristic.clone()),
            error,
        };

        let stream = if forward {
            match link.notifications().await {
                Ok(stream) => Some(stream),
                Err(error) => {
                    Self::post(tx, epoch, failed(error));
                    return;
                }
            }
        } else {
            None
        };

        if let Err(error) = link.enable_notifications(&characteristic).await {
            Self::post(tx, epoch, failed(error));
            return;
        }

        if !Self::post(
            tx,
            epoch,
            LinkEvent::DescriptorWritten {
                characteristic: characteristic.clone(),
            },
        ) {
            return;
        }

        if let Some(mut stream) = stream {
            while let Some(notification) = stream.next().await {
                if !Self::post(tx, epoch, LinkEvent::Notification(notification)) {
                    break;
                }
            }
            debug!("Notification stream ended");
        }
    }

    fn spawn_disconnect_watch(&mut self) {
        let link = Arc::clone(&self.link);
        let tx = self.completion_tx.clone();
        let epoch = self.epoch;

        self.tasks.push(tokio::spawn(async move {
            match link.wait_for_disconnect().await {
                Ok(()) => {
                    Self::post(&tx, epoch, LinkEvent::LinkDown);
                }
                Err(e) => debug!("Disconnect watch unavailable: {e}"),
            }
        }));
    }

    fn spawn_stall_timer(&mut self) {
        let tx = self.completion_tx.clone();
        let epoch = self.epoch;
        let limit = self.params.subscribe_timeout();

        self.tasks.push(tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            Self::post(&tx, epoch, LinkEvent::SubscribeStalled);
        }));
    }
}

fn find_characteristic<'a>(
    characteristics: &'a [CharacteristicInfo],
    uuid: &str,
) -> Option<&'a CharacteristicInfo> {
    characteristics
        .iter()
        .find(|c| c.uuid.eq_ignore_ascii_case(uuid))
}

impl<L: GattLink> Drop for DeviceSession<L> {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }

        if self.link_open {
            let link = Arc::clone(&self.link);
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = link.disconnect().await;
                });
            }
        }
    }
}
