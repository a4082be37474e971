use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::{
    ble::{BtleplugLink, BtleplugRadio},
    error::Result,
    link::{DiscoveryRadio, GattLink},
    scanner::DeviceScanner,
    session::DeviceSession,
    types::{
        ConnectionParams, ConnectionState, DeviceDescriptor, ScanEvent, ScanParams, ScanState,
        SessionEvent,
    },
};

type LinkFactory<L> = Box<dyn Fn() -> L + Send + Sync>;

/// Owns the scanner and at most one device session
///
/// Connecting to a new device always disconnects and drops the previous
/// session first, so there is never more than one live link.
pub struct TrainerManager<R: DiscoveryRadio, L: GattLink> {
    scanner: DeviceScanner<R>,
    session: Option<DeviceSession<L>>,
    new_link: LinkFactory<L>,
    connection_params: ConnectionParams,
}

impl TrainerManager<BtleplugRadio, BtleplugLink> {
    /// Manager over the first local Bluetooth adapter, with default parameters
    ///
    /// # Errors
    ///
    /// Returns [`crate::TrainerError::AdapterUnavailable`] when no adapter is
    /// present or the Bluetooth stack cannot be opened.
    pub async fn with_btleplug() -> Result<(Self, mpsc::UnboundedReceiver<ScanEvent>)> {
        Self::with_btleplug_params(ScanParams::default(), ConnectionParams::default()).await
    }

    /// Manager over the first local Bluetooth adapter
    ///
    /// # Errors
    ///
    /// See [`TrainerManager::with_btleplug`].
    pub async fn with_btleplug_params(
        scan_params: ScanParams,
        connection_params: ConnectionParams,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ScanEvent>)> {
        let radio = BtleplugRadio::new().await?;
        let adapter = radio.adapter().clone();

        Ok(Self::new(
            radio,
            move || BtleplugLink::new(adapter.clone()),
            scan_params,
            connection_params,
        ))
    }
}

impl<R: DiscoveryRadio, L: GattLink> TrainerManager<R, L> {
    /// Create a manager from a radio and a factory producing one link per session
    pub fn new(
        radio: R,
        new_link: impl Fn() -> L + Send + Sync + 'static,
        scan_params: ScanParams,
        connection_params: ConnectionParams,
    ) -> (Self, mpsc::UnboundedReceiver<ScanEvent>) {
        let (scanner, scan_events) = DeviceScanner::new(Arc::new(radio), scan_params);

        let manager = Self {
            scanner,
            session: None,
            new_link: Box::new(new_link),
            connection_params,
        };

        (manager, scan_events)
    }

    /// The device scanner
    #[must_use]
    pub const fn scanner(&self) -> &DeviceScanner<R> {
        &self.scanner
    }

    /// The current session, if any
    #[must_use]
    pub const fn session(&self) -> Option<&DeviceSession<L>> {
        self.session.as_ref()
    }

    /// Connection state of the current session, `Disconnected` without one
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.session
            .as_ref()
            .map_or(ConnectionState::Disconnected, DeviceSession::state)
    }

    /// Start scanning for fitness devices
    pub async fn start_scan(&mut self) {
        self.scanner.start().await;
    }

    /// Stop a running scan
    pub async fn stop_scan(&mut self) {
        self.scanner.stop().await;
    }

    /// Run a full scan and return the fitness devices found
    ///
    /// Scan events are still delivered to the scan receiver.
    pub async fn scan_to_completion(&mut self) -> Vec<DeviceDescriptor> {
        self.scanner.start().await;
        while self.scanner.state() == ScanState::Scanning {
            self.scanner.process_next().await;
        }
        self.scanner.candidates().to_vec()
    }

    /// Connect to `device` in a fresh session
    ///
    /// Any previous session is disconnected and dropped first. A running scan
    /// is stopped. Returns the receiver for the new session's events.
    pub async fn connect_to(
        &mut self,
        device: DeviceDescriptor,
    ) -> mpsc::UnboundedReceiver<SessionEvent> {
        self.stop_scan().await;
        self.disconnect().await;

        let (mut session, events) =
            DeviceSession::new((self.new_link)(), self.connection_params.clone());
        session.connect_to_device(device).await;
        self.session = Some(session);

        events
    }

    /// Disconnect and drop the current session
    pub async fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Some(device) = session.device() {
                info!("Releasing session for {}", device.name);
            }
            session.disconnect_from_device().await;
        }
    }

    /// Apply the next pending scanner or session completion
    ///
    /// Waits until one of them has work; drive this in the owner's loop.
    /// Cancel safe, so it can sit in a `select!` next to other work.
    pub async fn process_next(&mut self) {
        match self.session.as_mut() {
            Some(session) => {
                tokio::select! {
                    _ = self.scanner.process_next() => {}
                    _ = session.process_next() => {}
                }
            }
            None => {
                self.scanner.process_next().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        link::GattNotification,
        test_support::{
            drain, speaker, strap, trainer, trainer_link, FakeLink, FakeLinkScript, FakeRadio,
        },
        INDOOR_BIKE_DATA_UUID,
    };
    use std::{sync::Mutex, time::Duration};
    use tokio::time::Instant;

    fn manager() -> (TrainerManager<FakeRadio, FakeLink>, mpsc::UnboundedReceiver<ScanEvent>) {
        TrainerManager::new(
            FakeRadio::default(),
            trainer_link,
            ScanParams {
                scan_timeout_ms: 50,
                ..ScanParams::default()
            },
            ConnectionParams::default(),
        )
    }

    async fn pump(manager: &mut TrainerManager<FakeRadio, FakeLink>) {
        while tokio::time::timeout(Duration::from_millis(100), manager.process_next())
            .await
            .is_ok()
        {}
    }

    #[tokio::test]
    async fn test_scan_to_completion_returns_candidates() {
        let (mut manager, mut events) = manager();
        manager.start_scan().await;
        assert!(manager.scanner().is_scanning());
        manager.stop_scan().await;
        drain(&mut events);

        let devices = tokio_test::assert_ok!(
            tokio::time::timeout(Duration::from_secs(1), manager.scan_to_completion()).await
        );

        assert!(devices.is_empty());
        assert_eq!(
            drain(&mut events).last(),
            Some(&ScanEvent::Finished { count: 0 })
        );
    }

    #[tokio::test]
    async fn test_connect_reaches_streaming() {
        let (mut manager, _scan_events) = manager();
        assert_eq!(manager.connection_state(), ConnectionState::Disconnected);

        let mut events = manager.connect_to(trainer()).await;
        pump(&mut manager).await;

        assert_eq!(manager.connection_state(), ConnectionState::Streaming);
        assert!(drain(&mut events)
            .iter()
            .any(|e| *e == SessionEvent::StateChanged(ConnectionState::Streaming)));
    }

    #[tokio::test]
    async fn test_connect_replaces_previous_session() {
        let (mut manager, _scan_events) = manager();

        let mut first = manager.connect_to(trainer()).await;
        pump(&mut manager).await;
        drain(&mut first);

        let _second = manager.connect_to(strap()).await;

        assert_eq!(
            drain(&mut first),
            vec![SessionEvent::StateChanged(ConnectionState::Disconnected)]
        );
        assert_eq!(
            manager.session().and_then(DeviceSession::device),
            Some(&strap())
        );
    }

    #[tokio::test]
    async fn test_disconnect_drops_session() {
        let (mut manager, _scan_events) = manager();

        manager.connect_to(speaker()).await;
        manager.disconnect().await;
        manager.disconnect().await;

        assert!(manager.session().is_none());
        assert_eq!(manager.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_scan_finishes_while_session_streams() {
        let link = FakeLink::new(FakeLinkScript::trainer());
        let feed = link.notification_feed();
        let slot = Mutex::new(Some(link));
        let (mut manager, mut scan_events) = TrainerManager::new(
            FakeRadio::with_stop_delay(Duration::from_millis(200)),
            move || slot.lock().unwrap().take().unwrap(),
            ScanParams {
                scan_timeout_ms: 30,
                ..ScanParams::default()
            },
            ConnectionParams::default(),
        );

        let mut session_events = manager.connect_to(trainer()).await;
        pump(&mut manager).await;
        assert_eq!(manager.connection_state(), ConnectionState::Streaming);

        manager.start_scan().await;
        drain(&mut scan_events);

        let frames = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(Duration::from_millis(10));
            loop {
                ticks.tick().await;
                let frame = GattNotification {
                    characteristic: INDOOR_BIKE_DATA_UUID.to_string(),
                    value: vec![0x40, 0x00, 0x64, 0x00, 0xC8, 0x00],
                };
                if feed.unbounded_send(frame).is_err() {
                    break;
                }
            }
        });

        let deadline = Instant::now() + Duration::from_millis(500);
        while Instant::now() < deadline {
            let _ = tokio::time::timeout(Duration::from_millis(20), manager.process_next()).await;
        }
        frames.abort();

        assert_eq!(manager.scanner().state(), ScanState::Idle);
        assert_eq!(
            drain(&mut scan_events),
            vec![ScanEvent::Finished { count: 0 }]
        );
        assert!(drain(&mut session_events)
            .iter()
            .any(|e| matches!(e, SessionEvent::Sample(s) if s.power_watts == 200)));
    }
}
