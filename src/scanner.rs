use futures::StreamExt;
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    classifier::is_fitness_device,
    error::TrainerError,
    link::{DiscoveryRadio, RadioDiscovery},
    types::{DeviceDescriptor, ScanEvent, ScanParams, ScanState},
};

#[derive(Debug)]
enum ScanCompletion {
    Found(DeviceDescriptor),
    TimedOut,
    Ended,
    Failed(TrainerError),
}

/// Time-bounded discovery of fitness devices
///
/// Every device the radio reports is run through [`is_fitness_device`];
/// accepted ones are kept in [`DeviceScanner::candidates`] and announced
/// with [`ScanEvent::Discovered`] as they arrive. A scan ends on timeout, on
/// [`DeviceScanner::stop`], or when the radio fails, and always leaves the
/// scanner `Idle`.
///
/// Like the session, radio results are posted back and applied by
/// [`DeviceScanner::process_next`] on the owner's task.
pub struct DeviceScanner<R: DiscoveryRadio> {
    radio: Arc<R>,
    params: ScanParams,
    state: ScanState,
    candidates: Vec<DeviceDescriptor>,
    epoch: u64,
    completion_tx: mpsc::UnboundedSender<(u64, ScanCompletion)>,
    completion_rx: mpsc::UnboundedReceiver<(u64, ScanCompletion)>,
    event_tx: mpsc::UnboundedSender<ScanEvent>,
    task: Option<JoinHandle<()>>,
    pending_stop: Option<JoinHandle<()>>,
}

impl<R: DiscoveryRadio> DeviceScanner<R> {
    /// Create an idle scanner and the receiver of its events
    pub fn new(radio: Arc<R>, params: ScanParams) -> (Self, mpsc::UnboundedReceiver<ScanEvent>) {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let scanner = Self {
            radio,
            params,
            state: ScanState::Idle,
            candidates: Vec::new(),
            epoch: 0,
            completion_tx,
            completion_rx,
            event_tx,
            task: None,
            pending_stop: None,
        };

        (scanner, event_rx)
    }

    /// Current scan state
    #[must_use]
    pub const fn state(&self) -> ScanState {
        self.state
    }

    /// Whether a scan is running
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.state == ScanState::Scanning
    }

    /// Fitness devices accepted during the current or last scan
    #[must_use]
    pub fn candidates(&self) -> &[DeviceDescriptor] {
        &self.candidates
    }

    /// Scan parameters
    #[must_use]
    pub const fn params(&self) -> &ScanParams {
        &self.params
    }

    /// Begin a scan
    ///
    /// No-op while already scanning. Clears the previous candidates. If the
    /// radio refuses to start, a [`ScanEvent::Error`] is emitted and the
    /// scanner stays `Idle`.
    pub async fn start(&mut self) {
        if self.is_scanning() {
            debug!("Scan already running");
            return;
        }

        // A stop still in flight must not land on the new scan
        if let Some(stop) = self.pending_stop.take() {
            let _ = stop.await;
        }

        self.candidates.clear();

        let stream = match self.radio.start_discovery().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to start discovery: {e}");
                self.emit(ScanEvent::Error(e.report()));
                return;
            }
        };

        info!(
            "🔍 Scanning for fitness devices ({}ms)",
            self.params.scan_timeout_ms
        );
        self.epoch += 1;
        self.state = ScanState::Scanning;

        let tx = self.completion_tx.clone();
        let epoch = self.epoch;
        let limit = self.params.scan_timeout();

        self.task = Some(tokio::spawn(async move {
            let mut stream = stream;
            let deadline = tokio::time::sleep(limit);
            tokio::pin!(deadline);

            loop {
                let completion = tokio::select! {
                    () = &mut deadline => ScanCompletion::TimedOut,
                    item = stream.next() => match item {
                        Some(RadioDiscovery::Found(device)) => ScanCompletion::Found(device),
                        Some(RadioDiscovery::Failed(e)) => ScanCompletion::Failed(e),
                        None => ScanCompletion::Ended,
                    },
                };

                let last = !matches!(completion, ScanCompletion::Found(_));
                if tx.send((epoch, completion)).is_err() || last {
                    break;
                }
            }
        }));
    }

    /// End a running scan early
    ///
    /// No-op while `Idle`. Emits [`ScanEvent::Finished`] with the number of
    /// candidates found so far.
    pub async fn stop(&mut self) {
        if !self.is_scanning() {
            return;
        }

        self.abort();
        self.finish();
        if let Err(e) = self.radio.stop_discovery().await {
            warn!("Failed to stop discovery: {e}");
        }
    }

    /// Wait for the next radio result and apply it
    ///
    /// Returns `false` when the result belonged to an earlier scan. Cancel
    /// safe: a result is either fully applied or left in the queue.
    pub async fn process_next(&mut self) -> bool {
        let Some((epoch, completion)) = self.completion_rx.recv().await else {
            return false;
        };

        if epoch != self.epoch || !self.is_scanning() {
            debug!("Discarding stale discovery result");
            return false;
        }

        // Nothing below awaits, so dropping this future never loses a transition
        match completion {
            ScanCompletion::Found(device) => self.on_device_found(device),
            ScanCompletion::TimedOut => {
                debug!("Scan timed out");
                self.abort();
                self.finish();
                self.spawn_stop_radio();
            }
            ScanCompletion::Ended => {
                self.abort();
                self.finish();
            }
            ScanCompletion::Failed(e) => {
                warn!("Discovery failed: {e}");
                self.abort();
                self.state = ScanState::Idle;
                self.emit(ScanEvent::Error(e.report()));
                self.spawn_stop_radio();
            }
        }
        true
    }

    fn on_device_found(&mut self, device: DeviceDescriptor) {
        if !is_fitness_device(&device) {
            debug!("Skipping non-fitness device: {:?}", device.name);
            return;
        }

        if self.params.deduplicate_by_address {
            if let Some(known) = self
                .candidates
                .iter_mut()
                .find(|c| c.address == device.address)
            {
                *known = device;
                return;
            }
        }

        info!("📱 Found device: {} ({})", device.name, device.address);
        self.candidates.push(device.clone());
        self.emit(ScanEvent::Discovered(device));
    }

    fn finish(&mut self) {
        self.state = ScanState::Idle;
        info!(
            "Scan finished, {} fitness device(s) found",
            self.candidates.len()
        );
        self.emit(ScanEvent::Finished {
            count: self.candidates.len(),
        });
    }

    fn abort(&mut self) {
        self.epoch += 1;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn spawn_stop_radio(&mut self) {
        let radio = Arc::clone(&self.radio);
        self.pending_stop = Some(tokio::spawn(async move {
            if let Err(e) = radio.stop_discovery().await {
                warn!("Failed to stop discovery: {e}");
            }
        }));
    }

    fn emit(&self, event: ScanEvent) {
        let _ = self.event_tx.send(event);
    }
}

impl<R: DiscoveryRadio> Drop for DeviceScanner<R> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
