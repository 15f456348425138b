use crate::{
    commands::{
        CommandTable, AUTH_IDENTITY, CMD_START_RECORDING, CMD_STATUS_REQUEST, CMD_STOP_RECORDING,
        INIT_SEQUENCE,
    },
    error::{classify_connect_error, Result, TrainerError},
    events::{dispatch, DeviceEvent, EVENT_CHANNEL_CAPACITY},
    protocol::decode_notification,
    reconnect::{run_reconnect, CancelGuard, ReconnectOutcome, ReconnectState},
    state::{ConnectionState, EnforcementMode, RecordingState, StateMachine},
    transport::{ConnectOptions, DeviceDescriptor, Transport},
    types::{DeviceSettings, SessionConfig},
};
use std::{sync::Arc, time::Duration};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One device session: owns the connection lifecycle, the cached settings,
/// the recording state, and the event fan-out for a single trainer.
///
/// All state mutation happens behind one mutex on the session's event path,
/// so connection state, recording state, and cached settings never race.
/// The session owns its transport handle exclusively.
///
/// `TrainerDevice` is cheap to clone; clones share the same session. Call
/// [`TrainerDevice::shutdown`] when done so background tasks stop promptly.
///
/// # Examples
///
/// ```no_run
/// use liftlink::{BleCentral, TrainerDevice};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let central = BleCentral::new().await?;
///     let found = central.scan(Duration::from_secs(5)).await?;
///     let descriptor = found.first().ok_or("no trainer found")?.clone();
///
///     let transport = central.open(&descriptor).await?;
///     let device = TrainerDevice::new(transport, descriptor);
///     device.connect().await?;
///     device.set_weight(40).await?;
///     device.start_recording().await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct TrainerDevice {
    transport: Arc<dyn Transport>,
    descriptor: DeviceDescriptor,
    config: SessionConfig,
    commands: Arc<CommandTable>,
    inner: Arc<Mutex<SessionInner>>,
    events: broadcast::Sender<DeviceEvent>,
    guard: CancelGuard,
}

struct SessionInner {
    connection: StateMachine<ConnectionState>,
    recording: StateMachine<RecordingState>,
    settings: DeviceSettings,
    identity: Option<DeviceDescriptor>,
    reconnect: ReconnectState,
    reconnect_cancel: Option<CancelGuard>,
    pump: Option<JoinHandle<()>>,
    monitor: Option<JoinHandle<()>>,
}

impl TrainerDevice {
    /// Create a session for one device with default configuration
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, descriptor: DeviceDescriptor) -> Self {
        Self::with_config(transport, descriptor, SessionConfig::default())
    }

    /// Create a session with explicit timing and reconnect configuration
    #[must_use]
    pub fn with_config(
        transport: Arc<dyn Transport>,
        descriptor: DeviceDescriptor,
        config: SessionConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transport,
            descriptor,
            config,
            commands: Arc::new(CommandTable::new()),
            inner: Arc::new(Mutex::new(SessionInner {
                // The live session runs permissive: transport callbacks can
                // race, and a stuck state is worse than a logged anomaly.
                connection: StateMachine::new(
                    ConnectionState::Disconnected,
                    EnforcementMode::Permissive,
                    "connection",
                ),
                recording: StateMachine::new(
                    RecordingState::Idle,
                    EnforcementMode::Strict,
                    "recording",
                ),
                settings: DeviceSettings::default(),
                identity: None,
                reconnect: ReconnectState::default(),
                reconnect_cancel: None,
                pump: None,
                monitor: None,
            })),
            events,
            guard: CancelGuard::new(),
        }
    }

    /// Descriptor this session was created for
    #[must_use]
    pub const fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// Identity recorded at the last successful connect, if any
    pub async fn device_info(&self) -> Option<DeviceDescriptor> {
        self.inner.lock().await.identity.clone()
    }

    /// Subscribe to session events. Every subscriber sees every event; slow
    /// subscribers lag rather than block the session.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    /// Current connection lifecycle state
    pub async fn connection_state(&self) -> ConnectionState {
        self.inner.lock().await.connection.current()
    }

    /// Current recording state
    pub async fn recording_state(&self) -> RecordingState {
        self.inner.lock().await.recording.current()
    }

    /// Whether the session considers itself connected
    pub async fn is_connected(&self) -> bool {
        self.connection_state().await == ConnectionState::Connected
    }

    /// Cached settings snapshot
    pub async fn settings(&self) -> DeviceSettings {
        self.inner.lock().await.settings.clone()
    }

    /// Progress of the in-flight reconnect sequence, if any
    pub async fn reconnect_state(&self) -> ReconnectState {
        self.inner.lock().await.reconnect
    }

    /// Every base weight the device accepts, ascending
    #[must_use]
    pub fn available_weights(&self) -> Vec<u16> {
        self.commands.available_weights()
    }

    /// Run the full connect / authenticate / initialize sequence.
    ///
    /// The notification handler is installed before authentication so no
    /// notification is lost; the identity write is followed by a fixed wait
    /// because the device's auth acknowledgment is advisory. On failure the
    /// session tears down, settles back to `Disconnected`, broadcasts an
    /// `Error` event, and returns the classified error.
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::AlreadyConnected`] if called while connected,
    /// or the classified connect error ([`TrainerError::Timeout`],
    /// [`TrainerError::AuthFailed`], [`TrainerError::ConnectionFailed`]).
    pub async fn connect(&self) -> Result<()> {
        {
            let mut inner = self.inner.lock().await;
            if inner.connection.current() == ConnectionState::Connected {
                let err = TrainerError::AlreadyConnected;
                let _ = self.events.send(DeviceEvent::Error(err.to_string()));
                return Err(err);
            }
            if inner.connection.current() != ConnectionState::Disconnected {
                // A previous attempt is mid-flight; settle before retrying.
                inner.connection.force_state(ConnectionState::Disconnected);
            }
            inner.connection.transition(ConnectionState::Connecting)?;
        }

        info!("Connecting to {}", self.descriptor.name);

        match self.connect_sequence().await {
            Ok(()) => {
                info!("Connected to {}", self.descriptor.name);
                Ok(())
            }
            Err(e) => {
                self.teardown(false).await;
                let classified = classify_connect_error(&e);
                warn!("Connect failed: {classified}");
                let _ = self.events.send(DeviceEvent::Error(classified.to_string()));
                Err(classified)
            }
        }
    }

    async fn connect_sequence(&self) -> Result<()> {
        self.transport.connect(&ConnectOptions::default()).await?;

        // Install the notification pump before authenticating so nothing
        // sent during the handshake is lost.
        let notifications = self.transport.subscribe_notifications().await?;
        {
            let mut inner = self.inner.lock().await;
            if let Some(old) = inner.pump.take() {
                old.abort();
            }
            inner.pump = Some(self.spawn_pump(notifications));
            inner.connection.transition(ConnectionState::Authenticating)?;
        }

        self.transport.write(&AUTH_IDENTITY).await?;
        tokio::time::sleep(Duration::from_millis(self.config.auth_timeout_ms)).await;

        for command in &INIT_SEQUENCE {
            self.transport.write(command).await?;
            tokio::time::sleep(Duration::from_millis(self.config.init_command_delay_ms)).await;
        }

        {
            let mut inner = self.inner.lock().await;
            inner.identity = Some(self.descriptor.clone());
            inner.settings = DeviceSettings::default();
            inner.connection.transition(ConnectionState::Connected)?;
        }

        let _ = self.events.send(DeviceEvent::Connected);
        self.arm_disconnect_monitor().await?;
        Ok(())
    }

    fn spawn_pump(&self, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                match decode_notification(&bytes) {
                    Some(result) => {
                        let mut inner = inner.lock().await;
                        let settings = &mut inner.settings;
                        dispatch(result, settings, &events);
                    }
                    None => {
                        // Truncated or garbled frames are expected under BLE
                        // fragmentation; drop without interrupting the stream.
                        debug!("Dropping undecodable notification ({} bytes)", bytes.len());
                    }
                }
            }
        })
    }

    async fn arm_disconnect_monitor(&self) -> Result<()> {
        let mut link_events = self.transport.link_events().await?;
        let device = self.clone();

        let task = tokio::spawn(async move {
            while let Some(state) = link_events.recv().await {
                if device.guard.is_cancelled() {
                    break;
                }
                if state != crate::transport::LinkState::Disconnected {
                    continue;
                }
                // Fire only when the drop is unexpected: an intentional
                // disconnect has already moved the session off Connected.
                let was_connected = {
                    let inner = device.inner.lock().await;
                    inner.connection.current() == ConnectionState::Connected
                };
                if was_connected {
                    let handler = device.clone();
                    tokio::spawn(async move { handler.handle_unexpected_drop().await });
                    break;
                }
            }
        });

        let mut inner = self.inner.lock().await;
        if let Some(old) = inner.monitor.take() {
            old.abort();
        }
        inner.monitor = Some(task);
        Ok(())
    }

    // Boxed rather than `async fn`: this future recursively contains
    // `connect` via the reconnect loop, and the compiler cannot infer
    // `Send` through that cycle without type erasure.
    fn handle_unexpected_drop(
        &self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
        warn!("Link to {} dropped unexpectedly", self.descriptor.name);

        if !self.config.reconnect.enabled {
            self.teardown(true).await;
            return;
        }

        // Per-run guard: an explicit disconnect or disposal cancels just this
        // loop without poisoning later sessions.
        let run_guard = CancelGuard::new();
        {
            let mut inner = self.inner.lock().await;
            if inner.reconnect.is_reconnecting {
                // One reconnect sequence per session at a time.
                return;
            }
            inner.reconnect = ReconnectState {
                is_reconnecting: true,
                attempt: 0,
            };
            inner.reconnect_cancel = Some(run_guard.clone());
            inner.connection.force_state(ConnectionState::Disconnected);
            inner.recording.force_state(RecordingState::Idle);
        }
        if self.guard.is_cancelled() {
            run_guard.cancel();
        }

        let events = self.events.clone();
        let device = self.clone();
        let outcome = run_reconnect(
            &self.config.reconnect,
            &run_guard,
            |attempt, max_attempts| {
                let _ = events.send(DeviceEvent::Reconnecting {
                    attempt,
                    max_attempts,
                });
            },
            || {
                let _ = events.send(DeviceEvent::ReconnectFailed);
            },
            || {
                let d = device.clone();
                async move {
                    // Record progress before dialing so reconnect_state()
                    // reflects the attempt currently in flight.
                    {
                        let mut inner = d.inner.lock().await;
                        inner.reconnect.attempt += 1;
                    }
                    d.connect().await
                }
            },
        )
        .await;

        {
            let mut inner = self.inner.lock().await;
            inner.reconnect.is_reconnecting = false;
            inner.reconnect_cancel = None;
            inner.reconnect.attempt = match outcome {
                ReconnectOutcome::Reconnected { attempt } => attempt,
                ReconnectOutcome::Exhausted { attempts } => attempts,
                ReconnectOutcome::Cancelled => inner.reconnect.attempt,
            };
        }

        match outcome {
            // A fresh connect: settings were reset and Connected emitted by
            // the connect sequence itself.
            ReconnectOutcome::Reconnected { .. } => {}
            ReconnectOutcome::Exhausted { .. } => self.teardown(true).await,
            ReconnectOutcome::Cancelled => {}
        }
        })
    }

    /// Disconnect from the device.
    ///
    /// Stops an active recording first (best-effort, failures swallowed),
    /// then tears the link down. Idempotent: calling this on an already
    /// disconnected session is a no-op and emits no duplicate event.
    ///
    /// # Errors
    ///
    /// Currently infallible; transport disconnect failures are logged, not
    /// raised, because the session always settles into `Disconnected`.
    pub async fn disconnect(&self) -> Result<()> {
        {
            let inner = self.inner.lock().await;
            // An in-flight reconnect loop stops at its next check.
            if let Some(pending) = &inner.reconnect_cancel {
                pending.cancel();
            }
            if inner.connection.current() == ConnectionState::Disconnected {
                debug!("Disconnect requested but session already disconnected");
                return Ok(());
            }
        }

        info!("Disconnecting from {}", self.descriptor.name);

        let recording = {
            let inner = self.inner.lock().await;
            inner.recording.current()
        };
        if recording != RecordingState::Idle {
            if let Err(e) = self.transport.write(&CMD_STOP_RECORDING).await {
                warn!("Failed to stop recording during disconnect: {e}");
            }
            let mut inner = self.inner.lock().await;
            inner.recording.force_state(RecordingState::Idle);
        }

        {
            let mut inner = self.inner.lock().await;
            inner.connection.force_state(ConnectionState::Disconnecting);
        }

        if let Err(e) = self.transport.disconnect().await {
            warn!("Transport disconnect failed: {e}");
        }

        self.teardown(true).await;
        Ok(())
    }

    /// Dispose of the session.
    ///
    /// Safe to call while a connect or reconnect attempt is mid-flight: the
    /// reconnect loop stops at its next check, the notification subscription
    /// is dropped, and the session settles into `Disconnected`. The in-flight
    /// attempt's eventual result is discarded.
    pub async fn shutdown(&self) {
        self.guard.cancel();
        if let Some(pending) = self.inner.lock().await.reconnect_cancel.take() {
            pending.cancel();
        }
        let _ = self.transport.disconnect().await;
        self.teardown(false).await;
    }

    async fn teardown(&self, emit_disconnected: bool) {
        {
            let mut inner = self.inner.lock().await;
            if let Some(pump) = inner.pump.take() {
                pump.abort();
            }
            if let Some(monitor) = inner.monitor.take() {
                monitor.abort();
            }
            inner.identity = None;
            inner.connection.force_state(ConnectionState::Disconnected);
            inner.recording.force_state(RecordingState::Idle);
        }
        if emit_disconnected {
            let _ = self.events.send(DeviceEvent::Disconnected);
        }
    }

    async fn ensure_connected(&self) -> Result<()> {
        if self.is_connected().await {
            Ok(())
        } else {
            Err(TrainerError::NotConnected)
        }
    }

    async fn send_setting(&self, command: Vec<u8>, name: &'static str) -> Result<()> {
        self.transport.write(&command).await.map_err(|e| {
            warn!("{name} command failed: {e}");
            TrainerError::CommandFailed { command: name }
        })
    }

    /// Set the base resistance in kilograms.
    ///
    /// The cached setting is only updated after the write succeeds; it is
    /// never optimistically updated.
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::NotConnected`] without a connection,
    /// [`TrainerError::InvalidSetting`] (listing every supported weight) for
    /// a value outside the table, or [`TrainerError::CommandFailed`] if the
    /// write fails.
    pub async fn set_weight(&self, kg: u16) -> Result<()> {
        self.ensure_connected().await?;
        let command = self
            .commands
            .weight_command(kg)
            .ok_or_else(|| TrainerError::InvalidSetting {
                family: "weight",
                value: i64::from(kg),
                supported: self
                    .commands
                    .available_weights()
                    .into_iter()
                    .map(i64::from)
                    .collect(),
            })?
            .to_vec();

        self.send_setting(command, "set_weight").await?;
        self.inner.lock().await.settings.base_weight = Some(kg);
        Ok(())
    }

    /// Set the chain load in kilograms
    ///
    /// # Errors
    ///
    /// Same error contract as [`TrainerDevice::set_weight`].
    pub async fn set_chains(&self, kg: u16) -> Result<()> {
        self.ensure_connected().await?;
        let command = self
            .commands
            .chains_command(kg)
            .ok_or_else(|| TrainerError::InvalidSetting {
                family: "chains",
                value: i64::from(kg),
                supported: self
                    .commands
                    .available_chains()
                    .into_iter()
                    .map(i64::from)
                    .collect(),
            })?
            .to_vec();

        self.send_setting(command, "set_chains").await?;
        self.inner.lock().await.settings.chains = Some(kg);
        Ok(())
    }

    /// Set the inverse chain load in kilograms
    ///
    /// # Errors
    ///
    /// Same error contract as [`TrainerDevice::set_weight`].
    pub async fn set_inverse_chains(&self, kg: u16) -> Result<()> {
        self.ensure_connected().await?;
        let command = self
            .commands
            .inverse_chains_command(kg)
            .ok_or_else(|| TrainerError::InvalidSetting {
                family: "inverse_chains",
                value: i64::from(kg),
                supported: self
                    .commands
                    .available_inverse_chains()
                    .into_iter()
                    .map(i64::from)
                    .collect(),
            })?
            .to_vec();

        self.send_setting(command, "set_inverse_chains").await?;
        self.inner.lock().await.settings.inverse_chains = Some(kg);
        Ok(())
    }

    /// Set the eccentric overload percentage
    ///
    /// # Errors
    ///
    /// Same error contract as [`TrainerDevice::set_weight`].
    pub async fn set_eccentric(&self, percent: u16) -> Result<()> {
        self.ensure_connected().await?;
        let command = self
            .commands
            .eccentric_command(percent)
            .ok_or_else(|| TrainerError::InvalidSetting {
                family: "eccentric",
                value: i64::from(percent),
                supported: self
                    .commands
                    .available_eccentric()
                    .into_iter()
                    .map(i64::from)
                    .collect(),
            })?
            .to_vec();

        self.send_setting(command, "set_eccentric").await?;
        self.inner.lock().await.settings.eccentric = Some(percent);
        Ok(())
    }

    /// Engage a training mode
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::NotConnected`] without a connection, or
    /// [`TrainerError::CommandFailed`] if the write fails. Every mode is in
    /// the table, so the lookup itself cannot miss.
    pub async fn set_training_mode(&self, mode: crate::types::TrainingMode) -> Result<()> {
        self.ensure_connected().await?;
        let command = self.commands.training_mode_command(mode).to_vec();
        self.send_setting(command, "set_training_mode").await?;
        self.inner.lock().await.settings.training_mode = Some(mode);
        Ok(())
    }

    /// Ask the device for a fresh status notification. The answer arrives on
    /// the event stream as a [`DeviceEvent::Battery`] once decoded.
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::NotConnected`] without a connection, or
    /// [`TrainerError::CommandFailed`] if the write fails.
    pub async fn request_status(&self) -> Result<()> {
        self.ensure_connected().await?;
        self.send_setting(CMD_STATUS_REQUEST.to_vec(), "request_status")
            .await
    }

    /// Arm the device for a recording set.
    ///
    /// Walks the recording machine Idle → Preparing → Ready → Active around
    /// the start command. Recording is gated on an active connection.
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::NotConnected`] without a connection,
    /// [`TrainerError::InvalidTransition`] if a recording is already in
    /// progress, or [`TrainerError::CommandFailed`] if the start command
    /// fails (the recording state is rolled back to Idle).
    pub async fn start_recording(&self) -> Result<()> {
        self.ensure_connected().await?;
        {
            let mut inner = self.inner.lock().await;
            inner.recording.transition(RecordingState::Preparing)?;
        }

        if let Err(e) = self.transport.write(&CMD_START_RECORDING).await {
            warn!("start_recording command failed: {e}");
            self.inner
                .lock()
                .await
                .recording
                .force_state(RecordingState::Idle);
            return Err(TrainerError::CommandFailed {
                command: "start_recording",
            });
        }

        let mut inner = self.inner.lock().await;
        inner.recording.transition(RecordingState::Ready)?;
        inner.recording.transition(RecordingState::Active)?;
        info!("Recording started");
        Ok(())
    }

    /// End the active recording set.
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::NotConnected`] without a connection,
    /// [`TrainerError::InvalidTransition`] if no recording is active, or
    /// [`TrainerError::CommandFailed`] if the stop command fails (the
    /// recording stays Active so the caller can retry).
    pub async fn stop_recording(&self) -> Result<()> {
        self.ensure_connected().await?;
        {
            let mut inner = self.inner.lock().await;
            inner.recording.transition(RecordingState::Stopping)?;
        }

        if let Err(e) = self.transport.write(&CMD_STOP_RECORDING).await {
            warn!("stop_recording command failed: {e}");
            self.inner
                .lock()
                .await
                .recording
                .force_state(RecordingState::Active);
            return Err(TrainerError::CommandFailed {
                command: "stop_recording",
            });
        }

        let mut inner = self.inner.lock().await;
        inner.recording.transition(RecordingState::Idle)?;
        info!("Recording stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_settings_update, encode_telemetry_frame, PARAM_BASE_WEIGHT};
    use crate::reconnect::ReconnectConfig;
    use crate::transport::LinkState;
    use crate::types::{MovementPhase, TelemetryFrame, TrainingMode};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::SystemTime;
    use tokio::time::timeout;

    const RECV_TIMEOUT: Duration = Duration::from_secs(2);

    #[derive(Default)]
    struct MockTransport {
        connected: AtomicBool,
        fail_connect_with: StdMutex<Option<String>>,
        fail_writes: AtomicBool,
        writes: StdMutex<Vec<Vec<u8>>>,
        notification_tx: StdMutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
        link_tx: StdMutex<Option<mpsc::UnboundedSender<LinkState>>>,
    }

    impl MockTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn push_notification(&self, bytes: Vec<u8>) {
            let tx = self.notification_tx.lock().unwrap();
            tx.as_ref()
                .expect("no notification subscriber")
                .send(bytes)
                .unwrap();
        }

        fn push_link_drop(&self) {
            self.connected.store(false, Ordering::SeqCst);
            let tx = self.link_tx.lock().unwrap();
            tx.as_ref()
                .expect("no link subscriber")
                .send(LinkState::Disconnected)
                .unwrap();
        }

        fn recorded_writes(&self) -> Vec<Vec<u8>> {
            self.writes.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Transport for MockTransport {
        async fn connect(&self, _options: &ConnectOptions) -> Result<()> {
            if let Some(message) = self.fail_connect_with.lock().unwrap().clone() {
                return Err(TrainerError::ConnectionFailed(message));
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn write(&self, data: &[u8]) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(TrainerError::ConnectionFailed("write failed".to_string()));
            }
            self.writes.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn subscribe_notifications(&self) -> Result<mpsc::UnboundedReceiver<Vec<u8>>> {
            let (tx, rx) = mpsc::unbounded_channel();
            *self.notification_tx.lock().unwrap() = Some(tx);
            Ok(rx)
        }

        async fn link_events(&self) -> Result<mpsc::UnboundedReceiver<LinkState>> {
            let (tx, rx) = mpsc::unbounded_channel();
            *self.link_tx.lock().unwrap() = Some(tx);
            Ok(rx)
        }
    }

    fn fast_config(reconnect_enabled: bool) -> SessionConfig {
        SessionConfig {
            auth_timeout_ms: 1,
            init_command_delay_ms: 1,
            reconnect: ReconnectConfig {
                enabled: reconnect_enabled,
                max_attempts: 3,
                delay_ms: 1,
            },
        }
    }

    fn descriptor() -> DeviceDescriptor {
        DeviceDescriptor {
            id: "AA:BB:CC:DD:EE:FF".to_string(),
            name: "Trainer".to_string(),
            rssi: -48,
        }
    }

    fn session(reconnect_enabled: bool) -> (Arc<MockTransport>, TrainerDevice) {
        let transport = MockTransport::new();
        let device = TrainerDevice::with_config(
            transport.clone(),
            descriptor(),
            fast_config(reconnect_enabled),
        );
        (transport, device)
    }

    async fn recv_event(rx: &mut broadcast::Receiver<DeviceEvent>) -> DeviceEvent {
        timeout(RECV_TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_connect_runs_auth_then_init_sequence() {
        let (transport, device) = session(false);
        let mut events = device.subscribe();

        device.connect().await.unwrap();

        assert_eq!(
            device.connection_state().await,
            ConnectionState::Connected
        );
        assert_eq!(recv_event(&mut events).await, DeviceEvent::Connected);
        assert_eq!(device.device_info().await.unwrap().name, "Trainer");

        let writes = transport.recorded_writes();
        assert_eq!(writes[0], AUTH_IDENTITY.to_vec());
        for (i, init) in INIT_SEQUENCE.iter().enumerate() {
            assert_eq!(writes[i + 1], init.to_vec());
        }
    }

    #[tokio::test]
    async fn test_connect_rejects_when_already_connected() {
        let (_transport, device) = session(false);
        device.connect().await.unwrap();
        assert!(matches!(
            device.connect().await,
            Err(TrainerError::AlreadyConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_failure_is_classified_and_broadcast() {
        let (transport, device) = session(false);
        *transport.fail_connect_with.lock().unwrap() =
            Some("GATT connect timed out".to_string());
        let mut events = device.subscribe();

        let err = device.connect().await.unwrap_err();
        match &err {
            TrainerError::Timeout(msg) => assert!(msg.contains("GATT connect timed out")),
            e => panic!("unexpected classification: {e}"),
        }
        assert_eq!(
            device.connection_state().await,
            ConnectionState::Disconnected
        );
        assert!(matches!(recv_event(&mut events).await, DeviceEvent::Error(_)));
    }

    #[tokio::test]
    async fn test_connect_auth_failure_classification() {
        let (transport, device) = session(false);
        *transport.fail_connect_with.lock().unwrap() =
            Some("device refused auth handshake".to_string());

        let err = device.connect().await.unwrap_err();
        assert!(matches!(err, TrainerError::AuthFailed(_)));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (_transport, device) = session(false);
        device.connect().await.unwrap();

        let mut events = device.subscribe();
        device.disconnect().await.unwrap();
        assert_eq!(recv_event(&mut events).await, DeviceEvent::Disconnected);

        // Second disconnect: no-op, no duplicate event.
        device.disconnect().await.unwrap();
        assert!(events.try_recv().is_err());
        assert_eq!(
            device.connection_state().await,
            ConnectionState::Disconnected
        );
    }

    #[tokio::test]
    async fn test_disconnect_without_connect_is_a_no_op() {
        let (_transport, device) = session(false);
        device.disconnect().await.unwrap();
        assert_eq!(
            device.connection_state().await,
            ConnectionState::Disconnected
        );
    }

    #[tokio::test]
    async fn test_set_weight_requires_connection() {
        let (_transport, device) = session(false);
        assert!(matches!(
            device.set_weight(50).await,
            Err(TrainerError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_set_weight_invalid_value_reports_supported_set() {
        let (_transport, device) = session(false);
        device.connect().await.unwrap();

        match device.set_weight(3).await {
            Err(TrainerError::InvalidSetting {
                family,
                value,
                supported,
            }) => {
                assert_eq!(family, "weight");
                assert_eq!(value, 3);
                assert!(supported.contains(&5));
                assert!(supported.contains(&200));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        // The cache stays untouched on failure.
        assert_eq!(device.settings().await.base_weight, None);
    }

    #[tokio::test]
    async fn test_set_weight_updates_cache_after_write() {
        let (transport, device) = session(false);
        device.connect().await.unwrap();

        device.set_weight(40).await.unwrap();
        assert_eq!(device.settings().await.base_weight, Some(40));
        assert!(transport
            .recorded_writes()
            .iter()
            .any(|w| w[0] == 0xC5 && w[4..6] == 40u16.to_le_bytes()));
    }

    #[tokio::test]
    async fn test_set_weight_write_failure_leaves_cache() {
        let (transport, device) = session(false);
        device.connect().await.unwrap();

        transport.fail_writes.store(true, Ordering::SeqCst);
        match device.set_weight(40).await {
            Err(TrainerError::CommandFailed { command }) => {
                assert_eq!(command, "set_weight");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(device.settings().await.base_weight, None);
    }

    #[tokio::test]
    async fn test_set_training_mode_updates_cache() {
        let (_transport, device) = session(false);
        device.connect().await.unwrap();
        device
            .set_training_mode(TrainingMode::Isometric)
            .await
            .unwrap();
        assert_eq!(
            device.settings().await.training_mode,
            Some(TrainingMode::Isometric)
        );
    }

    #[tokio::test]
    async fn test_telemetry_notification_reaches_subscriber() {
        let (transport, device) = session(false);
        device.connect().await.unwrap();
        let mut events = device.subscribe();

        let frame = TelemetryFrame {
            sequence: 7,
            phase: MovementPhase::Concentric,
            position: 320,
            force: -15,
            velocity: 88,
            timestamp: SystemTime::now(),
        };
        transport.push_notification(encode_telemetry_frame(&frame).to_vec());

        match recv_event(&mut events).await {
            DeviceEvent::Frame(received) => assert_eq!(received, frame),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_settings_notification_merges_cache() {
        let (transport, device) = session(false);
        device.connect().await.unwrap();
        let mut events = device.subscribe();

        transport.push_notification(encode_settings_update(&[(PARAM_BASE_WEIGHT, 65)]));

        match recv_event(&mut events).await {
            DeviceEvent::SettingsUpdated(snapshot) => {
                assert_eq!(snapshot.base_weight, Some(65));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(device.settings().await.base_weight, Some(65));
    }

    #[tokio::test]
    async fn test_garbled_notification_is_dropped_silently() {
        let (transport, device) = session(false);
        device.connect().await.unwrap();
        let mut events = device.subscribe();

        transport.push_notification(vec![0xDE, 0xAD, 0xBE, 0xEF]);
        // A valid marker after the garbage proves the pump kept running.
        transport.push_notification(crate::protocol::HEADER_REP_SUMMARY.to_vec());

        assert_eq!(recv_event(&mut events).await, DeviceEvent::RepComplete);
    }

    #[tokio::test]
    async fn test_unexpected_drop_without_reconnect_emits_disconnected() {
        let (transport, device) = session(false);
        device.connect().await.unwrap();
        let mut events = device.subscribe();

        transport.push_link_drop();

        assert_eq!(recv_event(&mut events).await, DeviceEvent::Disconnected);
        assert_eq!(
            device.connection_state().await,
            ConnectionState::Disconnected
        );
    }

    #[tokio::test]
    async fn test_unexpected_drop_triggers_reconnect() {
        let (transport, device) = session(true);
        device.connect().await.unwrap();
        let mut events = device.subscribe();

        transport.push_link_drop();

        assert_eq!(
            recv_event(&mut events).await,
            DeviceEvent::Reconnecting {
                attempt: 1,
                max_attempts: 3
            }
        );
        assert_eq!(recv_event(&mut events).await, DeviceEvent::Connected);
        assert!(device.is_connected().await);
        assert!(!device.reconnect_state().await.is_reconnecting);
    }

    #[tokio::test]
    async fn test_request_status_round_trip() {
        let (transport, device) = session(false);
        device.connect().await.unwrap();
        let mut events = device.subscribe();

        device.request_status().await.unwrap();
        assert!(transport
            .recorded_writes()
            .contains(&CMD_STATUS_REQUEST.to_vec()));

        // The device answers with a battery status frame.
        transport.push_notification(vec![0xE2, 0x02, 77, 0x00]);
        assert_eq!(recv_event(&mut events).await, DeviceEvent::Battery(77));
    }

    #[tokio::test]
    async fn test_disconnect_cancels_reconnect_loop() {
        let transport = MockTransport::new();
        let device = TrainerDevice::with_config(
            transport.clone(),
            descriptor(),
            SessionConfig {
                auth_timeout_ms: 1,
                init_command_delay_ms: 1,
                reconnect: ReconnectConfig {
                    enabled: true,
                    max_attempts: 50,
                    delay_ms: 20,
                },
            },
        );
        device.connect().await.unwrap();
        let mut events = device.subscribe();

        // Keep every reconnect attempt failing so the loop would run long.
        *transport.fail_connect_with.lock().unwrap() = Some("link down".to_string());
        transport.push_link_drop();

        loop {
            if matches!(
                recv_event(&mut events).await,
                DeviceEvent::Reconnecting { .. }
            ) {
                break;
            }
        }

        device.disconnect().await.unwrap();

        // The loop observes the cancel at its next check.
        timeout(RECV_TIMEOUT, async {
            while device.reconnect_state().await.is_reconnecting {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("reconnect loop did not stop after disconnect");
        assert_eq!(
            device.connection_state().await,
            ConnectionState::Disconnected
        );
    }

    #[tokio::test]
    async fn test_reconnect_attempt_counter_visible_mid_flight() {
        let transport = MockTransport::new();
        let device = TrainerDevice::with_config(
            transport.clone(),
            descriptor(),
            SessionConfig {
                auth_timeout_ms: 1,
                init_command_delay_ms: 1,
                reconnect: ReconnectConfig {
                    enabled: true,
                    max_attempts: 50,
                    delay_ms: 20,
                },
            },
        );
        device.connect().await.unwrap();
        let mut events = device.subscribe();

        *transport.fail_connect_with.lock().unwrap() = Some("link down".to_string());
        transport.push_link_drop();

        // Once the second attempt is announced, the first has already run
        // and been counted.
        loop {
            if matches!(
                recv_event(&mut events).await,
                DeviceEvent::Reconnecting { attempt: 2, .. }
            ) {
                break;
            }
        }
        let state = device.reconnect_state().await;
        assert!(state.is_reconnecting);
        assert!(state.attempt >= 1);

        device.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_recording_lifecycle() {
        let (transport, device) = session(false);
        device.connect().await.unwrap();

        device.start_recording().await.unwrap();
        assert_eq!(device.recording_state().await, RecordingState::Active);
        assert!(transport
            .recorded_writes()
            .contains(&CMD_START_RECORDING.to_vec()));

        // Double-start is rejected by the strict recording machine.
        assert!(matches!(
            device.start_recording().await,
            Err(TrainerError::InvalidTransition { .. })
        ));

        device.stop_recording().await.unwrap();
        assert_eq!(device.recording_state().await, RecordingState::Idle);
        assert!(transport
            .recorded_writes()
            .contains(&CMD_STOP_RECORDING.to_vec()));
    }

    #[tokio::test]
    async fn test_recording_requires_connection() {
        let (_transport, device) = session(false);
        assert!(matches!(
            device.start_recording().await,
            Err(TrainerError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_stops_active_recording() {
        let (transport, device) = session(false);
        device.connect().await.unwrap();
        device.start_recording().await.unwrap();

        device.disconnect().await.unwrap();
        assert_eq!(device.recording_state().await, RecordingState::Idle);
        assert!(transport
            .recorded_writes()
            .contains(&CMD_STOP_RECORDING.to_vec()));
    }

    #[tokio::test]
    async fn test_shutdown_mid_session() {
        let (_transport, device) = session(true);
        device.connect().await.unwrap();

        device.shutdown().await;
        assert_eq!(
            device.connection_state().await,
            ConnectionState::Disconnected
        );
        assert!(device.device_info().await.is_none());
    }

    #[tokio::test]
    async fn test_settings_reset_on_reconnect() {
        let (transport, device) = session(true);
        device.connect().await.unwrap();
        device.set_weight(40).await.unwrap();
        assert_eq!(device.settings().await.base_weight, Some(40));

        let mut events = device.subscribe();
        transport.push_link_drop();
        // Wait for the fresh connect to complete.
        loop {
            if recv_event(&mut events).await == DeviceEvent::Connected {
                break;
            }
        }

        // A reconnect is a fresh connect, not a resume.
        assert_eq!(device.settings().await.base_weight, None);
    }
}
