//! Connection Manager
//!
//! Coordinates scanning, connection, the status stream and outbound
//! commands for a single pedal. Presentation actions arrive as
//! [`ManagerCommand`]s and transport callbacks as [`TransportEvent`]s;
//! [`ConnectionManager::run`] handles both from one task, so all state
//! changes are serialized.
//!
//! ```text
//!  Idle ──startScan──▶ Scanning ──selectDevice──▶ Connecting ──ok──▶ Connected
//!   ▲                    │  ▲                         │                 │
//!   └──stop/disconnect───┘  └──────startScan─────┐    │ error       link lost /
//!                                                │    ▼             disconnect
//!                                           Disconnected ◀─────────────┘
//! ```

use crate::domain::models::{
    AppEvent, ConnectionState, DeviceSummary, MessageSeverity, OutboundCommand, PeripheralId,
    StatusMessage, StatusSignal,
};
use crate::domain::registry::{DeviceRegistry, NameFilter};
use crate::infrastructure::bluetooth::{
    commands::CommandSender,
    connection::{BleConnection, ConnectionConfig, ConnectionError},
    notifications::{decode_status, NotificationOutcome, NotificationStreamHandler},
    scanner::BleScanner,
    transport::{ConnectionHandle, Transport, TransportEvent, TransportEventSender},
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ControllerError {
    #[error("bluetooth permissions were not granted")]
    PermissionDenied,
    #[error("the bluetooth worker has stopped")]
    ControllerStopped,
}

/// Actions presentation can request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerCommand {
    StartScan,
    StopScan,
    SelectDevice(PeripheralId),
    SendCommand(OutboundCommand),
    Disconnect,
    Shutdown,
}

pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    config: ConnectionConfig,
    registry: DeviceRegistry,
    scanner: BleScanner,
    notifications: NotificationStreamHandler,
    commands: CommandSender,

    state: ConnectionState,
    status: StatusSignal,
    connection: Option<ConnectionHandle>,

    event_sender: mpsc::UnboundedSender<AppEvent>,
    transport_tx: TransportEventSender,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: ConnectionConfig,
        name_filters: Vec<NameFilter>,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        Self {
            scanner: BleScanner::new(transport.clone(), config.scan_filter()),
            notifications: NotificationStreamHandler::new(
                transport.clone(),
                config.service_uuid,
                config.status_char_uuid,
            ),
            commands: CommandSender::new(
                transport.clone(),
                config.service_uuid,
                config.command_char_uuid,
            ),
            registry: DeviceRegistry::new(name_filters),
            transport,
            config,
            state: ConnectionState::Idle,
            status: StatusSignal::default(),
            connection: None,
            event_sender,
            transport_tx,
            transport_rx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn status_signal(&self) -> StatusSignal {
        self.status
    }

    pub fn registry(&self) -> Vec<DeviceSummary> {
        self.registry.summaries()
    }

    /// Process commands and transport callbacks until `Shutdown` arrives or
    /// every command sender is dropped.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<ManagerCommand>) {
        info!("Connection manager started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(ManagerCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = self.transport_rx.recv() => {
                    self.handle_transport_event(event).await;
                }
            }
        }
        self.shutdown().await;
        info!("Connection manager stopped");
    }

    pub async fn handle_command(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::StartScan => {
                // Already reported through AppEvent::PermissionDenied
                let _ = self.start_scan().await;
            }
            ManagerCommand::StopScan => self.stop_scan().await,
            ManagerCommand::SelectDevice(id) => self.select_device(&id).await,
            ManagerCommand::SendCommand(command) => {
                self.send_command(command).await;
            }
            ManagerCommand::Disconnect => self.disconnect().await,
            ManagerCommand::Shutdown => self.shutdown().await,
        }
    }

    /// Handle every transport callback already queued. Returns how many
    /// were handled.
    pub async fn process_pending_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.transport_rx.try_recv() {
            self.handle_transport_event(event).await;
            handled += 1;
        }
        handled
    }

    /// Begin a new scan session with an empty registry.
    pub async fn start_scan(&mut self) -> Result<(), ControllerError> {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            warn!("Scan requested while {:?}; disconnect first", self.state);
            self.log("Disconnect before scanning again", MessageSeverity::Warning);
            return Ok(());
        }

        if !self.transport.request_permissions().await {
            warn!("Bluetooth permissions not granted");
            self.emit(AppEvent::PermissionDenied);
            self.log("Bluetooth permissions were not granted", MessageSeverity::Error);
            return Err(ControllerError::PermissionDenied);
        }

        self.registry.clear();
        self.publish_registry();

        match self.scanner.start(self.transport_tx.clone()).await {
            Ok(()) => {
                self.log("Scanning for pedals...", MessageSeverity::Info);
                self.set_state(ConnectionState::Scanning);
            }
            Err(e) => {
                error!("Failed to start scan: {}", e);
                self.log(format!("Failed to start scan: {}", e), MessageSeverity::Error);
                // A restart stops the previous scan before failing
                if self.state == ConnectionState::Scanning {
                    self.set_state(ConnectionState::Idle);
                }
            }
        }
        Ok(())
    }

    pub async fn stop_scan(&mut self) {
        self.stop_scanner().await;
        if self.state == ConnectionState::Scanning {
            self.registry.clear();
            self.publish_registry();
            self.set_state(ConnectionState::Idle);
        }
    }

    /// Connect to a device from the current scan session.
    pub async fn select_device(&mut self, id: &PeripheralId) {
        if self.state != ConnectionState::Scanning {
            warn!("Ignoring device selection while {:?}", self.state);
            return;
        }
        let Some(device) = self.registry.get(id).cloned() else {
            warn!("Selected device {} is not in the registry", id);
            return;
        };

        self.registry.clear();
        self.publish_registry();
        self.set_state(ConnectionState::Connecting);
        self.log(
            format!("Connecting to {}...", device.display_name()),
            MessageSeverity::Info,
        );

        let connection = BleConnection::new(self.transport.clone(), self.config.clone());
        match connection.connect(&device.id, self.transport_tx.clone()).await {
            Ok(connection) => self.on_connected(connection, &device.display_name()).await,
            Err(e) => self.on_connect_failed(e).await,
        }
    }

    async fn on_connected(&mut self, connection: ConnectionHandle, name: &str) {
        self.stop_scanner().await;

        if let Err(e) = self
            .notifications
            .subscribe(&connection, self.transport_tx.clone())
            .await
        {
            if let Err(close_err) = self.transport.disconnect(&connection).await {
                warn!("Failed to close link: {}", close_err);
            }
            self.on_connect_failed(e.into()).await;
            return;
        }

        info!("Connected to device {}", name);
        self.connection = Some(connection);
        self.log(format!("Connected to {}", name), MessageSeverity::Success);
        self.set_state(ConnectionState::Connected);
    }

    async fn on_connect_failed(&mut self, e: ConnectionError) {
        error!("Failed to connect: {}", e);
        self.stop_scanner().await;
        self.connection = None;
        self.log(format!("Connection failed: {}", e), MessageSeverity::Error);
        self.set_state(ConnectionState::Disconnected);
    }

    /// Send a command to the pedal. No-op unless connected.
    pub async fn send_command(&mut self, command: OutboundCommand) -> bool {
        self.commands
            .send(self.state, self.connection.as_ref(), command)
            .await
    }

    pub async fn disconnect(&mut self) {
        match self.state {
            ConnectionState::Connected => {
                self.notifications.cancel().await;
                if let Some(connection) = self.connection.take() {
                    if let Err(e) = self.transport.disconnect(&connection).await {
                        warn!("Failed to disconnect cleanly: {}", e);
                    }
                }
                info!("Disconnected from device");
                self.log("Disconnected from device", MessageSeverity::Info);
                self.set_state(ConnectionState::Disconnected);
            }
            ConnectionState::Scanning => self.stop_scan().await,
            _ => debug!("Nothing to disconnect ({:?})", self.state),
        }
    }

    async fn shutdown(&mut self) {
        self.disconnect().await;
        self.stop_scanner().await;
    }

    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::ScanResult(Ok(candidate)) => {
                if self.state != ConnectionState::Scanning {
                    return;
                }
                let name = candidate.display_name();
                if self.registry.observe(candidate) {
                    info!("Discovered {} ({} devices)", name, self.registry.len());
                    self.publish_registry();
                }
            }
            TransportEvent::ScanResult(Err(e)) => {
                warn!("Scan error: {}", e);
            }
            TransportEvent::Notification {
                subscription,
                result,
            } => {
                if self.state != ConnectionState::Connected
                    || !self.notifications.is_current(subscription)
                {
                    debug!("Dropping notification from stale subscription {:?}", subscription);
                    return;
                }
                match decode_status(result) {
                    NotificationOutcome::Discarded(reason) => {
                        warn!("{}", reason);
                        self.log(reason, MessageSeverity::Warning);
                    }
                    NotificationOutcome::Status { signal, echo } => {
                        if let Some(command) = echo {
                            self.emit(AppEvent::PedalEcho(command));
                        }
                        if signal != self.status {
                            debug!("Status changed: {:?} -> {:?}", self.status, signal);
                            self.status = signal;
                            self.emit(AppEvent::StatusSignal(signal));
                        }
                    }
                }
            }
            TransportEvent::LinkLost { connection } => {
                if self.connection.as_ref() != Some(&connection) {
                    debug!("Ignoring link loss for stale connection {}", connection.id);
                    return;
                }
                warn!("Lost connection to {}", connection.peripheral);
                self.notifications.cancel().await;
                self.connection = None;
                self.log("Connection lost", MessageSeverity::Warning);
                self.set_state(ConnectionState::Disconnected);
            }
        }
    }

    async fn stop_scanner(&mut self) {
        if let Err(e) = self.scanner.stop().await {
            warn!("Failed to stop scan: {}", e);
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        info!("Connection state: {:?} -> {:?}", self.state, state);
        self.state = state;
        self.emit(AppEvent::ConnectionState(state));
    }

    fn publish_registry(&self) {
        self.emit(AppEvent::RegistryChanged(self.registry.summaries()));
    }

    fn log(&self, message: impl Into<String>, severity: MessageSeverity) {
        self.emit(AppEvent::LogMessage(StatusMessage::new(message, severity)));
    }

    fn emit(&self, event: AppEvent) {
        let _ = self.event_sender.send(event);
    }
}
