//! Presentation boundary
//!
//! [`PedalController`] runs the Connection Manager on its own thread and
//! exposes the actions presentation may call. State flows back as
//! [`AppEvent`]s, which [`PresentationState::apply`] folds into the
//! values a UI renders.

use crate::domain::models::{
    AppEvent, ConnectionState, DeviceSummary, OutboundCommand, PeripheralId, StatusMessage,
    StatusSignal,
};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::connection::ConnectionConfig;
use crate::infrastructure::bluetooth::{ConnectionManager, ControllerError, ManagerCommand, Transport};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::error;

pub struct PedalController {
    command_tx: mpsc::UnboundedSender<ManagerCommand>,
    worker: Option<JoinHandle<()>>,
}

impl PedalController {
    /// Start the Bluetooth worker thread.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        settings: &Settings,
    ) -> anyhow::Result<(Self, mpsc::UnboundedReceiver<AppEvent>)> {
        let config = ConnectionConfig::from_settings(settings)?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let manager =
            ConnectionManager::new(transport, config, settings.name_filters.clone(), event_tx);

        let worker = std::thread::Builder::new()
            .name("bluetooth".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!("Failed to create tokio runtime for Bluetooth: {}", e);
                        return;
                    }
                };
                rt.block_on(manager.run(command_rx));
            })?;

        Ok((
            Self {
                command_tx,
                worker: Some(worker),
            },
            event_rx,
        ))
    }

    fn send(&self, command: ManagerCommand) -> Result<(), ControllerError> {
        self.command_tx
            .send(command)
            .map_err(|_| ControllerError::ControllerStopped)
    }

    pub fn start_scan(&self) -> Result<(), ControllerError> {
        self.send(ManagerCommand::StartScan)
    }

    pub fn stop_scan(&self) -> Result<(), ControllerError> {
        self.send(ManagerCommand::StopScan)
    }

    pub fn select_device(&self, id: PeripheralId) -> Result<(), ControllerError> {
        self.send(ManagerCommand::SelectDevice(id))
    }

    pub fn send_command(&self, command: OutboundCommand) -> Result<(), ControllerError> {
        self.send(ManagerCommand::SendCommand(command))
    }

    pub fn disconnect(&self) -> Result<(), ControllerError> {
        self.send(ManagerCommand::Disconnect)
    }

    /// Disconnect, stop the worker and wait for it to exit.
    pub fn shutdown(mut self) {
        self.stop_worker();
    }

    fn stop_worker(&mut self) {
        let _ = self.command_tx.send(ManagerCommand::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Bluetooth worker panicked");
            }
        }
    }
}

impl Drop for PedalController {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

/// What presentation renders, rebuilt from [`AppEvent`]s.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresentationState {
    pub registry: Vec<DeviceSummary>,
    pub connection_state: ConnectionState,
    pub status_signal: StatusSignal,
    pub last_message: Option<StatusMessage>,
    pub permission_denied: bool,
}

impl PresentationState {
    pub fn apply(&mut self, event: &AppEvent) {
        match event {
            AppEvent::RegistryChanged(devices) => self.registry = devices.clone(),
            AppEvent::ConnectionState(state) => {
                self.connection_state = *state;
                if *state == ConnectionState::Scanning {
                    self.permission_denied = false;
                }
            }
            AppEvent::StatusSignal(signal) => self.status_signal = *signal,
            AppEvent::PedalEcho(_) => {}
            AppEvent::PermissionDenied => self.permission_denied = true,
            AppEvent::LogMessage(message) => self.last_message = Some(message.clone()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state == ConnectionState::Connected
    }
}
