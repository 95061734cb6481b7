//! BLE Connection Module
//!
//! Connects to a peripheral and checks its GATT topology, both bounded by
//! a timeout.

use crate::domain::models::PeripheralId;
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::{
    ConnectionHandle, ScanFilter, TopologySummary, Transport, TransportError, TransportEventSender,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Service UUID to look for
    pub service_uuid: Uuid,
    /// Characteristic commands are written to
    pub command_char_uuid: Uuid,
    /// Characteristic status notifications arrive on
    pub status_char_uuid: Uuid,
    /// Only report advertisers that list `service_uuid`
    pub scan_by_service: bool,
    pub connect_timeout: Duration,
    pub discovery_timeout: Duration,
}

impl ConnectionConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self, uuid::Error> {
        Ok(Self {
            service_uuid: Uuid::parse_str(&settings.ble_service_uuid)?,
            command_char_uuid: Uuid::parse_str(&settings.ble_command_char_uuid)?,
            status_char_uuid: Uuid::parse_str(&settings.ble_status_char_uuid)?,
            scan_by_service: settings.scan_by_service,
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            discovery_timeout: Duration::from_millis(settings.discovery_timeout_ms),
        })
    }

    pub fn scan_filter(&self) -> ScanFilter {
        ScanFilter {
            service_uuids: if self.scan_by_service {
                vec![self.service_uuid]
            } else {
                Vec::new()
            },
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            service_uuid: protocol::SERVICE_UUID,
            command_char_uuid: protocol::PEDAL_CHAR_UUID,
            status_char_uuid: protocol::PEDAL_CHAR_UUID,
            scan_by_service: false,
            connect_timeout: Duration::from_secs(10),
            discovery_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("pedal service {0} not found")]
    MissingService(Uuid),
    #[error("characteristic {0} not found")]
    MissingCharacteristic(Uuid),
    #[error("characteristic {0} does not support notifications")]
    NotNotifiable(Uuid),
    #[error("characteristic {0} does not accept writes without response")]
    NotWritable(Uuid),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("unexpected topology: {0}")]
    Topology(#[from] TopologyError),
}

/// Check that the peripheral exposes what the pedal protocol needs.
pub fn validate_topology(
    config: &ConnectionConfig,
    topology: &TopologySummary,
) -> Result<(), TopologyError> {
    if topology.service(config.service_uuid).is_none() {
        return Err(TopologyError::MissingService(config.service_uuid));
    }
    let command = topology
        .characteristic(config.service_uuid, config.command_char_uuid)
        .ok_or(TopologyError::MissingCharacteristic(config.command_char_uuid))?;
    // Commands are sent unacknowledged
    if !command.properties.write_without_response {
        return Err(TopologyError::NotWritable(config.command_char_uuid));
    }
    let status = topology
        .characteristic(config.service_uuid, config.status_char_uuid)
        .ok_or(TopologyError::MissingCharacteristic(config.status_char_uuid))?;
    if !status.properties.notify {
        return Err(TopologyError::NotNotifiable(config.status_char_uuid));
    }
    Ok(())
}

/// BLE Connection handler
pub struct BleConnection {
    transport: Arc<dyn Transport>,
    config: ConnectionConfig,
}

impl BleConnection {
    /// Create a new connection handler
    pub fn new(transport: Arc<dyn Transport>, config: ConnectionConfig) -> Self {
        Self { transport, config }
    }

    /// Connect and discover. On a discovery failure the link is torn down
    /// before returning.
    pub async fn connect(
        &self,
        id: &PeripheralId,
        events: TransportEventSender,
    ) -> Result<ConnectionHandle, ConnectionError> {
        info!("Connecting to device {}", id);

        // Step 1: Connect to BLE device
        let connection = timeout(self.config.connect_timeout, self.transport.connect(id, events))
            .await
            .map_err(|_| TransportError::Timeout("connect"))??;

        // Step 2: Get GATT services and characteristics
        match self.discover(&connection).await {
            Ok(topology) => {
                info!(
                    "Discovered {} services on {}",
                    topology.services.len(),
                    connection.peripheral
                );
                Ok(connection)
            }
            Err(e) => {
                if let Err(close_err) = self.transport.disconnect(&connection).await {
                    warn!("Failed to close link after discovery error: {}", close_err);
                }
                Err(e)
            }
        }
    }

    async fn discover(
        &self,
        connection: &ConnectionHandle,
    ) -> Result<TopologySummary, ConnectionError> {
        let topology = timeout(
            self.config.discovery_timeout,
            self.transport.discover_topology(connection),
        )
        .await
        .map_err(|_| TransportError::Timeout("service discovery"))??;

        validate_topology(&self.config, &topology)?;
        Ok(topology)
    }
}
