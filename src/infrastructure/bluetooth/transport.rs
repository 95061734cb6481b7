//! Transport Adapter contract
//!
//! The wireless-link stack the rest of the crate is written against.
//! Platform callbacks (scan results, notifications, link loss) are not
//! closures: backends push them as [`TransportEvent`] values into the
//! sender they are handed, so the Connection Manager consumes every
//! callback from one queue.

use crate::domain::models::{PeripheralHandle, PeripheralId};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("bluetooth adapter unavailable: {0}")]
    Unavailable(String),
    #[error("scan failed: {0}")]
    Scan(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("service discovery failed: {0}")]
    Discovery(String),
    #[error("subscribe failed: {0}")]
    Subscribe(String),
    #[error("write failed: {0}")]
    Write(String),
    #[error("disconnect failed: {0}")]
    Disconnect(String),
    #[error("{0} timed out")]
    Timeout(&'static str),
}

/// An established link to a peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub id: u64,
    pub peripheral: PeripheralId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// Scan-level filtering passed down to the platform. Name filtering is
/// done by the registry, not here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanFilter {
    pub service_uuids: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharacteristicProperties {
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicInfo>,
}

/// Services and characteristics found on a connected peripheral.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologySummary {
    pub services: Vec<ServiceInfo>,
}

impl TopologySummary {
    pub fn service(&self, uuid: Uuid) -> Option<&ServiceInfo> {
        self.services.iter().find(|s| s.uuid == uuid)
    }

    pub fn characteristic(&self, service: Uuid, characteristic: Uuid) -> Option<&CharacteristicInfo> {
        self.service(service)?
            .characteristics
            .iter()
            .find(|c| c.uuid == characteristic)
    }
}

/// Asynchronous callback delivered by a transport backend.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    ScanResult(Result<PeripheralHandle, TransportError>),
    /// `Ok(None)` means the callback fired without a value.
    Notification {
        subscription: SubscriptionHandle,
        result: Result<Option<String>, TransportError>,
    },
    LinkLost {
        connection: ConnectionHandle,
    },
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// The platform wireless-link stack.
///
/// Payloads crossing this boundary are in the transport's text-safe
/// (base64) representation; see [`super::protocol`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Ask for whatever permissions scanning and connecting need.
    async fn request_permissions(&self) -> bool;

    /// Start delivering [`TransportEvent::ScanResult`]s to `events`.
    async fn start_scan(
        &self,
        filter: &ScanFilter,
        events: TransportEventSender,
    ) -> Result<(), TransportError>;

    /// Must succeed when no scan is running.
    async fn stop_scan(&self) -> Result<(), TransportError>;

    /// Connect to a peripheral. Link loss is reported on `events`.
    async fn connect(
        &self,
        id: &PeripheralId,
        events: TransportEventSender,
    ) -> Result<ConnectionHandle, TransportError>;

    async fn discover_topology(
        &self,
        connection: &ConnectionHandle,
    ) -> Result<TopologySummary, TransportError>;

    async fn write_characteristic(
        &self,
        connection: &ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
        payload: &str,
        mode: WriteMode,
    ) -> Result<(), TransportError>;

    /// Deliver [`TransportEvent::Notification`]s for the characteristic to `events`.
    async fn subscribe_characteristic(
        &self,
        connection: &ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
        events: TransportEventSender,
    ) -> Result<SubscriptionHandle, TransportError>;

    async fn unsubscribe(&self, subscription: SubscriptionHandle) -> Result<(), TransportError>;

    async fn disconnect(&self, connection: &ConnectionHandle) -> Result<(), TransportError>;
}
