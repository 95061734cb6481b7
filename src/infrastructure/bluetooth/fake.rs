//! Scripted in-memory transport for tests.

use crate::domain::models::{PeripheralHandle, PeripheralId};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::{
    CharacteristicInfo, CharacteristicProperties, ConnectionHandle, ScanFilter, ServiceInfo,
    SubscriptionHandle, TopologySummary, Transport, TransportError, TransportEvent,
    TransportEventSender, WriteMode,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedWrite {
    pub service: Uuid,
    pub characteristic: Uuid,
    pub payload: String,
    pub mode: WriteMode,
}

struct FakeState {
    permission_granted: bool,
    scan_error: Option<TransportError>,
    advertisers: Vec<PeripheralHandle>,
    connect_delay: Duration,
    connect_error: Option<TransportError>,
    discovery: Result<TopologySummary, TransportError>,
    subscribe_error: Option<TransportError>,
    write_error: Option<TransportError>,

    scan_events: Option<TransportEventSender>,
    link_events: Option<(ConnectionHandle, TransportEventSender)>,
    notify_events: Option<(SubscriptionHandle, TransportEventSender)>,
    // Kept after disconnect so tests can replay stale events
    last_events: Option<TransportEventSender>,

    next_id: u64,
    start_scan_calls: usize,
    last_scan_filter: ScanFilter,
    stop_scan_calls: usize,
    connect_calls: usize,
    writes: Vec<RecordedWrite>,
    unsubscribed: Vec<SubscriptionHandle>,
    disconnected: Vec<ConnectionHandle>,
}

/// Cloning shares the underlying script and recordings.
#[derive(Clone)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

/// Topology exposing the pedal service with its single characteristic.
pub fn pedal_topology() -> TopologySummary {
    TopologySummary {
        services: vec![ServiceInfo {
            uuid: protocol::SERVICE_UUID,
            characteristics: vec![CharacteristicInfo {
                uuid: protocol::PEDAL_CHAR_UUID,
                properties: CharacteristicProperties {
                    write: true,
                    write_without_response: true,
                    notify: true,
                },
            }],
        }],
    }
}

pub fn advertiser(id: &str, name: &str) -> PeripheralHandle {
    PeripheralHandle {
        id: id.into(),
        local_name: Some(name.to_string()),
        name: Some(name.to_string()),
    }
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                permission_granted: true,
                scan_error: None,
                advertisers: Vec::new(),
                connect_delay: Duration::ZERO,
                connect_error: None,
                discovery: Ok(pedal_topology()),
                subscribe_error: None,
                write_error: None,
                scan_events: None,
                link_events: None,
                notify_events: None,
                last_events: None,
                next_id: 1,
                start_scan_calls: 0,
                last_scan_filter: ScanFilter::default(),
                stop_scan_calls: 0,
                connect_calls: 0,
                writes: Vec::new(),
                unsubscribed: Vec::new(),
                disconnected: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn deny_permissions(&self) {
        self.lock().permission_granted = false;
    }

    /// Peripherals reported as soon as a scan starts.
    pub fn with_advertisers(self, advertisers: Vec<PeripheralHandle>) -> Self {
        self.lock().advertisers = advertisers;
        self
    }

    pub fn fail_scan(&self, error: TransportError) {
        self.lock().scan_error = Some(error);
    }

    pub fn fail_connect(&self, error: TransportError) {
        self.lock().connect_error = Some(error);
    }

    pub fn delay_connect(&self, delay: Duration) {
        self.lock().connect_delay = delay;
    }

    pub fn set_discovery(&self, discovery: Result<TopologySummary, TransportError>) {
        self.lock().discovery = discovery;
    }

    pub fn fail_subscribe(&self, error: TransportError) {
        self.lock().subscribe_error = Some(error);
    }

    pub fn fail_writes(&self, error: TransportError) {
        self.lock().write_error = Some(error);
    }

    pub fn advertise(&self, handle: PeripheralHandle) {
        self.emit_scan(Ok(handle));
    }

    pub fn emit_scan(&self, result: Result<PeripheralHandle, TransportError>) {
        if let Some(tx) = &self.lock().scan_events {
            let _ = tx.send(TransportEvent::ScanResult(result));
        }
    }

    /// Push a notification on the active subscription.
    pub fn notify(&self, result: Result<Option<String>, TransportError>) {
        let state = self.lock();
        if let Some((subscription, tx)) = &state.notify_events {
            let _ = tx.send(TransportEvent::Notification {
                subscription: *subscription,
                result,
            });
        }
    }

    /// Push a notification tagged with any subscription, current or not.
    pub fn notify_on(
        &self,
        subscription: SubscriptionHandle,
        result: Result<Option<String>, TransportError>,
    ) {
        if let Some(tx) = &self.lock().last_events {
            let _ = tx.send(TransportEvent::Notification {
                subscription,
                result,
            });
        }
    }

    pub fn emit_link_lost(&self, connection: ConnectionHandle) {
        if let Some(tx) = &self.lock().last_events {
            let _ = tx.send(TransportEvent::LinkLost { connection });
        }
    }

    pub fn current_subscription(&self) -> Option<SubscriptionHandle> {
        self.lock().notify_events.as_ref().map(|(subscription, _)| *subscription)
    }

    pub fn notify_value(&self, payload: &str) {
        self.notify(Ok(Some(payload.to_string())));
    }

    pub fn drop_link(&self) {
        let state = self.lock();
        if let Some((connection, tx)) = &state.link_events {
            let _ = tx.send(TransportEvent::LinkLost {
                connection: connection.clone(),
            });
        }
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    pub fn start_scan_calls(&self) -> usize {
        self.lock().start_scan_calls
    }

    pub fn last_scan_filter(&self) -> ScanFilter {
        self.lock().last_scan_filter.clone()
    }

    pub fn stop_scan_calls(&self) -> usize {
        self.lock().stop_scan_calls
    }

    pub fn connect_calls(&self) -> usize {
        self.lock().connect_calls
    }

    pub fn unsubscribed(&self) -> Vec<SubscriptionHandle> {
        self.lock().unsubscribed.clone()
    }

    pub fn disconnected(&self) -> Vec<ConnectionHandle> {
        self.lock().disconnected.clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn request_permissions(&self) -> bool {
        self.lock().permission_granted
    }

    async fn start_scan(
        &self,
        filter: &ScanFilter,
        events: TransportEventSender,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.start_scan_calls += 1;
        state.last_scan_filter = filter.clone();
        if let Some(error) = state.scan_error.clone() {
            return Err(error);
        }
        for handle in &state.advertisers {
            let _ = events.send(TransportEvent::ScanResult(Ok(handle.clone())));
        }
        state.scan_events = Some(events);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.stop_scan_calls += 1;
        state.scan_events = None;
        Ok(())
    }

    async fn connect(
        &self,
        id: &PeripheralId,
        events: TransportEventSender,
    ) -> Result<ConnectionHandle, TransportError> {
        let delay = {
            let mut state = self.lock();
            state.connect_calls += 1;
            state.connect_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if let Some(error) = state.connect_error.clone() {
            return Err(error);
        }
        let connection = ConnectionHandle {
            id: state.next_id,
            peripheral: id.clone(),
        };
        state.next_id += 1;
        state.last_events = Some(events.clone());
        state.link_events = Some((connection.clone(), events));
        Ok(connection)
    }

    async fn discover_topology(
        &self,
        _connection: &ConnectionHandle,
    ) -> Result<TopologySummary, TransportError> {
        self.lock().discovery.clone()
    }

    async fn write_characteristic(
        &self,
        _connection: &ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
        payload: &str,
        mode: WriteMode,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.writes.push(RecordedWrite {
            service,
            characteristic,
            payload: payload.to_string(),
            mode,
        });
        match state.write_error.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn subscribe_characteristic(
        &self,
        _connection: &ConnectionHandle,
        _service: Uuid,
        _characteristic: Uuid,
        events: TransportEventSender,
    ) -> Result<SubscriptionHandle, TransportError> {
        let mut state = self.lock();
        if let Some(error) = state.subscribe_error.clone() {
            return Err(error);
        }
        let subscription = SubscriptionHandle(state.next_id);
        state.next_id += 1;
        state.notify_events = Some((subscription, events));
        Ok(subscription)
    }

    async fn unsubscribe(&self, subscription: SubscriptionHandle) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.unsubscribed.push(subscription);
        if matches!(&state.notify_events, Some((current, _)) if *current == subscription) {
            state.notify_events = None;
        }
        Ok(())
    }

    async fn disconnect(&self, connection: &ConnectionHandle) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.disconnected.push(connection.clone());
        state.link_events = None;
        Ok(())
    }
}
