//! Windows Runtime transport
//!
//! [`Transport`] backed by the WinRT Bluetooth LE APIs. WinRT event
//! handlers run on thread-pool threads; they only forward
//! [`TransportEvent`]s into the channel they were given.

use crate::domain::models::{PeripheralHandle, PeripheralId};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::{
    CharacteristicInfo, CharacteristicProperties, ConnectionHandle, ScanFilter, ServiceInfo,
    SubscriptionHandle, TopologySummary, Transport, TransportError, TransportEvent,
    TransportEventSender, WriteMode,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;
use windows::core::GUID;
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEScanningMode,
};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattCharacteristicProperties,
    GattClientCharacteristicConfigurationDescriptorValue, GattCommunicationStatus, GattSession,
    GattValueChangedEventArgs, GattWriteOption,
};
use windows::Devices::Bluetooth::{
    BluetoothAdapter, BluetoothConnectionStatus, BluetoothLEDevice,
};
use windows::Devices::Radios::RadioState;
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, DataWriter, IBuffer};

struct ActiveLink {
    device: BluetoothLEDevice,
    // Keeps the link up while we hold it
    _session: Option<GattSession>,
    status_token: i64,
    characteristics: HashMap<(Uuid, Uuid), GattCharacteristic>,
}

struct ActiveSubscription {
    characteristic: GattCharacteristic,
    token: i64,
}

#[derive(Default)]
struct WinRtState {
    watcher: Option<BluetoothLEAdvertisementWatcher>,
    next_id: u64,
    links: HashMap<u64, ActiveLink>,
    subscriptions: HashMap<u64, ActiveSubscription>,
}

#[derive(Default)]
pub struct WinRtTransport {
    state: Mutex<WinRtState>,
}

fn to_uuid(guid: GUID) -> Uuid {
    Uuid::from_u128(guid.to_u128())
}

fn to_guid(uuid: Uuid) -> GUID {
    GUID::from_u128(uuid.as_u128())
}

fn parse_address(id: &PeripheralId) -> Result<u64, TransportError> {
    u64::from_str_radix(&id.0, 16)
        .map_err(|_| TransportError::Connect(format!("invalid bluetooth address: {}", id)))
}

fn read_buffer(buffer: &IBuffer) -> windows::core::Result<Vec<u8>> {
    let reader = DataReader::FromBuffer(buffer)?;
    let length = reader.UnconsumedBufferLength()? as usize;
    let mut bytes = vec![0u8; length];
    reader.ReadBytes(&mut bytes)?;
    Ok(bytes)
}

fn scan_result(args: &BluetoothLEAdvertisementReceivedEventArgs) -> windows::core::Result<PeripheralHandle> {
    let name = args.Advertisement()?.LocalName()?.to_string();
    let address = args.BluetoothAddress()?;
    // WinRT only reports the advertised local name; it doubles as the device name.
    let name = if name.is_empty() { None } else { Some(name) };
    Ok(PeripheralHandle {
        id: PeripheralId(format!("{:012X}", address)),
        local_name: name.clone(),
        name,
    })
}

impl WinRtTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, WinRtState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn characteristic(
        &self,
        connection: &ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
    ) -> Option<GattCharacteristic> {
        self.lock()
            .links
            .get(&connection.id)?
            .characteristics
            .get(&(service, characteristic))
            .cloned()
    }

    fn start_watcher(
        &self,
        filter: &ScanFilter,
        events: TransportEventSender,
    ) -> windows::core::Result<BluetoothLEAdvertisementWatcher> {
        let watcher = BluetoothLEAdvertisementWatcher::new()?;
        watcher.SetScanningMode(BluetoothLEScanningMode::Active)?;

        let wanted: Vec<GUID> = filter.service_uuids.iter().copied().map(to_guid).collect();

        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    if !wanted.is_empty() {
                        let service_uuids = args.Advertisement()?.ServiceUuids()?;
                        let mut found = false;
                        for i in 0..service_uuids.Size()? {
                            if wanted.contains(&service_uuids.GetAt(i)?) {
                                found = true;
                                break;
                            }
                        }
                        if !found {
                            return Ok(());
                        }
                    }
                    let result = scan_result(args)
                        .map_err(|e| TransportError::Scan(e.to_string()));
                    let _ = events.send(TransportEvent::ScanResult(result));
                }
                Ok(())
            },
        );

        watcher.Received(&handler)?;
        watcher.Start()?;
        Ok(watcher)
    }

    async fn open_link(
        &self,
        address: u64,
        peripheral: PeripheralId,
        events: TransportEventSender,
    ) -> windows::core::Result<(BluetoothLEDevice, Option<GattSession>, i64, u64)> {
        let device = BluetoothLEDevice::FromBluetoothAddressAsync(address)?.await?;
        info!("Device connected: {:?}", device.Name()?);

        let session = match GattSession::FromDeviceIdAsync(&device.BluetoothDeviceId()?)?.await {
            Ok(session) => {
                session.SetMaintainConnection(true)?;
                Some(session)
            }
            Err(e) => {
                warn!("Failed to create GattSession, continuing anyway: {}", e);
                None
            }
        };

        let id = {
            let mut state = self.lock();
            state.next_id += 1;
            state.next_id
        };
        let status_handler =
            TypedEventHandler::new(move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
                if let Some(dev) = dev.as_ref() {
                    if dev.ConnectionStatus()? == BluetoothConnectionStatus::Disconnected {
                        let _ = events.send(TransportEvent::LinkLost {
                            connection: ConnectionHandle {
                                id,
                                peripheral: peripheral.clone(),
                            },
                        });
                    }
                }
                Ok(())
            });
        let status_token = device.ConnectionStatusChanged(&status_handler)?;

        Ok((device, session, status_token, id))
    }

    async fn read_topology(
        device: &BluetoothLEDevice,
    ) -> Result<(TopologySummary, HashMap<(Uuid, Uuid), GattCharacteristic>), TransportError> {
        let fail = |e: windows::core::Error| TransportError::Discovery(e.to_string());

        let services_result = device.GetGattServicesAsync().map_err(fail)?.await.map_err(fail)?;
        let status = services_result.Status().map_err(fail)?;
        if status != GattCommunicationStatus::Success {
            return Err(TransportError::Discovery(format!(
                "failed to get GATT services: {:?}",
                status
            )));
        }

        let mut topology = TopologySummary::default();
        let mut handles = HashMap::new();

        let services = services_result.Services().map_err(fail)?;
        for i in 0..services.Size().map_err(fail)? {
            let service = services.GetAt(i).map_err(fail)?;
            let service_uuid = to_uuid(service.Uuid().map_err(fail)?);

            let chars_result = service
                .GetCharacteristicsAsync()
                .map_err(fail)?
                .await
                .map_err(fail)?;
            let status = chars_result.Status().map_err(fail)?;
            if status != GattCommunicationStatus::Success {
                debug!("Skipping service {}: {:?}", service_uuid, status);
                continue;
            }

            let mut info = ServiceInfo {
                uuid: service_uuid,
                characteristics: Vec::new(),
            };
            let characteristics = chars_result.Characteristics().map_err(fail)?;
            for j in 0..characteristics.Size().map_err(fail)? {
                let c = characteristics.GetAt(j).map_err(fail)?;
                let uuid = to_uuid(c.Uuid().map_err(fail)?);
                let props = c.CharacteristicProperties().map_err(fail)?;
                info.characteristics.push(CharacteristicInfo {
                    uuid,
                    properties: CharacteristicProperties {
                        write: props.contains(GattCharacteristicProperties::Write),
                        write_without_response: props
                            .contains(GattCharacteristicProperties::WriteWithoutResponse),
                        notify: props.contains(GattCharacteristicProperties::Notify),
                    },
                });
                handles.insert((service_uuid, uuid), c);
            }
            topology.services.push(info);
        }

        Ok((topology, handles))
    }
}

#[async_trait]
impl Transport for WinRtTransport {
    async fn request_permissions(&self) -> bool {
        let adapter = match BluetoothAdapter::GetDefaultAsync() {
            Ok(op) => op.await,
            Err(e) => Err(e),
        };
        let adapter = match adapter {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!("No Bluetooth adapter: {}", e);
                return false;
            }
        };
        if !adapter.IsLowEnergySupported().unwrap_or(false) {
            warn!("Bluetooth adapter does not support LE");
            return false;
        }
        let radio = match adapter.GetRadioAsync() {
            Ok(op) => op.await,
            Err(e) => Err(e),
        };
        match radio.and_then(|radio| radio.State()) {
            Ok(RadioState::On) => true,
            Ok(state) => {
                warn!("Bluetooth radio is {:?}", state);
                false
            }
            Err(e) => {
                warn!("Could not query Bluetooth radio: {}", e);
                false
            }
        }
    }

    async fn start_scan(
        &self,
        filter: &ScanFilter,
        events: TransportEventSender,
    ) -> Result<(), TransportError> {
        self.stop_scan().await?;
        let watcher = self
            .start_watcher(filter, events)
            .map_err(|e| TransportError::Scan(e.to_string()))?;
        self.lock().watcher = Some(watcher);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        let watcher = self.lock().watcher.take();
        if let Some(watcher) = watcher {
            watcher
                .Stop()
                .map_err(|e| TransportError::Scan(e.to_string()))?;
        }
        Ok(())
    }

    async fn connect(
        &self,
        id: &PeripheralId,
        events: TransportEventSender,
    ) -> Result<ConnectionHandle, TransportError> {
        let address = parse_address(id)?;
        let (device, session, status_token, connection_id) = self
            .open_link(address, id.clone(), events)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        self.lock().links.insert(
            connection_id,
            ActiveLink {
                device,
                _session: session,
                status_token,
                characteristics: HashMap::new(),
            },
        );
        Ok(ConnectionHandle {
            id: connection_id,
            peripheral: id.clone(),
        })
    }

    async fn discover_topology(
        &self,
        connection: &ConnectionHandle,
    ) -> Result<TopologySummary, TransportError> {
        let device = self
            .lock()
            .links
            .get(&connection.id)
            .map(|link| link.device.clone())
            .ok_or_else(|| TransportError::Discovery("connection is closed".to_string()))?;

        let (topology, handles) = Self::read_topology(&device).await?;

        if let Some(link) = self.lock().links.get_mut(&connection.id) {
            link.characteristics = handles;
        }
        Ok(topology)
    }

    async fn write_characteristic(
        &self,
        connection: &ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
        payload: &str,
        mode: WriteMode,
    ) -> Result<(), TransportError> {
        let target = self
            .characteristic(connection, service, characteristic)
            .ok_or_else(|| TransportError::Write(format!("unknown characteristic {}", characteristic)))?;
        let bytes = protocol::from_wire(payload).map_err(|e| TransportError::Write(e.to_string()))?;

        let write = || -> windows::core::Result<_> {
            let writer = DataWriter::new()?;
            writer.WriteBytes(&bytes)?;
            let buffer = writer.DetachBuffer()?;
            let option = match mode {
                WriteMode::WithResponse => GattWriteOption::WriteWithResponse,
                WriteMode::WithoutResponse => GattWriteOption::WriteWithoutResponse,
            };
            target.WriteValueWithOptionAsync(&buffer, option)
        };
        let operation = write().map_err(|e| TransportError::Write(e.to_string()))?;

        match mode {
            // Fire-and-forget write
            WriteMode::WithoutResponse => Ok(()),
            WriteMode::WithResponse => {
                let status = operation
                    .await
                    .map_err(|e| TransportError::Write(e.to_string()))?;
                if status == GattCommunicationStatus::Success {
                    Ok(())
                } else {
                    Err(TransportError::Write(format!("{:?}", status)))
                }
            }
        }
    }

    async fn subscribe_characteristic(
        &self,
        connection: &ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
        events: TransportEventSender,
    ) -> Result<SubscriptionHandle, TransportError> {
        let target = self
            .characteristic(connection, service, characteristic)
            .ok_or_else(|| {
                TransportError::Subscribe(format!("unknown characteristic {}", characteristic))
            })?;

        let status = match target.WriteClientCharacteristicConfigurationDescriptorAsync(
            GattClientCharacteristicConfigurationDescriptorValue::Notify,
        ) {
            Ok(op) => op.await,
            Err(e) => Err(e),
        }
        .map_err(|e| TransportError::Subscribe(e.to_string()))?;
        if status != GattCommunicationStatus::Success {
            return Err(TransportError::Subscribe(format!("{:?}", status)));
        }

        let id = {
            let mut state = self.lock();
            state.next_id += 1;
            state.next_id
        };
        let subscription = SubscriptionHandle(id);

        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<GattCharacteristic>,
                  args: windows::core::Ref<GattValueChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let result = args
                        .CharacteristicValue()
                        .and_then(|value| read_buffer(&value))
                        .map(|bytes| (!bytes.is_empty()).then(|| protocol::to_wire(&bytes)))
                        .map_err(|e| TransportError::Subscribe(e.to_string()));
                    let _ = events.send(TransportEvent::Notification {
                        subscription,
                        result,
                    });
                }
                Ok(())
            },
        );
        let token = target
            .ValueChanged(&handler)
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;

        self.lock().subscriptions.insert(
            id,
            ActiveSubscription {
                characteristic: target,
                token,
            },
        );
        Ok(subscription)
    }

    async fn unsubscribe(&self, subscription: SubscriptionHandle) -> Result<(), TransportError> {
        let Some(active) = self.lock().subscriptions.remove(&subscription.0) else {
            return Ok(());
        };
        active
            .characteristic
            .RemoveValueChanged(active.token)
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;

        match active
            .characteristic
            .WriteClientCharacteristicConfigurationDescriptorAsync(
                GattClientCharacteristicConfigurationDescriptorValue::None,
            ) {
            Ok(op) => {
                if let Err(e) = op.await {
                    debug!("Failed to clear notification descriptor: {}", e);
                }
            }
            Err(e) => debug!("Failed to clear notification descriptor: {}", e),
        }
        Ok(())
    }

    async fn disconnect(&self, connection: &ConnectionHandle) -> Result<(), TransportError> {
        let Some(link) = self.lock().links.remove(&connection.id) else {
            return Ok(());
        };
        let _ = link.device.RemoveConnectionStatusChanged(link.status_token);
        link.device
            .Close()
            .map_err(|e| TransportError::Disconnect(e.to_string()))?;
        info!("Closed link to {}", connection.peripheral);
        Ok(())
    }
}
