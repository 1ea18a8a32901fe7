// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! BlueZ GATT client transport built on `bluer`.

use bluer::{Address, Device, DeviceEvent, DeviceProperty, ErrorKind};
use futures::{pin_mut, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::att;
use super::ble_constants::{att_op, error_code, timing, ATT_ECODE_IO};
use super::transport::{
    AttResponse, AttributeId, ChannelId, EventSink, HandleToken, OperationRequest, Transport,
    TransportError,
};

struct ChannelSlot {
    device: Option<Device>,
    runtime: Handle,
    watcher: Option<JoinHandle<()>>,
}

struct AttributeSlot {
    channel: ChannelId,
    characteristic: Option<bluer::gatt::remote::Characteristic>,
    notifier: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Registry {
    channels: HashMap<ChannelId, ChannelSlot>,
    attributes: HashMap<AttributeId, AttributeSlot>,
}

/// [`Transport`] talking to `bluetoothd` over D-Bus.
#[derive(Clone, Default)]
pub struct BluerTransport {
    session: Arc<OnceCell<bluer::Session>>,
    registry: Arc<Mutex<Registry>>,
    next_id: Arc<AtomicU64>,
}

impl BluerTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    async fn adapter(session: &OnceCell<bluer::Session>, name: &str) -> bluer::Result<bluer::Adapter> {
        let session = session.get_or_try_init(bluer::Session::new).await?;
        session.adapter(name)
    }

    fn device(&self, channel: ChannelId) -> Option<Device> {
        self.registry
            .lock()
            .channels
            .get(&channel)
            .and_then(|slot| slot.device.clone())
    }

    fn characteristic(&self, attribute: AttributeId) -> Option<bluer::gatt::remote::Characteristic> {
        self.registry
            .lock()
            .attributes
            .get(&attribute)
            .and_then(|slot| slot.characteristic.clone())
    }
}

/// Map a BlueZ error onto the errno-style codes the session classifies.
fn map_error(error: bluer::Error) -> TransportError {
    let code = match error.kind {
        ErrorKind::InProgress | ErrorKind::AlreadyConnected => error_code::RESOURCE_BUSY,
        ErrorKind::ConnectionAttemptFailed => error_code::OPERATION_ABORTED,
        ErrorKind::DoesNotExist | ErrorKind::NotFound | ErrorKind::NotAvailable => {
            error_code::HOST_UNREACHABLE
        }
        _ => -1,
    };
    TransportError::new(code, error.message)
}

impl Transport for BluerTransport {
    fn connect(
        &self,
        adapter: &str,
        address: &str,
        sink: &EventSink,
    ) -> Result<ChannelId, TransportError> {
        let address: Address = address
            .parse()
            .map_err(|_| TransportError::new(error_code::HOST_UNREACHABLE, "invalid address"))?;
        let channel = ChannelId(self.next_id());
        self.registry.lock().channels.insert(
            channel,
            ChannelSlot {
                device: None,
                runtime: sink.runtime().clone(),
                watcher: None,
            },
        );

        let this = self.clone();
        let adapter = adapter.to_string();
        let sink = sink.clone();
        sink.clone().spawn(async move {
            let result = async {
                let adapter = Self::adapter(&this.session, &adapter).await?;
                let device = adapter.device(address)?;
                if !device.is_connected().await? {
                    device.connect().await?;
                }
                Ok::<_, bluer::Error>(device)
            }
            .await;

            match result {
                Ok(device) => {
                    info!("Connected to {}", address);
                    let watcher = sink.spawn(watch_hangup(device.clone(), channel, sink.clone()));
                    match this.registry.lock().channels.get_mut(&channel) {
                        Some(slot) => {
                            slot.device = Some(device);
                            slot.watcher = Some(watcher);
                        }
                        None => watcher.abort(),
                    }
                    sink.connect_completed(channel, Ok(()));
                }
                Err(e) => sink.connect_completed(channel, Err(map_error(e))),
            }
        });

        Ok(channel)
    }

    fn open_attribute(&self, channel: ChannelId) -> Result<AttributeId, TransportError> {
        let mut registry = self.registry.lock();
        if !registry.channels.contains_key(&channel) {
            return Err(TransportError::new(-1, "channel closed"));
        }
        let attribute = AttributeId(self.next_id());
        registry.attributes.insert(
            attribute,
            AttributeSlot {
                channel,
                characteristic: None,
                notifier: None,
            },
        );
        Ok(attribute)
    }

    fn discover_characteristic(
        &self,
        token: HandleToken,
        uuid: Uuid,
        sink: &EventSink,
    ) -> Result<(), TransportError> {
        let (Some(attribute), Some(device)) = (token.attribute, self.device(token.channel)) else {
            return Err(TransportError::new(-1, "no attribute client"));
        };

        let this = self.clone();
        let sink = sink.clone();
        sink.clone().spawn(async move {
            let found = async {
                for service in device.services().await? {
                    for characteristic in service.characteristics().await? {
                        if characteristic.uuid().await? == uuid {
                            return Ok(Some(characteristic));
                        }
                    }
                }
                Ok::<_, bluer::Error>(None)
            }
            .await;

            let result = match found {
                Ok(Some(characteristic)) => {
                    let handle = characteristic.id();
                    if let Some(slot) = this.registry.lock().attributes.get_mut(&attribute) {
                        slot.characteristic = Some(characteristic);
                    }
                    Ok(handle)
                }
                Ok(None) => Err(TransportError::new(-1, format!("characteristic {} not found", uuid))),
                Err(e) => Err(map_error(e)),
            };
            sink.discovery_completed(token, result);
        });
        Ok(())
    }

    fn write_characteristic(
        &self,
        token: HandleToken,
        _value_handle: u16,
        data: &[u8],
        request: OperationRequest,
        sink: &EventSink,
    ) {
        let characteristic = token.attribute.and_then(|a| self.characteristic(a));
        let data = data.to_vec();
        let sink = sink.clone();
        sink.clone().spawn(async move {
            let response = match characteristic {
                Some(characteristic) => match characteristic.write(&data).await {
                    Ok(()) => AttResponse::success(vec![att_op::WRITE_RESP]),
                    Err(e) => {
                        warn!("Characteristic write failed: {}", e);
                        AttResponse::failure(ATT_ECODE_IO)
                    }
                },
                None => AttResponse::failure(ATT_ECODE_IO),
            };
            sink.write_completed(request, response);
        });
    }

    fn read_characteristic(
        &self,
        token: HandleToken,
        _value_handle: u16,
        request: OperationRequest,
        sink: &EventSink,
    ) {
        let characteristic = token.attribute.and_then(|a| self.characteristic(a));
        let sink = sink.clone();
        sink.clone().spawn(async move {
            let response = match characteristic {
                Some(characteristic) => match characteristic.read().await {
                    Ok(value) => AttResponse::success(att::encode_read_response(&value)),
                    Err(e) => {
                        warn!("Characteristic read failed: {}", e);
                        AttResponse::failure(ATT_ECODE_IO)
                    }
                },
                None => AttResponse::failure(ATT_ECODE_IO),
            };
            sink.read_completed(request, response);
        });
    }

    fn subscribe_notifications(&self, attribute: AttributeId, sink: &EventSink) {
        let Some(characteristic) = self.characteristic(attribute) else {
            warn!("Cannot subscribe, no characteristic on {:?}", attribute);
            return;
        };

        let handle = characteristic.id();
        let task_sink = sink.clone();
        let notifier = sink.spawn(async move {
            let stream = match characteristic.notify().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to enable notifications: {}", e);
                    return;
                }
            };
            pin_mut!(stream);
            while let Some(value) = stream.next().await {
                task_sink.notification(attribute, att::encode_notification(handle, &value));
            }
            debug!("Notification stream for {:?} ended", attribute);
        });

        match self.registry.lock().attributes.get_mut(&attribute) {
            Some(slot) => slot.notifier = Some(notifier),
            None => notifier.abort(),
        }
    }

    fn confirm_indication(&self, attribute: AttributeId) {
        // bluetoothd confirms indications before forwarding them.
        debug!("Indication on {:?} already confirmed by bluetoothd", attribute);
    }

    fn release_attribute(&self, attribute: AttributeId) {
        if let Some(slot) = self.registry.lock().attributes.remove(&attribute) {
            if let Some(notifier) = slot.notifier {
                notifier.abort();
            }
            debug!("Attribute client {:?} on {:?} released", attribute, slot.channel);
        }
    }

    fn release_channel(&self, channel: ChannelId) {
        let Some(slot) = self.registry.lock().channels.remove(&channel) else {
            return;
        };
        if let Some(watcher) = slot.watcher {
            watcher.abort();
        }
        if let Some(device) = slot.device {
            slot.runtime.spawn(async move {
                if let Err(e) = device.disconnect().await {
                    debug!("Disconnect failed: {}", e);
                }
            });
        }
    }

    fn reset_adapter(&self, adapter: &str, sink: &EventSink) -> Result<(), TransportError> {
        info!("Restarting adapter {}", adapter);
        let session = self.session.clone();
        let adapter = adapter.to_string();
        let reset = async move {
            let adapter = Self::adapter(&session, &adapter).await?;
            adapter.set_powered(false).await?;
            adapter.set_powered(true).await
        };

        match sink.run_blocking(reset, timing::ADAPTER_RESET_TIMEOUT) {
            Some(result) => result.map_err(map_error),
            None => Err(TransportError::new(-1, "adapter reset timed out")),
        }
    }
}

async fn watch_hangup(device: Device, channel: ChannelId, sink: EventSink) {
    let events = match device.events().await {
        Ok(events) => events,
        Err(e) => {
            warn!("Cannot watch device events: {}", e);
            return;
        }
    };
    pin_mut!(events);
    while let Some(event) = events.next().await {
        if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = event {
            sink.channel_hangup(channel);
            return;
        }
    }
}
