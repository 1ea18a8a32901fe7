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

//! Boundary between the session and the radio stack.
//!
//! A [`Transport`] issues operations and reports their completion later
//! through an [`EventSink`]. Completions are queued to the session's event
//! thread, which is the only place they are applied.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;
use uuid::Uuid;

use super::ble_constants::error_code;
use super::ble_constants::timing::POLL_INTERVAL;

/// Link-level channel allocated by [`Transport::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u64);

/// Attribute client bound to a channel, allocated by [`Transport::open_attribute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributeId(pub u64);

/// Handles that were live when an asynchronous operation was issued.
///
/// A completion whose token no longer matches the session's handles belongs
/// to a torn-down session and is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleToken {
    pub channel: ChannelId,
    pub attribute: Option<AttributeId>,
}

impl HandleToken {
    pub fn channel(channel: ChannelId) -> Self {
        Self {
            channel,
            attribute: None,
        }
    }

    pub fn attribute(channel: ChannelId, attribute: AttributeId) -> Self {
        Self {
            channel,
            attribute: Some(attribute),
        }
    }
}

/// Numeric error reported by the radio stack.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("transport error {code}: {message}")]
pub struct TransportError {
    pub code: i32,
    pub message: String,
}

impl TransportError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_resource_busy(&self) -> bool {
        self.code == error_code::RESOURCE_BUSY
    }

    pub fn is_operation_aborted(&self) -> bool {
        self.code == error_code::OPERATION_ABORTED
    }

    pub fn is_host_unreachable(&self) -> bool {
        self.code == error_code::HOST_UNREACHABLE
    }
}

/// Result slot written once by the event thread and polled by a caller.
///
/// Only the first completion is kept, even after the value has been taken.
#[derive(Debug)]
pub struct Pending<T> {
    slot: Mutex<Slot<T>>,
}

#[derive(Debug)]
struct Slot<T> {
    value: Option<T>,
    completed: bool,
}

impl<T> Pending<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Slot {
                value: None,
                completed: false,
            }),
        })
    }

    /// Store the result. False if the cell was already completed.
    pub fn complete(&self, value: T) -> bool {
        let mut slot = self.slot.lock();
        if slot.completed {
            return false;
        }
        slot.value = Some(value);
        slot.completed = true;
        true
    }

    /// A result is stored and has not been taken yet.
    pub fn is_ready(&self) -> bool {
        self.slot.lock().value.is_some()
    }

    pub fn take(&self) -> Option<T> {
        self.slot.lock().value.take()
    }
}

/// ATT status plus the raw response PDU of a write or read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttResponse {
    pub status: u8,
    pub pdu: Vec<u8>,
}

impl AttResponse {
    pub fn success(pdu: Vec<u8>) -> Self {
        Self { status: 0, pdu }
    }

    pub fn failure(status: u8) -> Self {
        Self {
            status,
            pdu: Vec::new(),
        }
    }
}

/// An outstanding write or read, handed back through the sink on completion.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    token: HandleToken,
    pending: Arc<Pending<AttResponse>>,
}

impl OperationRequest {
    pub(crate) fn new(token: HandleToken) -> (Self, Arc<Pending<AttResponse>>) {
        let pending = Pending::new();
        (
            Self {
                token,
                pending: pending.clone(),
            },
            pending,
        )
    }

    pub fn token(&self) -> HandleToken {
        self.token
    }

    pub(crate) fn complete(&self, response: AttResponse) -> bool {
        self.pending.complete(response)
    }
}

/// Completions delivered to the event thread.
#[derive(Debug)]
pub(crate) enum TransportEvent {
    ConnectCompleted {
        channel: ChannelId,
        result: Result<(), TransportError>,
    },
    DiscoveryCompleted {
        token: HandleToken,
        result: Result<u16, TransportError>,
    },
    WriteCompleted {
        request: OperationRequest,
        response: AttResponse,
    },
    ReadCompleted {
        request: OperationRequest,
        response: AttResponse,
    },
    Notification {
        attribute: AttributeId,
        pdu: Vec<u8>,
    },
    ChannelHangup {
        channel: ChannelId,
    },
}

#[derive(Debug)]
pub(crate) enum LoopMessage {
    Event(TransportEvent),
    Shutdown,
}

/// Completion callbacks and executor access for a [`Transport`].
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: UnboundedSender<LoopMessage>,
    runtime: Handle,
}

impl EventSink {
    pub(crate) fn new(tx: UnboundedSender<LoopMessage>, runtime: Handle) -> Self {
        Self { tx, runtime }
    }

    fn post(&self, event: TransportEvent) {
        if let Err(e) = self.tx.send(LoopMessage::Event(event)) {
            debug!("Event loop stopped, dropping {:?}", e.0);
        }
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.tx.send(LoopMessage::Shutdown);
    }

    /// Connection attempt on `channel` finished.
    pub fn connect_completed(&self, channel: ChannelId, result: Result<(), TransportError>) {
        self.post(TransportEvent::ConnectCompleted { channel, result });
    }

    /// Characteristic discovery finished with the value handle or an error.
    pub fn discovery_completed(&self, token: HandleToken, result: Result<u16, TransportError>) {
        self.post(TransportEvent::DiscoveryCompleted { token, result });
    }

    pub fn write_completed(&self, request: OperationRequest, response: AttResponse) {
        self.post(TransportEvent::WriteCompleted { request, response });
    }

    pub fn read_completed(&self, request: OperationRequest, response: AttResponse) {
        self.post(TransportEvent::ReadCompleted { request, response });
    }

    /// Raw notification or indication PDU received on `attribute`.
    pub fn notification(&self, attribute: AttributeId, pdu: Vec<u8>) {
        self.post(TransportEvent::Notification { attribute, pdu });
    }

    /// The channel reported an error or hang-up.
    pub fn channel_hangup(&self, channel: ChannelId) {
        self.post(TransportEvent::ChannelHangup { channel });
    }

    /// Run async transport work on the event thread.
    pub fn spawn<F>(&self, future: F) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(future)
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Run `future` on the event thread and wait up to `timeout` for its output.
    ///
    /// Works from inside another tokio runtime, where `Handle::block_on`
    /// panics. Must not be called from the event thread itself.
    pub fn run_blocking<F>(&self, future: F, timeout: Duration) -> Option<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let pending = Pending::new();
        let slot = pending.clone();
        self.runtime.spawn(async move {
            slot.complete(future.await);
        });

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(output) = pending.take() {
                return Some(output);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            std::thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }
}

/// Asynchronous radio operations used by the session.
///
/// Methods returning `Err` failed before anything was issued; otherwise the
/// outcome arrives later through the [`EventSink`]. Every method is called
/// with the session lock held, so implementations must not block on the
/// event thread from inside them, `reset_adapter` excepted.
pub trait Transport: Send + Sync {
    /// Start connecting to `address` through `adapter`.
    fn connect(&self, adapter: &str, address: &str, sink: &EventSink)
        -> Result<ChannelId, TransportError>;

    /// Create the attribute client for an open channel.
    fn open_attribute(&self, channel: ChannelId) -> Result<AttributeId, TransportError>;

    /// Look up the characteristic `uuid`; completes with its value handle.
    fn discover_characteristic(
        &self,
        token: HandleToken,
        uuid: Uuid,
        sink: &EventSink,
    ) -> Result<(), TransportError>;

    fn write_characteristic(
        &self,
        token: HandleToken,
        value_handle: u16,
        data: &[u8],
        request: OperationRequest,
        sink: &EventSink,
    );

    fn read_characteristic(
        &self,
        token: HandleToken,
        value_handle: u16,
        request: OperationRequest,
        sink: &EventSink,
    );

    /// Start delivering notification and indication PDUs for `attribute`.
    fn subscribe_notifications(&self, attribute: AttributeId, sink: &EventSink);

    /// Answer an indication.
    fn confirm_indication(&self, attribute: AttributeId);

    fn release_attribute(&self, attribute: AttributeId);

    fn release_channel(&self, channel: ChannelId);

    /// Restart the adapter. Called from the connecting thread without the
    /// session lock; wait on async work with [`EventSink::run_blocking`].
    fn reset_adapter(&self, adapter: &str, sink: &EventSink) -> Result<(), TransportError>;
}
