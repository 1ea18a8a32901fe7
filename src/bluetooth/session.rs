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

//! Synchronous BLE session on top of an asynchronous transport.
//!
//! The session runs a dedicated event thread that applies every transport
//! completion. Callers block in bounded polling loops; timing out never
//! cancels work already handed to the transport, so late completions are
//! matched against the live handles and dropped when stale.

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::att::{self, AttPdu};
use super::ble_constants::EVENT_THREAD_NAME;
use super::guard::{AdapterGuard, AdapterLease, OwnerId};
use super::reassembler::NotificationBuffer;
use super::transport::{
    AttResponse, AttributeId, ChannelId, EventSink, HandleToken, LoopMessage, OperationRequest,
    Pending, Transport, TransportError, TransportEvent,
};
use crate::config::SessionConfig;
use crate::protocol::{Command, Parser};

/// State of the link to the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No link; the next step is to connect.
    Idle,
    /// Connect issued, waiting for the transport.
    Connecting,
    /// Channel open; the characteristic still has to be found.
    DiscoveringCharacteristic,
    /// Ready for send and read.
    Established,
    /// The current attempt cannot continue.
    FailedToConnect,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "Idle",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::DiscoveringCharacteristic => "Discovering characteristic",
            ConnectionState::Established => "Established",
            ConnectionState::FailedToConnect => "Failed to connect",
        }
    }
}

/// Errors returned by [`SessionManager`].
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("a connection attempt is already in progress")]
    AlreadyConnecting,

    #[error("already connected")]
    AlreadyConnected,

    #[error("not connected")]
    NotConnected,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("unrecoverable transport error: {0}")]
    Fatal(TransportError),

    #[error("unable to connect to {0}")]
    ConnectFailed(String),

    #[error("nothing to send")]
    EmptyPayload,

    #[error("characteristic write failed with ATT status {0:#04x}")]
    WriteRejected(u8),

    #[error("malformed write response")]
    InvalidWriteResponse,

    #[error("characteristic read failed with ATT status {0:#04x}")]
    ReadRejected(u8),

    #[error("malformed read response")]
    InvalidReadResponse,

    #[error("received malformed command line {0:?}")]
    MalformedLine(String),

    #[error("transport event loop failed: {0}")]
    EventLoop(#[from] std::io::Error),
}

/// Outcome of classifying a transport error.
#[derive(Debug, Clone, PartialEq, Eq)]
enum NextAction {
    Continue,
    Repeat,
    Fatal(TransportError),
}

#[derive(Debug)]
struct SessionInner {
    state: ConnectionState,
    error: Option<TransportError>,
    channel: Option<ChannelId>,
    attribute: Option<AttributeId>,
    value_handle: Option<u16>,
    attempt_active: bool,
}

impl SessionInner {
    fn new() -> Self {
        Self {
            state: ConnectionState::Idle,
            error: None,
            channel: None,
            attribute: None,
            value_handle: None,
            attempt_active: false,
        }
    }

    /// Token and value handle of a fully established link.
    fn live_link(&self) -> Option<(HandleToken, u16)> {
        if self.state != ConnectionState::Established {
            return None;
        }
        let token = HandleToken::attribute(self.channel?, self.attribute?);
        Some((token, self.value_handle?))
    }

    fn current_token(&self) -> Option<HandleToken> {
        Some(HandleToken {
            channel: self.channel?,
            attribute: self.attribute,
        })
    }
}

/// State shared between callers and the event thread.
struct Shared {
    inner: Mutex<SessionInner>,
    notifications: NotificationBuffer,
    transport: Arc<dyn Transport>,
}

impl Shared {
    fn release_handles(&self, inner: &mut SessionInner) {
        if let Some(attribute) = inner.attribute.take() {
            debug!("Releasing attribute {:?}", attribute);
            self.transport.release_attribute(attribute);
        }
        if let Some(channel) = inner.channel.take() {
            debug!("Releasing channel {:?}", channel);
            self.transport.release_channel(channel);
        }
        inner.value_handle = None;
    }

    fn teardown(&self) {
        let mut inner = self.inner.lock();
        self.release_handles(&mut inner);
        inner.state = ConnectionState::Idle;
        inner.error = None;
    }

    fn handle_event(&self, event: TransportEvent, sink: &EventSink) {
        match event {
            TransportEvent::ConnectCompleted { channel, result } => {
                self.on_connect(channel, result)
            }
            TransportEvent::DiscoveryCompleted { token, result } => {
                self.on_discovery(token, result, sink)
            }
            TransportEvent::WriteCompleted { request, response }
            | TransportEvent::ReadCompleted { request, response } => {
                self.on_response(request, response)
            }
            TransportEvent::Notification { attribute, pdu } => {
                self.on_notification(attribute, &pdu)
            }
            TransportEvent::ChannelHangup { channel } => self.on_hangup(channel),
        }
    }

    fn on_connect(&self, channel: ChannelId, result: Result<(), TransportError>) {
        let mut inner = self.inner.lock();
        if inner.channel != Some(channel) {
            warn!("Zombie connect callback for {:?}, ignored", channel);
            return;
        }

        match result {
            Ok(()) => {
                info!("BLE connected to host");
                inner.state = ConnectionState::DiscoveringCharacteristic;
            }
            Err(e) => {
                warn!("BLE connection failed: {}", e);
                if let Some(channel) = inner.channel.take() {
                    self.transport.release_channel(channel);
                }
                inner.error = Some(e);
                inner.state = ConnectionState::Idle;
            }
        }
    }

    fn on_discovery(&self, token: HandleToken, result: Result<u16, TransportError>, sink: &EventSink) {
        let mut inner = self.inner.lock();
        if inner.current_token() != Some(token) {
            warn!("Zombie discovery callback for {:?}, ignored", token);
            return;
        }

        match result {
            Ok(value_handle) => {
                let Some(attribute) = token.attribute else {
                    error!("Discovery completed without an attribute client");
                    inner.state = ConnectionState::FailedToConnect;
                    return;
                };
                inner.value_handle = Some(value_handle);
                self.transport.subscribe_notifications(attribute, sink);
                self.notifications.clear();
                inner.state = ConnectionState::Established;
                info!("Characteristic found at handle {:#06x}", value_handle);
            }
            Err(e) => {
                warn!("Characteristic discovery failed: {}", e);
                inner.error = Some(e);
                inner.state = ConnectionState::DiscoveringCharacteristic;
            }
        }
    }

    fn on_response(&self, request: OperationRequest, response: AttResponse) {
        let inner = self.inner.lock();
        if inner.current_token() != Some(request.token()) {
            warn!("Zombie response for {:?}, ignored", request.token());
            return;
        }
        request.complete(response);
    }

    fn on_notification(&self, attribute: AttributeId, pdu: &[u8]) {
        if self.inner.lock().attribute != Some(attribute) {
            debug!("Notification for stale attribute {:?}, ignored", attribute);
            return;
        }

        match att::decode(pdu) {
            AttPdu::Notification { value, .. } => self.notifications.append(value),
            AttPdu::Indication { handle, value } => {
                info!("Indication on {:#06x}: {:02x?}", handle, value);
                self.transport.confirm_indication(attribute);
            }
            other => debug!("Invalid opcode in notification: {:?}", other),
        }
    }

    fn on_hangup(&self, channel: ChannelId) {
        let mut inner = self.inner.lock();
        if inner.channel != Some(channel) {
            debug!("Hang-up on stale channel {:?}, ignored", channel);
            return;
        }
        warn!("Channel error, disconnecting");
        self.release_handles(&mut inner);
        inner.state = ConnectionState::Idle;
        inner.error = None;
    }
}

/// Start the event thread and return it with the sink feeding it.
fn spawn_event_thread(shared: Arc<Shared>) -> std::io::Result<(JoinHandle<()>, EventSink)> {
    let (tx, mut rx) = mpsc::unbounded_channel::<LoopMessage>();
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<std::io::Result<EventSink>>();

    let thread = std::thread::Builder::new()
        .name(EVENT_THREAD_NAME.to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let sink = EventSink::new(tx, runtime.handle().clone());
            let _ = ready_tx.send(Ok(sink.clone()));

            debug!("Transport event thread started");
            runtime.block_on(async move {
                while let Some(message) = rx.recv().await {
                    match message {
                        LoopMessage::Event(event) => shared.handle_event(event, &sink),
                        LoopMessage::Shutdown => break,
                    }
                }
            });
            debug!("Transport event thread stopped");
        })?;

    let sink = ready_rx.recv().map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::Other, "event thread exited during startup")
    })??;
    Ok((thread, sink))
}

/// Blocking connect/send/read API for one peripheral.
///
/// Holds the adapter exclusively from construction until drop. All methods
/// take `&self` and may be called from any thread. Calls block the caller
/// while they poll, so async code should go through `spawn_blocking`.
pub struct SessionManager {
    shared: Arc<Shared>,
    sink: EventSink,
    config: SessionConfig,
    parser: Parser,
    event_thread: Option<JoinHandle<()>>,
    lease: Option<AdapterLease>,
}

impl SessionManager {
    /// Claim the adapter (waiting for it if needed) and start the event thread.
    pub fn new(transport: Arc<dyn Transport>, config: SessionConfig) -> Result<Self, SessionError> {
        let lease = AdapterGuard::acquire(OwnerId::next());

        let shared = Arc::new(Shared {
            inner: Mutex::new(SessionInner::new()),
            notifications: NotificationBuffer::new(),
            transport,
        });
        let (event_thread, sink) = spawn_event_thread(shared.clone())?;

        info!("BLE session created on {}", config.adapter);
        Ok(Self {
            shared,
            sink,
            config,
            parser: Parser::new(),
            event_thread: Some(event_thread),
            lease: Some(lease),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Radio interface this session is bound to.
    pub fn adapter(&self) -> &str {
        &self.config.adapter
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    /// Transport error waiting to be handled, if any.
    pub fn last_error(&self) -> Option<TransportError> {
        self.shared.inner.lock().error.clone()
    }

    /// True once the characteristic is known and both handles are live.
    pub fn is_connected(&self) -> bool {
        self.shared.inner.lock().live_link().is_some()
    }

    /// Connect to `address` and discover the command characteristic.
    ///
    /// Transient transport errors are retried until `timeout` runs out.
    pub fn connect_to(&self, address: &str, timeout: Duration) -> Result<(), SessionError> {
        {
            let mut inner = self.shared.inner.lock();
            if inner.state == ConnectionState::Established {
                warn!("Already connected");
                return Err(SessionError::AlreadyConnected);
            }
            if inner.attempt_active
                || !matches!(
                    inner.state,
                    ConnectionState::Idle | ConnectionState::FailedToConnect
                )
            {
                warn!("Already in connecting state");
                return Err(SessionError::AlreadyConnecting);
            }
            inner.attempt_active = true;
            inner.state = ConnectionState::Idle;
            inner.error = None;
        }

        info!("Connecting to {} (timeout {:?})", address, timeout);
        let result = self.run_connect(address, timeout);

        let mut inner = self.shared.inner.lock();
        inner.attempt_active = false;
        match &result {
            Ok(()) => info!("Connection to {} established", address),
            Err(e) => {
                self.shared.release_handles(&mut inner);
                inner.state = ConnectionState::Idle;
                inner.error = None;
                warn!("Unable to connect to {}: {}", address, e);
            }
        }
        result
    }

    fn run_connect(&self, address: &str, timeout: Duration) -> Result<(), SessionError> {
        let deadline = Instant::now() + timeout;
        let mut attempt = 0u32;

        loop {
            if Instant::now() >= deadline {
                warn!("Connection timeout after {:?}", timeout);
                return Err(SessionError::Timeout(timeout));
            }
            attempt += 1;
            debug!("Connection attempt: {}", attempt);

            // State left by the action; completions may move past it at any time.
            let entered = match self.state() {
                ConnectionState::Idle => self.execute_connect(address),
                ConnectionState::DiscoveringCharacteristic => self.execute_discovery(),
                ConnectionState::Connecting => ConnectionState::Connecting,
                ConnectionState::Established => return Ok(()),
                ConnectionState::FailedToConnect => {
                    return Err(SessionError::ConnectFailed(address.to_string()))
                }
            };

            match self.handle_transport_error(deadline) {
                NextAction::Continue => {}
                NextAction::Repeat => continue,
                NextAction::Fatal(e) => return Err(SessionError::Fatal(e)),
            }

            self.wait_for_change(entered, deadline);

            if let NextAction::Fatal(e) = self.handle_transport_error(deadline) {
                return Err(SessionError::Fatal(e));
            }
            if self.state() == ConnectionState::Established {
                return Ok(());
            }
        }
    }

    fn execute_connect(&self, address: &str) -> ConnectionState {
        let mut inner = self.shared.inner.lock();
        self.shared.release_handles(&mut inner);

        match self
            .shared
            .transport
            .connect(&self.config.adapter, address, &self.sink)
        {
            Ok(channel) => {
                debug!("Connect issued on {:?}", channel);
                inner.channel = Some(channel);
                inner.error = None;
                inner.state = ConnectionState::Connecting;
            }
            Err(e) => {
                warn!("Failed to connect: {}", e);
                inner.error = Some(e);
                inner.state = ConnectionState::Idle;
            }
        }
        inner.state
    }

    fn execute_discovery(&self) -> ConnectionState {
        let mut inner = self.shared.inner.lock();
        let Some(channel) = inner.channel else {
            error!("Internal error, no channel to discover on");
            inner.state = ConnectionState::FailedToConnect;
            return inner.state;
        };
        if let Some(stale) = inner.attribute.take() {
            self.shared.transport.release_attribute(stale);
        }

        let attribute = match self.shared.transport.open_attribute(channel) {
            Ok(attribute) => attribute,
            Err(e) => {
                warn!("Failed to open attribute client: {}", e);
                inner.error = Some(e);
                return inner.state;
            }
        };
        inner.attribute = Some(attribute);

        debug!("Discovering characteristic {}", self.config.characteristic_uuid);
        let token = HandleToken::attribute(channel, attribute);
        if let Err(e) = self.shared.transport.discover_characteristic(
            token,
            self.config.characteristic_uuid,
            &self.sink,
        ) {
            warn!("Failed to start discovery: {}", e);
            inner.error = Some(e);
        }
        inner.state = ConnectionState::DiscoveringCharacteristic;
        inner.state
    }

    /// Consume the pending transport error and decide how to proceed.
    fn handle_transport_error(&self, deadline: Instant) -> NextAction {
        let Some(error) = self.shared.inner.lock().error.take() else {
            return NextAction::Continue;
        };
        warn!("Handling transport error {}", error);

        let retry = &self.config.retry;
        let action = if error.is_resource_busy() {
            self.shared.teardown();
            if let Err(e) = self
                .shared
                .transport
                .reset_adapter(&self.config.adapter, &self.sink)
            {
                warn!("Adapter reset failed: {}", e);
            }
            backoff(retry.resource_busy_backoff(), deadline);
            NextAction::Repeat
        } else if error.is_operation_aborted() {
            backoff(retry.operation_aborted_backoff(), deadline);
            NextAction::Repeat
        } else if error.is_host_unreachable() {
            NextAction::Fatal(error)
        } else {
            backoff(retry.unknown_error_backoff(), deadline);
            NextAction::Repeat
        };

        debug!("Next action: {:?}", action);
        action
    }

    fn wait_for_change(&self, entered: ConnectionState, deadline: Instant) {
        loop {
            {
                let inner = self.shared.inner.lock();
                if inner.state != entered || inner.error.is_some() {
                    debug!(
                        "Wait ended, state {} -> {}, error: {}",
                        entered.as_str(),
                        inner.state.as_str(),
                        inner.error.is_some()
                    );
                    return;
                }
            }
            if !self.sleep_until(deadline) {
                return;
            }
        }
    }

    /// Sleep one poll interval, capped at `deadline`. False once it has passed.
    fn sleep_until(&self, deadline: Instant) -> bool {
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        std::thread::sleep(self.config.poll_interval().min(deadline - now));
        true
    }

    fn poll_pending(&self, pending: &Pending<AttResponse>, timeout: Duration) -> Option<AttResponse> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(response) = pending.take() {
                return Some(response);
            }
            if !self.sleep_until(deadline) {
                return pending.take();
            }
        }
    }

    /// Write `data` to the characteristic and wait for the acknowledgement.
    pub fn send(&self, data: &[u8], timeout: Duration) -> Result<(), SessionError> {
        if data.is_empty() {
            return Err(SessionError::EmptyPayload);
        }

        let pending = {
            let inner = self.shared.inner.lock();
            let Some((token, value_handle)) = inner.live_link() else {
                warn!("Not connected!");
                return Err(SessionError::NotConnected);
            };
            let (request, pending) = OperationRequest::new(token);
            self.shared
                .transport
                .write_characteristic(token, value_handle, data, request, &self.sink);
            pending
        };
        debug!("Sent {} bytes", data.len());

        let Some(response) = self.poll_pending(&pending, timeout) else {
            warn!("Send timeout after {:?}", timeout);
            return Err(SessionError::Timeout(timeout));
        };
        if response.status != 0 {
            warn!("Characteristic write request failed: {:#04x}", response.status);
            return Err(SessionError::WriteRejected(response.status));
        }
        if !att::is_write_response(&response.pdu) {
            warn!("Protocol error [write]");
            return Err(SessionError::InvalidWriteResponse);
        }
        Ok(())
    }

    /// Encode and send a command.
    pub fn send_command(&self, command: &Command, timeout: Duration) -> Result<(), SessionError> {
        debug!("Sending command {}", command);
        self.send(&command.to_wire(), timeout)
    }

    /// Read the characteristic value directly instead of waiting for a notification.
    pub fn read_value(&self, timeout: Duration) -> Result<Vec<u8>, SessionError> {
        let pending = {
            let inner = self.shared.inner.lock();
            let Some((token, value_handle)) = inner.live_link() else {
                return Err(SessionError::NotConnected);
            };
            let (request, pending) = OperationRequest::new(token);
            self.shared
                .transport
                .read_characteristic(token, value_handle, request, &self.sink);
            pending
        };

        let Some(response) = self.poll_pending(&pending, timeout) else {
            warn!("Read timeout after {:?}", timeout);
            return Err(SessionError::Timeout(timeout));
        };
        if response.status != 0 {
            return Err(SessionError::ReadRejected(response.status));
        }
        match att::decode(&response.pdu) {
            AttPdu::ReadResponse { value } => Ok(value.to_vec()),
            _ => Err(SessionError::InvalidReadResponse),
        }
    }

    /// Wait for the next complete line of notification data.
    ///
    /// The terminator is stripped; an empty line is returned as `""`.
    pub fn read_line(&self, timeout: Duration) -> Result<String, SessionError> {
        if !self.is_connected() {
            debug!("read_line: not connected, ignored");
            return Err(SessionError::NotConnected);
        }

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(line) = self.shared.notifications.take_line_text() {
                debug!("Read line: {:?}", line);
                return Ok(line);
            }
            if !self.sleep_until(deadline) {
                // One last look in case the line arrived while sleeping.
                return self
                    .shared
                    .notifications
                    .take_line_text()
                    .ok_or(SessionError::Timeout(timeout));
            }
        }
    }

    /// Read the next line and parse it as a command.
    pub fn read_command(&self, timeout: Duration) -> Result<Command, SessionError> {
        let line = self.read_line(timeout)?;
        self.parser
            .parse(&line)
            .ok_or(SessionError::MalformedLine(line))
    }

    /// Drop the link. Safe to call in any state.
    pub fn disconnect(&self) {
        self.shared.teardown();
        info!("Disconnected");
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.disconnect();
        self.sink.shutdown();
        if let Some(thread) = self.event_thread.take() {
            if thread.join().is_err() {
                error!("Transport event thread panicked");
            }
        }
        self.lease.take();
        info!("BLE session destroyed");
    }
}

/// Sleep for `duration` without overshooting `deadline`.
fn backoff(duration: Duration, deadline: Instant) {
    let remaining = deadline.saturating_duration_since(Instant::now());
    std::thread::sleep(duration.min(remaining));
}
