//! Scripted in-memory transport for session tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use btle_remote::bluetooth::att;
use btle_remote::bluetooth::{
    AttResponse, AttributeId, ChannelId, EventSink, HandleToken, OperationRequest, Transport,
    TransportError,
};
use btle_remote::config::{RetryPolicy, SessionConfig};
use uuid::Uuid;

pub const VALUE_HANDLE: u16 = 0x0025;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehavior {
    Succeed,
    FailAsync(i32),
    FailSync(i32),
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryBehavior {
    Succeed,
    Fail(i32),
    Never,
}

#[derive(Default)]
struct Script {
    connects: VecDeque<ConnectBehavior>,
    discoveries: VecDeque<DiscoveryBehavior>,
}

/// Completes every operation from inside the call by posting to the sink.
pub struct MockTransport {
    script: Mutex<Script>,
    next_id: AtomicU64,
    pub echo_chunk: usize,
    pub write_status: u8,
    pub read_value: Vec<u8>,
    pub connect_calls: AtomicUsize,
    pub reset_calls: AtomicUsize,
    pub released_channels: AtomicUsize,
    pub released_attributes: AtomicUsize,
    pub confirmations: Mutex<Vec<Vec<u8>>>,
    pub hold_writes: AtomicBool,
    pub held_writes: Mutex<Vec<OperationRequest>>,
    pub writes: Mutex<Vec<Vec<u8>>>,
    pub last_channel: Mutex<Option<ChannelId>>,
    pub last_discovery: Mutex<Option<HandleToken>>,
    pub subscribed: Mutex<Option<AttributeId>>,
    pub sink: Mutex<Option<EventSink>>,
}

impl MockTransport {
    /// Connect and discovery succeed unless scripted otherwise.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script::default()),
            next_id: AtomicU64::new(0),
            echo_chunk: 0,
            write_status: 0,
            read_value: b"OK".to_vec(),
            connect_calls: AtomicUsize::new(0),
            reset_calls: AtomicUsize::new(0),
            released_channels: AtomicUsize::new(0),
            released_attributes: AtomicUsize::new(0),
            confirmations: Mutex::new(Vec::new()),
            hold_writes: AtomicBool::new(false),
            held_writes: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            last_channel: Mutex::new(None),
            last_discovery: Mutex::new(None),
            subscribed: Mutex::new(None),
            sink: Mutex::new(None),
        }
    }

    /// Echo every write back as notifications of `chunk` bytes.
    pub fn echoing(chunk: usize) -> Self {
        Self {
            echo_chunk: chunk,
            ..Self::new()
        }
    }

    pub fn script_connects(self, plan: &[ConnectBehavior]) -> Self {
        self.script.lock().connects.extend(plan.iter().copied());
        self
    }

    pub fn script_discoveries(self, plan: &[DiscoveryBehavior]) -> Self {
        self.script.lock().discoveries.extend(plan.iter().copied());
        self
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn sink(&self) -> EventSink {
        self.sink.lock().clone().expect("no sink captured yet")
    }

    /// Push a raw PDU as if it arrived on the subscribed attribute.
    pub fn push_pdu(&self, pdu: Vec<u8>) {
        let attribute = self.subscribed.lock().expect("not subscribed");
        self.sink().notification(attribute, pdu);
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Transport for MockTransport {
    fn connect(
        &self,
        _adapter: &str,
        _address: &str,
        sink: &EventSink,
    ) -> Result<ChannelId, TransportError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        *self.sink.lock() = Some(sink.clone());

        let behavior = self
            .script
            .lock()
            .connects
            .pop_front()
            .unwrap_or(ConnectBehavior::Succeed);
        if let ConnectBehavior::FailSync(code) = behavior {
            return Err(TransportError::new(code, "scripted failure"));
        }

        let channel = ChannelId(self.next_id());
        *self.last_channel.lock() = Some(channel);
        match behavior {
            ConnectBehavior::Succeed => sink.connect_completed(channel, Ok(())),
            ConnectBehavior::FailAsync(code) => {
                sink.connect_completed(channel, Err(TransportError::new(code, "scripted failure")))
            }
            ConnectBehavior::FailSync(_) | ConnectBehavior::Never => {}
        }
        Ok(channel)
    }

    fn open_attribute(&self, _channel: ChannelId) -> Result<AttributeId, TransportError> {
        Ok(AttributeId(self.next_id()))
    }

    fn discover_characteristic(
        &self,
        token: HandleToken,
        _uuid: Uuid,
        sink: &EventSink,
    ) -> Result<(), TransportError> {
        *self.last_discovery.lock() = Some(token);
        let behavior = self
            .script
            .lock()
            .discoveries
            .pop_front()
            .unwrap_or(DiscoveryBehavior::Succeed);
        match behavior {
            DiscoveryBehavior::Succeed => sink.discovery_completed(token, Ok(VALUE_HANDLE)),
            DiscoveryBehavior::Fail(code) => {
                sink.discovery_completed(token, Err(TransportError::new(code, "scripted failure")))
            }
            DiscoveryBehavior::Never => {}
        }
        Ok(())
    }

    fn write_characteristic(
        &self,
        token: HandleToken,
        value_handle: u16,
        data: &[u8],
        request: OperationRequest,
        sink: &EventSink,
    ) {
        self.writes.lock().push(data.to_vec());
        if self.hold_writes.load(Ordering::SeqCst) {
            self.held_writes.lock().push(request);
            return;
        }
        if self.write_status != 0 {
            sink.write_completed(request, AttResponse::failure(self.write_status));
            return;
        }
        sink.write_completed(request, AttResponse::success(vec![0x13]));

        if let (Some(attribute), true) = (token.attribute, self.echo_chunk > 0) {
            for chunk in data.chunks(self.echo_chunk) {
                sink.notification(attribute, att::encode_notification(value_handle, chunk));
            }
        }
    }

    fn read_characteristic(
        &self,
        _token: HandleToken,
        _value_handle: u16,
        request: OperationRequest,
        sink: &EventSink,
    ) {
        sink.read_completed(
            request,
            AttResponse::success(att::encode_read_response(&self.read_value)),
        );
    }

    fn subscribe_notifications(&self, attribute: AttributeId, _sink: &EventSink) {
        *self.subscribed.lock() = Some(attribute);
    }

    fn confirm_indication(&self, _attribute: AttributeId) {
        self.confirmations.lock().push(att::confirmation().to_vec());
    }

    fn release_attribute(&self, _attribute: AttributeId) {
        self.released_attributes.fetch_add(1, Ordering::SeqCst);
    }

    fn release_channel(&self, _channel: ChannelId) {
        self.released_channels.fetch_add(1, Ordering::SeqCst);
    }

    fn reset_adapter(&self, _adapter: &str, sink: &EventSink) -> Result<(), TransportError> {
        self.reset_calls.fetch_add(1, Ordering::SeqCst);
        sink.run_blocking(async { Ok(()) }, Duration::from_secs(1))
            .unwrap_or_else(|| Err(TransportError::new(-1, "reset timed out")))
    }
}

/// Session settings with short poll and backoff intervals.
pub fn fast_config() -> SessionConfig {
    SessionConfig {
        poll_interval_ms: 5,
        retry: RetryPolicy::uniform(Duration::from_millis(10)),
        ..SessionConfig::default()
    }
}

pub fn shared(transport: MockTransport) -> Arc<MockTransport> {
    Arc::new(transport)
}
