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

//! Bluetooth communication module.
//!
//! Blocking BLE session over a pluggable asynchronous transport.

pub mod att;
pub mod ble_constants;
mod guard;
mod reassembler;
mod session;
mod transport;

#[cfg(feature = "bluez")]
mod bluez;

pub use att::AttPdu;
pub use guard::{AdapterGuard, AdapterLease, OwnerId};
pub use reassembler::NotificationBuffer;
pub use session::{ConnectionState, SessionError, SessionManager};
pub use transport::{
    AttResponse, AttributeId, ChannelId, EventSink, HandleToken, OperationRequest, Pending,
    Transport, TransportError,
};

#[cfg(feature = "bluez")]
pub use bluez::BluerTransport;
