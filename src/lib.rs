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

//! Blocking BLE client for serial-over-GATT peripherals speaking the
//! 3-letter command protocol.
//!
//! [`bluetooth::SessionManager`] owns the link; [`protocol`] encodes and
//! decodes the command lines carried over it.

pub mod bluetooth;
pub mod config;
pub mod protocol;

pub use bluetooth::{ConnectionState, SessionError, SessionManager, Transport, TransportError};
pub use config::Config;
pub use protocol::{Command, CommandBuilder, Number, Parser};
