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

//! BLE identifiers, ATT opcodes and timing constants.

use std::time::Duration;

use uuid::Uuid;

/// Serial data characteristic of HM-10 style UART bridges.
/// Properties: Read, Write, Notify
pub const CHAR_UUID: Uuid = Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb);

/// Radio interface used when none is configured.
pub const DEFAULT_ADAPTER: &str = "hci0";

/// Name of the per-session transport event thread.
pub const EVENT_THREAD_NAME: &str = "btle-events";

/// ATT protocol opcodes seen on the session.
pub mod att_op {
    pub const ERROR: u8 = 0x01;
    pub const WRITE_RESP: u8 = 0x13;
    pub const EXEC_WRITE_RESP: u8 = 0x19;
    pub const READ_RESP: u8 = 0x0B;
    pub const HANDLE_NOTIFY: u8 = 0x1B;
    pub const HANDLE_IND: u8 = 0x1D;
    pub const HANDLE_CNF: u8 = 0x1E;
}

/// ATT error status used when a response cannot be decoded.
pub const ATT_ECODE_IO: u8 = 0x80;

/// Transport error codes with a dedicated recovery policy.
pub mod error_code {
    /// Device or resource busy; the adapter gets restarted.
    pub const RESOURCE_BUSY: i32 = 16;
    /// Operation aborted; wait and retry.
    pub const OPERATION_ABORTED: i32 = 130;
    /// Host is unreachable; give up.
    pub const HOST_UNREACHABLE: i32 = 148;
}

/// Timing defaults.
pub mod timing {
    use super::Duration;

    /// Poll interval of every bounded wait in the session.
    pub const POLL_INTERVAL: Duration = Duration::from_millis(30);

    /// Poll interval while waiting for the adapter guard.
    pub const GUARD_POLL_INTERVAL: Duration = Duration::from_millis(50);

    pub const RESOURCE_BUSY_BACKOFF: Duration = Duration::from_secs(3);
    pub const OPERATION_ABORTED_BACKOFF: Duration = Duration::from_secs(3);
    pub const UNKNOWN_ERROR_BACKOFF: Duration = Duration::from_secs(1);

    /// Default `send` timeout.
    pub const SEND_TIMEOUT: Duration = Duration::from_millis(3000);

    /// Upper bound on an adapter power cycle.
    pub const ADAPTER_RESET_TIMEOUT: Duration = Duration::from_secs(10);
}
