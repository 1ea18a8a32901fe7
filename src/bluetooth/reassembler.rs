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

//! Reassembly of notification bytes into lines.

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::protocol::LINE_TERMINATOR;

/// Bytes kept while waiting for a terminator before the oldest are dropped.
pub const DEFAULT_BUFFER_LIMIT: usize = 64 * 1024;

#[derive(Debug, Default)]
struct BufferState {
    bytes: Vec<u8>,
    has_data: bool,
}

/// Accumulates notification payloads and hands out complete lines.
///
/// Written by the transport event thread, drained by readers; both sides go
/// through the same lock.
#[derive(Debug)]
pub struct NotificationBuffer {
    state: Mutex<BufferState>,
    limit: usize,
}

impl Default for NotificationBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationBuffer {
    /// Create an empty buffer holding at most [`DEFAULT_BUFFER_LIMIT`] bytes.
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_BUFFER_LIMIT)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            state: Mutex::new(BufferState {
                bytes: Vec::with_capacity(256),
                has_data: false,
            }),
            limit: limit.max(1),
        }
    }

    /// Append notification bytes verbatim.
    ///
    /// Past the limit the oldest bytes are discarded.
    pub fn append(&self, bytes: &[u8]) {
        let mut state = self.state.lock();
        state.bytes.extend_from_slice(bytes);
        state.has_data = true;

        let excess = state.bytes.len().saturating_sub(self.limit);
        if excess > 0 {
            warn!("Notification buffer full, dropping {} oldest bytes", excess);
            state.bytes.drain(..excess);
        }
    }

    /// Remove and return the first complete line.
    ///
    /// The line terminator and any carriage returns before it are stripped.
    /// Returns `None`, leaving the buffer untouched, while no terminator has
    /// arrived yet.
    pub fn take_line(&self) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        if !state.has_data {
            return None;
        }
        let end = state.bytes.iter().position(|&b| b == LINE_TERMINATOR)?;

        let mut line: Vec<u8> = state.bytes.drain(..=end).collect();
        while line.last() == Some(&b'\r') {
            line.pop();
        }
        state.has_data = !state.bytes.is_empty();

        debug!("Line extracted: {} bytes, {} left", line.len(), state.bytes.len());
        Some(line)
    }

    /// Like [`NotificationBuffer::take_line`], decoded as text.
    pub fn take_line_text(&self) -> Option<String> {
        self.take_line()
            .map(|line| String::from_utf8_lossy(&line).into_owned())
    }

    /// Drop everything buffered.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.bytes.clear();
        state.has_data = false;
    }

    pub fn has_data(&self) -> bool {
        self.state.lock().has_data
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.state.lock().bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
