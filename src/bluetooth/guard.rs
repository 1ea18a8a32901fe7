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

//! Process-wide exclusive ownership of the radio adapter.

use parking_lot::{const_mutex, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error};

use super::ble_constants::timing::GUARD_POLL_INTERVAL;

static OWNER: Mutex<Option<OwnerId>> = const_mutex(None);
static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// Identity of an adapter user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(u64);

impl OwnerId {
    /// Allocate a fresh identity.
    pub fn next() -> Self {
        Self(NEXT_OWNER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Entry point for claiming the adapter.
pub struct AdapterGuard;

impl AdapterGuard {
    /// Block until the adapter is free, then claim it for `owner`.
    pub fn acquire(owner: OwnerId) -> AdapterLease {
        loop {
            if let Some(lease) = Self::try_acquire(owner) {
                return lease;
            }
            std::thread::sleep(GUARD_POLL_INTERVAL);
        }
    }

    /// Like [`AdapterGuard::acquire`] but gives up after `timeout`.
    pub fn acquire_timeout(owner: OwnerId, timeout: Duration) -> Option<AdapterLease> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(lease) = Self::try_acquire(owner) {
                return Some(lease);
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(GUARD_POLL_INTERVAL);
        }
    }

    pub fn try_acquire(owner: OwnerId) -> Option<AdapterLease> {
        let mut current = OWNER.lock();
        if current.is_some() {
            return None;
        }
        *current = Some(owner);
        debug!("Adapter claimed by {:?}", owner);
        Some(AdapterLease { owner })
    }

    /// Whether anyone holds the adapter.
    pub fn is_locked() -> bool {
        OWNER.lock().is_some()
    }

    pub fn is_held_by(owner: OwnerId) -> bool {
        *OWNER.lock() == Some(owner)
    }

    fn release(owner: OwnerId) {
        let mut current = OWNER.lock();
        if *current != Some(owner) {
            error!(
                "Wrong owner of adapter guard, expected {:?} but got {:?}",
                *current, owner
            );
            std::process::abort();
        }
        *current = None;
        debug!("Adapter released by {:?}", owner);
    }
}

/// Claim on the adapter, released on drop.
#[derive(Debug)]
pub struct AdapterLease {
    owner: OwnerId,
}

impl AdapterLease {
    pub fn owner(&self) -> OwnerId {
        self.owner
    }
}

impl Drop for AdapterLease {
    fn drop(&mut self) {
        AdapterGuard::release(self.owner);
    }
}
