//! Packet identifier pool.
//!
//! Invariant: no two in-flight operations ever share an identifier. Ids are
//! returned to the pool only when the matching acknowledgement arrives or the
//! operation is cancelled.

use std::collections::HashSet;

use parking_lot::Mutex;

use crate::error::{Result, SessionError};

#[derive(Debug)]
pub struct PacketIdAllocator {
    state: Mutex<AllocatorState>,
}

#[derive(Debug)]
struct AllocatorState {
    next: u16,
    in_flight: HashSet<u16>,
}

impl PacketIdAllocator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AllocatorState {
                next: 1,
                in_flight: HashSet::new(),
            }),
        }
    }

    /// Acquires a fresh identifier, skipping any still in flight.
    ///
    /// Identifiers wrap at 65535 (zero is never valid). Errors only when all
    /// 65535 identifiers are simultaneously outstanding.
    pub fn acquire(&self) -> Result<u16> {
        let mut state = self.state.lock();
        if state.in_flight.len() == usize::from(u16::MAX) {
            return Err(SessionError::PacketIdExhausted);
        }

        let mut candidate = state.next;
        loop {
            if !state.in_flight.contains(&candidate) {
                state.in_flight.insert(candidate);
                state.next = wrapping_next(candidate);
                return Ok(candidate);
            }
            candidate = wrapping_next(candidate);
        }
    }

    /// Returns an identifier to the pool once its acknowledgement arrived.
    pub fn release(&self, id: u16) {
        let mut state = self.state.lock();
        if !state.in_flight.remove(&id) {
            tracing::warn!(packet_id = id, "released packet id that was not in flight");
        }
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }
}

impl Default for PacketIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

fn wrapping_next(id: u16) -> u16 {
    if id == u16::MAX {
        1
    } else {
        id + 1
    }
}
