// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Startup queue.
//
// Holds outbound envelopes produced before the page's runtime has reported
// itself loaded. The first runtime-loaded signal drains it in order and
// retires it for good; it is not re-armed when the page later reloads.

use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::debug;

use jsbridge_core::types::Envelope;

enum QueueState {
    Active(VecDeque<Envelope>),
    Retired,
}

/// One-shot FIFO buffer in front of the wire.
pub struct StartupQueue {
    state: Mutex<QueueState>,
}

impl Default for StartupQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl StartupQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::Active(VecDeque::new())),
        }
    }

    /// Buffer `envelope` while the queue is active.
    ///
    /// Once retired the envelope is handed straight back so the caller can
    /// dispatch it immediately.
    pub fn offer(&self, envelope: Envelope) -> Option<Envelope> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        match &mut *state {
            QueueState::Active(buffer) => {
                buffer.push_back(envelope);
                debug!(queued = buffer.len(), "message held until runtime loads");
                None
            }
            QueueState::Retired => Some(envelope),
        }
    }

    /// Retire the queue and return everything offered so far, oldest first.
    /// Later calls return nothing.
    pub fn retire_and_drain(&self) -> Vec<Envelope> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        match std::mem::replace(&mut *state, QueueState::Retired) {
            QueueState::Active(buffer) => buffer.into(),
            QueueState::Retired => Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        matches!(*state, QueueState::Active(_))
    }

    /// Number of buffered envelopes (always 0 once retired).
    pub fn len(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        match &*state {
            QueueState::Active(buffer) => buffer.len(),
            QueueState::Retired => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
