// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pending-call and handler registries.
//
// Both registries lock internally and release the lock before any user
// closure runs, so handlers and continuations may call back into the bridge.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tracing::debug;

use jsbridge_core::types::CallbackId;

use crate::bridge::Responder;

/// One-shot continuation for a native call awaiting its response.
pub type ResponseCallback = Box<dyn FnOnce(Value) + Send + 'static>;

/// Native handler invoked for requests coming from the page.
pub type Handler = Arc<dyn Fn(Value, Responder) + Send + Sync + 'static>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Pending calls
// ---------------------------------------------------------------------------

/// Continuations for native calls, keyed by the token sent as `callbackId`.
///
/// There is no eviction: a call whose response never arrives keeps its entry
/// until the bridge is dropped.
pub struct PendingCalls {
    prefix: String,
    next_id: AtomicU64,
    callbacks: Mutex<HashMap<CallbackId, ResponseCallback>>,
}

impl PendingCalls {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next_id: AtomicU64::new(1),
            callbacks: Mutex::new(HashMap::new()),
        }
    }

    /// A token never handed out before by this registry.
    pub fn allocate_token(&self) -> CallbackId {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        CallbackId(format!("{}{n}", self.prefix))
    }

    pub fn register(&self, token: CallbackId, callback: ResponseCallback) {
        lock(&self.callbacks).insert(token, callback);
    }

    /// Remove the continuation for `response_id` and invoke it with
    /// `payload`. Returns `false` when nothing was waiting on that id.
    pub fn resolve(&self, response_id: &CallbackId, payload: Value) -> bool {
        let callback = lock(&self.callbacks).remove(response_id);
        match callback {
            Some(callback) => {
                debug!(callback_id = %response_id, "resolving pending call");
                callback(payload);
                true
            }
            None => false,
        }
    }

    /// Number of calls still waiting for a response.
    pub fn len(&self) -> usize {
        lock(&self.callbacks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Native handlers by name.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Mutex<HashMap<String, Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any previous one.
    pub fn register(&self, name: impl Into<String>, handler: Handler) {
        lock(&self.handlers).insert(name.into(), handler);
    }

    pub fn remove(&self, name: &str) -> Option<Handler> {
        lock(&self.handlers).remove(name)
    }

    pub fn remove_all(&self) {
        lock(&self.handlers).clear();
    }

    pub fn lookup(&self, name: &str) -> Option<Handler> {
        lock(&self.handlers).get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        lock(&self.handlers).contains_key(name)
    }

    pub fn len(&self) -> usize {
        lock(&self.handlers).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
