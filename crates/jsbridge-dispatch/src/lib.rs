// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// jsbridge-dispatch — Native end of the web view message bridge: handler and
// pending-call registries, the startup queue, signal URL interception and
// runtime injection, plus an in-process page host for tests and demos.

pub mod bridge;
pub mod loopback;
pub mod registry;
pub mod runtime;
pub mod signal;
pub mod startup;
pub mod traits;

pub use bridge::{Bridge, DispatchState, Responder, WeakBridge};
pub use loopback::{LoopbackPage, PageResponder};
pub use traits::{
    AuthChallenge, AuthChallengeDisposition, Credential, HostId, NavigationObserver,
    NavigationPolicy, ScriptHost,
};
