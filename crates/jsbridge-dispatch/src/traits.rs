// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Host-side contract.
//
// The bridge never talks to a concrete web view. It needs a surface that can
// evaluate a script string (optionally reporting a string result), a way to
// hop onto the host's UI thread, and the web view's navigation delegate slot
// so it can splice itself in front of whatever observer was there before.

use std::sync::Weak;
use std::sync::atomic::{AtomicU64, Ordering};

use url::Url;

use jsbridge_core::error::Result;

/// Delivered once with the string result of an evaluated script (`None` when
/// the script produced no string) or the evaluation error.
pub type ScriptCallback = Box<dyn FnOnce(Result<Option<String>>) + Send + 'static>;

/// Work handed to the UI thread.
pub type UiTask = Box<dyn FnOnce() + Send + 'static>;

/// Identity of a web view, used to ignore notifications that belong to a
/// different view sharing the same delegate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostId(pub u64);

impl HostId {
    /// Mint a process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for HostId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "webview#{}", self.0)
    }
}

/// The embedded web view, as far as the bridge is concerned.
pub trait ScriptHost: Send + Sync {
    fn host_id(&self) -> HostId;

    /// Run `script` in the page's JavaScript context.
    ///
    /// Must only be called on the UI thread. Evaluation is fire-and-forget;
    /// `on_result` (if any) is invoked later, on the UI thread.
    fn evaluate_script(&self, script: &str, on_result: Option<ScriptCallback>);

    /// Whether the calling thread is the host's UI thread.
    fn is_ui_thread(&self) -> bool;

    /// Run `task` on the UI thread and block until it has finished.
    fn run_on_ui_thread(&self, task: UiTask);

    /// The view's current navigation delegate.
    fn navigation_delegate(&self) -> Option<Weak<dyn NavigationObserver>>;

    /// Replace the view's navigation delegate. The view must not keep the
    /// delegate alive.
    fn set_navigation_delegate(&self, delegate: Option<Weak<dyn NavigationObserver>>);
}

/// Decision for a pending navigation or response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationPolicy {
    Allow,
    Cancel,
}

/// An authentication challenge raised while loading a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub host: String,
    pub port: u16,
    pub realm: Option<String>,
    pub method: String,
}

/// Username/password pair offered in answer to a challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub user: String,
    pub password: String,
}

/// How to answer an [`AuthChallenge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthChallengeDisposition {
    UseCredential(Credential),
    PerformDefaultHandling,
    CancelAuthenticationChallenge,
    RejectProtectionSpace,
}

/// Navigation lifecycle notifications of a web view.
///
/// Every method has a permissive default so observers implement only what
/// they care about.
pub trait NavigationObserver: Send + Sync {
    /// Asked once before each navigation attempt.
    fn decide_policy_for_action(&self, _host: HostId, _url: &Url) -> NavigationPolicy {
        NavigationPolicy::Allow
    }

    /// Asked once a response for a navigation has arrived.
    fn decide_policy_for_response(&self, _host: HostId, _url: &Url) -> NavigationPolicy {
        NavigationPolicy::Allow
    }

    fn did_start_provisional_navigation(&self, _host: HostId) {}

    fn did_fail_provisional_navigation(&self, _host: HostId, _error: &str) {}

    fn did_finish_navigation(&self, _host: HostId) {}

    fn did_fail_navigation(&self, _host: HostId, _error: &str) {}

    fn did_receive_auth_challenge(
        &self,
        _host: HostId,
        _challenge: &AuthChallenge,
    ) -> AuthChallengeDisposition {
        AuthChallengeDisposition::PerformDefaultHandling
    }
}
