// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Dispatch engine.
//
// A `Bridge` binds to one web view. It installs itself as the view's
// navigation delegate (remembering the previous one), answers the page's
// reserved signalling URLs, and moves envelopes between the native
// registries and the page:
//
//   native call ──► startup queue ──► codec ──► evaluate_script
//   page signal ──► _fetchQueue ──► decode ──► pending calls | handlers
//
// All state changes happen on the host's UI thread. Sends requested from any
// other thread are handed to the UI thread and the caller waits until the
// script call has been issued.

use std::sync::mpsc;
use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use jsbridge_core::codec::{self, FETCH_QUEUE_SCRIPT};
use jsbridge_core::config::BridgeConfig;
use jsbridge_core::error::{BridgeError, Disposition, Result};
use jsbridge_core::types::{CallbackId, Envelope, Request, Response};

use crate::registry::{Handler, HandlerRegistry, PendingCalls, ResponseCallback};
use crate::runtime::RuntimeScript;
use crate::signal::{self, BridgeSignal};
use crate::startup::StartupQueue;
use crate::traits::{
    AuthChallenge, AuthChallengeDisposition, HostId, NavigationObserver, NavigationPolicy,
    ScriptHost,
};

/// Handler name the runtime reserves for switching off its safety timeout.
pub const DISABLE_SAFETY_TIMEOUT_HANDLER: &str = "_disableJavascriptAlertBoxSafetyTimeout";

/// Where the bridge is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// Outbound messages are held in the startup queue.
    AwaitingRuntime,
    /// The startup queue has been flushed; every send goes straight out.
    Active,
}

/// Something to put on the wire.
enum Outbound {
    Call {
        handler_name: String,
        data: Value,
        on_response: Option<ResponseCallback>,
    },
    Reply(Response),
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Inner {
    me: Weak<Inner>,
    host: Weak<dyn ScriptHost>,
    host_id: HostId,
    runtime: RuntimeScript,
    config: BridgeConfig,
    pending: PendingCalls,
    handlers: HandlerRegistry,
    startup: StartupQueue,
    chained: Mutex<Option<Weak<dyn NavigationObserver>>>,
}

impl Inner {
    fn chained_observer(&self) -> Option<Arc<dyn NavigationObserver>> {
        self.chained
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .and_then(Weak::upgrade)
    }

    fn log_message(&self, action: &str, envelope: &Envelope) {
        if !self.config.log_messages {
            return;
        }
        match codec::encode(envelope) {
            Ok(json) => debug!(action, message = %self.config.truncate_for_log(&json), "WVJB"),
            Err(e) => debug!(action, error = %e, "WVJB (unserializable message)"),
        }
    }

    // -- Outbound ------------------------------------------------------------

    /// Run `work` on the host's UI thread and wait for its result, handing
    /// it over when the caller is on another thread. `None` when the web view
    /// is gone.
    fn on_ui_thread<R, F>(&self, work: F) -> Option<Result<R>>
    where
        R: Send + 'static,
        F: FnOnce(&Inner, &dyn ScriptHost) -> Result<R> + Send + 'static,
    {
        let host = self.host.upgrade()?;
        if host.is_ui_thread() {
            return Some(work(self, host.as_ref()));
        }

        let inner = self.me.upgrade()?;
        let (tx, rx) = mpsc::channel();
        let ui_host = Arc::clone(&host);
        host.run_on_ui_thread(Box::new(move || {
            let _ = tx.send(work(&*inner, ui_host.as_ref()));
        }));
        // A host that drops the task without running it leaves the channel
        // closed.
        Some(rx.recv().unwrap_or(Err(BridgeError::HostUnavailable)))
    }

    /// Send from whatever thread the caller is on.
    fn send(&self, outbound: Outbound) -> Result<()> {
        self.on_ui_thread(move |inner, host| inner.send_on_ui_thread(host, outbound))
            .unwrap_or_else(|| {
                debug!("web view is gone, dropping outbound message");
                Ok(())
            })
    }

    fn send_on_ui_thread(&self, host: &dyn ScriptHost, outbound: Outbound) -> Result<()> {
        let envelope: Envelope = match outbound {
            Outbound::Call {
                handler_name,
                data,
                on_response,
            } => {
                let callback_id = on_response.map(|callback| {
                    let token = self.pending.allocate_token();
                    self.pending.register(token.clone(), callback);
                    token
                });
                Request::new(handler_name, data, callback_id).into()
            }
            Outbound::Reply(response) => response.into(),
        };

        match self.startup.offer(envelope) {
            None => Ok(()),
            Some(envelope) => self.dispatch(host, &envelope),
        }
    }

    fn dispatch(&self, host: &dyn ScriptHost, envelope: &Envelope) -> Result<()> {
        let script = codec::script_for_message(envelope)?;
        self.log_message("Send", envelope);
        host.evaluate_script(&script, None);
        Ok(())
    }

    // -- Signals -------------------------------------------------------------

    fn handle_signal(&self, signal: BridgeSignal) {
        let Some(host) = self.host.upgrade() else {
            debug!(?signal, "web view is gone, ignoring signal");
            return;
        };
        match signal {
            BridgeSignal::RuntimeLoaded => self.inject_runtime(host.as_ref()),
            BridgeSignal::QueueHasMessage => self.flush_message_queue(host.as_ref()),
            BridgeSignal::Unknown(url) => {
                warn!(error = %BridgeError::UnknownSignal(url), "ignoring bridge command");
            }
        }
    }

    #[instrument(skip_all, fields(host = %self.host_id))]
    fn inject_runtime(&self, host: &dyn ScriptHost) {
        host.evaluate_script(self.runtime.source(), None);

        let queued = self.startup.retire_and_drain();
        if !queued.is_empty() {
            info!(count = queued.len(), "flushing startup queue");
        }
        for envelope in &queued {
            if let Err(e) = self.dispatch(host, envelope) {
                warn!(error = %e, "dropping queued message");
            }
        }
    }

    fn flush_message_queue(&self, host: &dyn ScriptHost) {
        let me = self.me.clone();
        host.evaluate_script(
            FETCH_QUEUE_SCRIPT,
            Some(Box::new(move |result: Result<Option<String>>| {
                let Some(inner) = me.upgrade() else {
                    return;
                };
                match result {
                    Ok(Some(json)) => {
                        if let Err(e) = inner.process_queue(&json) {
                            warn!(
                                error = %e,
                                "dropping message batch; the bridge runtime may not be present in the page (e.g. it just loaded a new page)"
                            );
                        }
                    }
                    Ok(None) => warn!("fetching the message queue returned no string"),
                    Err(e) => warn!(error = %e, "error fetching the message queue from the web view"),
                }
            })),
        );
    }

    // -- Inbound -------------------------------------------------------------

    fn process_queue(&self, json: &str) -> Result<usize> {
        let envelopes = codec::decode(json)?;
        let count = envelopes.len();
        for envelope in envelopes {
            self.log_message("Received Message", &envelope);
            match self.process_envelope(envelope) {
                Ok(()) => {}
                Err(e @ BridgeError::UnregisteredHandler(_)) => error!(error = %e, "dropping message from page"),
                Err(e) if e.disposition() == Disposition::Absorbed => {
                    warn!(error = %e, "dropping message from page");
                }
                Err(e) => error!(error = %e, "failed to process message from page"),
            }
        }
        Ok(count)
    }

    fn process_envelope(&self, envelope: Envelope) -> Result<()> {
        match envelope {
            Envelope::Response(response) => {
                if self.pending.resolve(&response.response_id, response.response_data) {
                    Ok(())
                } else {
                    Err(BridgeError::UnmatchedResponse(response.response_id))
                }
            }
            Envelope::Request(request) => {
                let handler = self
                    .handlers
                    .lookup(&request.handler_name)
                    .ok_or_else(|| BridgeError::UnregisteredHandler(request.handler_name.clone()))?;
                let responder = Responder {
                    bridge: self.me.clone(),
                    callback_id: request.callback_id.clone(),
                };
                handler(request.payload(), responder);
                Ok(())
            }
        }
    }
}

impl NavigationObserver for Inner {
    fn decide_policy_for_action(&self, host: HostId, url: &Url) -> NavigationPolicy {
        if host != self.host_id {
            return NavigationPolicy::Allow;
        }
        if let Some(signal) = signal::classify(url) {
            self.handle_signal(signal);
            return NavigationPolicy::Cancel;
        }
        self.chained_observer()
            .map(|observer| observer.decide_policy_for_action(host, url))
            .unwrap_or(NavigationPolicy::Allow)
    }

    fn decide_policy_for_response(&self, host: HostId, url: &Url) -> NavigationPolicy {
        if host != self.host_id {
            return NavigationPolicy::Allow;
        }
        self.chained_observer()
            .map(|observer| observer.decide_policy_for_response(host, url))
            .unwrap_or(NavigationPolicy::Allow)
    }

    fn did_start_provisional_navigation(&self, host: HostId) {
        if host == self.host_id {
            if let Some(observer) = self.chained_observer() {
                observer.did_start_provisional_navigation(host);
            }
        }
    }

    fn did_fail_provisional_navigation(&self, host: HostId, error: &str) {
        if host == self.host_id {
            if let Some(observer) = self.chained_observer() {
                observer.did_fail_provisional_navigation(host, error);
            }
        }
    }

    fn did_finish_navigation(&self, host: HostId) {
        if host == self.host_id {
            if let Some(observer) = self.chained_observer() {
                observer.did_finish_navigation(host);
            }
        }
    }

    fn did_fail_navigation(&self, host: HostId, error: &str) {
        if host == self.host_id {
            if let Some(observer) = self.chained_observer() {
                observer.did_fail_navigation(host, error);
            }
        }
    }

    fn did_receive_auth_challenge(
        &self,
        host: HostId,
        challenge: &AuthChallenge,
    ) -> AuthChallengeDisposition {
        if host != self.host_id {
            return AuthChallengeDisposition::PerformDefaultHandling;
        }
        self.chained_observer()
            .map(|observer| observer.did_receive_auth_challenge(host, challenge))
            .unwrap_or(AuthChallengeDisposition::PerformDefaultHandling)
    }
}

// ---------------------------------------------------------------------------
// Responder
// ---------------------------------------------------------------------------

/// Hands a native handler's answer back to the page.
///
/// Requests sent without a `callbackId` get an inert responder: responding
/// does nothing. The responder does not keep the bridge alive.
pub struct Responder {
    bridge: Weak<Inner>,
    callback_id: Option<CallbackId>,
}

impl Responder {
    /// A responder that goes nowhere.
    pub fn inert() -> Self {
        Self {
            bridge: Weak::new(),
            callback_id: None,
        }
    }

    /// Whether the page is waiting for an answer.
    pub fn wants_response(&self) -> bool {
        self.callback_id.is_some()
    }

    pub fn callback_id(&self) -> Option<&CallbackId> {
        self.callback_id.as_ref()
    }

    /// Send `data` as the response. May be called from any thread.
    pub fn respond<T: Serialize + ?Sized>(self, data: &T) -> Result<()> {
        let Some(callback_id) = self.callback_id else {
            return Ok(());
        };
        let Some(bridge) = self.bridge.upgrade() else {
            debug!(%callback_id, "bridge dropped before handler responded");
            return Ok(());
        };
        let data = codec::to_payload(data)?;
        bridge.send(Outbound::Reply(Response::new(callback_id, data)))
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("callback_id", &self.callback_id)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Public handle
// ---------------------------------------------------------------------------

/// Native end of the bridge for one web view.
///
/// Cloning is cheap and every clone drives the same bridge. The web view only
/// holds the bridge weakly, so the application must keep a `Bridge` alive for
/// as long as it wants messages to flow.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<Inner>,
}

/// Non-owning handle, for closures that would otherwise keep the bridge
/// alive through its own registries.
#[derive(Clone)]
pub struct WeakBridge {
    inner: Weak<Inner>,
}

impl WeakBridge {
    pub fn upgrade(&self) -> Option<Bridge> {
        self.inner.upgrade().map(|inner| Bridge { inner })
    }
}

impl Bridge {
    /// Attach a new bridge to `host` with the default configuration.
    pub fn attach(host: Arc<dyn ScriptHost>) -> Result<Self> {
        Self::attach_with_config(host, BridgeConfig::default())
    }

    /// Attach a new bridge to `host`.
    ///
    /// The bridge becomes the view's navigation delegate and forwards
    /// whatever it does not handle to the delegate that was installed before.
    /// Fails with [`BridgeError::RuntimeAssetMissing`] if the configured
    /// runtime script cannot be read.
    #[instrument(skip_all, fields(host = %host.host_id()))]
    pub fn attach_with_config(host: Arc<dyn ScriptHost>, config: BridgeConfig) -> Result<Self> {
        let runtime = RuntimeScript::resolve(&config)?;
        let previous = host.navigation_delegate();
        let host_id = host.host_id();

        let inner = Arc::new_cyclic(|me| Inner {
            me: me.clone(),
            host: Arc::downgrade(&host),
            host_id,
            runtime,
            pending: PendingCalls::new(config.callback_id_prefix.clone()),
            config,
            handlers: HandlerRegistry::new(),
            startup: StartupQueue::new(),
            chained: Mutex::new(previous),
        });

        let delegate: Weak<dyn NavigationObserver> = Arc::downgrade(&inner) as Weak<Inner>;
        host.set_navigation_delegate(Some(delegate));
        info!("bridge attached");

        Ok(Self { inner })
    }

    pub fn downgrade(&self) -> WeakBridge {
        WeakBridge {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn state(&self) -> DispatchState {
        if self.inner.startup.is_active() {
            DispatchState::AwaitingRuntime
        } else {
            DispatchState::Active
        }
    }

    /// Number of native calls still waiting for the page to respond.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    /// Number of messages held until the runtime loads.
    pub fn queued_messages(&self) -> usize {
        self.inner.startup.len()
    }

    // -- Handlers ------------------------------------------------------------

    /// Register `handler` for requests named `name`, replacing any previous
    /// handler of that name.
    pub fn register_handler<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Value, Responder) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        self.inner.handlers.register(name, handler);
    }

    pub fn remove_handler(&self, name: &str) {
        self.inner.handlers.remove(name);
    }

    pub fn remove_all_handlers(&self) {
        self.inner.handlers.remove_all();
    }

    pub fn has_handler(&self, name: &str) -> bool {
        self.inner.handlers.contains(name)
    }

    // -- Calls ---------------------------------------------------------------

    /// Call the page's `handler_name` without waiting for a response.
    ///
    /// A payload that serializes to `null` is sent without a `data` key, so
    /// the page cannot tell an explicit `null` from no payload at all.
    pub fn call_handler<T: Serialize + ?Sized>(&self, handler_name: &str, data: &T) -> Result<()> {
        let data = codec::to_payload(data)?;
        self.inner.send(Outbound::Call {
            handler_name: handler_name.to_owned(),
            data,
            on_response: None,
        })
    }

    /// Call the page's `handler_name`; `on_response` runs on the UI thread
    /// with the page's answer, at most once. If the page never answers it
    /// never runs.
    pub fn call_handler_with_response<T, F>(
        &self,
        handler_name: &str,
        data: &T,
        on_response: F,
    ) -> Result<()>
    where
        T: Serialize + ?Sized,
        F: FnOnce(Value) + Send + 'static,
    {
        let data = codec::to_payload(data)?;
        self.inner.send(Outbound::Call {
            handler_name: handler_name.to_owned(),
            data,
            on_response: Some(Box::new(on_response)),
        })
    }

    /// Ask the page's runtime to dispatch messages synchronously instead of
    /// deferring each one behind a timer.
    pub fn disable_javascript_alert_box_safety_timeout(&self) -> Result<()> {
        self.call_handler(DISABLE_SAFETY_TIMEOUT_HANDLER, &Value::Null)
    }

    // -- Host plumbing -------------------------------------------------------

    /// Replace the observer that receives navigations the bridge does not
    /// handle.
    pub fn set_navigation_observer(&self, observer: Option<Weak<dyn NavigationObserver>>) {
        *self.inner.chained.lock().unwrap_or_else(|p| p.into_inner()) = observer;
    }

    /// The bridge as a navigation observer, for hosts that route
    /// notifications themselves.
    pub fn as_navigation_observer(&self) -> Weak<dyn NavigationObserver> {
        Arc::downgrade(&self.inner) as Weak<Inner>
    }

    /// Decode and process a fetched message queue. Called off the UI thread,
    /// the work is handed to it like any send.
    ///
    /// Returns the number of envelopes found in the batch.
    pub fn process_queue(&self, json: &str) -> Result<usize> {
        let batch = json.to_owned();
        self.inner
            .on_ui_thread(move |inner, _| inner.process_queue(&batch))
            .unwrap_or_else(|| self.inner.process_queue(json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use crate::loopback::LoopbackPage;

    fn attached() -> (Arc<LoopbackPage>, Bridge) {
        let page = LoopbackPage::new();
        let bridge = Bridge::attach(page.clone()).expect("attach");
        (page, bridge)
    }

    fn loaded() -> (Arc<LoopbackPage>, Bridge) {
        let (page, bridge) = attached();
        page.load();
        page.run_until_idle();
        (page, bridge)
    }

    fn page_messages(page: &LoopbackPage) -> usize {
        page.messages_from_native().len()
    }

    fn recorder() -> (Arc<Mutex<Vec<Value>>>, impl Fn() -> Vec<Value>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let read = {
            let seen = seen.clone();
            move || seen.lock().expect("lock").clone()
        };
        (seen, read)
    }

    #[test]
    fn call_before_load_is_injected_after_signal() {
        let (page, bridge) = attached();
        bridge
            .call_handler_with_response("echo", "hi", |_| {})
            .expect("call");
        assert_eq!(bridge.state(), DispatchState::AwaitingRuntime);
        assert!(page.scripts().is_empty());

        page.load();
        page.run_until_idle();

        assert_eq!(bridge.state(), DispatchState::Active);
        let delivered = page.messages_from_native();
        assert_eq!(delivered.len(), 1);
        assert_eq!(
            codec::encode(&delivered[0]).expect("encode"),
            r#"{"handlerName":"echo","data":"hi","callbackId":"objc_cb_1"}"#
        );
    }

    #[test]
    fn startup_calls_keep_order_and_later_calls_follow() {
        let (page, bridge) = attached();
        for name in ["A", "B", "C"] {
            bridge.call_handler(name, &Value::Null).expect("call");
        }
        assert_eq!(bridge.queued_messages(), 3);

        page.load();
        page.run_until_idle();
        bridge.call_handler("D", &Value::Null).expect("call");

        let names: Vec<String> = page
            .messages_from_native()
            .iter()
            .filter_map(|e| e.handler_name().map(str::to_owned))
            .collect();
        assert_eq!(names, ["A", "B", "C", "D"]);
    }

    #[test]
    fn second_loaded_signal_does_not_redispatch() {
        let (page, bridge) = attached();
        bridge.call_handler("once", &json!(1)).expect("call");
        page.load();
        page.run_until_idle();
        page.load();
        page.run_until_idle();

        assert_eq!(page.messages_from_native().len(), 1);
        assert_eq!(page.runtime_injections(), 2);
    }

    #[test]
    fn inbound_request_without_callback_sends_nothing_back() {
        let (page, bridge) = loaded();
        let (seen, read) = recorder();
        bridge.register_handler("greet", move |data, responder| {
            assert!(!responder.wants_response());
            seen.lock().expect("lock").push(data);
            responder.respond("ignored").expect("respond");
        });

        let scripts_before = page.scripts().len();
        let count = bridge
            .process_queue(r#"[{"handlerName":"greet","data":"Hello world"}]"#)
            .expect("process");
        page.run_until_idle();

        assert_eq!(count, 1);
        assert_eq!(read(), vec![json!("Hello world")]);
        assert_eq!(page.scripts().len(), scripts_before);
    }

    #[test]
    fn response_resolves_once_then_is_unmatched() {
        let (page, bridge) = loaded();
        let (seen, read) = recorder();
        bridge
            .call_handler_with_response("neverAnswered", &Value::Null, move |value| {
                seen.lock().expect("lock").push(value);
            })
            .expect("call");
        page.run_until_idle();
        assert_eq!(bridge.pending_calls(), 1);

        let batch = r#"[{"responseId":"objc_cb_1","responseData":{"foo":"bar"}}]"#;
        bridge.process_queue(batch).expect("first batch");
        assert_eq!(read(), vec![json!({"foo": "bar"})]);
        assert_eq!(bridge.pending_calls(), 0);

        let repeat = bridge.inner.process_envelope(Envelope::Response(Response::new(
            "objc_cb_1".into(),
            json!({"foo": "bar"}),
        )));
        assert!(matches!(repeat, Err(BridgeError::UnmatchedResponse(id)) if id.as_str() == "objc_cb_1"));
        bridge.process_queue(batch).expect("repeat batch is absorbed");
        assert_eq!(read().len(), 1);
    }

    #[test]
    fn removed_handler_is_unregistered() {
        let (_page, bridge) = loaded();
        let hits = Arc::new(AtomicUsize::new(0));
        bridge.register_handler("h", |_, _| panic!("overridden"));
        let h = hits.clone();
        bridge.register_handler("h", move |_, _| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        let request = || Envelope::Request(Request::new("h", Value::Null, None));
        bridge.inner.process_envelope(request()).expect("handled");
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        bridge.remove_handler("h");
        let result = bridge.inner.process_envelope(request());
        assert!(matches!(result, Err(BridgeError::UnregisteredHandler(name)) if name == "h"));

        bridge.register_handler("x", |_, _| {});
        bridge.remove_all_handlers();
        assert!(!bridge.has_handler("x"));
    }

    #[test]
    fn undecodable_batches_are_errors_not_panics() {
        let (_page, bridge) = loaded();
        assert!(matches!(bridge.process_queue(""), Err(BridgeError::Decoding(_))));
        assert!(matches!(bridge.process_queue("{}"), Err(BridgeError::Decoding(_))));
        assert_eq!(bridge.process_queue("[1, null]").expect("partial"), 0);
    }

    #[test]
    fn encoding_error_reaches_caller() {
        let (page, bridge) = loaded();
        let mut bad = std::collections::BTreeMap::new();
        bad.insert((1, 2), 3);
        let result = bridge.call_handler("x", &bad);
        assert!(matches!(result, Err(BridgeError::Encoding(_))));

        let sent_before = page_messages(&page);
        assert!(matches!(
            bridge.call_handler("x", &f64::NAN),
            Err(BridgeError::Encoding(_))
        ));
        assert!(matches!(
            bridge.call_handler_with_response("y", &vec![1.0, f64::INFINITY], |_| {}),
            Err(BridgeError::Encoding(_))
        ));
        assert_eq!(page_messages(&page), sent_before);
        assert_eq!(bridge.pending_calls(), 0);
    }

    #[test]
    fn non_finite_response_is_reported_to_handler() {
        let (page, bridge) = loaded();
        let outcome = Arc::new(Mutex::new(None));
        let o = outcome.clone();
        bridge.register_handler("measure", move |_, responder| {
            *o.lock().expect("lock") = Some(responder.respond(&f64::INFINITY));
        });
        bridge
            .process_queue(r#"[{"handlerName":"measure","callbackId":"cb_1_0"}]"#)
            .expect("process");
        page.run_until_idle();

        let outcome = outcome.lock().expect("lock").take().expect("handler ran");
        assert!(matches!(outcome, Err(BridgeError::Encoding(_))));
        assert!(page.messages_from_native().iter().all(|e| !e.is_response()));
    }

    #[test]
    fn numeric_callback_id_still_runs_handler() {
        let (page, bridge) = loaded();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        bridge.register_handler("greet", move |data, responder| {
            assert_eq!(data, json!("x"));
            assert!(!responder.wants_response());
            h.fetch_add(1, Ordering::SeqCst);
            responder.respond("unused").expect("respond");
        });

        let scripts_before = page.scripts().len();
        let count = bridge
            .process_queue(r#"[{"handlerName":"greet","data":"x","callbackId":5}]"#)
            .expect("process");
        page.run_until_idle();

        assert_eq!(count, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(page.scripts().len(), scripts_before);
    }

    #[test]
    fn reserved_urls_are_cancelled_and_others_forwarded() {
        struct Deny;
        impl NavigationObserver for Deny {
            fn decide_policy_for_action(&self, _: HostId, _: &Url) -> NavigationPolicy {
                NavigationPolicy::Cancel
            }
        }

        let (page, bridge) = attached();
        let url = |s: &str| Url::parse(s).expect("url");

        assert_eq!(page.navigate(&url("https://example.com/")), NavigationPolicy::Allow);
        assert_eq!(
            page.navigate(&url("wvjbscheme://__unknown__")),
            NavigationPolicy::Cancel
        );
        assert_eq!(
            page.navigate(&url("https://__wvjb_queue_message__")),
            NavigationPolicy::Cancel
        );

        let deny: Arc<dyn NavigationObserver> = Arc::new(Deny);
        bridge.set_navigation_observer(Some(Arc::downgrade(&deny)));
        assert_eq!(page.navigate(&url("https://example.com/")), NavigationPolicy::Cancel);
        assert_eq!(
            page.navigate(&url("https://__bridge_loaded__")),
            NavigationPolicy::Cancel
        );
        assert_eq!(bridge.state(), DispatchState::Active);
    }

    #[test]
    fn previous_delegate_is_chained() {
        #[derive(Default)]
        struct Counting {
            finished: AtomicUsize,
        }
        impl NavigationObserver for Counting {
            fn did_finish_navigation(&self, _: HostId) {
                self.finished.fetch_add(1, Ordering::SeqCst);
            }
            fn did_receive_auth_challenge(
                &self,
                _: HostId,
                _: &AuthChallenge,
            ) -> AuthChallengeDisposition {
                AuthChallengeDisposition::CancelAuthenticationChallenge
            }
        }

        let page = LoopbackPage::new();
        let previous = Arc::new(Counting::default());
        let as_observer: Arc<dyn NavigationObserver> = previous.clone();
        page.set_navigation_delegate(Some(Arc::downgrade(&as_observer)));

        let bridge = Bridge::attach(page.clone()).expect("attach");
        let delegate = bridge.as_navigation_observer().upgrade().expect("alive");

        delegate.did_finish_navigation(page.host_id());
        delegate.did_finish_navigation(HostId::next());
        assert_eq!(previous.finished.load(Ordering::SeqCst), 1);

        let challenge = AuthChallenge {
            host: "example.com".into(),
            port: 443,
            realm: None,
            method: "basic".into(),
        };
        assert_eq!(
            delegate.did_receive_auth_challenge(page.host_id(), &challenge),
            AuthChallengeDisposition::CancelAuthenticationChallenge
        );

        drop(as_observer);
        drop(previous);
        assert_eq!(
            delegate.did_receive_auth_challenge(page.host_id(), &challenge),
            AuthChallengeDisposition::PerformDefaultHandling
        );
    }

    #[test]
    fn bridge_does_not_outlive_host_or_vice_versa() {
        let (page, bridge) = attached();
        drop(page);
        // Host gone: sends are silent no-ops.
        bridge.call_handler("x", &json!(1)).expect("no-op");

        let (page, bridge) = attached();
        drop(bridge);
        // Bridge gone: the page's delegate is dead and navigation is allowed.
        page.load();
        page.run_until_idle();
        assert_eq!(page.runtime_injections(), 0);
    }

    #[test]
    fn custom_prefix_and_message_logging() {
        let page = LoopbackPage::new();
        let config = BridgeConfig {
            log_messages: true,
            log_max_length: 8,
            callback_id_prefix: "native_".into(),
            ..BridgeConfig::default()
        };
        let bridge = Bridge::attach_with_config(page.clone(), config).expect("attach");
        bridge
            .call_handler_with_response("echo", "x", |_| {})
            .expect("call");
        page.load();
        page.run_until_idle();

        match &page.messages_from_native()[0] {
            Envelope::Request(req) => {
                assert_eq!(req.callback_id.as_ref().map(CallbackId::as_str), Some("native_1"));
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn missing_runtime_file_fails_attach() {
        let page = LoopbackPage::new();
        let config = BridgeConfig {
            runtime_script_path: Some("/missing/WebViewJavascriptBridge.js".into()),
            ..BridgeConfig::default()
        };
        let result = Bridge::attach_with_config(page.clone(), config);
        assert!(matches!(result, Err(BridgeError::RuntimeAssetMissing(_))));
        assert!(page.navigation_delegate().is_none());
    }

    // ---- Scripted host ----

    /// Host whose `_fetchQueue` result is fixed and whose UI thread either is
    /// the caller's or never runs anything.
    struct CannedHost {
        id: HostId,
        fetch: fn() -> Result<Option<String>>,
        ui_thread: bool,
        scripts: Mutex<Vec<String>>,
        delegate: Mutex<Option<Weak<dyn NavigationObserver>>>,
    }

    impl CannedHost {
        fn new(fetch: fn() -> Result<Option<String>>, ui_thread: bool) -> Arc<Self> {
            Arc::new(Self {
                id: HostId::next(),
                fetch,
                ui_thread,
                scripts: Mutex::new(Vec::new()),
                delegate: Mutex::new(None),
            })
        }

        fn scripts(&self) -> Vec<String> {
            self.scripts.lock().expect("lock").clone()
        }
    }

    impl ScriptHost for CannedHost {
        fn host_id(&self) -> HostId {
            self.id
        }

        fn evaluate_script(&self, script: &str, on_result: Option<crate::traits::ScriptCallback>) {
            self.scripts.lock().expect("lock").push(script.to_owned());
            if let Some(callback) = on_result {
                callback((self.fetch)());
            }
        }

        fn is_ui_thread(&self) -> bool {
            self.ui_thread
        }

        fn run_on_ui_thread(&self, task: crate::traits::UiTask) {
            drop(task);
        }

        fn navigation_delegate(&self) -> Option<Weak<dyn NavigationObserver>> {
            self.delegate.lock().expect("lock").clone()
        }

        fn set_navigation_delegate(&self, delegate: Option<Weak<dyn NavigationObserver>>) {
            *self.delegate.lock().expect("lock") = delegate;
        }
    }

    fn signal_at(kind: BridgeSignal) -> Url {
        signal::signal_url(&kind).expect("signal url")
    }

    #[test]
    fn failed_queue_fetches_are_absorbed() {
        let fetches: [fn() -> Result<Option<String>>; 4] = [
            || Ok(None),
            || Err(BridgeError::Script("ReferenceError".into())),
            || Ok(Some("not json".to_owned())),
            || Ok(Some(r#"{"handlerName":"greet"}"#.to_owned())),
        ];
        for fetch in fetches {
            let host = CannedHost::new(fetch, true);
            let bridge = Bridge::attach(host.clone()).expect("attach");
            let hits = Arc::new(AtomicUsize::new(0));
            let h = hits.clone();
            bridge.register_handler("greet", move |_, _| {
                h.fetch_add(1, Ordering::SeqCst);
            });

            let delegate = bridge.as_navigation_observer().upgrade().expect("alive");
            let queue_url = signal_at(BridgeSignal::QueueHasMessage);
            let policy = delegate.decide_policy_for_action(host.id, &queue_url);
            assert_eq!(policy, NavigationPolicy::Cancel);
            assert_eq!(host.scripts(), [FETCH_QUEUE_SCRIPT]);
            assert_eq!(hits.load(Ordering::SeqCst), 0);

            bridge
                .process_queue(r#"[{"handlerName":"greet"}]"#)
                .expect("bridge still usable");
            assert_eq!(hits.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn foreign_web_view_is_allowed_and_ignored() {
        let host = CannedHost::new(|| Ok(None), true);
        let bridge = Bridge::attach(host.clone()).expect("attach");
        bridge.call_handler("held", &json!(1)).expect("queued");
        let delegate = bridge.as_navigation_observer().upgrade().expect("alive");

        let other = HostId::next();
        for kind in [BridgeSignal::RuntimeLoaded, BridgeSignal::QueueHasMessage] {
            assert_eq!(
                delegate.decide_policy_for_action(other, &signal_at(kind)),
                NavigationPolicy::Allow
            );
        }
        assert!(host.scripts().is_empty());
        assert_eq!(bridge.state(), DispatchState::AwaitingRuntime);
        assert_eq!(bridge.queued_messages(), 1);
    }

    #[test]
    fn dropped_ui_task_is_host_unavailable() {
        let host = CannedHost::new(|| Ok(None), false);
        let bridge = Bridge::attach(host.clone()).expect("attach");

        assert!(matches!(
            bridge.call_handler_with_response("x", &json!(1), |_| {}),
            Err(BridgeError::HostUnavailable)
        ));
        assert!(matches!(
            bridge.process_queue("[]"),
            Err(BridgeError::HostUnavailable)
        ));
        assert_eq!(bridge.pending_calls(), 0);
        assert_eq!(bridge.queued_messages(), 0);
    }
}
