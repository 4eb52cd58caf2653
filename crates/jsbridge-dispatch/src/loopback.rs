// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-process page host.
//
// `LoopbackPage` stands in for a real web view. It reproduces what the
// bundled JavaScript runtime does inside a page (handler table, outbound
// queue, response callbacks, the safety timeout) and what the web view does
// around it (navigation delegate, asynchronous script results, a UI thread
// that must be pumped). Nothing is actually executed as JavaScript; scripts
// are recognised by shape.
//
// The thread that creates the page is its UI thread. Work the page would do
// "later" (timer callbacks, iframe navigations, script results) is queued
// and only happens inside `run_until_idle`.

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, ThreadId};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use jsbridge_core::codec::{self, FETCH_QUEUE_SCRIPT, HANDLE_MESSAGE_FN};
use jsbridge_core::error::{BridgeError, Result};
use jsbridge_core::types::{CallbackId, Envelope, Request, Response};

use crate::bridge::DISABLE_SAFETY_TIMEOUT_HANDLER;
use crate::runtime::RUNTIME_MARKER;
use crate::signal::{self, BridgeSignal};
use crate::traits::{HostId, NavigationObserver, NavigationPolicy, ScriptCallback, ScriptHost, UiTask};

/// Page-side handler, the counterpart of `bridge.registerHandler(name, fn)`.
pub type PageHandler = Arc<dyn Fn(Value, PageResponder) + Send + Sync + 'static>;

/// Page-side response callback.
pub type PageCallback = Box<dyn FnOnce(Value) + Send + 'static>;

/// Page script run every time the runtime becomes available.
pub type SetupHook = Arc<dyn Fn(&LoopbackPage) + Send + Sync + 'static>;

/// Upper bound on tasks processed by one `run_until_idle` call.
const MAX_TASKS_PER_RUN: usize = 10_000;

const NO_RUNTIME: &str = "ReferenceError: Can't find variable: WebViewJavascriptBridge";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

enum Task {
    Navigate(Url),
    Deliver(ScriptCallback, Result<Option<String>>),
    Dispatch(Envelope),
    Run(UiTask),
}

/// State owned by the injected runtime; a reload throws it away.
struct RuntimeState {
    installed: bool,
    send_queue: Vec<Envelope>,
    response_callbacks: HashMap<CallbackId, PageCallback>,
    unique_id: u64,
    safety_timeout: bool,
}

impl RuntimeState {
    fn fresh() -> Self {
        Self {
            installed: false,
            send_queue: Vec::new(),
            response_callbacks: HashMap::new(),
            unique_id: 1,
            safety_timeout: true,
        }
    }
}

/// Calls the page made before the runtime existed.
struct DeferredCall {
    handler_name: String,
    data: Value,
    on_response: Option<PageCallback>,
}

#[derive(Default)]
struct PageLog {
    scripts: Vec<String>,
    from_native: Vec<Envelope>,
    navigations: Vec<Url>,
    errors: Vec<String>,
}

/// A web view with the bridge runtime simulated in Rust.
pub struct LoopbackPage {
    me: Weak<LoopbackPage>,
    id: HostId,
    ui_thread: ThreadId,
    delegate: Mutex<Option<Weak<dyn NavigationObserver>>>,
    handlers: Mutex<HashMap<String, PageHandler>>,
    setup_hooks: Mutex<Vec<SetupHook>>,
    deferred: Mutex<Vec<DeferredCall>>,
    runtime: Mutex<RuntimeState>,
    tasks: Mutex<VecDeque<Task>>,
    log: Mutex<PageLog>,
}

impl LoopbackPage {
    /// Create a blank page whose UI thread is the calling thread.
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            id: HostId::next(),
            ui_thread: thread::current().id(),
            delegate: Mutex::new(None),
            handlers: Mutex::new(HashMap::new()),
            setup_hooks: Mutex::new(Vec::new()),
            deferred: Mutex::new(Vec::new()),
            runtime: Mutex::new(RuntimeState::fresh()),
            tasks: Mutex::new(VecDeque::new()),
            log: Mutex::new(PageLog::default()),
        })
    }

    // -- Page script ---------------------------------------------------------

    /// Register a page handler. Registrations belong to the page, so they
    /// survive reloads.
    pub fn register_handler<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Value, PageResponder) + Send + Sync + 'static,
    {
        let handler: PageHandler = Arc::new(handler);
        lock(&self.handlers).insert(name.into(), handler);
    }

    /// Run `hook` whenever the runtime is installed.
    pub fn on_bridge_ready<F>(&self, hook: F)
    where
        F: Fn(&LoopbackPage) + Send + Sync + 'static,
    {
        let hook: SetupHook = Arc::new(hook);
        lock(&self.setup_hooks).push(hook);
    }

    /// `bridge.callHandler(name, data)` from page code.
    pub fn call_handler(&self, handler_name: &str, data: Value) {
        self.call(handler_name.to_owned(), data, None);
    }

    /// `bridge.callHandler(name, data, callback)` from page code.
    pub fn call_handler_with_response<F>(&self, handler_name: &str, data: Value, on_response: F)
    where
        F: FnOnce(Value) + Send + 'static,
    {
        self.call(handler_name.to_owned(), data, Some(Box::new(on_response)));
    }

    /// The handlers of the sample echo page:
    ///
    /// * `echoHandler` answers with whatever it was sent.
    /// * `jsRcvResponseTest` calls native `objcEchoToJs` with `{"foo":"bar"}`
    ///   and answers `"Response from JS"` once the same object comes back,
    ///   `"Failed"` otherwise.
    /// * On every load the page calls native `nativeFunc` with
    ///   `"Hello world"`.
    pub fn install_echo_handlers(&self) {
        self.register_handler("echoHandler", |data, responder| {
            if let Err(e) = responder.respond(&data) {
                warn!(error = %e, "echoHandler could not respond");
            }
        });

        let page = self.me.clone();
        self.register_handler("jsRcvResponseTest", move |_, responder| {
            let Some(page) = page.upgrade() else {
                return;
            };
            let expected = serde_json::json!({"foo": "bar"});
            page.call_handler_with_response("objcEchoToJs", expected.clone(), move |answer| {
                let verdict = if answer == expected { "Response from JS" } else { "Failed" };
                if let Err(e) = responder.respond(verdict) {
                    warn!(error = %e, "jsRcvResponseTest could not respond");
                }
            });
        });

        self.on_bridge_ready(|page| page.call_handler("nativeFunc", Value::from("Hello world")));
    }

    // -- Page lifecycle ------------------------------------------------------

    /// Load (or reload) a page that sets the bridge up: the runtime state is
    /// discarded and the page signals `__bridge_loaded__`.
    pub fn load(&self) {
        self.reset_runtime();
        match signal::signal_url(&BridgeSignal::RuntimeLoaded) {
            Some(url) => self.push_task(Task::Navigate(url)),
            None => warn!("no signal URL for runtime-loaded"),
        }
    }

    /// Alias of [`load`](Self::load).
    pub fn reload(&self) {
        self.load();
    }

    /// Replace the document with one that never asks for the bridge.
    pub fn load_without_bridge(&self) {
        self.reset_runtime();
    }

    fn reset_runtime(&self) {
        *lock(&self.runtime) = RuntimeState::fresh();
    }

    /// Ask the delegate about a navigation to `url`, as the web view would
    /// for a link click or an iframe `src` change.
    pub fn navigate(&self, url: &Url) -> NavigationPolicy {
        lock(&self.log).navigations.push(url.clone());

        let Some(delegate) = self.current_delegate() else {
            return NavigationPolicy::Allow;
        };
        if delegate.decide_policy_for_action(self.id, url) == NavigationPolicy::Cancel {
            return NavigationPolicy::Cancel;
        }

        delegate.did_start_provisional_navigation(self.id);
        match delegate.decide_policy_for_response(self.id, url) {
            NavigationPolicy::Allow => {
                delegate.did_finish_navigation(self.id);
                NavigationPolicy::Allow
            }
            NavigationPolicy::Cancel => {
                delegate.did_fail_provisional_navigation(self.id, "cancelled");
                NavigationPolicy::Cancel
            }
        }
    }

    fn current_delegate(&self) -> Option<Arc<dyn NavigationObserver>> {
        lock(&self.delegate).as_ref().and_then(Weak::upgrade)
    }

    // -- Event loop ----------------------------------------------------------

    /// Process queued work until none is left. Returns the number of tasks
    /// run. Call on the UI thread.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while ran < MAX_TASKS_PER_RUN {
            let Some(task) = lock(&self.tasks).pop_front() else {
                break;
            };
            ran += 1;
            match task {
                Task::Navigate(url) => {
                    self.navigate(&url);
                }
                Task::Deliver(callback, result) => callback(result),
                Task::Dispatch(envelope) => self.dispatch_from_native(envelope),
                Task::Run(work) => work(),
            }
        }
        if ran == MAX_TASKS_PER_RUN {
            warn!(ran, "page event loop did not settle");
        }
        ran
    }

    pub fn pending_tasks(&self) -> usize {
        lock(&self.tasks).len()
    }

    fn push_task(&self, task: Task) {
        lock(&self.tasks).push_back(task);
    }

    // -- Inspection ----------------------------------------------------------

    pub fn scripts(&self) -> Vec<String> {
        lock(&self.log).scripts.clone()
    }

    /// How many times a runtime script was evaluated.
    pub fn runtime_injections(&self) -> usize {
        lock(&self.log)
            .scripts
            .iter()
            .filter(|script| script.contains(RUNTIME_MARKER))
            .count()
    }

    /// Every envelope native code delivered to the page, across reloads.
    pub fn messages_from_native(&self) -> Vec<Envelope> {
        lock(&self.log).from_native.clone()
    }

    pub fn navigations(&self) -> Vec<Url> {
        lock(&self.log).navigations.clone()
    }

    /// Script errors the page raised.
    pub fn page_errors(&self) -> Vec<String> {
        lock(&self.log).errors.clone()
    }

    pub fn runtime_installed(&self) -> bool {
        lock(&self.runtime).installed
    }

    pub fn safety_timeout_disabled(&self) -> bool {
        !lock(&self.runtime).safety_timeout
    }

    // -- Runtime simulation --------------------------------------------------

    fn evaluate(&self, script: &str) -> Result<Option<String>> {
        if script.contains(RUNTIME_MARKER) {
            self.install_runtime();
            return Ok(None);
        }
        if script.trim() == FETCH_QUEUE_SCRIPT {
            return self.fetch_queue();
        }
        if let Some(literal) = script
            .strip_prefix(HANDLE_MESSAGE_FN)
            .and_then(|rest| rest.strip_prefix("('"))
            .and_then(|rest| rest.strip_suffix("');"))
        {
            self.handle_message_from_native(literal)?;
            return Ok(None);
        }
        debug!(bytes = script.len(), "ignoring unrecognised script");
        Ok(None)
    }

    fn install_runtime(&self) {
        {
            let mut runtime = lock(&self.runtime);
            if runtime.installed {
                debug!("runtime already present, injection ignored");
                return;
            }
            runtime.installed = true;
        }

        // The runtime's hidden iframe signals once as it is created.
        if let Some(url) = signal::signal_url(&BridgeSignal::QueueHasMessage) {
            self.push_task(Task::Navigate(url));
        }

        let hooks: Vec<SetupHook> = lock(&self.setup_hooks).clone();
        for hook in hooks {
            hook(self);
        }
        let deferred = std::mem::take(&mut *lock(&self.deferred));
        for call in deferred {
            self.call(call.handler_name, call.data, call.on_response);
        }
    }

    fn fetch_queue(&self) -> Result<Option<String>> {
        let queue = {
            let mut runtime = lock(&self.runtime);
            if !runtime.installed {
                return Err(BridgeError::Script(NO_RUNTIME.into()));
            }
            std::mem::take(&mut runtime.send_queue)
        };
        let json = serde_json::to_string(&queue).map_err(BridgeError::Encoding)?;
        Ok(Some(json))
    }

    fn handle_message_from_native(&self, literal: &str) -> Result<()> {
        let (installed, deferred) = {
            let runtime = lock(&self.runtime);
            (runtime.installed, runtime.safety_timeout)
        };
        if !installed {
            return Err(BridgeError::Script(NO_RUNTIME.into()));
        }

        let json = codec::unescape_script_literal(literal)?;
        let envelope: Envelope = serde_json::from_str(&json)
            .map_err(|e| BridgeError::Script(format!("SyntaxError: {e}")))?;
        lock(&self.log).from_native.push(envelope.clone());

        if deferred {
            self.push_task(Task::Dispatch(envelope));
        } else {
            self.dispatch_from_native(envelope);
        }
        Ok(())
    }

    fn dispatch_from_native(&self, envelope: Envelope) {
        match envelope {
            Envelope::Response(response) => {
                let callback = lock(&self.runtime)
                    .response_callbacks
                    .remove(&response.response_id);
                match callback {
                    Some(callback) => callback(response.response_data),
                    None => debug!(response_id = %response.response_id, "page has no callback for response"),
                }
            }
            Envelope::Request(request) => {
                if request.handler_name == DISABLE_SAFETY_TIMEOUT_HANDLER {
                    lock(&self.runtime).safety_timeout = false;
                    return;
                }
                let handler = lock(&self.handlers).get(&request.handler_name).cloned();
                let Some(handler) = handler else {
                    warn!(handler = %request.handler_name, "page has no handler for message from native");
                    return;
                };
                let responder = PageResponder {
                    page: self.me.clone(),
                    callback_id: request.callback_id.clone(),
                };
                handler(request.payload(), responder);
            }
        }
    }

    fn call(&self, handler_name: String, data: Value, on_response: Option<PageCallback>) {
        let callback_id = {
            let mut runtime = lock(&self.runtime);
            if !runtime.installed {
                drop(runtime);
                lock(&self.deferred).push(DeferredCall {
                    handler_name,
                    data,
                    on_response,
                });
                return;
            }
            on_response.map(|callback| {
                let id = CallbackId(format!(
                    "cb_{}_{}",
                    runtime.unique_id,
                    chrono::Utc::now().timestamp_millis()
                ));
                runtime.unique_id += 1;
                runtime.response_callbacks.insert(id.clone(), callback);
                id
            })
        };
        self.send(Request::new(handler_name, data, callback_id).into());
    }

    fn send(&self, envelope: Envelope) {
        {
            let mut runtime = lock(&self.runtime);
            if !runtime.installed {
                drop(runtime);
                lock(&self.log)
                    .errors
                    .push(format!("{NO_RUNTIME} (message to native dropped)"));
                return;
            }
            runtime.send_queue.push(envelope);
        }
        if let Some(url) = signal::signal_url(&BridgeSignal::QueueHasMessage) {
            self.push_task(Task::Navigate(url));
        }
    }
}

impl ScriptHost for LoopbackPage {
    fn host_id(&self) -> HostId {
        self.id
    }

    fn evaluate_script(&self, script: &str, on_result: Option<ScriptCallback>) {
        lock(&self.log).scripts.push(script.to_owned());
        let result = self.evaluate(script);
        if let Err(e) = &result {
            lock(&self.log).errors.push(e.to_string());
        }
        if let Some(callback) = on_result {
            self.push_task(Task::Deliver(callback, result));
        }
    }

    fn is_ui_thread(&self) -> bool {
        thread::current().id() == self.ui_thread
    }

    fn run_on_ui_thread(&self, task: UiTask) {
        if self.is_ui_thread() {
            task();
            return;
        }
        let (done_tx, done_rx) = mpsc::channel();
        self.push_task(Task::Run(Box::new(move || {
            task();
            let _ = done_tx.send(());
        })));
        // Disconnected means the page went away with the task unrun.
        let _ = done_rx.recv();
    }

    fn navigation_delegate(&self) -> Option<Weak<dyn NavigationObserver>> {
        lock(&self.delegate).clone()
    }

    fn set_navigation_delegate(&self, delegate: Option<Weak<dyn NavigationObserver>>) {
        *lock(&self.delegate) = delegate;
    }
}

/// The `responseCallback` a page handler receives.
pub struct PageResponder {
    page: Weak<LoopbackPage>,
    callback_id: Option<CallbackId>,
}

impl PageResponder {
    pub fn wants_response(&self) -> bool {
        self.callback_id.is_some()
    }

    /// Queue the response for native code. No-op when the caller did not ask
    /// for one.
    pub fn respond<T: Serialize + ?Sized>(self, data: &T) -> Result<()> {
        let (Some(callback_id), Some(page)) = (self.callback_id, self.page.upgrade()) else {
            return Ok(());
        };
        let data = codec::to_payload(data)?;
        page.send(Response::new(callback_id, data).into());
        Ok(())
    }
}
