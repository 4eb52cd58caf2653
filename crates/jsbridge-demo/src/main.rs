// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// jsbridge-demo — Drives a bridge against the in-process loopback page.
//
// Mirrors the sample app: native registers `jsCallNativeHandler` and
// `jsCallNativeHandler_1`, calls the page's `nativeCallJSHandler` before the
// page has loaded (exercising the startup queue) and
// `nativeCallJSHandler_1` afterwards.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use clap::Parser;
use serde_json::{Value, json};

use jsbridge_core::{BridgeConfig, Result};
use jsbridge_dispatch::{Bridge, LoopbackPage};

#[derive(Debug, Parser)]
#[command(name = "jsbridge-demo", version, about = "Exercise jsbridge against a loopback page")]
struct Args {
    /// JSON bridge configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log every envelope sent and received.
    #[arg(long)]
    log_messages: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "demo failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => BridgeConfig::load(path)?,
        None => BridgeConfig::default(),
    };
    if args.log_messages {
        config.log_messages = true;
    }

    let page = LoopbackPage::new();
    for name in ["nativeCallJSHandler", "nativeCallJSHandler_1"] {
        page.register_handler(name, move |data, responder| {
            tracing::info!(handler = name, %data, "page handler called");
            if let Err(e) = responder.respond(&json!({ "from": name, "echo": data })) {
                tracing::warn!(error = %e, "page handler could not respond");
            }
        });
    }
    page.on_bridge_ready(|page| {
        page.call_handler_with_response("jsCallNativeHandler", json!({"greeting": "hi"}), |answer| {
            tracing::info!(%answer, "page got response from jsCallNativeHandler");
        });
        page.call_handler("jsCallNativeHandler_1", json!("fire and forget"));
    });

    let bridge = Bridge::attach_with_config(page.clone(), config)?;
    for name in ["jsCallNativeHandler", "jsCallNativeHandler_1"] {
        bridge.register_handler(name, move |data, responder| {
            tracing::info!(handler = name, %data, "native handler called");
            if let Err(e) = responder.respond(&data) {
                tracing::warn!(error = %e, "native handler could not respond");
            }
        });
    }

    let answers: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));

    let sink = answers.clone();
    bridge.call_handler_with_response("nativeCallJSHandler", "queued before load", move |answer| {
        sink.lock().unwrap_or_else(|p| p.into_inner()).push(answer);
    })?;
    tracing::info!(queued = bridge.queued_messages(), state = ?bridge.state(), "page not loaded yet");

    page.load();
    let ran = page.run_until_idle();
    tracing::info!(tasks = ran, state = ?bridge.state(), "page loaded");

    let sink = answers.clone();
    bridge.call_handler_with_response("nativeCallJSHandler_1", &json!([1, 2, 3]), move |answer| {
        sink.lock().unwrap_or_else(|p| p.into_inner()).push(answer);
    })?;
    page.run_until_idle();

    for answer in answers.lock().unwrap_or_else(|p| p.into_inner()).iter() {
        tracing::info!(%answer, "native got response");
    }
    tracing::info!(
        pending = bridge.pending_calls(),
        page_errors = page.page_errors().len(),
        "done"
    );
    Ok(())
}
