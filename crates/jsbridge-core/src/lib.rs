// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// jsbridge — Envelope types, error definitions, configuration and the wire
// codec shared by the dispatch engine and its hosts.

pub mod codec;
pub mod config;
pub mod error;
pub mod types;

pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use types::*;
