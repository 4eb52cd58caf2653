// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for jsbridge.

use thiserror::Error;

use crate::types::CallbackId;

/// Top-level error type for all bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    // -- Wire codec --
    #[error("message payload has no JSON representation: {0}")]
    Encoding(#[source] serde_json::Error),

    #[error("message queue could not be decoded: {0}")]
    Decoding(String),

    // -- Dispatch --
    #[error("no matching callback for response {0}")]
    UnmatchedResponse(CallbackId),

    #[error("no handler registered for {0:?}")]
    UnregisteredHandler(String),

    #[error("unknown bridge command: {0}")]
    UnknownSignal(String),

    // -- Host web view --
    #[error("bridge runtime script unavailable: {0}")]
    RuntimeAssetMissing(String),

    #[error("script evaluation failed: {0}")]
    Script(String),

    #[error("web view is no longer available")]
    HostUnavailable,

    // -- Configuration / persistence --
    #[error("configuration error: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a failure reaches the outside world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Logged and dropped; no caller is waiting on it.
    Absorbed,
    /// Returned once to whoever made the call.
    CallerVisible,
}

impl BridgeError {
    /// Classify the error. Nothing in the bridge is retried, so this is the
    /// whole of its error policy.
    pub fn disposition(&self) -> Disposition {
        match self {
            BridgeError::Decoding(_)
            | BridgeError::UnmatchedResponse(_)
            | BridgeError::UnregisteredHandler(_)
            | BridgeError::UnknownSignal(_)
            | BridgeError::Script(_)
            | BridgeError::HostUnavailable => Disposition::Absorbed,

            BridgeError::Encoding(_)
            | BridgeError::RuntimeAssetMissing(_)
            | BridgeError::Config(_)
            | BridgeError::Io(_) => Disposition::CallerVisible,
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BridgeError>;
