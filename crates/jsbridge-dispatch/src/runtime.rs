// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The JavaScript half of the bridge, injected into the page every time it
// reports `__bridge_loaded__`.

use std::borrow::Cow;
use std::path::Path;

use tracing::info;

use jsbridge_core::config::BridgeConfig;
use jsbridge_core::error::{BridgeError, Result};

/// Runtime source compiled into the crate.
pub const BUNDLED_RUNTIME: &str = include_str!("../assets/WebViewJavascriptBridge.js");

/// Text every runtime script defines; used to recognise an injection.
pub const RUNTIME_MARKER: &str = "window.WebViewJavascriptBridge = {";

/// Source text of the runtime a bridge injects.
#[derive(Debug, Clone)]
pub struct RuntimeScript {
    source: Cow<'static, str>,
}

impl RuntimeScript {
    pub fn bundled() -> Self {
        Self {
            source: Cow::Borrowed(BUNDLED_RUNTIME),
        }
    }

    /// Load a replacement runtime from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::RuntimeAssetMissing(format!("{}: {e}", path.display())))?;
        if source.trim().is_empty() {
            return Err(BridgeError::RuntimeAssetMissing(format!(
                "{}: file is empty",
                path.display()
            )));
        }
        info!(path = %path.display(), bytes = source.len(), "loaded bridge runtime from file");
        Ok(Self {
            source: Cow::Owned(source),
        })
    }

    /// The runtime `config` asks for.
    pub fn resolve(config: &BridgeConfig) -> Result<Self> {
        match &config.runtime_script_path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::bundled()),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}
