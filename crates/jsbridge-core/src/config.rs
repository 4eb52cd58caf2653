// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bridge configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// Default prefix for natively minted callback ids.
pub const DEFAULT_CALLBACK_ID_PREFIX: &str = "objc_cb_";

/// Per-bridge settings. Unknown or missing keys in a config file fall back to
/// the defaults below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Trace every message sent and received at `debug` level.
    pub log_messages: bool,
    /// Maximum number of bytes of a message body shown in a trace line.
    pub log_max_length: usize,
    /// Load the JavaScript runtime from this file instead of the bundled copy.
    pub runtime_script_path: Option<PathBuf>,
    /// Prefix for callback ids minted on the native side.
    pub callback_id_prefix: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            log_messages: false,
            log_max_length: 500,
            runtime_script_path: None,
            callback_id_prefix: DEFAULT_CALLBACK_ID_PREFIX.to_owned(),
        }
    }
}

impl BridgeConfig {
    /// Read a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data).map_err(|e| {
            crate::error::BridgeError::Config(format!("{}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), "bridge config loaded");
        Ok(config)
    }

    /// Write the config as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| crate::error::BridgeError::Config(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Shorten `text` for a trace line, cutting on a char boundary.
    pub fn truncate_for_log<'a>(&self, text: &'a str) -> std::borrow::Cow<'a, str> {
        if text.len() <= self.log_max_length {
            return text.into();
        }
        let mut end = self.log_max_length;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end]).into()
    }
}
