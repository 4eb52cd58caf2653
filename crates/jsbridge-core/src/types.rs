// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Message envelope and correlation token types shared by both directions of
// the bridge.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Opaque correlation token minted by whichever side wants a response.
///
/// Native tokens look like `objc_cb_<n>`; the JavaScript runtime mints
/// `cb_<n>_<millis>`. The bridge never parses them, it only compares.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackId(pub String);

impl CallbackId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CallbackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CallbackId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for CallbackId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A call to a named handler on the other side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub handler_name: String,
    /// Absent when the caller passed no data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Present only when the caller wants a response. A non-string value
    /// reads as absent, so the handler still runs with an inert responder.
    #[serde(
        default,
        deserialize_with = "lenient_callback_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub callback_id: Option<CallbackId>,
}

fn lenient_callback_id<'de, D>(deserializer: D) -> Result<Option<CallbackId>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(id) => Some(CallbackId(id)),
        _ => None,
    })
}

impl Request {
    /// Build a request. A `null` payload is sent without a `data` key.
    pub fn new(handler_name: impl Into<String>, data: Value, callback_id: Option<CallbackId>) -> Self {
        Self {
            handler_name: handler_name.into(),
            data: (!data.is_null()).then_some(data),
            callback_id,
        }
    }

    /// The payload handed to handlers; a missing `data` key reads as `null`.
    pub fn payload(&self) -> Value {
        self.data.clone().unwrap_or(Value::Null)
    }
}

/// The answer to a [`Request`] that carried a `callbackId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub response_id: CallbackId,
    /// Always serialized; "no value" travels as an explicit `null`.
    #[serde(default)]
    pub response_data: Value,
}

impl Response {
    pub fn new(response_id: CallbackId, response_data: Value) -> Self {
        Self {
            response_id,
            response_data,
        }
    }
}

/// The unit exchanged between native code and the page.
///
/// Objects carrying a `responseId` are responses even if they also name a
/// handler (the stock JavaScript runtime echoes `handlerName` back).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    Response(Response),
    Request(Request),
}

impl Envelope {
    pub fn is_response(&self) -> bool {
        matches!(self, Envelope::Response(_))
    }

    /// Handler name for requests, `None` for responses.
    pub fn handler_name(&self) -> Option<&str> {
        match self {
            Envelope::Request(req) => Some(&req.handler_name),
            Envelope::Response(_) => None,
        }
    }
}

impl From<Request> for Envelope {
    fn from(req: Request) -> Self {
        Envelope::Request(req)
    }
}

impl From<Response> for Envelope {
    fn from(resp: Response) -> Self {
        Envelope::Response(resp)
    }
}
