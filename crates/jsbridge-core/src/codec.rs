// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Wire codec.
//
// Outbound envelopes travel as the single argument of a script statement:
//
//   WebViewJavascriptBridge._handleMessageFromObjC('<escaped-json>');
//
// so the JSON text is escaped for a single-quoted JavaScript literal on top of
// its own JSON escaping. Inbound traffic is the JSON array returned by
// `WebViewJavascriptBridge._fetchQueue();`.

use serde::{Deserialize, Serialize, ser};
use serde_json::Value;
use tracing::warn;

use crate::error::{BridgeError, Result};
use crate::types::Envelope;

/// Entry point the runtime exposes for native → page messages.
pub const HANDLE_MESSAGE_FN: &str = "WebViewJavascriptBridge._handleMessageFromObjC";

/// Script that drains the runtime's outbound queue as a JSON array string.
pub const FETCH_QUEUE_SCRIPT: &str = "WebViewJavascriptBridge._fetchQueue();";

/// Convert a caller's typed payload into a JSON value.
///
/// Fails with [`BridgeError::Encoding`] when the value has no JSON
/// representation, e.g. a map keyed by tuples or a NaN / infinite float
/// (which `serde_json` would otherwise write as `null`).
pub fn to_payload<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    value
        .serialize(FiniteCheck)
        .map_err(BridgeError::Encoding)?;
    serde_json::to_value(value).map_err(BridgeError::Encoding)
}

/// Serialize an envelope to compact JSON.
pub fn encode(envelope: &Envelope) -> Result<String> {
    serde_json::to_string(envelope).map_err(BridgeError::Encoding)
}

/// Escape JSON text so it can sit inside a single-quoted script literal.
///
/// U+2028 and U+2029 are line terminators to older JavaScript parsers, so
/// they are written as `\u` escapes rather than passed through raw.
pub fn escape_for_script_literal(json: &str) -> String {
    let mut out = String::with_capacity(json.len() + json.len() / 8);
    for c in json.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            other => out.push(other),
        }
    }
    out
}

/// Evaluate the body of a single-quoted script literal the way a JavaScript
/// engine would. Inverse of [`escape_for_script_literal`].
pub fn unescape_script_literal(literal: &str) -> Result<String> {
    let mut out = String::with_capacity(literal.len());
    let mut chars = literal.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let escaped = chars
                    .next()
                    .ok_or_else(|| BridgeError::Decoding("unterminated escape in literal".into()))?;
                match escaped {
                    'n' => out.push('\n'),
                    'r' => out.push('\r'),
                    't' => out.push('\t'),
                    'u' => {
                        let hex: String = chars.by_ref().take(4).collect();
                        let code = u32::from_str_radix(&hex, 16)
                            .ok()
                            .filter(|_| hex.len() == 4)
                            .ok_or_else(|| {
                                BridgeError::Decoding(format!("bad unicode escape \\u{hex}"))
                            })?;
                        let ch = char::from_u32(code).ok_or_else(|| {
                            BridgeError::Decoding(format!("unpaired surrogate \\u{hex}"))
                        })?;
                        out.push(ch);
                    }
                    // '\\', '"', '\'' and any non-special escape stand for themselves.
                    other => out.push(other),
                }
            }
            '\'' => {
                return Err(BridgeError::Decoding(
                    "unescaped quote terminates literal".into(),
                ));
            }
            '\n' | '\r' | '\u{2028}' | '\u{2029}' => {
                return Err(BridgeError::Decoding("line terminator inside literal".into()));
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

/// Build the statement that delivers one envelope to the page.
pub fn script_for_message(envelope: &Envelope) -> Result<String> {
    let json = encode(envelope)?;
    Ok(format!(
        "{HANDLE_MESSAGE_FN}('{}');",
        escape_for_script_literal(&json)
    ))
}

/// Parse a fetched message queue.
///
/// Batch-level problems (empty text, invalid JSON, not an array) are errors.
/// Individual elements that are not envelopes are skipped with a warning and
/// the rest of the batch is kept.
pub fn decode(text: &str) -> Result<Vec<Envelope>> {
    if text.trim().is_empty() {
        return Err(BridgeError::Decoding("message queue is empty".into()));
    }

    let parsed: Value =
        serde_json::from_str(text).map_err(|e| BridgeError::Decoding(e.to_string()))?;
    let Value::Array(items) = parsed else {
        return Err(BridgeError::Decoding("message queue is not an array".into()));
    };

    let mut envelopes = Vec::with_capacity(items.len());
    for item in &items {
        if !item.is_object() {
            warn!(message = %item, "invalid message received, skipping");
            continue;
        }
        match Envelope::deserialize(item) {
            Ok(envelope) => envelopes.push(envelope),
            Err(e) => warn!(message = %item, error = %e, "malformed envelope, skipping"),
        }
    }
    Ok(envelopes)
}

// ---------------------------------------------------------------------------
// Non-finite float check
// ---------------------------------------------------------------------------

/// Serializer that produces nothing and fails on the first NaN or infinity.
struct FiniteCheck;

type Checked = std::result::Result<(), serde_json::Error>;

fn check_float(v: f64) -> Checked {
    if v.is_finite() {
        Ok(())
    } else {
        Err(ser::Error::custom(format!("{v} has no JSON representation")))
    }
}

impl ser::Serializer for FiniteCheck {
    type Ok = ();
    type Error = serde_json::Error;
    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    fn serialize_bool(self, _: bool) -> Checked {
        Ok(())
    }
    fn serialize_i8(self, _: i8) -> Checked {
        Ok(())
    }
    fn serialize_i16(self, _: i16) -> Checked {
        Ok(())
    }
    fn serialize_i32(self, _: i32) -> Checked {
        Ok(())
    }
    fn serialize_i64(self, _: i64) -> Checked {
        Ok(())
    }
    fn serialize_i128(self, _: i128) -> Checked {
        Ok(())
    }
    fn serialize_u8(self, _: u8) -> Checked {
        Ok(())
    }
    fn serialize_u16(self, _: u16) -> Checked {
        Ok(())
    }
    fn serialize_u32(self, _: u32) -> Checked {
        Ok(())
    }
    fn serialize_u64(self, _: u64) -> Checked {
        Ok(())
    }
    fn serialize_u128(self, _: u128) -> Checked {
        Ok(())
    }
    fn serialize_f32(self, v: f32) -> Checked {
        check_float(f64::from(v))
    }
    fn serialize_f64(self, v: f64) -> Checked {
        check_float(v)
    }
    fn serialize_char(self, _: char) -> Checked {
        Ok(())
    }
    fn serialize_str(self, _: &str) -> Checked {
        Ok(())
    }
    fn serialize_bytes(self, _: &[u8]) -> Checked {
        Ok(())
    }
    fn serialize_none(self) -> Checked {
        Ok(())
    }
    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Checked {
        value.serialize(self)
    }
    fn serialize_unit(self) -> Checked {
        Ok(())
    }
    fn serialize_unit_struct(self, _: &'static str) -> Checked {
        Ok(())
    }
    fn serialize_unit_variant(self, _: &'static str, _: u32, _: &'static str) -> Checked {
        Ok(())
    }
    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _: &'static str,
        value: &T,
    ) -> Checked {
        value.serialize(self)
    }
    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        value: &T,
    ) -> Checked {
        value.serialize(self)
    }
    fn serialize_seq(self, _: Option<usize>) -> std::result::Result<Self, serde_json::Error> {
        Ok(self)
    }
    fn serialize_tuple(self, _: usize) -> std::result::Result<Self, serde_json::Error> {
        Ok(self)
    }
    fn serialize_tuple_struct(
        self,
        _: &'static str,
        _: usize,
    ) -> std::result::Result<Self, serde_json::Error> {
        Ok(self)
    }
    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> std::result::Result<Self, serde_json::Error> {
        Ok(self)
    }
    fn serialize_map(self, _: Option<usize>) -> std::result::Result<Self, serde_json::Error> {
        Ok(self)
    }
    fn serialize_struct(
        self,
        _: &'static str,
        _: usize,
    ) -> std::result::Result<Self, serde_json::Error> {
        Ok(self)
    }
    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> std::result::Result<Self, serde_json::Error> {
        Ok(self)
    }
}

impl ser::SerializeSeq for FiniteCheck {
    type Ok = ();
    type Error = serde_json::Error;
    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Checked {
        value.serialize(FiniteCheck)
    }
    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeTuple for FiniteCheck {
    type Ok = ();
    type Error = serde_json::Error;
    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Checked {
        value.serialize(FiniteCheck)
    }
    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeTupleStruct for FiniteCheck {
    type Ok = ();
    type Error = serde_json::Error;
    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Checked {
        value.serialize(FiniteCheck)
    }
    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeTupleVariant for FiniteCheck {
    type Ok = ();
    type Error = serde_json::Error;
    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Checked {
        value.serialize(FiniteCheck)
    }
    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeMap for FiniteCheck {
    type Ok = ();
    type Error = serde_json::Error;
    // Key types are left to serde_json, which rejects non-string keys itself.
    fn serialize_key<T: Serialize + ?Sized>(&mut self, _: &T) -> Checked {
        Ok(())
    }
    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Checked {
        value.serialize(FiniteCheck)
    }
    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeStruct for FiniteCheck {
    type Ok = ();
    type Error = serde_json::Error;
    fn serialize_field<T: Serialize + ?Sized>(&mut self, _: &'static str, value: &T) -> Checked {
        value.serialize(FiniteCheck)
    }
    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeStructVariant for FiniteCheck {
    type Ok = ();
    type Error = serde_json::Error;
    fn serialize_field<T: Serialize + ?Sized>(&mut self, _: &'static str, value: &T) -> Checked {
        value.serialize(FiniteCheck)
    }
    fn end(self) -> Checked {
        Ok(())
    }
}
