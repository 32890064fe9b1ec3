// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Byte-stable canonical JSON encoding.
//!
//! Both the per-session hash chain and the cross-session ledger hash the
//! same encoding: object keys sorted lexicographically, UTF-8, no
//! insignificant whitespace, numbers in serde_json's shortest decimal form.
//! The encoding is stable across platforms and runs, which is what makes
//! `verify(build(P), P)` reproducible.

use crate::error::{QuorumError, Result};
use serde::Serialize;
use serde_json::Value;

/// Encode any serializable value canonically.
pub fn to_canonical_string<T: Serialize>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value)
        .map_err(|e| QuorumError::Parse(format!("canonical encoding failed: {e}")))?;
    let mut out = String::new();
    write_value(&value, &mut out);
    Ok(out)
}

/// Canonical encoding as bytes, ready for hashing or framing.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(to_canonical_string(value)?.into_bytes())
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                // Key came from the map, lookup cannot fail.
                if let Some(v) = map.get(*key) {
                    write_value(v, out);
                }
            }
            out.push('}');
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
