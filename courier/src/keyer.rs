//! Stable identities for outbound requests

use std::fmt::Write as _;

use aliri_braid::braid;
use http::Method;
use serde_json::Value;

/// Identity shared by structurally equal requests
///
/// Formed as `METHOD:url:body`, with the body serialized as canonical JSON
/// and left empty when there is none.
#[braid(serde)]
pub struct DedupKey;

/// Derives the identity of a request
///
/// Object keys in the body are sorted at every level, so bodies that differ
/// only in key order produce the same key.
pub fn key(method: &Method, url: &str, body: Option<&Value>) -> DedupKey {
    let mut key = String::with_capacity(method.as_str().len() + url.len() + 2);
    key.push_str(method.as_str());
    key.push(':');
    key.push_str(url);
    key.push(':');
    if let Some(body) = body {
        write_canonical(&mut key, body);
    }
    DedupKey::new(key)
}

fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));

            out.push('{');
            for (idx, (name, item)) in entries.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_scalar(out, &Value::String(name.clone()));
                out.push(':');
                write_canonical(out, item);
            }
            out.push('}');
        }
        scalar => write_scalar(out, scalar),
    }
}

fn write_scalar(out: &mut String, value: &Value) {
    // `Value`'s `Display` is its compact JSON form and cannot fail
    let _ = write!(out, "{value}");
}
