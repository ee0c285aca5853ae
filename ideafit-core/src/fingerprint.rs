//! Deterministic cache keys.
//!
//! A fingerprint is derived from a set of `(name, value)` parameters:
//! names are sorted, names and values are rendered as JSON, pairs are joined
//! as `name:value` with `|`, and the joined string is hashed with SHA-256
//! (hex encoded). JSON rendering quotes and escapes strings, so separators
//! inside a value can never pass for pair boundaries.
//! The same set of pairs always yields the same key regardless of the order
//! the caller supplied them in.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Separator between `name:value` pairs before hashing.
const PAIR_SEPARATOR: &str = "|";

/// Slot holding the normalised idea text in a request key.
pub const IDEA_PARAM: &str = "idea";

/// Slot holding the caller's parameters in a request key.
pub const PARAMS_SLOT: &str = "params";

/// Render one pair as `"name":value` in compact JSON.
fn render_pair(name: &str, value: &Value) -> String {
    format!("{}:{}", Value::from(name), value)
}

fn hash_joined(joined: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hex::encode(hasher.finalize())
}

/// Derive a fingerprint from a parameter map.
///
/// `BTreeMap` iteration is already lexicographic, so the join order is stable.
pub fn generate_key(params: &BTreeMap<String, Value>) -> String {
    let joined = params
        .iter()
        .map(|(name, value)| render_pair(name, value))
        .collect::<Vec<_>>()
        .join(PAIR_SEPARATOR);
    hash_joined(&joined)
}

/// Derive a fingerprint from any iterator of serialisable pairs.
///
/// Values that fail to serialise participate as JSON `null`.
pub fn generate_key_from<I, K, V>(pairs: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Serialize,
{
    let params: BTreeMap<String, Value> = pairs
        .into_iter()
        .map(|(k, v)| {
            (
                k.as_ref().to_string(),
                serde_json::to_value(v).unwrap_or(Value::Null),
            )
        })
        .collect();
    generate_key(&params)
}

/// Normalise free text for equivalence: trim, lowercase, collapse whitespace.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Key for a whole analysis request.
///
/// The idea text is normalised, and string parameter values longer than
/// `max_value_len` are cut to a bounded prefix so that trailing noise
/// doesn't split otherwise equivalent requests. The idea and the parameters
/// sit in separate slots, so no parameter name can shadow the idea.
pub fn request_key(idea: &str, params: &BTreeMap<String, Value>, max_value_len: usize) -> String {
    let normalized: serde_json::Map<String, Value> = params
        .iter()
        .map(|(name, value)| {
            let value = match value {
                Value::String(s) => {
                    Value::String(truncate_chars(s.trim(), max_value_len).to_string())
                }
                other => other.clone(),
            };
            (name.clone(), value)
        })
        .collect();

    let idea = normalize_text(idea);
    let slots = BTreeMap::from([
        (
            IDEA_PARAM.to_string(),
            Value::String(truncate_chars(&idea, max_value_len).to_string()),
        ),
        (PARAMS_SLOT.to_string(), Value::Object(normalized)),
    ]);
    generate_key(&slots)
}
