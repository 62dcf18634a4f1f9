//! Structured-payload extraction from raw generation output.
//!
//! Providers routinely emit near-valid JSON: wrapped in prose, truncated
//! mid-object, or littered with raw newlines and trailing commas.
//! Rejecting on first failure would discard most usable output, so
//! extraction runs an ordered ladder of increasingly aggressive repairs
//! and the first success wins.

use regex_lite::Regex;
use serde_json::Value;

/// Result of running the repair ladder over a provider response.
///
/// Callers must treat `Nothing` the same as a provider failure, not as a
/// successful parse of empty content.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    /// The whole response parsed as-is.
    Clean(Value),
    /// A value was recovered by repair; `dropped` counts object
    /// candidates discarded along the way (incomplete or unusable).
    Repaired { value: Value, dropped: usize },
    /// No structured data survived any rung of the ladder.
    Nothing,
}

impl Extracted {
    pub fn into_value(self) -> Option<Value> {
        match self {
            Extracted::Clean(value) => Some(value),
            Extracted::Repaired { value, .. } => Some(value),
            Extracted::Nothing => None,
        }
    }
}

/// Extract one JSON value (object or array of objects) from `raw`.
///
/// `required_keys` is the minimum key set an object must carry to count
/// as usable during last-resort salvage (rung 4); earlier rungs return
/// whatever parses.
pub fn extract_payload(raw: &str, required_keys: &[&str]) -> Extracted {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Extracted::Nothing;
    }

    // Rung 1: the response is exactly the value.
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Extracted::Clean(value);
    }

    // Rung 2: the value is embedded in prose. Slice from the first
    // opening bracket to the last matching closer and flatten newlines.
    if let Some(slice) = bracketed_slice(trimmed) {
        let normalized: String = slice
            .chars()
            .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
            .collect();

        if let Ok(value) = serde_json::from_str::<Value>(&normalized) {
            return Extracted::Repaired { value, dropped: 0 };
        }

        // Rung 3: truncated mid-object. Cut at the last fully closed
        // object boundary and re-close the enclosure.
        if let Some(extracted) = reclose_truncated(&normalized) {
            return extracted;
        }
    }

    // Rung 4: salvage every maximal flat object and keep the usable ones.
    salvage_flat_objects(trimmed, required_keys)
}

fn bracketed_slice(text: &str) -> Option<&str> {
    let start = text.find(['[', '{'])?;
    let opener = text.as_bytes()[start];
    let closer = if opener == b'[' { ']' } else { '}' };
    match text.rfind(closer) {
        Some(end) if end > start => Some(&text[start..=end]),
        _ => Some(&text[start..]),
    }
}

fn reclose_truncated(slice: &str) -> Option<Extracted> {
    let opens = slice.matches('{').count();
    let closes = slice.matches('}').count();
    if opens <= closes {
        return None;
    }

    if slice.starts_with('[') {
        // Keep everything up to the last complete object, then close the
        // array. One trailing incomplete object is dropped.
        if let Some(boundary) = slice.rfind("},") {
            let candidate = format!("{}]", &slice[..=boundary]);
            if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
                return Some(Extracted::Repaired { value, dropped: 1 });
            }
        }
        // No complete object boundary; try closing the open one.
        let candidate = format!("{}}}]", slice.trim_end().trim_end_matches(','));
        if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
            return Some(Extracted::Repaired { value, dropped: 0 });
        }
    } else {
        let candidate = format!("{}}}", slice.trim_end().trim_end_matches(','));
        if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
            return Some(Extracted::Repaired { value, dropped: 0 });
        }
    }
    None
}

fn salvage_flat_objects(text: &str, required_keys: &[&str]) -> Extracted {
    // Maximal balanced-brace substrings with no nesting.
    let Ok(flat_object) = Regex::new(r"\{[^{}]*\}") else {
        return Extracted::Nothing;
    };

    let mut kept = Vec::new();
    let mut dropped = 0usize;
    for found in flat_object.find_iter(text) {
        let normalized: String = found
            .as_str()
            .chars()
            .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
            .collect();
        match serde_json::from_str::<Value>(&normalized) {
            Ok(value) if has_required_keys(&value, required_keys) => kept.push(value),
            _ => dropped += 1,
        }
    }

    if kept.is_empty() {
        return Extracted::Nothing;
    }
    Extracted::Repaired {
        value: Value::Array(kept),
        dropped,
    }
}

fn has_required_keys(value: &Value, required_keys: &[&str]) -> bool {
    match value.as_object() {
        Some(map) => required_keys.iter().all(|key| map.contains_key(*key)),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_json_round_trips_exactly() {
        let raw = r#"[{"character_name":"Emma","content":"hello"}]"#;
        let parsed = extract_payload(raw, &["character_name", "content"]);
        assert_eq!(
            parsed,
            Extracted::Clean(json!([{"character_name": "Emma", "content": "hello"}]))
        );
    }

    #[test]
    fn value_wrapped_in_prose_is_recovered() {
        let raw = "Sure! Here is the conversation:\n[{\"character_name\": \"Emma\", \"content\": \"hi\"}]\nHope that helps.";
        match extract_payload(raw, &["character_name", "content"]) {
            Extracted::Repaired { value, dropped } => {
                assert_eq!(dropped, 0);
                assert_eq!(value.as_array().unwrap().len(), 1);
            }
            other => panic!("expected repaired value, got {:?}", other),
        }
    }

    #[test]
    fn embedded_newlines_are_normalized() {
        let raw = "{\"summary\": \"line one\nline two\"}";
        let value = extract_payload(raw, &[]).into_value().unwrap();
        assert_eq!(value["summary"], "line one line two");
    }

    #[test]
    fn truncated_trailing_object_is_dropped() {
        let raw = r#"[{"a":1},{"b":2"#;
        match extract_payload(raw, &[]) {
            Extracted::Repaired { value, dropped } => {
                assert_eq!(value, json!([{"a": 1}]));
                assert_eq!(dropped, 1);
            }
            other => panic!("expected repaired value, got {:?}", other),
        }
    }

    #[test]
    fn truncated_single_object_is_reclosed() {
        let raw = r#"{"character_name": "Emma", "content": "hi""#;
        let value = extract_payload(raw, &["character_name"]).into_value().unwrap();
        assert_eq!(value["character_name"], "Emma");
    }

    #[test]
    fn salvage_keeps_only_objects_with_required_keys() {
        let raw = "garbage {\"character_name\": \"Emma\", \"content\": \"hi\"} noise {\"note\": \"irrelevant\"} end";
        match extract_payload(raw, &["character_name", "content"]) {
            Extracted::Repaired { value, dropped } => {
                let items = value.as_array().unwrap();
                assert_eq!(items.len(), 1);
                assert_eq!(items[0]["character_name"], "Emma");
                assert_eq!(dropped, 1);
            }
            other => panic!("expected salvage, got {:?}", other),
        }
    }

    #[test]
    fn hopeless_input_yields_nothing() {
        assert_eq!(extract_payload("no structure here at all", &[]), Extracted::Nothing);
        assert_eq!(extract_payload("", &[]), Extracted::Nothing);
        assert_eq!(extract_payload("   \n  ", &[]), Extracted::Nothing);
    }
}
