//! Mapping free-text name mentions back to canonical characters.
//!
//! Matching is deliberately ordinary: case-insensitive substring
//! containment in either direction, first match in the supplied
//! candidate order wins. Callers pass candidates in scene-membership
//! order, which makes the tie-break deterministic and debuggable.

use serde_json::Value;

use crate::story::Character;

/// Resolve a free-text mention against a candidate roster.
///
/// A candidate matches when its canonical name appears inside the
/// mention or the mention appears inside the name. No match is `None`,
/// never an error.
pub fn resolve<'a>(mention: &str, candidates: &'a [Character]) -> Option<&'a Character> {
    let mention = mention.trim().to_lowercase();
    if mention.is_empty() {
        return None;
    }
    candidates.iter().find(|candidate| {
        let name = candidate.name.to_lowercase();
        mention.contains(&name) || name.contains(&mention)
    })
}

/// Resolve a provider-supplied mention value, which may be a plain
/// string or a list of names.
///
/// Lists resolve using only their first element; trailing elements are
/// discarded. This mirrors the generation contract, which asks for a
/// single addressee per turn.
pub fn resolve_mention<'a>(value: &Value, candidates: &'a [Character]) -> Option<&'a Character> {
    match value {
        Value::String(text) => resolve(text, candidates),
        Value::Array(items) => items
            .first()
            .and_then(Value::as_str)
            .and_then(|text| resolve(text, candidates)),
        _ => None,
    }
}

/// Resolve a provider-supplied list of name mentions into character ids,
/// dropping anything unresolvable and deduplicating.
pub fn resolve_all(value: &Value, candidates: &[Character]) -> Vec<String> {
    let mut ids = Vec::new();
    if let Value::Array(items) = value {
        for item in items {
            if let Some(text) = item.as_str() {
                if let Some(character) = resolve(text, candidates) {
                    if !ids.contains(&character.id) {
                        ids.push(character.id.clone());
                    }
                }
            }
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn character(id: &str, name: &str) -> Character {
        let now = Utc::now();
        Character {
            id: id.to_string(),
            name: name.to_string(),
            personality: "quiet".to_string(),
            background: "unknown".to_string(),
            appearance: None,
            goals: None,
            fears: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn partial_mention_matches_full_name() {
        let candidates = vec![character("c1", "Emma Chen"), character("c2", "Marcus")];
        assert_eq!(resolve("Emma", &candidates).unwrap().id, "c1");
        assert_eq!(resolve("marcus glared", &candidates).unwrap().id, "c2");
        assert!(resolve("Nobody", &candidates).is_none());
    }

    #[test]
    fn first_candidate_in_order_wins() {
        let candidates = vec![character("c1", "Anna"), character("c2", "Annabel")];
        assert_eq!(resolve("Anna", &candidates).unwrap().id, "c1");
    }

    #[test]
    fn list_mentions_resolve_by_first_element_only() {
        let candidates = vec![character("c1", "Emma Chen"), character("c2", "Marcus")];
        let value = json!(["Marcus", "Emma Chen"]);
        assert_eq!(resolve_mention(&value, &candidates).unwrap().id, "c2");
        assert!(resolve_mention(&json!([]), &candidates).is_none());
        assert!(resolve_mention(&json!(42), &candidates).is_none());
    }

    #[test]
    fn resolve_all_collects_unique_ids() {
        let candidates = vec![character("c1", "Emma Chen"), character("c2", "Marcus")];
        let value = json!(["Emma", "Marcus", "Emma Chen", "Ghost"]);
        assert_eq!(resolve_all(&value, &candidates), vec!["c1", "c2"]);
    }
}
