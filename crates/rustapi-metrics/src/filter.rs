//! Allow-list / deny-list filtering of payload fields.
//!
//! Paths are dot-separated (`user.password`). Flat names such as headers,
//! query parameters and form fields are matched against the whole path,
//! case-insensitively. JSON bodies are walked key by key and matched
//! segment by segment, case-sensitively.

use crate::error::ConfigError;
use serde_json::Value;

/// A dot-separated field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<String>,
}

impl FieldPath {
    /// Parse a dotted path. Empty segments are ignored.
    pub fn parse(path: &str) -> Self {
        let segments: Vec<String> = path
            .split('.')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            raw: segments.join("."),
            segments,
        }
    }

    /// The normalized dotted form.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn matches_flat(&self, name: &str) -> bool {
        self.raw.eq_ignore_ascii_case(name)
    }

    fn is(&self, path: &[String]) -> bool {
        self.segments.as_slice() == path
    }

    /// `path` is a strict ancestor of this path.
    fn descends_from(&self, path: &[String]) -> bool {
        self.segments.len() > path.len() && self.segments.starts_with(path)
    }

    /// This path is an ancestor of (or equal to) `path`.
    fn covers(&self, path: &[String]) -> bool {
        path.starts_with(&self.segments)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Keep,
    Remove,
    Descend,
}

/// Field filter applied while building a payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FieldFilter {
    /// Keep every field.
    #[default]
    None,
    /// Keep only the listed fields.
    Allow(Vec<FieldPath>),
    /// Remove the listed fields.
    Deny(Vec<FieldPath>),
}

impl FieldFilter {
    /// Build a filter from configured lists.
    ///
    /// At most one list may be non-empty.
    pub fn from_lists(allow: &[String], deny: &[String]) -> Result<Self, ConfigError> {
        let allow = parse_paths(allow);
        let deny = parse_paths(deny);
        match (allow.is_empty(), deny.is_empty()) {
            (true, true) => Ok(Self::None),
            (false, true) => Ok(Self::Allow(allow)),
            (true, false) => Ok(Self::Deny(deny)),
            (false, false) => Err(ConfigError::ConflictingFilters),
        }
    }

    /// Whether a flat field (header, query or form parameter) survives.
    pub fn keeps_name(&self, name: &str) -> bool {
        match self {
            Self::None => true,
            Self::Allow(paths) => paths.iter().any(|p| p.matches_flat(name)),
            Self::Deny(paths) => !paths.iter().any(|p| p.matches_flat(name)),
        }
    }

    /// Filter a JSON document in place.
    ///
    /// Returns whether anything was removed.
    pub fn apply_json(&self, value: &mut Value) -> bool {
        if matches!(self, Self::None) {
            return false;
        }
        let mut path = Vec::new();
        self.filter_value(value, &mut path)
    }

    fn decide(&self, path: &[String]) -> Decision {
        match self {
            Self::None => Decision::Keep,
            Self::Deny(paths) => {
                if paths.iter().any(|p| p.is(path)) {
                    Decision::Remove
                } else if paths.iter().any(|p| p.descends_from(path)) {
                    Decision::Descend
                } else {
                    Decision::Keep
                }
            }
            Self::Allow(paths) => {
                if paths.iter().any(|p| p.covers(path)) {
                    Decision::Keep
                } else if paths.iter().any(|p| p.descends_from(path)) {
                    Decision::Descend
                } else {
                    Decision::Remove
                }
            }
        }
    }

    fn filter_value(&self, value: &mut Value, path: &mut Vec<String>) -> bool {
        match value {
            Value::Object(map) => {
                let mut removed = Vec::new();
                let mut changed = false;
                for (key, child) in map.iter_mut() {
                    path.push(key.clone());
                    match self.decide(path) {
                        Decision::Keep => {}
                        Decision::Remove => removed.push(key.clone()),
                        Decision::Descend => {
                            if child.is_object() || child.is_array() {
                                changed |= self.filter_value(child, path);
                            } else if matches!(self, Self::Allow(_)) {
                                // Only part of this field was allowed, and a
                                // scalar has no parts.
                                removed.push(key.clone());
                            }
                        }
                    }
                    path.pop();
                }
                if !removed.is_empty() {
                    // `retain` keeps the remaining keys in document order.
                    map.retain(|key, _| !removed.contains(key));
                    changed = true;
                }
                changed
            }
            Value::Array(items) => items
                .iter_mut()
                .fold(false, |changed, item| self.filter_value(item, path) | changed),
            _ => false,
        }
    }
}

fn parse_paths(raw: &[String]) -> Vec<FieldPath> {
    raw.iter()
        .map(|p| FieldPath::parse(p))
        .filter(|p| !p.segments.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn list(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_conflicting_lists_rejected() {
        let result = FieldFilter::from_lists(&list(&["a"]), &list(&["b"]));
        assert!(matches!(result, Err(ConfigError::ConflictingFilters)));
    }

    #[test]
    fn test_blank_entries_ignored() {
        let filter = FieldFilter::from_lists(&list(&["", " . "]), &list(&["password"])).unwrap();
        assert_eq!(filter, FieldFilter::Deny(vec![FieldPath::parse("password")]));
    }

    #[test]
    fn test_path_parse_normalizes() {
        assert_eq!(FieldPath::parse(" user . password ").as_str(), "user.password");
        assert_eq!(FieldPath::parse("a..b.").as_str(), "a.b");
    }

    #[test]
    fn test_apply_json_reports_changes() {
        let filter = FieldFilter::from_lists(&[], &list(&["password"])).unwrap();

        let mut untouched = json!({"zeta": 1, "items": [{"alpha": 2}]});
        assert!(!filter.apply_json(&mut untouched));

        let mut nested = json!({"items": [{"alpha": 2}, {"password": "x"}]});
        let filter = FieldFilter::from_lists(&[], &list(&["items.password"])).unwrap();
        assert!(filter.apply_json(&mut nested));
        assert_eq!(nested, json!({"items": [{"alpha": 2}, {}]}));
    }

    #[test]
    fn test_removal_keeps_document_order() {
        let filter = FieldFilter::from_lists(&[], &list(&["b"])).unwrap();
        let mut body: Value = serde_json::from_str(r#"{"z":1,"b":2,"a":3,"m":4}"#).unwrap();
        assert!(filter.apply_json(&mut body));
        assert_eq!(serde_json::to_string(&body).unwrap(), r#"{"z":1,"a":3,"m":4}"#);
    }

    #[test]
    fn test_flat_names_case_insensitive() {
        let deny = FieldFilter::from_lists(&[], &list(&["Authorization"])).unwrap();
        assert!(!deny.keeps_name("authorization"));
        assert!(deny.keeps_name("content-type"));

        let allow = FieldFilter::from_lists(&list(&["content-type"]), &[]).unwrap();
        assert!(allow.keeps_name("Content-Type"));
        assert!(!allow.keeps_name("authorization"));
    }

    #[test]
    fn test_deny_nested_json() {
        let filter = FieldFilter::from_lists(&[], &list(&["password", "user.ssn"])).unwrap();
        let mut body = json!({
            "password": "hunter2",
            "user": {"name": "ada", "ssn": "000"},
            "items": [{"password": "nested-keeps"}]
        });
        filter.apply_json(&mut body);
        assert_eq!(
            body,
            json!({
                "user": {"name": "ada"},
                "items": [{"password": "nested-keeps"}]
            })
        );
    }

    #[test]
    fn test_allow_nested_json() {
        let filter = FieldFilter::from_lists(&list(&["id", "user.name", "meta"]), &[]).unwrap();
        let mut body = json!({
            "id": 7,
            "secret": "x",
            "user": {"name": "ada", "email": "a@b.c"},
            "meta": {"a": 1, "b": 2}
        });
        filter.apply_json(&mut body);
        assert_eq!(
            body,
            json!({
                "id": 7,
                "user": {"name": "ada"},
                "meta": {"a": 1, "b": 2}
            })
        );
    }

    #[test]
    fn test_allow_removes_scalar_ancestor() {
        let filter = FieldFilter::from_lists(&list(&["user.name"]), &[]).unwrap();
        let mut body = json!({"user": "ada"});
        filter.apply_json(&mut body);
        assert_eq!(body, json!({}));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Deny-listed top-level keys disappear and nothing else does.
        #[test]
        fn prop_deny_removes_exactly_listed_keys(
            keys in prop::collection::btree_set("[a-z]{1,6}", 1..8),
            deny_mask in prop::collection::vec(any::<bool>(), 8)
        ) {
            let keys: Vec<String> = keys.into_iter().collect();
            let denied: Vec<String> = keys
                .iter()
                .zip(deny_mask.iter())
                .filter(|(_, d)| **d)
                .map(|(k, _)| k.clone())
                .collect();

            let mut body = Value::Object(
                keys.iter().map(|k| (k.clone(), json!(1))).collect()
            );
            let filter = FieldFilter::from_lists(&[], &denied).unwrap();
            filter.apply_json(&mut body);

            let remaining: Vec<String> = body.as_object().unwrap().keys().cloned().collect();
            let expected: Vec<String> = keys
                .iter()
                .filter(|k| !denied.contains(k))
                .cloned()
                .collect();
            prop_assert_eq!(remaining, expected);
        }

        /// Allow-listed top-level keys are exactly the ones that remain.
        #[test]
        fn prop_allow_keeps_exactly_listed_keys(
            keys in prop::collection::btree_set("[a-z]{1,6}", 1..8),
            allow_mask in prop::collection::vec(any::<bool>(), 8)
        ) {
            let keys: Vec<String> = keys.into_iter().collect();
            let allowed: Vec<String> = keys
                .iter()
                .zip(allow_mask.iter())
                .filter(|(_, a)| **a)
                .map(|(k, _)| k.clone())
                .collect();
            prop_assume!(!allowed.is_empty());

            let mut body = Value::Object(
                keys.iter().map(|k| (k.clone(), json!("v"))).collect()
            );
            let filter = FieldFilter::from_lists(&allowed, &[]).unwrap();
            filter.apply_json(&mut body);

            let remaining: Vec<String> = body.as_object().unwrap().keys().cloned().collect();
            prop_assert_eq!(remaining, allowed);
        }
    }
}
