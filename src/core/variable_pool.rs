//! Variable bindings for one execution.
//!
//! The pool is the single source of truth consumed by condition evaluation
//! and node configuration templating. Keys are dot paths into a nested
//! [`Segment`] tree.

use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

use super::segment::Segment;
use serde_json::Value;

static TEMPLATE_RE: OnceLock<Regex> = OnceLock::new();

fn template_re() -> &'static Regex {
    TEMPLATE_RE.get_or_init(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").unwrap())
}

#[derive(Debug, Default)]
pub struct VariablePool {
    root: RwLock<HashMap<String, Segment>>,
}

impl Clone for VariablePool {
    fn clone(&self) -> Self {
        VariablePool {
            root: RwLock::new(self.root.read().clone()),
        }
    }
}

impl VariablePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a pool from a JSON object. Non-object values are stored under
    /// `payload`.
    pub fn from_value(value: &Value) -> Self {
        let pool = VariablePool::new();
        pool.merge_value(value);
        pool
    }

    /// Resolve a dot path. A missing path is `None`; a stored null is
    /// `Some(Segment::None)`.
    pub fn get(&self, path: &str) -> Option<Segment> {
        let root = self.root.read();
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = root.get(first)?.clone();
        for part in parts {
            match current {
                Segment::Object(ref map) => {
                    current = map.get(part)?.clone();
                }
                Segment::Array(ref arr) => {
                    let idx: usize = part.parse().ok()?;
                    current = arr.get(idx)?.clone();
                }
                _ => return None,
            }
        }
        Some(current)
    }

    /// Resolve a dot path, treating a miss as `Segment::None`.
    pub fn get_or_none(&self, path: &str) -> Segment {
        self.get(path).unwrap_or(Segment::None)
    }

    /// Set a value at a dot path, creating intermediate objects as needed.
    /// A non-object intermediate is replaced.
    pub fn set(&self, path: &str, value: Segment) {
        let mut root = self.root.write();
        let parts: Vec<&str> = path.split('.').collect();
        if parts.is_empty() {
            return;
        }
        if parts.len() == 1 {
            root.insert(parts[0].to_string(), value);
            return;
        }
        let entry = root
            .entry(parts[0].to_string())
            .or_insert_with(|| Segment::Object(HashMap::new()));
        let mut current = match entry {
            Segment::Object(_) => entry,
            other => {
                *other = Segment::Object(HashMap::new());
                other
            }
        };
        for part in &parts[1..parts.len() - 1] {
            let map = match current {
                Segment::Object(map) => map,
                _ => unreachable!(),
            };
            let next = map
                .entry(part.to_string())
                .or_insert_with(|| Segment::Object(HashMap::new()));
            if !matches!(next, Segment::Object(_)) {
                *next = Segment::Object(HashMap::new());
            }
            current = next;
        }
        if let Segment::Object(map) = current {
            map.insert(parts[parts.len() - 1].to_string(), value);
        }
    }

    /// Merge a JSON object into the pool at the top level; later keys win.
    pub fn merge_value(&self, value: &Value) {
        match value {
            Value::Object(map) => {
                let mut root = self.root.write();
                for (k, v) in map {
                    root.insert(k.clone(), Segment::from_value(v));
                }
            }
            Value::Null => {}
            other => {
                self.set("payload", Segment::from_value(other));
            }
        }
    }

    /// Merge another pool's top-level bindings into this one; the other
    /// pool's keys win on collision.
    pub fn merge(&self, other: &VariablePool) {
        let other_root = other.root.read().clone();
        let mut root = self.root.write();
        for (k, v) in other_root {
            root.insert(k, v);
        }
    }

    /// Full snapshot as a JSON object, used for persistence.
    pub fn snapshot(&self) -> Value {
        let root = self.root.read();
        Value::Object(
            root.iter()
                .map(|(k, v)| (k.clone(), v.to_value()))
                .collect(),
        )
    }

    /// Substitute `{{path}}` placeholders with display strings. Missing
    /// paths render as the empty string.
    pub fn resolve_template(&self, text: &str) -> String {
        template_re()
            .replace_all(text, |caps: &regex::Captures<'_>| {
                self.get_or_none(caps[1].trim()).to_display_string()
            })
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_dot_path() {
        let pool = VariablePool::from_value(&json!({
            "ticket": {"priority": "high", "tags": ["a", "b"]}
        }));
        assert_eq!(
            pool.get("ticket.priority"),
            Some(Segment::String("high".into()))
        );
        assert_eq!(pool.get("ticket.tags.1"), Some(Segment::String("b".into())));
        assert_eq!(pool.get("ticket.missing"), None);
        assert_eq!(pool.get("nothing"), None);
    }

    #[test]
    fn test_missing_is_distinct_from_null() {
        let pool = VariablePool::from_value(&json!({"x": null}));
        assert_eq!(pool.get("x"), Some(Segment::None));
        assert_eq!(pool.get("y"), None);
    }

    #[test]
    fn test_set_creates_intermediates() {
        let pool = VariablePool::new();
        pool.set("a.b.c", Segment::Integer(1));
        assert_eq!(pool.get("a.b.c"), Some(Segment::Integer(1)));
        pool.set("a.b.c", Segment::Integer(2));
        assert_eq!(pool.get("a.b.c"), Some(Segment::Integer(2)));
    }

    #[test]
    fn test_merge_later_wins() {
        let a = VariablePool::from_value(&json!({"x": 1, "y": 1}));
        let b = VariablePool::from_value(&json!({"y": 2, "z": 3}));
        a.merge(&b);
        assert_eq!(a.get("x"), Some(Segment::Integer(1)));
        assert_eq!(a.get("y"), Some(Segment::Integer(2)));
        assert_eq!(a.get("z"), Some(Segment::Integer(3)));
    }

    #[test]
    fn test_resolve_template() {
        let pool = VariablePool::from_value(&json!({
            "ticket": {"id": "T-42", "subject": "printer on fire"}
        }));
        assert_eq!(
            pool.resolve_template("[{{ticket.id}}] {{ticket.subject}} {{missing}}"),
            "[T-42] printer on fire "
        );
    }

    #[test]
    fn test_snapshot_round_trip() {
        let value = json!({"a": {"b": [1, 2]}, "c": "x"});
        let pool = VariablePool::from_value(&value);
        assert_eq!(pool.snapshot(), value);
    }

    #[test]
    fn test_clone_is_deep() {
        let pool = VariablePool::from_value(&json!({"x": 1}));
        let copy = pool.clone();
        copy.set("x", Segment::Integer(2));
        assert_eq!(pool.get("x"), Some(Segment::Integer(1)));
    }
}
