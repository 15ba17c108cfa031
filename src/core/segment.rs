use serde_json::Value;
use std::collections::HashMap;

/// Typed tagged value held in a [`VariablePool`](super::VariablePool).
///
/// A dot-path miss yields an explicit `None` from the pool rather than a
/// silent absence value; `Segment::None` itself represents a stored null.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    None,
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Array(Vec<Segment>),
    Object(HashMap<String, Segment>),
}

impl Segment {
    pub fn from_value(value: &Value) -> Segment {
        match value {
            Value::Null => Segment::None,
            Value::Bool(b) => Segment::Boolean(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Segment::Integer(i)
                } else {
                    Segment::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => Segment::String(s.clone()),
            Value::Array(arr) => Segment::Array(arr.iter().map(Segment::from_value).collect()),
            Value::Object(map) => Segment::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Segment::from_value(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Segment::None => Value::Null,
            Segment::String(s) => Value::String(s.clone()),
            Segment::Integer(i) => Value::from(*i),
            Segment::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Segment::Boolean(b) => Value::Bool(*b),
            Segment::Array(arr) => Value::Array(arr.iter().map(|s| s.to_value()).collect()),
            Segment::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect(),
            ),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Segment::None)
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Segment::None => true,
            Segment::String(s) => s.is_empty(),
            Segment::Array(arr) => arr.is_empty(),
            Segment::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Segment::Integer(i) => Some(*i as f64),
            Segment::Float(f) => Some(*f),
            Segment::String(s) => s.parse::<f64>().ok(),
            Segment::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Segment::Boolean(b) => Some(*b),
            Segment::String(s) => match s.to_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Display form used by template substitution and string comparison.
    pub fn to_display_string(&self) -> String {
        match self {
            Segment::None => String::new(),
            Segment::String(s) => s.clone(),
            Segment::Integer(i) => i.to_string(),
            Segment::Float(f) => f.to_string(),
            Segment::Boolean(b) => b.to_string(),
            Segment::Array(_) | Segment::Object(_) => self.to_value().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value_round_trip() {
        let value = json!({"a": 1, "b": [1.5, "x", true, null]});
        let seg = Segment::from_value(&value);
        assert_eq!(seg.to_value(), value);
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(Segment::Integer(3).as_f64(), Some(3.0));
        assert_eq!(Segment::String("2.5".into()).as_f64(), Some(2.5));
        assert_eq!(Segment::String("abc".into()).as_f64(), None);
        assert_eq!(Segment::Boolean(true).as_f64(), Some(1.0));
    }

    #[test]
    fn test_emptiness() {
        assert!(Segment::None.is_empty());
        assert!(Segment::String(String::new()).is_empty());
        assert!(Segment::Array(vec![]).is_empty());
        assert!(!Segment::Integer(0).is_empty());
        assert!(!Segment::String("x".into()).is_empty());
    }

    #[test]
    fn test_display_string() {
        assert_eq!(Segment::None.to_display_string(), "");
        assert_eq!(Segment::Integer(7).to_display_string(), "7");
        assert_eq!(
            Segment::Array(vec![Segment::Integer(1)]).to_display_string(),
            "[1]"
        );
    }
}
