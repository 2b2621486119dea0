//! Matcher DSL: the sentinel values consumers embed in expected bodies.
//!
//! Matchers are data, not behaviour. The rule compiler walks an expected
//! value, recognises matcher nodes, and turns them into a concrete example
//! plus a table of path-addressed matching rules. Matchers may be nested
//! arbitrarily inside objects, arrays and other matchers:
//!
//! ```
//! use pactman::matchers::{each_like_min, like, term, Matcher};
//!
//! let body = Matcher::object([
//!     ("users", each_like_min(Matcher::object([
//!         ("id", like(1)),
//!         ("joined", term(r"\d{4}-\d{2}-\d{2}", "2020-01-01")),
//!     ]), 2)),
//! ]);
//! assert!(body.sample_value().is_object());
//! ```

use serde_json::{Map, Value};

/// An expected value: plain JSON with matcher sentinels nested anywhere.
#[derive(Debug, Clone, PartialEq)]
pub enum Matcher {
    /// A plain JSON leaf (no matchers inside).
    Value(Value),
    /// An array whose elements may contain matchers.
    Array(Vec<Matcher>),
    /// An object whose values may contain matchers.
    Object(Vec<(String, Matcher)>),
    /// Actual must have the same JSON type as the sample; objects and
    /// arrays descend type-wise unless a more specific rule intervenes.
    Like(Box<Matcher>),
    /// Actual must be an array of at least `min` elements, each matching
    /// the sample as if wrapped in `Like`.
    EachLike { sample: Box<Matcher>, min: usize },
    /// Actual, rendered as a string, must fully match the regex; the mock
    /// returns the sample.
    Term { regex: String, sample: String },
    /// Actual must deep-equal the value, overriding any enclosing `Like`.
    Equals(Box<Matcher>),
    /// Actual, as a string, must contain the substring; the mock returns
    /// the sample. Pact v3 only.
    Includes { substring: String, sample: String },
}

impl Matcher {
    /// Build an object expectation from key/value pairs.
    pub fn object<K, V, I>(entries: I) -> Matcher
    where
        K: Into<String>,
        V: Into<Matcher>,
        I: IntoIterator<Item = (K, V)>,
    {
        Matcher::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Build an array expectation from elements.
    pub fn array<V, I>(items: I) -> Matcher
    where
        V: Into<Matcher>,
        I: IntoIterator<Item = V>,
    {
        Matcher::Array(items.into_iter().map(Into::into).collect())
    }

    /// Resolve this expectation to the plain JSON value the mock returns,
    /// with every nested matcher replaced by its own sample.
    pub fn sample_value(&self) -> Value {
        match self {
            Matcher::Value(v) => v.clone(),
            Matcher::Array(items) => {
                Value::Array(items.iter().map(Matcher::sample_value).collect())
            }
            Matcher::Object(entries) => {
                let mut map = Map::new();
                for (k, v) in entries {
                    map.insert(k.clone(), v.sample_value());
                }
                Value::Object(map)
            }
            Matcher::Like(inner) => inner.sample_value(),
            Matcher::EachLike { sample, min } => {
                let element = sample.sample_value();
                Value::Array(vec![element; (*min).max(1)])
            }
            Matcher::Term { sample, .. } => Value::String(sample.clone()),
            Matcher::Equals(inner) => inner.sample_value(),
            Matcher::Includes { sample, .. } => Value::String(sample.clone()),
        }
    }

    /// Whether any matcher sentinel (as opposed to plain JSON structure)
    /// appears in this expectation.
    pub(crate) fn contains_sentinel(&self) -> bool {
        match self {
            Matcher::Value(_) => false,
            Matcher::Array(items) => items.iter().any(Matcher::contains_sentinel),
            Matcher::Object(entries) => entries.iter().any(|(_, v)| v.contains_sentinel()),
            _ => true,
        }
    }
}

/// Expect the actual value to have the same JSON type as the sample.
pub fn like(sample: impl Into<Matcher>) -> Matcher {
    Matcher::Like(Box::new(sample.into()))
}

/// Expect an array of at least one element, each like the sample.
pub fn each_like(sample: impl Into<Matcher>) -> Matcher {
    each_like_min(sample, 1)
}

/// Expect an array of at least `min` elements, each like the sample.
pub fn each_like_min(sample: impl Into<Matcher>, min: usize) -> Matcher {
    Matcher::EachLike {
        sample: Box::new(sample.into()),
        min,
    }
}

/// Expect the actual value, as a string, to fully match the regex.
pub fn term(regex: impl Into<String>, sample: impl Into<String>) -> Matcher {
    Matcher::Term {
        regex: regex.into(),
        sample: sample.into(),
    }
}

/// Expect the actual value to deep-equal the given value, even inside a
/// `Like`.
pub fn equals(value: impl Into<Matcher>) -> Matcher {
    Matcher::Equals(Box::new(value.into()))
}

/// Expect the actual string to contain the substring (pact v3 only).
pub fn includes(substring: impl Into<String>, sample: impl Into<String>) -> Matcher {
    Matcher::Includes {
        substring: substring.into(),
        sample: sample.into(),
    }
}

impl From<Value> for Matcher {
    fn from(v: Value) -> Self {
        Matcher::Value(v)
    }
}

impl From<&str> for Matcher {
    fn from(v: &str) -> Self {
        Matcher::Value(Value::String(v.to_string()))
    }
}

impl From<String> for Matcher {
    fn from(v: String) -> Self {
        Matcher::Value(Value::String(v))
    }
}

impl From<bool> for Matcher {
    fn from(v: bool) -> Self {
        Matcher::Value(Value::Bool(v))
    }
}

impl From<i64> for Matcher {
    fn from(v: i64) -> Self {
        Matcher::Value(Value::from(v))
    }
}

impl From<i32> for Matcher {
    fn from(v: i32) -> Self {
        Matcher::Value(Value::from(v))
    }
}

impl From<u64> for Matcher {
    fn from(v: u64) -> Self {
        Matcher::Value(Value::from(v))
    }
}

impl From<f64> for Matcher {
    fn from(v: f64) -> Self {
        Matcher::Value(Value::from(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_like_sample_is_inner_value() {
        assert_eq!(like(42).sample_value(), json!(42));
        assert_eq!(like("x").sample_value(), json!("x"));
    }

    #[test]
    fn test_each_like_repeats_sample() {
        let m = each_like_min(Matcher::object([("x", like(1))]), 3);
        assert_eq!(m.sample_value(), json!([{"x": 1}, {"x": 1}, {"x": 1}]));
    }

    #[test]
    fn test_term_sample() {
        let m = term(r"\d{4}", "2020");
        assert_eq!(m.sample_value(), json!("2020"));
    }

    #[test]
    fn test_includes_sample() {
        let m = includes("spam", "Some example spamming content");
        assert_eq!(m.sample_value(), json!("Some example spamming content"));
    }

    #[test]
    fn test_nested_samples_resolve_recursively() {
        let m = like(Matcher::object([
            ("a", each_like(term("x|y", "x"))),
            ("b", Matcher::from(json!({"c": 1}))),
        ]));
        assert_eq!(m.sample_value(), json!({"a": ["x"], "b": {"c": 1}}));
    }

    #[test]
    fn test_contains_sentinel() {
        assert!(!Matcher::from(json!({"a": [1, 2]})).contains_sentinel());
        assert!(Matcher::object([("a", like(1))]).contains_sentinel());
        assert!(Matcher::array([like(1)]).contains_sentinel());
    }
}
