//! Rule compiler: turns an expected value containing matcher sentinels into
//! a concrete example plus a table of path-addressed rule entries.
//!
//! Array elements register their rules under `[*]` so a rule declared for
//! one element governs every element; when two rules compile to the same
//! path the later occurrence overrides the earlier one.

use regex::Regex;
use serde_json::{Map, Value};

use super::path::PathToken;
use super::{RuleEntry, RuleSpec};
use crate::error::CompileError;
use crate::interaction::{value_to_string, SpecVersion};
use crate::matchers::Matcher;

/// Result of compiling one section: the plain example value plus the rule
/// entries rooted at that section.
#[derive(Debug, Clone)]
pub struct Compiled {
    pub example: Value,
    pub entries: Vec<RuleEntry>,
}

/// Compile a body expectation.
pub fn compile_body(matcher: &Matcher, version: SpecVersion) -> Result<Compiled, CompileError> {
    let mut entries = Vec::new();
    let mut tokens = Vec::new();
    let example = walk(matcher, version, &mut tokens, &mut entries)?;
    Ok(Compiled { example, entries })
}

/// Compile a path expectation; the example is the concrete path string the
/// mock advertises.
pub fn compile_path(
    matcher: &Matcher,
    version: SpecVersion,
) -> Result<(String, Vec<RuleEntry>), CompileError> {
    let mut entries = Vec::new();
    let mut tokens = Vec::new();
    let example = walk(matcher, version, &mut tokens, &mut entries)?;
    Ok((value_to_string(&example), entries))
}

/// Compile query expectations. Each parameter's value is normalised to a
/// list of string values; element rules register under `name[*]`.
pub fn compile_query(
    query: &[(String, Matcher)],
    version: SpecVersion,
) -> Result<(Map<String, Value>, Vec<RuleEntry>), CompileError> {
    let mut entries = Vec::new();
    let mut example = Map::new();
    for (name, matcher) in query {
        let values = match matcher {
            // a collection matcher governs the whole value list
            Matcher::EachLike { .. } => {
                let mut tokens = vec![PathToken::Key(name.clone())];
                let value = walk(matcher, version, &mut tokens, &mut entries)?;
                coerce_string_list(&value)
            }
            Matcher::Array(items) => {
                compile_query_elements(name, items, version, &mut entries)?
            }
            Matcher::Value(Value::Array(items)) => {
                let items: Vec<Matcher> =
                    items.iter().map(|v| Matcher::Value(v.clone())).collect();
                compile_query_elements(name, &items, version, &mut entries)?
            }
            single => {
                compile_query_elements(name, std::slice::from_ref(single), version, &mut entries)?
            }
        };
        example.insert(name.clone(), Value::Array(values));
    }
    Ok((example, entries))
}

fn compile_query_elements(
    name: &str,
    elements: &[Matcher],
    version: SpecVersion,
    entries: &mut Vec<RuleEntry>,
) -> Result<Vec<Value>, CompileError> {
    let mut values = Vec::new();
    for element in elements {
        let mut tokens = vec![PathToken::Key(name.to_string()), PathToken::StarIndex];
        let value = walk(element, version, &mut tokens, entries)?;
        values.push(Value::String(value_to_string(&value)));
    }
    Ok(values)
}

fn coerce_string_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|v| Value::String(value_to_string(v)))
            .collect(),
        other => vec![Value::String(value_to_string(other))],
    }
}

/// Compile header expectations; values are coerced to strings.
pub fn compile_headers(
    headers: &[(String, Matcher)],
    version: SpecVersion,
) -> Result<(Map<String, Value>, Vec<RuleEntry>), CompileError> {
    let mut entries = Vec::new();
    let mut example = Map::new();
    for (name, matcher) in headers {
        let mut tokens = vec![PathToken::Key(name.clone())];
        let value = walk(matcher, version, &mut tokens, &mut entries)?;
        example.insert(name.clone(), Value::String(value_to_string(&value)));
    }
    Ok((example, entries))
}

/// Depth-first walk of the expectation, emitting rule entries as matcher
/// sentinels are encountered and returning the example value.
fn walk(
    matcher: &Matcher,
    version: SpecVersion,
    tokens: &mut Vec<PathToken>,
    entries: &mut Vec<RuleEntry>,
) -> Result<Value, CompileError> {
    match matcher {
        Matcher::Value(v) => Ok(v.clone()),
        Matcher::Object(fields) => {
            let mut map = Map::new();
            for (key, value) in fields {
                tokens.push(PathToken::Key(key.clone()));
                let example = walk(value, version, tokens, entries)?;
                tokens.pop();
                map.insert(key.clone(), example);
            }
            Ok(Value::Object(map))
        }
        Matcher::Array(items) => {
            let mut values = Vec::new();
            for item in items {
                tokens.push(PathToken::StarIndex);
                values.push(walk(item, version, tokens, entries)?);
                tokens.pop();
            }
            Ok(Value::Array(values))
        }
        Matcher::Like(inner) => {
            push_entry(entries, tokens.clone(), vec![RuleSpec::Type]);
            // nested matchers still register at their own paths
            walk(inner, version, tokens, entries)
        }
        Matcher::EachLike { sample, min } => {
            if *min < 1 {
                return Err(CompileError::InvalidMinimum);
            }
            push_entry(entries, tokens.clone(), vec![RuleSpec::Min(*min)]);
            tokens.push(PathToken::StarIndex);
            push_entry(entries, tokens.clone(), vec![RuleSpec::Type]);
            let element = walk(sample, version, tokens, entries)?;
            tokens.pop();
            Ok(Value::Array(vec![element; *min]))
        }
        Matcher::Term { regex, sample } => {
            Regex::new(regex).map_err(|source| CompileError::BadRegex {
                pattern: regex.clone(),
                source,
            })?;
            push_entry(entries, tokens.clone(), vec![RuleSpec::Regex(regex.clone())]);
            Ok(Value::String(sample.clone()))
        }
        Matcher::Equals(inner) => {
            if version < SpecVersion::V3 {
                return Err(CompileError::SpecViolation {
                    matcher: "Equals",
                    version,
                });
            }
            if inner.contains_sentinel() {
                return Err(CompileError::IllegalNesting(
                    "Equals cannot wrap another matcher".to_string(),
                ));
            }
            push_entry(entries, tokens.clone(), vec![RuleSpec::Equality]);
            // the operand is literal, no descent
            Ok(inner.sample_value())
        }
        Matcher::Includes { substring, sample } => {
            if version < SpecVersion::V3 {
                return Err(CompileError::SpecViolation {
                    matcher: "Includes",
                    version,
                });
            }
            push_entry(
                entries,
                tokens.clone(),
                vec![RuleSpec::Include(substring.clone())],
            );
            Ok(Value::String(sample.clone()))
        }
    }
}

fn push_entry(entries: &mut Vec<RuleEntry>, tokens: Vec<PathToken>, specs: Vec<RuleSpec>) {
    if let Some(existing) = entries.iter_mut().find(|e| e.tokens == tokens) {
        existing.specs = specs;
    } else {
        entries.push(RuleEntry::new(tokens, specs));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchers::{each_like_min, equals, includes, like, term, Matcher};
    use crate::rules::path::parse_path;
    use serde_json::json;

    fn entry_at<'a>(compiled: &'a Compiled, path: &str) -> &'a RuleEntry {
        let tokens = parse_path(path).unwrap();
        compiled
            .entries
            .iter()
            .find(|e| e.tokens == tokens)
            .unwrap_or_else(|| panic!("no entry at {path}"))
    }

    #[test]
    fn test_like_compiles_to_type_rule() {
        let compiled =
            compile_body(&like(json!({"id": 1, "name": "a"})), SpecVersion::V2).unwrap();
        assert_eq!(compiled.example, json!({"id": 1, "name": "a"}));
        assert_eq!(entry_at(&compiled, "$").specs, vec![RuleSpec::Type]);
        assert_eq!(compiled.entries.len(), 1);
    }

    #[test]
    fn test_each_like_compiles_min_and_element_type() {
        let body = Matcher::object([(
            "users",
            each_like_min(Matcher::object([("id", like(1))]), 2),
        )]);
        let compiled = compile_body(&body, SpecVersion::V3).unwrap();
        assert_eq!(compiled.example, json!({"users": [{"id": 1}, {"id": 1}]}));
        assert_eq!(entry_at(&compiled, "$.users").specs, vec![RuleSpec::Min(2)]);
        assert_eq!(
            entry_at(&compiled, "$.users[*]").specs,
            vec![RuleSpec::Type]
        );
        assert_eq!(
            entry_at(&compiled, "$.users[*].id").specs,
            vec![RuleSpec::Type]
        );
    }

    #[test]
    fn test_term_compiles_to_regex_rule() {
        let body = Matcher::object([("ts", term(r"\d{4}-\d{2}-\d{2}", "2020-01-01"))]);
        let compiled = compile_body(&body, SpecVersion::V2).unwrap();
        assert_eq!(compiled.example, json!({"ts": "2020-01-01"}));
        assert_eq!(
            entry_at(&compiled, "$.ts").specs,
            vec![RuleSpec::Regex(r"\d{4}-\d{2}-\d{2}".to_string())]
        );
    }

    #[test]
    fn test_term_rejects_invalid_regex() {
        let result = compile_body(&term("(unclosed", "x"), SpecVersion::V2);
        assert!(matches!(result, Err(CompileError::BadRegex { .. })));
    }

    #[test]
    fn test_equals_not_permitted_before_v3() {
        let result = compile_body(&equals(json!(42)), SpecVersion::V2);
        assert!(matches!(
            result,
            Err(CompileError::SpecViolation {
                matcher: "Equals",
                ..
            })
        ));
        assert!(compile_body(&equals(json!(42)), SpecVersion::V3).is_ok());
    }

    #[test]
    fn test_includes_not_permitted_before_v3() {
        let result = compile_body(&includes("spam", "spam and eggs"), SpecVersion::V2);
        assert!(matches!(
            result,
            Err(CompileError::SpecViolation {
                matcher: "Includes",
                ..
            })
        ));
    }

    #[test]
    fn test_equals_rejects_nested_matcher() {
        let result = compile_body(&equals(like(1)), SpecVersion::V3);
        assert!(matches!(result, Err(CompileError::IllegalNesting(_))));
    }

    #[test]
    fn test_each_like_minimum_must_be_positive() {
        let result = compile_body(&each_like_min(like(1), 0), SpecVersion::V3);
        assert!(matches!(result, Err(CompileError::InvalidMinimum)));
    }

    #[test]
    fn test_later_rule_overrides_earlier_at_same_path() {
        // Like wrapping EachLike: both compile to rules at the root; the
        // inner (later) rule wins
        let compiled =
            compile_body(&like(each_like_min(like(1), 2)), SpecVersion::V3).unwrap();
        assert_eq!(entry_at(&compiled, "$").specs, vec![RuleSpec::Min(2)]);
    }

    #[test]
    fn test_matchers_inside_plain_arrays_register_with_wildcard() {
        let body = Matcher::object([("tags", Matcher::array([term("a|b", "a")]))]);
        let compiled = compile_body(&body, SpecVersion::V2).unwrap();
        assert_eq!(
            entry_at(&compiled, "$.tags[*]").specs,
            vec![RuleSpec::Regex("a|b".to_string())]
        );
    }

    #[test]
    fn test_compile_path_with_term() {
        let (example, entries) =
            compile_path(&term(r"/users/\w+", "/users/UserA"), SpecVersion::V2).unwrap();
        assert_eq!(example, "/users/UserA");
        assert_eq!(entries.len(), 1);
        assert!(entries[0].tokens.is_empty());
    }

    #[test]
    fn test_compile_query_wraps_single_values() {
        let query = vec![("search".to_string(), Matcher::from("x"))];
        let (example, entries) = compile_query(&query, SpecVersion::V2).unwrap();
        assert_eq!(example.get("search").unwrap(), &json!(["x"]));
        assert!(entries.is_empty());
    }

    #[test]
    fn test_compile_query_with_term_elements() {
        let query = vec![("id".to_string(), Matcher::array([term(r"\d+", "7")]))];
        let (example, entries) = compile_query(&query, SpecVersion::V2).unwrap();
        assert_eq!(example.get("id").unwrap(), &json!(["7"]));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tokens, parse_path("$.id[*]").unwrap());
    }

    #[test]
    fn test_compile_headers_coerces_to_string() {
        let headers = vec![(
            "Content-Type".to_string(),
            term("application/json.*", "application/json"),
        )];
        let (example, entries) = compile_headers(&headers, SpecVersion::V2).unwrap();
        assert_eq!(example.get("Content-Type").unwrap(), &json!("application/json"));
        assert_eq!(entries[0].tokens, parse_path("$.Content-Type").unwrap());
    }
}
