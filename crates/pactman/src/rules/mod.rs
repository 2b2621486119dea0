//! Matching rules: the path-addressed rule entries that govern comparison,
//! and their serialisation in the pact v2 ("flat path") and v3 (per-section)
//! dialects.
//!
//! Rule entries are stored section-relative: body paths are rooted below
//! `$.body` (v2) / `$` (v3), header and query entries start with the header
//! or parameter name, and path rules have no path at all. The version
//! prefixes are added back when a pact document is written.

pub mod compile;
pub mod engine;
pub mod path;

use serde_json::{json, Map, Value};

use crate::error::PactFormatError;
use path::{format_path, parse_path, PathToken};

/// How multiple rules at one path combine (pact v3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Combine {
    #[default]
    And,
    Or,
}

impl Combine {
    fn as_str(self) -> &'static str {
        match self {
            Combine::And => "AND",
            Combine::Or => "OR",
        }
    }
}

/// A single matching rule.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleSpec {
    /// Same JSON type as the expected value; objects and arrays descend.
    Type,
    /// Collection (array, object or string) must have at least this many
    /// elements. Implies a type check on arrays.
    Min(usize),
    /// Collection must have at most this many elements.
    Max(usize),
    /// String rendering of the actual value must fully match the regex.
    Regex(String),
    /// String rendering of the actual value must contain the substring.
    Include(String),
    /// Deep value equality, overriding any inherited type rule.
    Equality,
    /// Actual must be JSON null.
    Null,
    /// Actual must be an integer.
    Integer,
    /// Actual must be a non-integer number.
    Decimal,
    /// Actual must be a number.
    Number,
    /// Actual must be an array containing, for each variant, at least one
    /// element matching the variant's expected value and rules (v3).
    ArrayContains(Vec<ArrayVariant>),
}

/// One variant of an `arrayContains` rule. The expected value is the
/// element of the expected array at `index`; `rules` are relative to that
/// element.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayVariant {
    pub index: usize,
    pub rules: Vec<RuleEntry>,
}

/// A rule entry: a section-relative path plus the rules that apply there.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleEntry {
    pub tokens: Vec<PathToken>,
    pub specs: Vec<RuleSpec>,
    pub combine: Combine,
}

impl RuleEntry {
    pub fn new(tokens: Vec<PathToken>, specs: Vec<RuleSpec>) -> Self {
        RuleEntry {
            tokens,
            specs,
            combine: Combine::And,
        }
    }
}

/// The per-section rule tables of one request or response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchingRules {
    pub path: Vec<RuleEntry>,
    pub query: Vec<RuleEntry>,
    pub header: Vec<RuleEntry>,
    pub body: Vec<RuleEntry>,
}

impl MatchingRules {
    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
            && self.query.is_empty()
            && self.header.is_empty()
            && self.body.is_empty()
    }

    /// Serialise in the v2 flat-path dialect, e.g.
    /// `{"$.body.users[*].id": {"match": "type"}}`. Returns `None` when
    /// there are no rules.
    pub fn to_v2_json(&self) -> Option<Value> {
        if self.is_empty() {
            return None;
        }
        let mut out = Map::new();
        for entry in &self.path {
            out.insert("$.path".to_string(), specs_to_v2_object(&entry.specs));
        }
        for entry in &self.query {
            out.insert(
                format_path("$.query", &entry.tokens),
                specs_to_v2_object(&entry.specs),
            );
        }
        for entry in &self.header {
            out.insert(
                format_path("$.headers", &entry.tokens),
                specs_to_v2_object(&entry.specs),
            );
        }
        for entry in &self.body {
            out.insert(
                format_path("$.body", &entry.tokens),
                specs_to_v2_object(&entry.specs),
            );
        }
        Some(Value::Object(out))
    }

    /// Serialise in the v3 per-section dialect with `matchers` arrays and
    /// `combine`. Returns `None` when there are no rules.
    pub fn to_v3_json(&self) -> Option<Value> {
        if self.is_empty() {
            return None;
        }
        let mut out = Map::new();
        if let Some(entry) = self.path.first() {
            out.insert("path".to_string(), entry_to_v3_object(entry));
        }
        if !self.query.is_empty() {
            let mut section = Map::new();
            for entry in &self.query {
                section.insert(section_key(&entry.tokens), entry_to_v3_object(entry));
            }
            out.insert("query".to_string(), Value::Object(section));
        }
        if !self.header.is_empty() {
            let mut section = Map::new();
            for entry in &self.header {
                section.insert(section_key(&entry.tokens), entry_to_v3_object(entry));
            }
            out.insert("header".to_string(), Value::Object(section));
        }
        if !self.body.is_empty() {
            let mut section = Map::new();
            for entry in &self.body {
                section.insert(format_path("$", &entry.tokens), entry_to_v3_object(entry));
            }
            out.insert("body".to_string(), Value::Object(section));
        }
        Some(Value::Object(out))
    }

    /// Parse the v2 flat-path dialect.
    pub fn from_v2_json(value: &Value) -> Result<Self, PactFormatError> {
        let map = value
            .as_object()
            .ok_or_else(|| PactFormatError::bad_rules("matchingRules is not an object"))?;
        let mut rules = MatchingRules::default();
        for (key, rule) in map {
            let tokens = parse_path(key).map_err(PactFormatError::bad_rules)?;
            let specs = parse_rule_object(rule)?;
            let entry = |tokens| RuleEntry::new(tokens, specs.clone());
            match tokens.split_first() {
                Some((PathToken::Key(section), rest)) if section == "path" => {
                    rules.path.push(entry(rest.to_vec()));
                }
                Some((PathToken::Key(section), rest)) if section == "headers" => {
                    rules.header.push(entry(rest.to_vec()));
                }
                Some((PathToken::Key(section), rest)) if section == "query" => {
                    rules.query.push(entry(rest.to_vec()));
                }
                Some((PathToken::Key(section), rest)) if section == "body" => {
                    rules.body.push(entry(rest.to_vec()));
                }
                _ => {
                    return Err(PactFormatError::bad_rules(format!(
                        "matchingRules path {key:?} has no recognised section"
                    )))
                }
            }
        }
        Ok(rules)
    }

    /// Parse the v3 per-section dialect.
    pub fn from_v3_json(value: &Value) -> Result<Self, PactFormatError> {
        let map = value
            .as_object()
            .ok_or_else(|| PactFormatError::bad_rules("matchingRules is not an object"))?;
        let mut rules = MatchingRules::default();
        if let Some(rule) = map.get("path") {
            let (specs, combine) = parse_v3_rule(rule)?;
            rules.path.push(RuleEntry {
                tokens: Vec::new(),
                specs,
                combine,
            });
        }
        for (section, target) in [("query", &mut rules.query), ("header", &mut rules.header)] {
            let Some(value) = map.get(section) else {
                continue;
            };
            let section_map = value.as_object().ok_or_else(|| {
                PactFormatError::bad_rules(format!("matchingRules {section} is not an object"))
            })?;
            for (name, rule) in section_map {
                let (specs, combine) = parse_v3_rule(rule)?;
                let tokens = if name == "*" {
                    vec![PathToken::StarKey]
                } else {
                    vec![PathToken::Key(name.clone())]
                };
                target.push(RuleEntry {
                    tokens,
                    specs,
                    combine,
                });
            }
        }
        if let Some(value) = map.get("body") {
            let section_map = value
                .as_object()
                .ok_or_else(|| PactFormatError::bad_rules("matchingRules body is not an object"))?;
            for (key, rule) in section_map {
                let tokens = parse_path(key).map_err(PactFormatError::bad_rules)?;
                let (specs, combine) = parse_v3_rule(rule)?;
                rules.body.push(RuleEntry {
                    tokens,
                    specs,
                    combine,
                });
            }
        }
        Ok(rules)
    }
}

/// The map key for a header/query rule entry: the name, or `*`.
fn section_key(tokens: &[PathToken]) -> String {
    match tokens.first() {
        Some(PathToken::Key(name)) => name.clone(),
        _ => "*".to_string(),
    }
}

/// Merge an entry's specs into a single v2 rule object. The v2 dialect has
/// no `matchers` array, so `min`/`max` fold into the `type` object.
fn specs_to_v2_object(specs: &[RuleSpec]) -> Value {
    let mut obj = Map::new();
    for spec in specs {
        match spec {
            RuleSpec::Type => {
                obj.entry("match".to_string())
                    .or_insert_with(|| json!("type"));
            }
            RuleSpec::Min(n) => {
                obj.insert("match".to_string(), json!("type"));
                obj.insert("min".to_string(), json!(n));
            }
            RuleSpec::Max(n) => {
                obj.insert("match".to_string(), json!("type"));
                obj.insert("max".to_string(), json!(n));
            }
            RuleSpec::Regex(r) => {
                obj.insert("match".to_string(), json!("regex"));
                obj.insert("regex".to_string(), json!(r));
            }
            RuleSpec::Include(s) => {
                obj.insert("match".to_string(), json!("include"));
                obj.insert("value".to_string(), json!(s));
            }
            RuleSpec::Equality => {
                obj.insert("match".to_string(), json!("equality"));
            }
            RuleSpec::Null => {
                obj.insert("match".to_string(), json!("null"));
            }
            RuleSpec::Integer => {
                obj.insert("match".to_string(), json!("integer"));
            }
            RuleSpec::Decimal => {
                obj.insert("match".to_string(), json!("decimal"));
            }
            RuleSpec::Number => {
                obj.insert("match".to_string(), json!("number"));
            }
            // arrayContains has no v2 representation; it is never compiled
            // for v2 pacts.
            RuleSpec::ArrayContains(_) => {}
        }
    }
    Value::Object(obj)
}

/// Render one entry as a v3 `{"matchers": [...], "combine": "..."}` object.
fn entry_to_v3_object(entry: &RuleEntry) -> Value {
    let mut matchers: Vec<Value> = Vec::new();
    let mut size_obj: Option<Map<String, Value>> = None;
    for spec in &entry.specs {
        match spec {
            RuleSpec::Min(n) => {
                let obj = size_obj.get_or_insert_with(|| {
                    Map::from_iter([("match".to_string(), json!("type"))])
                });
                obj.insert("min".to_string(), json!(n));
            }
            RuleSpec::Max(n) => {
                let obj = size_obj.get_or_insert_with(|| {
                    Map::from_iter([("match".to_string(), json!("type"))])
                });
                obj.insert("max".to_string(), json!(n));
            }
            RuleSpec::Type => matchers.push(json!({"match": "type"})),
            RuleSpec::Regex(r) => matchers.push(json!({"match": "regex", "regex": r})),
            RuleSpec::Include(s) => matchers.push(json!({"match": "include", "value": s})),
            RuleSpec::Equality => matchers.push(json!({"match": "equality"})),
            RuleSpec::Null => matchers.push(json!({"match": "null"})),
            RuleSpec::Integer => matchers.push(json!({"match": "integer"})),
            RuleSpec::Decimal => matchers.push(json!({"match": "decimal"})),
            RuleSpec::Number => matchers.push(json!({"match": "number"})),
            RuleSpec::ArrayContains(variants) => {
                let variants: Vec<Value> = variants
                    .iter()
                    .map(|variant| {
                        let mut body = Map::new();
                        for entry in &variant.rules {
                            body.insert(
                                format_path("$", &entry.tokens),
                                entry_to_v3_object(entry),
                            );
                        }
                        json!({"index": variant.index, "rules": Value::Object(body)})
                    })
                    .collect();
                matchers.push(json!({"match": "arrayContains", "variants": variants}));
            }
        }
    }
    if let Some(obj) = size_obj {
        matchers.push(Value::Object(obj));
    }
    json!({"matchers": matchers, "combine": entry.combine.as_str()})
}

/// Parse a v3 rule value: either `{"matchers": [...], "combine": ...}` or a
/// bare rule object.
fn parse_v3_rule(value: &Value) -> Result<(Vec<RuleSpec>, Combine), PactFormatError> {
    if let Some(matchers) = value.get("matchers").and_then(Value::as_array) {
        let combine = match value.get("combine").and_then(Value::as_str) {
            Some("OR") => Combine::Or,
            _ => Combine::And,
        };
        let mut specs = Vec::new();
        for matcher in matchers {
            specs.extend(parse_rule_object(matcher)?);
        }
        Ok((specs, combine))
    } else {
        Ok((parse_rule_object(value)?, Combine::And))
    }
}

/// Parse a single rule object such as `{"match": "type", "min": 2}`.
///
/// The `match` key may be absent: a bare `{"regex": ...}` is a regex rule
/// (the Ruby implementation writes this form) and a bare `{"min": n}` is a
/// size rule.
fn parse_rule_object(value: &Value) -> Result<Vec<RuleSpec>, PactFormatError> {
    let obj = value
        .as_object()
        .ok_or_else(|| PactFormatError::bad_rules("rule is not an object"))?;
    let min = obj.get("min").and_then(Value::as_u64).map(|n| n as usize);
    let max = obj.get("max").and_then(Value::as_u64).map(|n| n as usize);
    let sizes = |mut specs: Vec<RuleSpec>| {
        specs.extend(min.map(RuleSpec::Min));
        specs.extend(max.map(RuleSpec::Max));
        specs
    };
    let kind = match obj.get("match").and_then(Value::as_str) {
        Some(kind) => kind,
        None if obj.contains_key("regex") => "regex",
        None => "type",
    };
    match kind {
        "type" => {
            if min.is_some() || max.is_some() {
                Ok(sizes(Vec::new()))
            } else {
                Ok(vec![RuleSpec::Type])
            }
        }
        "regex" => {
            let regex = obj
                .get("regex")
                .and_then(Value::as_str)
                .ok_or_else(|| PactFormatError::bad_rules("regex rule has no pattern"))?;
            Ok(vec![RuleSpec::Regex(regex.to_string())])
        }
        "include" => {
            let value = obj
                .get("value")
                .and_then(Value::as_str)
                .ok_or_else(|| PactFormatError::bad_rules("include rule has no value"))?;
            Ok(vec![RuleSpec::Include(value.to_string())])
        }
        "equality" => Ok(vec![RuleSpec::Equality]),
        "null" => Ok(vec![RuleSpec::Null]),
        "integer" => Ok(sizes(vec![RuleSpec::Integer])),
        "decimal" => Ok(sizes(vec![RuleSpec::Decimal])),
        "number" => Ok(sizes(vec![RuleSpec::Number])),
        "arrayContains" => {
            let variants = obj
                .get("variants")
                .and_then(Value::as_array)
                .ok_or_else(|| PactFormatError::bad_rules("arrayContains has no variants"))?;
            let mut parsed = Vec::new();
            for variant in variants {
                let index = variant
                    .get("index")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| PactFormatError::bad_rules("variant has no index"))?
                    as usize;
                let mut rules = Vec::new();
                if let Some(rule_map) = variant.get("rules").and_then(Value::as_object) {
                    for (key, rule) in rule_map {
                        let tokens = parse_path(key).map_err(PactFormatError::bad_rules)?;
                        let (specs, combine) = parse_v3_rule(rule)?;
                        rules.push(RuleEntry {
                            tokens,
                            specs,
                            combine,
                        });
                    }
                }
                parsed.push(ArrayVariant { index, rules });
            }
            Ok(vec![RuleSpec::ArrayContains(parsed)])
        }
        other => Err(PactFormatError::bad_rules(format!(
            "invalid match type in contract {other:?}"
        ))),
    }
}
