//! Rule engine: decides whether an actual HTTP message conforms to an
//! expected one under a table of matching rules, producing path-qualified
//! mismatches.
//!
//! The engine collects every mismatch it finds rather than stopping at the
//! first; the only short-circuit is inside the element search of an
//! `arrayContains` variant. Rule lookup is by path weighting (literal
//! segments outrank wildcards), and `type` rules are expanded over the
//! expected subtree when the table is compiled, so matching never walks
//! back up the tree looking for inherited rules.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use super::path::{format_path, weight_path, PathToken};
use super::{Combine, RuleEntry, RuleSpec};
use crate::error::EngineError;
use crate::headers;
use crate::interaction::{
    header_lookup, value_to_string, ExpectedRequest, ExpectedResponse, SpecVersion,
};

/// A single point of disagreement between expected and actual.
#[derive(Debug, Clone, PartialEq)]
pub struct Mismatch {
    /// Full path of the failing element, e.g. `$.body.users[2].id`.
    pub path: String,
    pub reason: String,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.path, self.reason)
    }
}

/// An incoming request as observed by the mock or replayed by a consumer.
#[derive(Debug, Clone, Default)]
pub struct ActualRequest {
    pub method: String,
    pub path: String,
    pub query: Map<String, Value>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

/// A provider response as observed by the verifier.
#[derive(Debug, Clone)]
pub struct ActualResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

/// Which half of the interaction is being checked. Requests are strict
/// about unexpected content; responses tolerate extras.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageKind {
    Request,
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Path,
    Query,
    Header,
    Body,
}

impl Section {
    fn prefix(self) -> &'static str {
        match self {
            Section::Path => "$.path",
            Section::Query => "$.query",
            Section::Header => "$.headers",
            Section::Body => "$.body",
        }
    }
}

/// Check an actual request against an expected one.
pub fn match_request(
    expected: &ExpectedRequest,
    actual: &ActualRequest,
    version: SpecVersion,
) -> Result<Vec<Mismatch>, EngineError> {
    let mut mismatches = Vec::new();

    if !actual.method.eq_ignore_ascii_case(&expected.method) {
        mismatches.push(Mismatch {
            path: "$.method".to_string(),
            reason: format!(
                "request method {:?} does not match expected {:?}",
                actual.method, expected.method
            ),
        });
    }

    // path
    let path_rules = rules_apply(version, &expected.rules.path);
    if path_rules {
        let table = RuleTable::compile(&expected.rules.path, Section::Path, None)?;
        let mut checker = Checker::new(version, MessageKind::Request, Section::Path, table, true);
        checker.check(
            &Value::String(actual.path.clone()),
            &Value::String(expected.path.clone()),
            &mut Vec::new(),
        );
        mismatches.extend(checker.mismatches);
    } else if actual.path != expected.path {
        mismatches.push(Mismatch {
            path: "$.path".to_string(),
            reason: format!(
                "request path {:?} does not match expected {:?}",
                actual.path, expected.path
            ),
        });
    }

    // query: declared names must be present with declared values, and no
    // undeclared names are permitted. An interaction that declares no
    // query at all leaves the query unchecked.
    let query_rules = rules_apply(version, &expected.rules.query);
    if !expected.query.is_empty() || query_rules {
        let table = if query_rules {
            RuleTable::compile(&expected.rules.query, Section::Query, None)?
        } else {
            RuleTable::default()
        };
        let mut checker = Checker::new(
            version,
            MessageKind::Request,
            Section::Query,
            table,
            query_rules,
        );
        checker.check(
            &Value::Object(actual.query.clone()),
            &Value::Object(expected.query.clone()),
            &mut Vec::new(),
        );
        mismatches.extend(checker.mismatches);
    }

    mismatches.extend(match_headers(
        &expected.headers,
        &expected.rules.header,
        &actual.headers,
        version,
        MessageKind::Request,
    )?);

    mismatches.extend(match_body(
        expected.body.as_ref(),
        &expected.headers,
        &expected.rules.body,
        actual.body.as_deref(),
        &actual.headers,
        version,
        MessageKind::Request,
    )?);

    Ok(mismatches)
}

/// Check an actual provider response against an expected one.
pub fn match_response(
    expected: &ExpectedResponse,
    actual: &ActualResponse,
    version: SpecVersion,
) -> Result<Vec<Mismatch>, EngineError> {
    let mut mismatches = Vec::new();

    if actual.status != expected.status {
        mismatches.push(Mismatch {
            path: "$.status".to_string(),
            reason: format!(
                "status code {} is not expected {}",
                actual.status, expected.status
            ),
        });
    }

    mismatches.extend(match_headers(
        &expected.headers,
        &expected.rules.header,
        &actual.headers,
        version,
        MessageKind::Response,
    )?);

    mismatches.extend(match_body(
        expected.body.as_ref(),
        &expected.headers,
        &expected.rules.body,
        actual.body.as_deref(),
        &actual.headers,
        version,
        MessageKind::Response,
    )?);

    Ok(mismatches)
}

fn rules_apply(version: SpecVersion, entries: &[RuleEntry]) -> bool {
    version.major() > 1 && !entries.is_empty()
}

/// Join the values of every actual header with the given name, as HTTP
/// does for repeated headers.
fn actual_header(headers: &[(String, String)], name: &str) -> Option<String> {
    let values: Vec<&str> = headers
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.join(", "))
    }
}

fn match_headers(
    expected: &Map<String, Value>,
    entries: &[RuleEntry],
    actual: &[(String, String)],
    version: SpecVersion,
    kind: MessageKind,
) -> Result<Vec<Mismatch>, EngineError> {
    let mut mismatches = Vec::new();
    let rules_present = rules_apply(version, entries);
    let table = if rules_present {
        RuleTable::compile(entries, Section::Header, None)?
    } else {
        RuleTable::default()
    };
    for (name, expected_value) in expected {
        let expected_value = value_to_string(expected_value);
        let path = format!("$.headers.{name}");
        let Some(actual_value) = actual_header(actual, name) else {
            mismatches.push(Mismatch {
                path,
                reason: format!("missing header {name:?}"),
            });
            continue;
        };
        let mut tokens = vec![PathToken::Key(name.clone())];
        if rules_present && table.find(&tokens).is_some() {
            let mut checker =
                Checker::new(version, kind, Section::Header, table.clone(), true);
            checker.check(
                &Value::String(actual_value),
                &Value::String(expected_value),
                &mut tokens,
            );
            mismatches.extend(checker.mismatches);
        } else if !headers::header_equal(&actual_value, &expected_value) {
            // Content-Type values differing only in charset presence are
            // accepted
            if name.eq_ignore_ascii_case("content-type")
                && headers::content_type_caveat(&actual_value, &expected_value)
            {
                continue;
            }
            mismatches.push(Mismatch {
                path,
                reason: format!(
                    "header value {actual_value:?} does not match expected {expected_value:?}"
                ),
            });
        }
    }
    Ok(mismatches)
}

pub(crate) fn json_content_type(content_type: &str) -> bool {
    static JSON_TYPE: OnceLock<Regex> = OnceLock::new();
    let re = JSON_TYPE.get_or_init(|| {
        Regex::new(r"^application/(json|.*\+json|json-.*)($|;)").expect("static regex is valid")
    });
    re.is_match(content_type.trim())
}

#[allow(clippy::too_many_arguments)]
fn match_body(
    expected: Option<&Value>,
    expected_headers: &Map<String, Value>,
    entries: &[RuleEntry],
    actual: Option<&[u8]>,
    actual_headers: &[(String, String)],
    version: SpecVersion,
    kind: MessageKind,
) -> Result<Vec<Mismatch>, EngineError> {
    let Some(expected) = expected else {
        return Ok(Vec::new());
    };
    let mut mismatches = Vec::new();

    // the actual content type decides the decoding; fall back on the
    // declared one, then on the pact default of JSON
    let content_type = actual_header(actual_headers, "content-type")
        .or_else(|| header_lookup(expected_headers, "content-type"))
        .unwrap_or_else(|| "application/json".to_string());

    let actual = match actual {
        Some(bytes) if !bytes.is_empty() => bytes,
        _ => {
            mismatches.push(Mismatch {
                path: "$.body".to_string(),
                reason: "body is missing".to_string(),
            });
            return Ok(mismatches);
        }
    };

    if json_content_type(&content_type) {
        let actual_value: Value = match serde_json::from_slice(actual) {
            Ok(value) => value,
            Err(e) => {
                mismatches.push(Mismatch {
                    path: "$.body".to_string(),
                    reason: format!("body is not valid JSON: {e}"),
                });
                return Ok(mismatches);
            }
        };
        let rules_present = rules_apply(version, entries);
        let table = if rules_present {
            RuleTable::compile(entries, Section::Body, Some(expected))?
        } else {
            RuleTable::default()
        };
        let mut checker = Checker::new(version, kind, Section::Body, table, rules_present);
        checker.check(&actual_value, expected, &mut Vec::new());
        mismatches.extend(checker.mismatches);
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        let text = String::from_utf8_lossy(actual);
        let actual_value = Value::Object(crate::interaction::parse_query_string(&text));
        let rules_present = rules_apply(version, entries);
        let table = if rules_present {
            RuleTable::compile(entries, Section::Body, Some(expected))?
        } else {
            RuleTable::default()
        };
        let mut checker = Checker::new(version, kind, Section::Body, table, rules_present);
        checker.check(&actual_value, expected, &mut Vec::new());
        mismatches.extend(checker.mismatches);
    } else {
        // opaque body, only byte equality matches
        let actual_text = String::from_utf8_lossy(actual);
        let expected_text = value_to_string(expected);
        if actual_text != expected_text {
            mismatches.push(Mismatch {
                path: "$.body".to_string(),
                reason: format!(
                    "body {:?} does not match expected {:?}",
                    summarise_str(&actual_text),
                    summarise_str(&expected_text)
                ),
            });
        }
    }
    Ok(mismatches)
}

// ============================================================================
// Compiled rule tables
// ============================================================================

#[derive(Debug, Clone)]
enum CompiledSpec {
    Type,
    Min(usize),
    Max(usize),
    Regex(Regex),
    Include(String),
    Equality,
    Null,
    Integer,
    Decimal,
    Number,
    ArrayContains(Vec<CompiledVariant>),
}

#[derive(Debug, Clone)]
struct CompiledVariant {
    index: usize,
    table: RuleTable,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    tokens: Vec<PathToken>,
    specs: Vec<CompiledSpec>,
    combine: Combine,
}

/// A compiled, section-scoped rule table ready for weighted lookup.
#[derive(Debug, Clone, Default)]
struct RuleTable {
    rules: Vec<CompiledRule>,
}

impl RuleTable {
    /// Compile entries for one section. Query value rules are relocated to
    /// the `name[*]` element position, and for a body section the `type`
    /// rules are expanded over the expected subtree so inheritance never
    /// has to be resolved at match time.
    fn compile(
        entries: &[RuleEntry],
        section: Section,
        expected: Option<&Value>,
    ) -> Result<RuleTable, EngineError> {
        let mut rules = Vec::new();
        for entry in entries {
            let mut value_specs = Vec::new();
            let mut size_specs = Vec::new();
            for spec in &entry.specs {
                let compiled = compile_spec(spec)?;
                if section == Section::Query
                    && entry.tokens.len() == 1
                    && matches!(
                        compiled,
                        CompiledSpec::Regex(_)
                            | CompiledSpec::Include(_)
                            | CompiledSpec::Equality
                            | CompiledSpec::Null
                            | CompiledSpec::Integer
                            | CompiledSpec::Decimal
                            | CompiledSpec::Number
                    )
                {
                    // a value rule declared for the parameter applies to
                    // each of its values
                    value_specs.push(compiled);
                } else {
                    size_specs.push(compiled);
                }
            }
            if !size_specs.is_empty() {
                rules.push(CompiledRule {
                    tokens: entry.tokens.clone(),
                    specs: size_specs,
                    combine: entry.combine,
                });
            }
            if !value_specs.is_empty() {
                let mut tokens = entry.tokens.clone();
                tokens.push(PathToken::StarIndex);
                rules.push(CompiledRule {
                    tokens,
                    specs: value_specs,
                    combine: entry.combine,
                });
            }
        }
        let mut table = RuleTable { rules };
        if let Some(expected) = expected {
            table.expand_type_cascade(expected);
        }
        Ok(table)
    }

    /// Most specific rule for a concrete element path, by weight.
    fn find(&self, element: &[PathToken]) -> Option<&CompiledRule> {
        self.rules
            .iter()
            .map(|rule| (weight_path(&rule.tokens, element), rule))
            .filter(|(weight, _)| *weight > 0)
            .max_by_key(|(weight, _)| *weight)
            .map(|(_, rule)| rule)
    }

    /// Insert synthetic `type` rules at every expected-tree position below
    /// a `type`-like rule that is not already governed by a rule of its
    /// own. Single-element expected arrays are treated as samples, so
    /// their descendants register under `[*]`.
    fn expand_type_cascade(&mut self, expected: &Value) {
        let mut synthetic = Vec::new();
        self.cascade_walk(expected, &mut Vec::new(), false, &mut synthetic);
        self.rules.extend(synthetic);
    }

    fn cascade_walk(
        &self,
        value: &Value,
        tokens: &mut Vec<PathToken>,
        inherited: bool,
        out: &mut Vec<CompiledRule>,
    ) {
        let found = self.find(tokens);
        let inherited_below = match found {
            Some(rule) => rule.specs.iter().any(|spec| {
                matches!(
                    spec,
                    CompiledSpec::Type | CompiledSpec::Min(_) | CompiledSpec::Max(_)
                )
            }),
            None => inherited,
        };
        if found.is_none() && inherited {
            out.push(CompiledRule {
                tokens: tokens.clone(),
                specs: vec![CompiledSpec::Type],
                combine: Combine::And,
            });
        }
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    tokens.push(PathToken::Key(key.clone()));
                    self.cascade_walk(child, tokens, inherited_below, out);
                    tokens.pop();
                }
            }
            Value::Array(items) if items.len() == 1 => {
                tokens.push(PathToken::StarIndex);
                self.cascade_walk(&items[0], tokens, inherited_below, out);
                tokens.pop();
            }
            Value::Array(items) => {
                for (index, child) in items.iter().enumerate() {
                    tokens.push(PathToken::Index(index));
                    self.cascade_walk(child, tokens, inherited_below, out);
                    tokens.pop();
                }
            }
            _ => {}
        }
    }
}

fn compile_spec(spec: &RuleSpec) -> Result<CompiledSpec, EngineError> {
    Ok(match spec {
        RuleSpec::Type => CompiledSpec::Type,
        RuleSpec::Min(n) => CompiledSpec::Min(*n),
        RuleSpec::Max(n) => CompiledSpec::Max(*n),
        RuleSpec::Regex(pattern) => {
            let anchored = format!("^(?:{pattern})$");
            let regex = Regex::new(&anchored).map_err(|source| EngineError::BadRegex {
                pattern: pattern.clone(),
                source,
            })?;
            CompiledSpec::Regex(regex)
        }
        RuleSpec::Include(s) => CompiledSpec::Include(s.clone()),
        RuleSpec::Equality => CompiledSpec::Equality,
        RuleSpec::Null => CompiledSpec::Null,
        RuleSpec::Integer => CompiledSpec::Integer,
        RuleSpec::Decimal => CompiledSpec::Decimal,
        RuleSpec::Number => CompiledSpec::Number,
        RuleSpec::ArrayContains(variants) => {
            let compiled = variants
                .iter()
                .map(|variant| {
                    Ok(CompiledVariant {
                        index: variant.index,
                        table: RuleTable::compile(&variant.rules, Section::Body, None)?,
                    })
                })
                .collect::<Result<Vec<_>, EngineError>>()?;
            CompiledSpec::ArrayContains(compiled)
        }
    })
}

// ============================================================================
// The walker
// ============================================================================

struct Checker {
    version: SpecVersion,
    kind: MessageKind,
    section: Section,
    table: RuleTable,
    rules_present: bool,
    mismatches: Vec<Mismatch>,
}

impl Checker {
    fn new(
        version: SpecVersion,
        kind: MessageKind,
        section: Section,
        table: RuleTable,
        rules_present: bool,
    ) -> Self {
        Checker {
            version,
            kind,
            section,
            table,
            rules_present,
            mismatches: Vec::new(),
        }
    }

    fn fail(&mut self, tokens: &[PathToken], reason: String) {
        let path = format_path(self.section.prefix(), tokens);
        debug!("mismatch at {path}: {reason}");
        self.mismatches.push(Mismatch { path, reason });
    }

    fn check(&mut self, data: &Value, spec: &Value, tokens: &mut Vec<PathToken>) {
        if self.rules_present {
            self.apply_rules(data, spec, tokens);
        } else {
            self.compare(data, spec, tokens);
        }
    }

    /// Fallback deep comparison used when no rules govern the section.
    /// Requests reject unexpected object keys; responses ignore extras.
    fn compare(&mut self, data: &Value, spec: &Value, tokens: &mut Vec<PathToken>) {
        match spec {
            Value::Array(spec_items) => {
                let Value::Array(data_items) = data else {
                    self.fail(
                        tokens,
                        format!("element is not an array (is {})", nice_type(data)),
                    );
                    return;
                };
                if data_items.len() != spec_items.len() {
                    self.fail(
                        tokens,
                        format!(
                            "array is incorrect length (expected {}, got {})",
                            spec_items.len(),
                            data_items.len()
                        ),
                    );
                    return;
                }
                for (index, (data_elem, spec_elem)) in
                    data_items.iter().zip(spec_items.iter()).enumerate()
                {
                    tokens.push(PathToken::Index(index));
                    self.compare(data_elem, spec_elem, tokens);
                    tokens.pop();
                }
            }
            Value::Object(spec_map) => {
                let Value::Object(data_map) = data else {
                    self.fail(
                        tokens,
                        format!("element is not an object (is {})", nice_type(data)),
                    );
                    return;
                };
                for (key, spec_value) in spec_map {
                    let Some(data_value) = data_map.get(key) else {
                        self.fail(tokens, format!("element {key:?} is missing"));
                        continue;
                    };
                    tokens.push(PathToken::Key(key.clone()));
                    self.compare(data_value, spec_value, tokens);
                    tokens.pop();
                }
                self.check_unexpected_keys(data_map, spec_map, tokens);
            }
            leaf => {
                if data != leaf {
                    self.fail(
                        tokens,
                        format!(
                            "value {} does not equal expected {}",
                            summarise(data),
                            summarise(leaf)
                        ),
                    );
                }
            }
        }
    }

    fn check_unexpected_keys(
        &mut self,
        data_map: &Map<String, Value>,
        spec_map: &Map<String, Value>,
        tokens: &mut Vec<PathToken>,
    ) {
        let strict = match self.section {
            // undeclared query parameters are never permitted
            Section::Query => tokens.is_empty(),
            // a request body without rules must not carry unexpected data
            Section::Body => self.kind == MessageKind::Request && !self.rules_present,
            _ => false,
        };
        if !strict {
            return;
        }
        for key in data_map.keys() {
            if !spec_map.contains_key(key) {
                let reason = if self.section == Section::Query {
                    format!("unexpected query parameter {key:?}")
                } else {
                    "unexpected data in request".to_string()
                };
                tokens.push(PathToken::Key(key.clone()));
                self.fail(tokens, reason);
                tokens.pop();
            }
        }
    }

    /// Rule-driven walk: apply the most specific rule at this path, then
    /// descend into arrays and objects, falling back on equality at
    /// rule-less leaves.
    fn apply_rules(&mut self, data: &Value, spec: &Value, tokens: &mut Vec<PathToken>) {
        let rule = self.table.find(tokens).cloned();
        if let Some(rule) = &rule {
            let before = self.mismatches.len();
            self.apply_rule_specs(rule, data, spec, tokens);
            if self.mismatches.len() > before {
                // the rule failed here, descending would only repeat it
                return;
            }
            if rule
                .specs
                .iter()
                .any(|spec| matches!(spec, CompiledSpec::ArrayContains(_)))
            {
                // the variant search is the whole semantics, element-wise
                // descent does not apply
                return;
            }
        }
        match spec {
            Value::Array(items) => {
                // only a min/max rule at this path licenses an actual
                // length different from a multi-element expectation
                let size_governed = rule.as_ref().is_some_and(|r| {
                    r.specs.iter().any(|spec| {
                        matches!(spec, CompiledSpec::Min(_) | CompiledSpec::Max(_))
                    })
                });
                self.rules_array(data, items, size_governed, tokens);
            }
            Value::Object(map) => self.rules_dict(data, map, tokens),
            leaf => {
                if rule.is_none() && data != leaf {
                    self.fail(
                        tokens,
                        format!(
                            "value {} does not equal expected {}",
                            summarise(data),
                            summarise(leaf)
                        ),
                    );
                }
            }
        }
    }

    fn rules_array(
        &mut self,
        data: &Value,
        spec_items: &[Value],
        size_governed: bool,
        tokens: &mut Vec<PathToken>,
    ) {
        let Value::Array(data_items) = data else {
            self.fail(
                tokens,
                format!("element is not an array (is {})", nice_type(data)),
            );
            return;
        };
        if spec_items.is_empty() {
            if !data_items.is_empty() {
                self.fail(tokens, "expected an empty array".to_string());
            }
            return;
        }
        if data_items.is_empty() {
            self.fail(tokens, "expected data in the array but it is empty".to_string());
            return;
        }
        if spec_items.len() > 1 && !size_governed && data_items.len() != spec_items.len() {
            self.fail(
                tokens,
                format!(
                    "array is incorrect length (expected {}, got {})",
                    spec_items.len(),
                    data_items.len()
                ),
            );
            return;
        }
        for (index, data_elem) in data_items.iter().enumerate() {
            // a single-element spec is a sample applied to every element;
            // under a min/max rule the first element also stands in for
            // elements beyond the declared ones
            let spec_elem = if spec_items.len() == 1 {
                &spec_items[0]
            } else if index < spec_items.len() {
                &spec_items[index]
            } else {
                &spec_items[0]
            };
            tokens.push(PathToken::Index(index));
            self.apply_rules(data_elem, spec_elem, tokens);
            tokens.pop();
        }
    }

    fn rules_dict(
        &mut self,
        data: &Value,
        spec_map: &Map<String, Value>,
        tokens: &mut Vec<PathToken>,
    ) {
        let Value::Object(data_map) = data else {
            self.fail(
                tokens,
                format!("element is not an object (is {})", nice_type(data)),
            );
            return;
        };
        for (key, spec_value) in spec_map {
            let Some(data_value) = data_map.get(key) else {
                self.fail(tokens, format!("element {key:?} is missing"));
                continue;
            };
            tokens.push(PathToken::Key(key.clone()));
            self.apply_rules(data_value, spec_value, tokens);
            tokens.pop();
        }
        self.check_unexpected_keys(data_map, spec_map, tokens);
    }

    fn apply_rule_specs(
        &mut self,
        rule: &CompiledRule,
        data: &Value,
        spec: &Value,
        tokens: &mut Vec<PathToken>,
    ) {
        let results: Vec<Result<(), String>> = rule
            .specs
            .iter()
            .map(|compiled| self.eval_spec(compiled, data, spec))
            .collect();
        match rule.combine {
            Combine::And => {
                for result in results {
                    if let Err(reason) = result {
                        self.fail(tokens, reason);
                    }
                }
            }
            Combine::Or => {
                if results.iter().all(Result::is_err) {
                    let reasons: Vec<String> =
                        results.into_iter().filter_map(Result::err).collect();
                    self.fail(tokens, reasons.join("; "));
                }
            }
        }
    }

    fn eval_spec(&self, spec: &CompiledSpec, data: &Value, expected: &Value) -> Result<(), String> {
        match spec {
            CompiledSpec::Type => {
                if nice_type(data) == nice_type(expected) {
                    Ok(())
                } else {
                    Err(format!(
                        "expected {}, got {}",
                        nice_type(expected),
                        nice_type(data)
                    ))
                }
            }
            CompiledSpec::Min(min) => match sized_len(data) {
                Some(len) if len < *min => Err(if data.is_array() {
                    format!("expected array length >= {min}, got {len}")
                } else {
                    format!("size {len} is smaller than minimum size {min}")
                }),
                Some(_) => Ok(()),
                None => Err(format!(
                    "expected an array with at least {min} elements, got {}",
                    nice_type(data)
                )),
            },
            CompiledSpec::Max(max) => match sized_len(data) {
                Some(len) if len > *max => Err(if data.is_array() {
                    format!("expected array length <= {max}, got {len}")
                } else {
                    format!("size {len} is larger than maximum size {max}")
                }),
                Some(_) => Ok(()),
                None => Err(format!(
                    "expected an array with at most {max} elements, got {}",
                    nice_type(data)
                )),
            },
            CompiledSpec::Regex(regex) => {
                let text = value_to_string(data);
                if regex.is_match(&text) {
                    Ok(())
                } else {
                    Err(format!(
                        "value {} does not match regex {:?}",
                        summarise(data),
                        trim_anchor(regex.as_str())
                    ))
                }
            }
            CompiledSpec::Include(needle) => {
                let text = value_to_string(data);
                if text.contains(needle.as_str()) {
                    Ok(())
                } else {
                    Err(format!(
                        "value {} does not contain expected value {needle:?}",
                        summarise(data)
                    ))
                }
            }
            CompiledSpec::Equality => {
                if data == expected {
                    Ok(())
                } else {
                    Err(format!(
                        "value {} does not equal expected {}",
                        summarise(data),
                        summarise(expected)
                    ))
                }
            }
            CompiledSpec::Null => {
                if data.is_null() {
                    Ok(())
                } else {
                    Err(format!("value {} is not null", summarise(data)))
                }
            }
            CompiledSpec::Integer => {
                if data.as_i64().is_some() || data.as_u64().is_some() {
                    Ok(())
                } else {
                    Err(format!("value {} is not an integer", summarise(data)))
                }
            }
            CompiledSpec::Decimal => {
                if data.is_f64() {
                    Ok(())
                } else {
                    Err(format!("value {} is not a decimal", summarise(data)))
                }
            }
            CompiledSpec::Number => {
                if data.is_number() {
                    Ok(())
                } else {
                    Err(format!("value {} is not a number", summarise(data)))
                }
            }
            CompiledSpec::ArrayContains(variants) => {
                let Value::Array(data_items) = data else {
                    return Err(format!("expected an array, got {}", nice_type(data)));
                };
                let Value::Array(expected_items) = expected else {
                    return Err("arrayContains rule on a non-array expectation".to_string());
                };
                for variant in variants {
                    let Some(variant_expected) = expected_items.get(variant.index) else {
                        return Err(format!(
                            "variant index {} is out of range of the expected array",
                            variant.index
                        ));
                    };
                    let found = data_items.iter().any(|candidate| {
                        let mut sub = Checker::new(
                            self.version,
                            self.kind,
                            Section::Body,
                            variant.table.clone(),
                            true,
                        );
                        sub.check(candidate, variant_expected, &mut Vec::new());
                        sub.mismatches.is_empty()
                    });
                    if !found {
                        return Err(format!(
                            "no element matches variant {} ({})",
                            variant.index,
                            summarise(variant_expected)
                        ));
                    }
                }
                Ok(())
            }
        }
    }
}

/// JSON type name, with integers and floats folded into "number".
fn nice_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn sized_len(value: &Value) -> Option<usize> {
    match value {
        Value::Array(items) => Some(items.len()),
        Value::Object(map) => Some(map.len()),
        Value::String(s) => Some(s.chars().count()),
        _ => None,
    }
}

fn summarise(value: &Value) -> String {
    summarise_str(&value_to_string(value))
}

/// Truncate a value rendering for mismatch messages.
fn summarise_str(text: &str) -> String {
    const LIMIT: usize = 60;
    if text.chars().count() <= LIMIT {
        format!("{text:?}")
    } else {
        let head: String = text.chars().take(LIMIT).collect();
        format!("{:?}...", head)
    }
}

fn trim_anchor(pattern: &str) -> &str {
    pattern
        .strip_prefix("^(?:")
        .and_then(|p| p.strip_suffix(")$"))
        .unwrap_or(pattern)
}
