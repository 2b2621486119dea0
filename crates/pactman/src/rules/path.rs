//! Pact JSONPath handling: parsing, weighting and display.
//!
//! Pact does not use full JSONPath, only dotted keys, bracketed array
//! indexes, `[*]` / `.*` wildcards and the bracket-quoted key form
//! (`['x y']`) for keys containing non-alphanumeric characters.

use std::fmt;

/// One element of a pact rule path or of a concrete element path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathToken {
    /// Object key (`.name` or `['name']`)
    Key(String),
    /// Array index (`[3]`)
    Index(usize),
    /// `[*]`, matches any array index
    StarIndex,
    /// `.*`, matches any object key
    StarKey,
}

impl PathToken {
    fn is_star(&self) -> bool {
        matches!(self, PathToken::StarIndex | PathToken::StarKey)
    }
}

/// Parse a pact rule path into tokens, dropping the leading `$`.
///
/// Accepts the forms the pact specification allows: `$.body.users[*].id`,
/// `$.headers['X-Thing']`, `$.q[0]`, `$.*`. Unparseable segments are
/// reported rather than silently skipped.
pub fn parse_path(path: &str) -> Result<Vec<PathToken>, String> {
    let mut tokens = Vec::new();
    for elem in path.split(['.', '[']) {
        if elem.is_empty() {
            continue;
        }
        if elem == "$" {
            continue;
        }
        if elem == "*" {
            tokens.push(PathToken::StarKey);
        } else if elem == "*]" {
            tokens.push(PathToken::StarIndex);
        } else if let Some(quoted) = elem
            .strip_suffix("']")
            .and_then(|e| e.strip_prefix('\''))
            .or_else(|| elem.strip_suffix("\"]").and_then(|e| e.strip_prefix('"')))
        {
            tokens.push(PathToken::Key(quoted.to_string()));
        } else if let Some(index) = elem.strip_suffix(']') {
            let index = index
                .parse::<usize>()
                .map_err(|_| format!("invalid array index in path {path:?}"))?;
            tokens.push(PathToken::Index(index));
        } else {
            tokens.push(PathToken::Key(elem.to_string()));
        }
    }
    Ok(tokens)
}

/// Weight a rule path against a concrete element path.
///
/// This is the v2-specification weighting algorithm: the root is worth 2,
/// a literal key or index match multiplies by 2, a wildcard match
/// multiplies by 1, and any non-match (including differing lengths) scores
/// the whole path 0. The highest-weighted rule wins.
pub fn weight_path(rule: &[PathToken], element: &[PathToken]) -> u32 {
    if rule.len() != element.len() {
        return 0;
    }
    let mut score: u32 = 2;
    for (spec, elem) in rule.iter().zip(element.iter()) {
        if spec == elem {
            score *= 2;
        } else if spec.is_star() {
            score *= 1;
        } else {
            return 0;
        }
    }
    score
}

/// Render tokens as a pact path rooted at the given prefix (e.g. `$.body`).
pub fn format_path(prefix: &str, tokens: &[PathToken]) -> String {
    let mut s = prefix.to_string();
    for token in tokens {
        match token {
            PathToken::Key(k) => {
                s.push('.');
                s.push_str(k);
            }
            PathToken::Index(i) => {
                s.push_str(&format!("[{i}]"));
            }
            PathToken::StarIndex => s.push_str("[*]"),
            PathToken::StarKey => s.push_str(".*"),
        }
    }
    s
}

impl fmt::Display for PathToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathToken::Key(k) => write!(f, ".{k}"),
            PathToken::Index(i) => write!(f, "[{i}]"),
            PathToken::StarIndex => write!(f, "[*]"),
            PathToken::StarKey => write!(f, ".*"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_path() {
        let tokens = parse_path("$.body.users[*].id").unwrap();
        assert_eq!(
            tokens,
            vec![
                PathToken::Key("body".into()),
                PathToken::Key("users".into()),
                PathToken::StarIndex,
                PathToken::Key("id".into()),
            ]
        );
    }

    #[test]
    fn test_parse_indexed_path() {
        let tokens = parse_path("$.q[0]").unwrap();
        assert_eq!(
            tokens,
            vec![PathToken::Key("q".into()), PathToken::Index(0)]
        );
    }

    #[test]
    fn test_parse_quoted_key() {
        let tokens = parse_path("$.headers['X-Request-Id']").unwrap();
        assert_eq!(
            tokens,
            vec![
                PathToken::Key("headers".into()),
                PathToken::Key("X-Request-Id".into()),
            ]
        );
    }

    #[test]
    fn test_parse_key_wildcard() {
        let tokens = parse_path("$.body.*").unwrap();
        assert_eq!(
            tokens,
            vec![PathToken::Key("body".into()), PathToken::StarKey]
        );
    }

    #[test]
    fn test_parse_bad_index() {
        assert!(parse_path("$.q[x]").is_err());
    }

    #[test]
    fn test_weight_literal_beats_star() {
        let literal = parse_path("$.users[2].id").unwrap();
        let starred = parse_path("$.users[*].id").unwrap();
        let element = vec![
            PathToken::Key("users".into()),
            PathToken::Index(2),
            PathToken::Key("id".into()),
        ];
        let literal_weight = weight_path(&literal, &element);
        let starred_weight = weight_path(&starred, &element);
        assert_eq!(literal_weight, 16);
        assert_eq!(starred_weight, 8);
        assert!(literal_weight > starred_weight);
    }

    #[test]
    fn test_weight_length_mismatch_is_zero() {
        let rule = parse_path("$.users").unwrap();
        let element = vec![PathToken::Key("users".into()), PathToken::Index(0)];
        assert_eq!(weight_path(&rule, &element), 0);
    }

    #[test]
    fn test_weight_non_match_is_zero() {
        let rule = parse_path("$.users[*].id").unwrap();
        let element = vec![
            PathToken::Key("users".into()),
            PathToken::Index(0),
            PathToken::Key("name".into()),
        ];
        assert_eq!(weight_path(&rule, &element), 0);
    }

    #[test]
    fn test_format_round_trip() {
        let tokens = parse_path("$.body.users[*].id").unwrap();
        assert_eq!(format_path("$", &tokens), "$.body.users[*].id");
    }
}
