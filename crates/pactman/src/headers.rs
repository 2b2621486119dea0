//! Structured HTTP header value comparison.
//!
//! Header values are split into `;`-separated parts, each carrying value
//! tokens and `name=value` parameters, so that comparisons ignore parameter
//! order and surrounding whitespace. Quoted parameter values are unescaped.

/// One `;`-separated part of a header value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct HeaderPart {
    pub values: Vec<String>,
    pub params: Vec<(String, String)>,
}

impl HeaderPart {
    pub fn has_param(&self, name: &str) -> bool {
        self.params.iter().any(|(k, _)| k == name)
    }

}

/// Split a string into segments separated by `marker`, ignoring markers
/// inside double-quoted sections.
fn split_on_marker(s: &str, marker: char) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                current.push(c);
                in_quotes = !in_quotes;
            }
            c if c == marker && !in_quotes => {
                segments.push(current.trim().to_string());
                current = String::new();
            }
            c => current.push(c),
        }
    }
    segments.push(current.trim().to_string());
    segments.retain(|s| !s.is_empty());
    segments
}

fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value[1..value.len() - 1]
            .replace("\\\\", "\\")
            .replace("\\\"", "\"")
    } else {
        value.to_string()
    }
}

/// Parse a header value into its parts. Parameter names are lowercased and
/// parameter values unquoted, so `text/html; Charset="UTF-8"` and
/// `text/html;charset=UTF-8` parse identically.
pub fn parse_header(line: &str) -> Vec<HeaderPart> {
    let mut parts = Vec::new();
    for segment in split_on_marker(line, ';') {
        let mut values = Vec::new();
        let mut params = Vec::new();
        for option in split_on_marker(&segment, ',') {
            if let Some((name, value)) = option.split_once('=') {
                params.push((name.trim().to_lowercase(), unquote(value.trim())));
            } else {
                values.push(option);
            }
        }
        parts.push(HeaderPart { values, params });
    }
    parts
}

fn sorted(mut parts: Vec<HeaderPart>) -> Vec<HeaderPart> {
    parts.sort();
    parts
}

/// Whether two header values are equivalent, ignoring part order,
/// parameter order and whitespace.
pub fn header_equal(actual: &str, expected: &str) -> bool {
    sorted(parse_header(actual)) == sorted(parse_header(expected))
}

/// The Content-Type caveat: values that differ only in that a `charset`
/// parameter is present on one side and absent on the other are accepted.
pub fn content_type_caveat(actual: &str, expected: &str) -> bool {
    let actual_parts = sorted(parse_header(actual));
    let expected_parts = sorted(parse_header(expected));
    let strip = |parts: &[HeaderPart]| -> Vec<HeaderPart> {
        parts
            .iter()
            .filter(|p| !p.has_param("charset"))
            .cloned()
            .collect()
    };
    if strip(&actual_parts) != strip(&expected_parts) {
        return false;
    }
    let has_charset =
        |parts: &[HeaderPart]| -> bool { parts.iter().any(|p| p.has_param("charset")) };
    has_charset(&actual_parts) != has_charset(&expected_parts)
}

/// Extract a parameter value (e.g. `charset`) from a header value.
pub fn header_param(line: &str, name: &str) -> Option<String> {
    for part in parse_header(line) {
        for (k, v) in part.params {
            if k == name {
                return Some(v);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_value() {
        let parts = parse_header("application/json");
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].values, vec!["application/json"]);
        assert!(parts[0].params.is_empty());
    }

    #[test]
    fn test_params_are_parsed_and_lowercased() {
        let parts = parse_header("text/html; Charset=UTF-8");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].params, vec![("charset".to_string(), "UTF-8".to_string())]);
    }

    #[test]
    fn test_quoted_param_values() {
        let parts = parse_header(r#"form-data; name="file \"x\"""#);
        assert_eq!(
            parts[1].params,
            vec![("name".to_string(), "file \"x\"".to_string())]
        );
    }

    #[test]
    fn test_header_equal_ignores_whitespace() {
        assert!(header_equal(
            "text/html;charset=UTF-8",
            "text/html; charset=UTF-8"
        ));
        assert!(!header_equal("text/html", "text/plain"));
    }

    #[test]
    fn test_content_type_caveat() {
        // charset present on one side only: acceptable
        assert!(content_type_caveat(
            "application/json; charset=UTF-8",
            "application/json"
        ));
        assert!(content_type_caveat(
            "application/json",
            "application/json; charset=UTF-8"
        ));
        // both carry a charset but differ: not the caveat's business
        assert!(!content_type_caveat(
            "application/json; charset=UTF-8",
            "application/json; charset=latin-1"
        ));
        // media types differ
        assert!(!content_type_caveat(
            "text/plain; charset=UTF-8",
            "application/json"
        ));
    }

    #[test]
    fn test_header_param() {
        assert_eq!(
            header_param("application/json; charset=UTF-8", "charset").as_deref(),
            Some("UTF-8")
        );
        assert_eq!(header_param("application/json", "charset"), None);
    }
}
