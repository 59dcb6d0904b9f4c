//! Variable/Query Resolver (§4.5).
//!
//! Resolves `{name}` placeholders in the inbound query string and
//! `{{name}}` placeholders in the request body against a target's
//! `variables` map.

use std::collections::HashMap;

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

use crate::error::{RelayError, RelayResult};

/// Resolve `query` (the raw query string, without the leading `?`)
/// against `variables`.
///
/// Three segment forms are recognized per §4.5:
/// - a standalone `{name}` segment expands to `name=value`
/// - `key={name}` expands the value, keeping `key`
/// - any other `k=v` segment passes through verbatim
///
/// Returns [`RelayError::Placeholder`] for any `{name}` not present in
/// `variables`; in that case nothing is partially emitted.
pub fn resolve_query(query: &str, variables: &HashMap<String, String>) -> RelayResult<String> {
    if query.is_empty() {
        return Ok(String::new());
    }

    let mut segments = Vec::new();
    for raw_segment in query.split('&') {
        if raw_segment.is_empty() {
            continue;
        }
        // `%7B`/`%7D` may appear url-encoded; decode so `{name}` is
        // recognizable before inspecting the segment shape.
        let decoded = percent_encoding::percent_decode_str(raw_segment)
            .decode_utf8()
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| raw_segment.to_string());

        if let Some(name) = placeholder_name(&decoded) {
            // Standalone `{name}` segment.
            let value = lookup(variables, &name)?;
            segments.push(format!("{}={}", name, encode(&value)));
            continue;
        }

        if let Some((key, value_part)) = decoded.split_once('=') {
            if let Some(name) = placeholder_name(value_part) {
                let value = lookup(variables, &name)?;
                segments.push(format!("{}={}", key, encode(&value)));
                continue;
            }
        }

        // Literal passthrough — re-encode using the original raw form so
        // a pure-literal query round-trips byte-for-byte.
        segments.push(raw_segment.to_string());
    }

    Ok(segments.join("&"))
}

fn placeholder_name(segment: &str) -> Option<String> {
    let inner = segment.strip_prefix('{')?.strip_suffix('}')?;
    if inner.is_empty() || inner.contains(['{', '}', '=']) {
        return None;
    }
    Some(inner.to_string())
}

fn lookup(variables: &HashMap<String, String>, name: &str) -> RelayResult<String> {
    variables
        .get(name)
        .cloned()
        .ok_or_else(|| RelayError::placeholder(name))
}

fn encode(value: &str) -> String {
    utf8_percent_encode(value, NON_ALPHANUMERIC).to_string()
}

/// Substitute `{{name}}` in `body` with the variable's value when
/// `name` is present; unknown placeholders and single-brace `{name}`
/// forms are left intact (never an error).
pub fn resolve_body(body: &str, variables: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;
    loop {
        match rest.find("{{") {
            None => {
                out.push_str(rest);
                break;
            }
            Some(start) => {
                out.push_str(&rest[..start]);
                let after_open = &rest[start + 2..];
                match after_open.find("}}") {
                    Some(end) => {
                        let name = &after_open[..end];
                        match variables.get(name) {
                            Some(value) => out.push_str(value),
                            None => {
                                out.push_str("{{");
                                out.push_str(name);
                                out.push_str("}}");
                            }
                        }
                        rest = &after_open[end + 2..];
                    }
                    None => {
                        // Unterminated `{{` with no matching `}}`: copy it
                        // through literally and stop scanning.
                        out.push_str(&rest[start..]);
                        break;
                    }
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> HashMap<String, String> {
        HashMap::from([
            ("script".to_string(), "S".to_string()),
            ("deploy".to_string(), "D".to_string()),
        ])
    }

    #[test]
    fn literal_query_round_trips() {
        let query = "name=foo&key=bar";
        assert_eq!(resolve_query(query, &HashMap::new()).unwrap(), query);
    }

    #[test]
    fn resolves_standalone_and_keyed_placeholders() {
        let query = "{script}&name=foo&key={deploy}";
        let resolved = resolve_query(query, &vars()).unwrap();
        let parts: Vec<_> = resolved.split('&').collect();
        assert!(parts.contains(&"script=S"));
        assert!(parts.contains(&"name=foo"));
        assert!(parts.contains(&"key=D"));
    }

    #[test]
    fn unknown_placeholder_errors_with_name() {
        let err = resolve_query("{missing}", &vars()).unwrap_err();
        match err {
            RelayError::Placeholder { name } => assert_eq!(name, "missing"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn configured_variables_are_not_auto_appended() {
        let resolved = resolve_query("name=foo", &vars()).unwrap();
        assert_eq!(resolved, "name=foo");
    }

    #[test]
    fn body_substitutes_known_double_brace_placeholders() {
        let body = r#"{"a": "{{script}}", "b": "{{missing}}", "c": "{single}"}"#;
        let resolved = resolve_body(body, &vars());
        assert_eq!(
            resolved,
            r#"{"a": "S", "b": "{{missing}}", "c": "{single}"}"#
        );
    }

    #[test]
    fn body_resolution_is_idempotent() {
        let body = r#"value={{script}} and {{deploy}}"#;
        let once = resolve_body(body, &vars());
        let twice = resolve_body(&once, &vars());
        assert_eq!(once, twice);
    }
}
