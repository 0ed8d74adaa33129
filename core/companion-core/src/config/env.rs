//! `${VAR}` / `${VAR:-default}` expansion in configuration strings.
//!
//! Resolution order: the variable's value, then the default, then the
//! original token left in place. Unresolved references are never replaced by
//! an empty string, so a secret field cannot silently become "".
//! `:-` follows shell semantics: an empty variable also takes the default.

use std::borrow::Cow;

use serde_json::Value;

use crate::patterns::RE_ENV_REFERENCE;

/// Expands references in one string. Returns the expanded text and the names
/// that could not be resolved.
pub fn expand_env_refs<'a, F>(input: &'a str, lookup: &F) -> (Cow<'a, str>, Vec<String>)
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return (Cow::Borrowed(input), Vec::new());
    }

    let mut unresolved = Vec::new();
    let expanded = RE_ENV_REFERENCE.replace_all(input, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str());
        match (lookup(name), default) {
            (Some(value), Some(default)) if value.is_empty() => default.to_string(),
            (Some(value), _) => value,
            (None, Some(default)) => default.to_string(),
            (None, None) => {
                unresolved.push(name.to_string());
                caps[0].to_string()
            }
        }
    });

    (expanded, unresolved)
}

/// Expands every string value in a JSON tree in place. Object keys are left alone.
pub fn expand_value<F>(value: &mut Value, lookup: &F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut unresolved = Vec::new();
    expand_into(value, lookup, &mut unresolved);
    unresolved
}

fn expand_into<F>(value: &mut Value, lookup: &F, unresolved: &mut Vec<String>)
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        Value::String(text) => {
            let (expanded, missing) = expand_env_refs(text, lookup);
            if let Cow::Owned(expanded) = expanded {
                *text = expanded;
            }
            unresolved.extend(missing);
        }
        Value::Array(items) => {
            for item in items {
                expand_into(item, lookup, unresolved);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                expand_into(item, lookup, unresolved);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Lookup backed by the process environment.
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn substitutes_known_variable() {
        let lookup = lookup_from(&[("API_KEY", "sk-123")]);
        let (out, missing) = expand_env_refs("Bearer ${API_KEY}", &lookup);
        assert_eq!(out, "Bearer sk-123");
        assert!(missing.is_empty());
    }

    #[test]
    fn uses_default_when_unset_or_empty() {
        let lookup = lookup_from(&[("EMPTY", "")]);
        assert_eq!(expand_env_refs("${MISSING:-fallback}", &lookup).0, "fallback");
        assert_eq!(expand_env_refs("${EMPTY:-fallback}", &lookup).0, "fallback");
        assert_eq!(expand_env_refs("${MISSING:-}", &lookup).0, "");
    }

    #[test]
    fn leaves_unresolved_token_literal() {
        let lookup = lookup_from(&[]);
        let (out, missing) = expand_env_refs("key=${SECRET_TOKEN}", &lookup);
        assert_eq!(out, "key=${SECRET_TOKEN}");
        assert_eq!(missing, vec!["SECRET_TOKEN".to_string()]);
    }

    #[test]
    fn ignores_malformed_references() {
        let lookup = lookup_from(&[("A", "x")]);
        assert_eq!(expand_env_refs("$A ${1BAD} ${A", &lookup).0, "$A ${1BAD} ${A");
    }

    #[test]
    fn expands_nested_strings_but_not_keys() {
        let lookup = lookup_from(&[("HOST", "example.com"), ("TOKEN", "t0k")]);
        let mut value = json!({
            "${HOST}": "kept",
            "mcp": {
                "remote": { "url": "https://${HOST}/mcp", "headers": { "auth": "${TOKEN}" } },
                "local": { "command": ["npx", "${PKG:-server}"] }
            },
            "count": 3
        });
        let missing = expand_value(&mut value, &lookup);
        assert!(missing.is_empty());
        assert_eq!(value["${HOST}"], "kept");
        assert_eq!(value["mcp"]["remote"]["url"], "https://example.com/mcp");
        assert_eq!(value["mcp"]["remote"]["headers"]["auth"], "t0k");
        assert_eq!(value["mcp"]["local"]["command"][1], "server");
        assert_eq!(value["count"], 3);
    }
}
