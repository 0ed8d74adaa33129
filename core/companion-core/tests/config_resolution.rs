//! Integration tests for layered config discovery, merge and validation.

use std::fs;
use std::path::Path;

use companion_core::config::{resolve_with, ConfigLayout, ConfigResolver, ConfigScope};
use companion_core::{merge, strip_comments, validate, ConfigDocument};
use serde_json::{json, Value};
use tempfile::tempdir;

fn write(path: &Path, text: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, text).unwrap();
}

fn lookup(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
    move |name| {
        pairs
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.to_string())
    }
}

#[test]
fn test_three_layers_merge_with_env_substitution() {
    let global = tempdir().unwrap();
    let project = tempdir().unwrap();

    write(
        &global.path().join("opencode.jsonc"),
        r#"{
            // global defaults
            "model": { "provider": "anthropic", "name": "haiku", "api_key": "${API_KEY}" },
            "mcp": {
                "fs": { "type": "local", "command": ["npx", "fs-server"] }, /* shared */
                "docs": { "type": "remote", "url": "https://docs.example.com/mcp" }
            }
        }"#,
    );
    write(
        &project.path().join("opencode.json"),
        r#"{ "model": { "name": "sonnet" } }"#,
    );
    write(
        &project.path().join(".opencode/opencode.json"),
        r#"{ "mcp": { "fs": { "type": "local", "command": ["fs-local", "${ROOT:-/}"] } } }"#,
    );

    let layout = ConfigLayout::with_global_dir("opencode", global.path());
    let resolution = resolve_with(&layout, Some(project.path()), &lookup(&[("API_KEY", "sk-x")]));
    let resolved = resolution.into_resolved().expect("configuration");

    let scopes: Vec<ConfigScope> = resolved.layers.iter().map(|l| l.scope).collect();
    assert_eq!(
        scopes,
        vec![
            ConfigScope::Global,
            ConfigScope::ProjectRoot,
            ConfigScope::ProjectSubdir
        ]
    );

    let value = serde_json::to_value(&resolved.document).unwrap();
    assert_eq!(
        value,
        json!({
            "model": { "provider": "anthropic", "name": "sonnet", "api_key": "sk-x" },
            "mcp": {
                "docs": { "type": "remote", "url": "https://docs.example.com/mcp" },
                "fs": { "type": "local", "command": ["fs-local", "/"] }
            }
        })
    );
    assert!(validate(&resolved.document).ok);
}

#[test]
fn test_missing_files_yield_no_configuration() {
    let empty = tempdir().unwrap();
    let resolver = ConfigResolver::new(ConfigLayout::with_global_dir("opencode", empty.path()));
    assert!(resolver.resolve(Some(empty.path())).is_none());
}

#[test]
fn test_unresolved_reference_stays_literal() {
    let global = tempdir().unwrap();
    write(
        &global.path().join("opencode.json"),
        r#"{ "model": { "provider": "p", "name": "n", "api_key": "${NOT_SET_ANYWHERE}" } }"#,
    );
    let layout = ConfigLayout::with_global_dir("opencode", global.path());
    let resolved = resolve_with(&layout, None, &lookup(&[]))
        .into_resolved()
        .unwrap();
    let key = resolved.document.model.and_then(|m| m.api_key);
    assert_eq!(key.as_deref(), Some("${NOT_SET_ANYWHERE}"));
}

#[test]
fn test_string_containing_comment_markers_round_trips() {
    let text = r#"{ "x": "a // b /* c */" }"#;
    let value: Value = serde_json::from_str(&strip_comments(text)).unwrap();
    assert_eq!(value["x"], "a // b /* c */");
}

#[test]
fn test_merge_identity_and_right_bias() {
    let doc: ConfigDocument = serde_json::from_value(json!({
        "model": { "provider": "a", "name": "b" },
        "mcp": { "x": { "type": "remote", "url": "u" } },
        "share": "auto"
    }))
    .unwrap();

    assert_eq!(merge(ConfigDocument::default(), doc.clone()), doc);
    assert_eq!(merge(doc.clone(), ConfigDocument::default()), doc);

    let overlay: ConfigDocument =
        serde_json::from_value(json!({ "model": { "name": "c" }, "share": "manual" })).unwrap();
    let merged = merge(doc, overlay);
    assert_eq!(merged.model.unwrap().name.as_deref(), Some("c"));
    assert_eq!(merged.extra["share"], "manual");
}

#[test]
fn test_validation_reports_all_errors_at_once() {
    let doc: ConfigDocument = serde_json::from_value(json!({
        "model": { "provider": "anthropic" },
        "mcp": { "x": { "type": "local", "command": [] } }
    }))
    .unwrap();
    let report = validate(&doc);
    assert!(!report.ok);
    assert_eq!(report.errors.len(), 2);
}
