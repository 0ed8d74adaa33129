//! Structural checks on a (usually merged) document.
//!
//! All problems are collected; validation never stops at the first one.

use serde::Serialize;

use super::document::{ConfigDocument, McpServer, McpTransport, ModelConfig};

const TEMPERATURE_RANGE: std::ops::RangeInclusive<f64> = 0.0..=2.0;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub ok: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            ok: errors.is_empty(),
            errors,
        }
    }
}

pub fn validate(doc: &ConfigDocument) -> ValidationReport {
    let mut errors = doc.decode_errors.clone();

    if let Some(model) = &doc.model {
        check_model(model, &mut errors);
    }

    if let Some(servers) = &doc.mcp {
        for (name, server) in servers {
            check_mcp_server(name, server, &mut errors);
        }
    }

    ValidationReport::from_errors(errors)
}

fn check_model(model: &ModelConfig, errors: &mut Vec<String>) {
    if is_blank(model.provider.as_deref()) {
        errors.push("model.provider is required when a model block is present".to_string());
    }
    if is_blank(model.name.as_deref()) {
        errors.push("model.name is required when a model block is present".to_string());
    }
    if let Some(temperature) = model.temperature {
        if !TEMPERATURE_RANGE.contains(&temperature) {
            errors.push(format!(
                "model.temperature must be between 0 and 2, got {}",
                temperature
            ));
        }
    }
}

fn check_mcp_server(name: &str, server: &McpServer, errors: &mut Vec<String>) {
    match server.transport() {
        None => errors.push(format!(
            "mcp server '{}': type is required (local or remote)",
            name
        )),
        Some(McpTransport::Local) => {
            let has_command = server
                .command
                .as_ref()
                .and_then(|argv| argv.first())
                .is_some_and(|program| !program.trim().is_empty());
            if !has_command {
                errors.push(format!(
                    "mcp server '{}': local servers require a non-empty command",
                    name
                ));
            }
        }
        Some(McpTransport::Remote) => {
            if is_blank(server.url.as_deref()) {
                errors.push(format!("mcp server '{}': remote servers require a url", name));
            }
        }
        Some(McpTransport::Unsupported(kind)) => errors.push(format!(
            "mcp server '{}': unsupported type '{}' (expected local or remote)",
            name, kind
        )),
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |text| text.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> ConfigDocument {
        serde_json::from_value(value).expect("document")
    }

    #[test]
    fn empty_document_is_valid() {
        let report = validate(&ConfigDocument::default());
        assert!(report.ok);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn collects_every_error() {
        let report = validate(&doc(json!({
            "model": { "provider": "anthropic" },
            "mcp": { "x": { "type": "local", "command": [] } }
        })));
        assert!(!report.ok);
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors.iter().any(|e| e.contains("model.name")));
        assert!(report.errors.iter().any(|e| e.contains("'x'")));
    }

    #[test]
    fn remote_server_needs_url() {
        let report = validate(&doc(json!({
            "mcp": {
                "ok": { "type": "remote", "url": "https://mcp.example.com" },
                "bad": { "type": "remote" }
            }
        })));
        assert_eq!(
            report.errors,
            vec!["mcp server 'bad': remote servers require a url".to_string()]
        );
    }

    #[test]
    fn flags_missing_and_unknown_types() {
        let report = validate(&doc(json!({
            "mcp": {
                "a": { "command": ["x"] },
                "b": { "type": "websocket", "url": "ws://x" }
            }
        })));
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors[0].contains("type is required"));
        assert!(report.errors[1].contains("unsupported type 'websocket'"));
    }

    #[test]
    fn temperature_out_of_range() {
        let report = validate(&doc(json!({
            "model": { "provider": "p", "name": "n", "temperature": 3.5 }
        })));
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("temperature"));
    }

    #[test]
    fn blank_command_program_is_rejected() {
        let report = validate(&doc(json!({
            "mcp": { "x": { "type": "local", "command": ["  ", "arg"] } }
        })));
        assert!(!report.ok);
    }

    #[test]
    fn decode_errors_are_reported_with_structural_ones() {
        let report = validate(&doc(json!({
            "model": { "provider": "p", "name": "n" },
            "mcp": {
                "fs": { "type": "local", "command": ["fs"], "environment": { "PORT": 8080 } },
                "web": { "type": "remote" }
            }
        })));
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors[0].starts_with("mcp server 'fs' field 'environment'"));
        assert_eq!(report.errors[1], "mcp server 'web': remote servers require a url");
    }
}
