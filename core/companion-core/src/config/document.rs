//! Typed view of one configuration layer (and of the merged result).
//!
//! Every field is optional: a layer may set any subset. Keys this crate does
//! not model are kept verbatim in `extra` (top level, model block and each
//! MCP server) so a merged document can be handed back to the agent without
//! losing settings.
//!
//! Decoding never rejects a whole layer over one mistyped value. The field or
//! entry is dropped and described in `decode_errors`, which validation
//! reports alongside its own errors.

use std::collections::BTreeMap;

use serde::de::{DeserializeOwned, Deserializer, Error as _};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Replacement text for secret-bearing values in published snapshots.
pub const REDACTED: &str = "***";

const SECRET_KEY_MARKERS: &[&str] = &["key", "token", "secret", "password"];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConfigDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp: Option<BTreeMap<String, McpServer>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin: Option<BTreeMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    /// Values dropped while decoding because they had the wrong shape.
    #[serde(skip)]
    pub decode_errors: Vec<String>,
}

impl ConfigDocument {
    /// Decodes a top-level object leniently.
    pub fn from_map(mut map: Map<String, Value>) -> Self {
        let mut errors = Vec::new();

        let model = map
            .remove("model")
            .and_then(|value| expect_object(value, "model", &mut errors))
            .map(|fields| ModelConfig::from_fields(fields, &mut errors));

        let mcp = map
            .remove("mcp")
            .and_then(|value| expect_object(value, "mcp", &mut errors))
            .map(|servers| {
                servers
                    .into_iter()
                    .filter_map(|(name, entry)| {
                        let context = format!("mcp server '{}'", name);
                        let fields = expect_object(entry, &context, &mut errors)?;
                        let server = McpServer::from_fields(fields, &context, &mut errors);
                        Some((name, server))
                    })
                    .collect()
            });

        let plugin = map
            .remove("plugin")
            .and_then(|value| expect_object(value, "plugin", &mut errors))
            .map(|plugins| plugins.into_iter().collect());
        let ui = map
            .remove("ui")
            .and_then(|value| expect_object(value, "ui", &mut errors));
        let tools = map
            .remove("tools")
            .and_then(|value| expect_object(value, "tools", &mut errors));

        Self {
            model,
            mcp,
            plugin,
            ui,
            tools,
            extra: map,
            decode_errors: errors,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.model.is_none()
            && self.mcp.is_none()
            && self.plugin.is_none()
            && self.ui.is_none()
            && self.tools.is_none()
            && self.extra.is_empty()
    }

    pub fn mcp_server(&self, name: &str) -> Option<&McpServer> {
        self.mcp.as_ref().and_then(|servers| servers.get(name))
    }

    /// Copy safe to publish: the API key, MCP headers and environment values,
    /// and secret-looking model options are replaced by [`REDACTED`].
    pub fn redacted(&self) -> Self {
        let mut doc = self.clone();
        if let Some(model) = doc.model.as_mut() {
            if model.api_key.is_some() {
                model.api_key = Some(REDACTED.to_string());
            }
            redact_secret_keys(&mut model.extra);
        }
        for server in doc.mcp.iter_mut().flat_map(|servers| servers.values_mut()) {
            for values in [server.environment.as_mut(), server.headers.as_mut()]
                .into_iter()
                .flatten()
            {
                for value in values.values_mut() {
                    *value = REDACTED.to_string();
                }
            }
        }
        doc
    }
}

impl<'de> Deserialize<'de> for ConfigDocument {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Object(map) => Ok(Self::from_map(map)),
            _ => Err(D::Error::custom("top-level value must be an object")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ModelConfig {
    /// `api_key` wins over `apiKey` when a layer spells both.
    fn from_fields(mut fields: Map<String, Value>, errors: &mut Vec<String>) -> Self {
        Self {
            provider: take_field(&mut fields, &["provider"], "model", errors),
            name: take_field(&mut fields, &["name"], "model", errors),
            api_key: take_field(&mut fields, &["api_key", "apiKey"], "model", errors),
            temperature: take_field(&mut fields, &["temperature"], "model", errors),
            top_p: take_field(&mut fields, &["top_p", "topP"], "model", errors),
            max_tokens: take_field(&mut fields, &["max_tokens", "maxTokens"], "model", errors),
            extra: fields,
        }
    }
}

/// One MCP server entry. `type` is kept as raw text so validation can name an
/// unsupported value in its message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct McpServer {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McpTransport {
    Local,
    Remote,
    Unsupported(String),
}

impl McpServer {
    fn from_fields(
        mut fields: Map<String, Value>,
        context: &str,
        errors: &mut Vec<String>,
    ) -> Self {
        Self {
            kind: take_field(&mut fields, &["type"], context, errors),
            command: take_field(&mut fields, &["command"], context, errors),
            url: take_field(&mut fields, &["url"], context, errors),
            environment: take_field(&mut fields, &["environment"], context, errors),
            headers: take_field(&mut fields, &["headers"], context, errors),
            enabled: take_field(&mut fields, &["enabled"], context, errors),
            timeout: take_field(&mut fields, &["timeout"], context, errors),
            extra: fields,
        }
    }

    pub fn transport(&self) -> Option<McpTransport> {
        self.kind.as_deref().map(|kind| match kind {
            "local" => McpTransport::Local,
            "remote" => McpTransport::Remote,
            other => McpTransport::Unsupported(other.to_string()),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

fn expect_object(
    value: Value,
    context: &str,
    errors: &mut Vec<String>,
) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map),
        Value::Null => None,
        other => {
            errors.push(format!("{}: expected an object, got {}", context, type_name(&other)));
            None
        }
    }
}

/// Removes every spelling in `keys` and decodes the first one present. A
/// mismatched type is recorded and the field treated as absent.
fn take_field<T: DeserializeOwned>(
    fields: &mut Map<String, Value>,
    keys: &[&str],
    context: &str,
    errors: &mut Vec<String>,
) -> Option<T> {
    let mut found = None;
    for key in keys {
        if let Some(value) = fields.remove(*key) {
            if found.is_none() {
                found = Some((*key, value));
            }
        }
    }
    let (key, value) = found?;
    if value.is_null() {
        return None;
    }
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(err) => {
            errors.push(format!("{} field '{}': {}", context, key, err));
            None
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn redact_secret_keys(map: &mut Map<String, Value>) {
    for (key, value) in map.iter_mut() {
        let lowered = key.to_lowercase();
        if SECRET_KEY_MARKERS.iter().any(|marker| lowered.contains(marker)) {
            *value = Value::String(REDACTED.to_string());
        } else if let Value::Object(nested) = value {
            redact_secret_keys(nested);
        }
    }
}
