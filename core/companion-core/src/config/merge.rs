//! Layer merging.
//!
//! `merge(base, overlay)` is right-biased and associative. Singleton blocks
//! merge per field; map entries are replaced whole.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::document::{ConfigDocument, ModelConfig};

pub fn merge(base: ConfigDocument, overlay: ConfigDocument) -> ConfigDocument {
    ConfigDocument {
        model: merge_model(base.model, overlay.model),
        mcp: replace_entries(base.mcp, overlay.mcp),
        plugin: replace_entries(base.plugin, overlay.plugin),
        ui: merge_block(base.ui, overlay.ui),
        tools: merge_block(base.tools, overlay.tools),
        extra: merge_extra(base.extra, overlay.extra),
        decode_errors: [base.decode_errors, overlay.decode_errors].concat(),
    }
}

/// Folds layers in precedence order. `None` for an empty sequence.
pub fn merge_all<I>(layers: I) -> Option<ConfigDocument>
where
    I: IntoIterator<Item = ConfigDocument>,
{
    layers.into_iter().reduce(merge)
}

fn merge_model(base: Option<ModelConfig>, overlay: Option<ModelConfig>) -> Option<ModelConfig> {
    match (base, overlay) {
        (None, overlay) => overlay,
        (base, None) => base,
        (Some(base), Some(overlay)) => Some(ModelConfig {
            provider: overlay.provider.or(base.provider),
            name: overlay.name.or(base.name),
            api_key: overlay.api_key.or(base.api_key),
            temperature: overlay.temperature.or(base.temperature),
            top_p: overlay.top_p.or(base.top_p),
            max_tokens: overlay.max_tokens.or(base.max_tokens),
            extra: merge_extra(base.extra, overlay.extra),
        }),
    }
}

fn replace_entries<V>(
    base: Option<BTreeMap<String, V>>,
    overlay: Option<BTreeMap<String, V>>,
) -> Option<BTreeMap<String, V>> {
    match (base, overlay) {
        (None, overlay) => overlay,
        (base, None) => base,
        (Some(mut base), Some(overlay)) => {
            base.extend(overlay);
            Some(base)
        }
    }
}

fn merge_block(
    base: Option<Map<String, Value>>,
    overlay: Option<Map<String, Value>>,
) -> Option<Map<String, Value>> {
    match (base, overlay) {
        (None, overlay) => overlay,
        (base, None) => base,
        (Some(base), Some(overlay)) => Some(merge_extra(base, overlay)),
    }
}

fn merge_extra(mut base: Map<String, Value>, overlay: Map<String, Value>) -> Map<String, Value> {
    for (key, value) in overlay {
        base.insert(key, value);
    }
    base
}
