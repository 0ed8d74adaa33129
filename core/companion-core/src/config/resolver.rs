//! Layer discovery, loading and folding.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{CompanionError, Result};

use super::document::ConfigDocument;
use super::env::{expand_value, process_env};
use super::jsonc::strip_comments;
use super::merge::merge_all;
use super::sources::{ConfigLayout, ConfigSource};

/// A layer that existed but could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerFailure {
    pub source: ConfigSource,
    pub reason: String,
}

/// The effective configuration plus where it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedConfig {
    pub document: ConfigDocument,
    /// Contributing layers in ascending precedence.
    pub layers: Vec<ConfigSource>,
    pub skipped: Vec<LayerFailure>,
}

/// Full outcome of one resolution pass, including the no-config case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigResolution {
    pub document: Option<ConfigDocument>,
    pub layers: Vec<ConfigSource>,
    pub skipped: Vec<LayerFailure>,
}

impl ConfigResolution {
    pub fn into_resolved(self) -> Option<ResolvedConfig> {
        let document = self.document?;
        Some(ResolvedConfig {
            document,
            layers: self.layers,
            skipped: self.skipped,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ConfigResolver {
    layout: ConfigLayout,
}

impl ConfigResolver {
    pub fn new(layout: ConfigLayout) -> Self {
        Self { layout }
    }

    pub fn for_agent(agent_name: impl Into<String>) -> Self {
        Self::new(ConfigLayout::for_agent(agent_name))
    }

    pub fn layout(&self) -> &ConfigLayout {
        &self.layout
    }

    /// Effective configuration, or `None` when no layer could be loaded.
    /// Environment references resolve against the process environment.
    pub fn resolve(&self, project_root: Option<&Path>) -> Option<ResolvedConfig> {
        self.resolve_report(project_root).into_resolved()
    }

    pub fn resolve_report(&self, project_root: Option<&Path>) -> ConfigResolution {
        resolve_with(&self.layout, project_root, &process_env)
    }

    pub fn watch_paths(&self, project_root: Option<&Path>) -> Vec<PathBuf> {
        self.layout.candidate_paths(project_root)
    }
}

/// Resolution with an explicit environment lookup.
pub fn resolve_with<F>(
    layout: &ConfigLayout,
    project_root: Option<&Path>,
    lookup: &F,
) -> ConfigResolution
where
    F: Fn(&str) -> Option<String>,
{
    let mut layers = Vec::new();
    let mut documents = Vec::new();
    let mut skipped = Vec::new();

    for source in layout.existing_sources(project_root) {
        match load_layer(&source.path, lookup) {
            Ok(document) => {
                debug!(path = %source.path.display(), priority = source.priority, "Loaded config layer");
                documents.push(document);
                layers.push(source);
            }
            Err(err) => {
                warn!(path = %source.path.display(), error = %err, "Skipping config layer");
                skipped.push(LayerFailure {
                    source,
                    reason: err.to_string(),
                });
            }
        }
    }

    ConfigResolution {
        document: merge_all(documents),
        layers,
        skipped,
    }
}

fn load_layer<F>(path: &Path, lookup: &F) -> Result<ConfigDocument>
where
    F: Fn(&str) -> Option<String>,
{
    let text = fs_err::read_to_string(path)
        .map_err(|err| CompanionError::io(format!("reading {}", path.display()), err))?;
    parse_document(&text, lookup).map_err(|details| CompanionError::ConfigMalformed {
        path: path.to_path_buf(),
        details,
    })
}

/// Strips comments, parses, expands `${VAR}` references, then decodes.
///
/// Expansion runs on the parsed tree, so substituted values can never break
/// JSON syntax. Only unparseable text or a non-object top level fails; a
/// mistyped value inside is dropped and listed in `decode_errors`.
pub fn parse_document<F>(text: &str, lookup: &F) -> std::result::Result<ConfigDocument, String>
where
    F: Fn(&str) -> Option<String>,
{
    let stripped = strip_comments(text);
    let mut value: Value = serde_json::from_str(&stripped).map_err(|err| err.to_string())?;

    let unresolved = expand_value(&mut value, lookup);
    if !unresolved.is_empty() {
        warn!(variables = ?unresolved, "Unresolved environment references left as literals");
    }

    let Value::Object(map) = value else {
        return Err("top-level value must be an object".to_string());
    };
    let document = ConfigDocument::from_map(map);
    if !document.decode_errors.is_empty() {
        warn!(errors = ?document.decode_errors, "Dropped mistyped configuration values");
    }
    Ok(document)
}
