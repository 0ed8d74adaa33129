//! Configuration Resolution Engine
//!
//! Produces one effective agent configuration from up to three layered files:
//!
//! ```text
//! global (A.jsonc | A.json)  →  <root>/A.json  →  <root>/.A/A.json
//!        lowest precedence                          highest precedence
//! ```
//!
//! Each layer is read, stripped of comments ([`jsonc`]), parsed, expanded for
//! `${VAR}` references ([`env`]) and decoded into a [`ConfigDocument`]. Layers
//! are folded left to right with [`merge`]. Missing files are skipped silently;
//! malformed files are skipped with a warning and reported in the resolution.
//!
//! # Merge Semantics
//!
//! Singleton blocks (`model`, `ui`, `tools`) merge field by field, override
//! wins per field. Map entries (`mcp`, `plugin`) are atomic: an override entry
//! replaces the base entry with the same key in its entirety.

pub mod document;
pub mod env;
pub mod jsonc;
pub mod merge;
pub mod resolver;
pub mod sources;
pub mod validation;
pub mod watch;

pub use document::{ConfigDocument, McpServer, McpTransport, ModelConfig};
pub use env::{expand_env_refs, expand_value};
pub use jsonc::strip_comments;
pub use merge::{merge, merge_all};
pub use resolver::{
    parse_document, resolve_with, ConfigResolution, ConfigResolver, LayerFailure, ResolvedConfig,
};
pub use sources::{ConfigLayout, ConfigScope, ConfigSource};
pub use validation::{validate, ValidationReport};
pub use watch::ConfigWatcher;
