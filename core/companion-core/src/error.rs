//! Error types for companion-core operations.
//!
//! Only genuine failures live here. Expected absences (no target process, no
//! config file, no emitter) are modelled as `Option`/empty values instead.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CompanionError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("File watch failed: {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("Thread spawn failed: {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl CompanionError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        CompanionError::Io {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, CompanionError>;
