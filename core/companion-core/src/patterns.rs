//! Compiled regex patterns shared across the crate.
//!
//! Compiled once on first use.

use once_cell::sync::Lazy;
use regex::Regex;

// ═══════════════════════════════════════════════════════════════════════════════
// Environment Substitution
// ═══════════════════════════════════════════════════════════════════════════════

/// `${NAME}` or `${NAME:-default}`. The default may be empty and may not
/// contain `}`.
pub static RE_ENV_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("valid env pattern")
});
