//! Cache key derivation.
//!
//! Execution keys hash the form-encoded pair list `database=...&sql=...`
//! (database omitted when unset) with SHA-256. Encoding follows the
//! `application/x-www-form-urlencoded` flavour that keeps `~` and escapes
//! `*`, so keys are shared with other clients of the same cache layout.

use sha2::{Digest, Sha256};
use url::form_urlencoded;

/// Prefix of keys holding execution identifiers.
pub const EXECUTION_KEY_PREFIX: &str = "query-";

/// Prefix of keys holding result payloads.
pub const RESULTS_KEY_PREFIX: &str = "results-";

/// Key under which the execution id of `sql` against `database` is cached.
#[must_use]
pub fn execution_key(database: Option<&str>, sql: &str) -> String {
    let mut parts: Vec<(&str, &str)> = Vec::with_capacity(2);
    if let Some(database) = database {
        parts.push(("database", database));
    }
    parts.push(("sql", sql));

    let encoded = parts
        .iter()
        .map(|(name, value)| format!("{}={}", quote_plus(name), quote_plus(value)))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha256::new();
    hasher.update(encoded.as_bytes());
    format!("{EXECUTION_KEY_PREFIX}{}", hex::encode(hasher.finalize()))
}

/// Key under which the results of an execution are cached.
#[must_use]
pub fn results_key(execution_id: &str) -> String {
    format!("{RESULTS_KEY_PREFIX}{execution_id}")
}

/// Form-encodes a value, spaces as `+`, leaving only `A-Za-z0-9_.-~` bare.
fn quote_plus(value: &str) -> String {
    // A literal '%' is always escaped, so both replacements are unambiguous.
    form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('*', "%2A")
        .replace("%7E", "~")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
