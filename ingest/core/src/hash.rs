//! Content hashing used for idempotent bootstrap and mode selection.

use sha2::{Digest, Sha256};

/// `sha256_hex(mappings || "|" || settings || "|" || salt)`.
///
/// Deterministic across processes: used to decide whether a remote
/// component/index template already matches what this process would write,
/// and whether the incremental sync orchestrator can reindex or must
/// multiplex.
pub fn channel_hash(mappings_json: &str, settings_json: &str, salt: &str) -> String {
    sha256_hex(&format!("{mappings_json}|{settings_json}|{salt}"))
}

pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Marker embedded in a remote resource's `_meta.hash` or `description`
/// field, e.g. `[hash:<value>]` or `[fields_hash:<value>]`.
pub fn hash_marker(label: &str, hash: &str) -> String {
    format!("[{label}:{hash}]")
}

/// Extract a `[label:value]` marker from a description string, if present.
pub fn extract_hash_marker<'a>(description: &'a str, label: &str) -> Option<&'a str> {
    let prefix = format!("[{label}:");
    let start = description.find(&prefix)? + prefix.len();
    let rest = &description[start..];
    let end = rest.find(']')?;
    Some(&rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_hash_is_deterministic() {
        let a = channel_hash("{\"a\":1}", "{\"b\":2}", "salt");
        let b = channel_hash("{\"a\":1}", "{\"b\":2}", "salt");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn channel_hash_changes_with_inputs() {
        let a = channel_hash("{\"a\":1}", "{\"b\":2}", "salt");
        let b = channel_hash("{\"a\":2}", "{\"b\":2}", "salt");
        assert_ne!(a, b);
    }

    #[test]
    fn marker_round_trip() {
        let marker = hash_marker("hash", "deadbeef");
        let description = format!("templates for foo {marker}");
        assert_eq!(extract_hash_marker(&description, "hash"), Some("deadbeef"));
        assert_eq!(extract_hash_marker(&description, "fields_hash"), None);
    }
}
