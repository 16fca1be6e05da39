//! Cache Keys - SHA-256 over Canonical Parameters
//!
//! The key doubles as the artifact base name, so identical requests land on
//! the same files and a second request is served from disk.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::params::{filter_position, format_value, Params};

/// Length of the hash part of an artifact name.
pub const KEY_LENGTH: usize = 10;

/// SHA-256 of bytes, base64 encoded with the URL-safe alphabet (no `/` or `+`).
pub fn sha256_base64(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// `type:key1=value1;key2=value2` over non-position parameters, sorted by name.
pub fn canonical_entries(model_type: &str, params: &Params) -> String {
    let entries: Vec<String> = filter_position(params)
        .iter()
        .map(|(k, v)| format!("{}={}", k, format_value(v)))
        .collect();
    format!("{}:{}", model_type, entries.join(";"))
}

/// Short deterministic hash of a model type and its shape parameters.
pub fn compute_cache_key(model_type: &str, params: &Params) -> String {
    let digest = sha256_base64(canonical_entries(model_type, params).as_bytes());
    digest.chars().take(KEY_LENGTH).collect()
}

/// Artifact base name: `modelType-hash`.
pub fn artifact_base_name(model_type: &str, params: &Params) -> String {
    format!("{}-{}", model_type, compute_cache_key(model_type, params))
}

/// Split an artifact base name back into model type and hash.
///
/// Model types contain hyphens and so may the hash, so the split is by the
/// fixed hash length rather than by the last separator.
pub fn split_base_name(base: &str) -> Option<(&str, &str)> {
    if !base.is_ascii() || base.len() < KEY_LENGTH + 2 {
        return None;
    }
    let split = base.len() - KEY_LENGTH - 1;
    if base.as_bytes()[split] != b'-' {
        return None;
    }
    Some((&base[..split], &base[split + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, serde_json::Value)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_canonical_entries_sorted_and_filtered() {
        let p = params(&[
            ("thickness", json!(2.0)),
            ("position-x", json!(4.0)),
            ("inner-diameter", json!(6.0)),
        ]);
        assert_eq!(
            canonical_entries("washer", &p),
            "washer:inner-diameter=6;thickness=2"
        );
    }

    #[test]
    fn test_key_shape() {
        let key = compute_cache_key("washer", &params(&[("thickness", json!(2.0))]));
        assert_eq!(key.len(), KEY_LENGTH);
        assert!(key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_hash_deterministic() {
        let h1 = sha256_base64(b"washer:thickness=2");
        let h2 = sha256_base64(b"washer:thickness=2");
        assert_eq!(h1, h2);
        assert_ne!(h1, sha256_base64(b"washer:thickness=3"));
    }

    #[test]
    fn test_split_base_name() {
        let p = params(&[("height", json!(5.0))]);
        let base = artifact_base_name("hollow-cylinder", &p);
        let (model_type, key) = split_base_name(&base).unwrap();
        assert_eq!(model_type, "hollow-cylinder");
        assert_eq!(key, compute_cache_key("hollow-cylinder", &p));
        assert_eq!(split_base_name("washer"), None);
    }
}
