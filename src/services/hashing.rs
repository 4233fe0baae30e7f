//! Content hashing and hash-encoding normalization.
//!
//! Every file and chunk is identified by a SHA-256 digest encoded as
//! standard base64. Callers reach the cache through different paths (URL
//! segments vs. JSON bodies) that favor different base64 alphabets, so
//! lookups expand a hash into its equivalent encodings before probing.

use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use sha2::{Digest, Sha256};

/// SHA-256 digest of `data`, encoded as standard base64 with padding.
///
/// Used identically for whole files and individual chunks so a single
/// verification path covers both granularities.
pub fn sha256_base64(data: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(data))
}

/// Expand a hash into its three equivalent textual encodings.
///
/// Returns `[identity, standard-with-padding, url-safe-without-padding]`.
/// Lookups try the forms in this order and stop on the first hit.
pub fn hash_variants(hash: &str) -> [String; 3] {
    [
        hash.to_string(),
        to_standard_padded(hash),
        to_url_safe_no_pad(hash),
    ]
}

/// The single key form used for every cache write: standard base64 with
/// padding, matching what [`sha256_base64`] emits.
pub fn canonical_key(hash: &str) -> String {
    to_standard_padded(hash)
}

fn to_standard_padded(hash: &str) -> String {
    let mut out = hash.replace('-', "+").replace('_', "/");
    while out.len() % 4 != 0 {
        out.push('=');
    }
    out
}

fn to_url_safe_no_pad(hash: &str) -> String {
    hash.replace('+', "-")
        .replace('/', "_")
        .trim_end_matches('=')
        .to_string()
}

/// Decode-and-reencode check used nowhere on the hot path; kept for
/// validating hashes arriving over the wire.
pub fn looks_like_sha256_base64(hash: &str) -> bool {
    let standard = to_standard_padded(hash);
    match STANDARD.decode(&standard) {
        Ok(raw) => raw.len() == 32,
        Err(_) => URL_SAFE_NO_PAD
            .decode(hash)
            .map(|raw| raw.len() == 32)
            .unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic_and_content_sensitive() {
        let a = sha256_base64(b"hello world");
        let b = sha256_base64(b"hello world");
        let c = sha256_base64(b"hello worlds");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn digest_of_empty_input_matches_known_vector() {
        assert_eq!(
            sha256_base64(b""),
            "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
    }

    #[test]
    fn variants_cover_both_alphabets() {
        let standard = "ab+/cd==";
        let [identity, padded, url_safe] = hash_variants(standard);
        assert_eq!(identity, "ab+/cd==");
        assert_eq!(padded, "ab+/cd==");
        assert_eq!(url_safe, "ab-_cd");

        let [identity, padded, url_safe] = hash_variants("ab-_cd");
        assert_eq!(identity, "ab-_cd");
        assert_eq!(padded, "ab+/cd==");
        assert_eq!(url_safe, "ab-_cd");
    }

    #[test]
    fn variants_contain_exactly_two_derived_forms() {
        let variants = hash_variants(&sha256_base64(b"payload"));
        assert_eq!(variants.len(), 3);
        // identity equals the canonical form for hasher output
        assert_eq!(variants[0], variants[1]);
    }

    #[test]
    fn canonical_key_normalizes_url_safe_input() {
        let hash = sha256_base64(b"payload");
        let url_safe = hash_variants(&hash)[2].clone();
        assert_eq!(canonical_key(&url_safe), hash);
    }

    #[test]
    fn recognizes_well_formed_hashes() {
        let hash = sha256_base64(b"payload");
        assert!(looks_like_sha256_base64(&hash));
        assert!(looks_like_sha256_base64(&hash_variants(&hash)[2]));
        assert!(!looks_like_sha256_base64("not-a-hash"));
    }
}
