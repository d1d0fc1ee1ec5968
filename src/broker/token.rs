//! Opaque proxy token generation.

use rand::Rng;

/// Random bytes per token (256 bits of entropy).
pub const TOKEN_BYTES: usize = 32;

/// Generate a cryptographically random opaque token.
///
/// Format: `<prefix><64 lowercase hex chars>`. The prefix makes tokens easy to
/// tell apart from the real upstream key and greppable by secret scanners.
#[must_use]
pub fn generate(prefix: &str) -> String {
    let random_bytes: [u8; TOKEN_BYTES] = rand::rng().random();
    format!("{prefix}{}", hex::encode(random_bytes))
}

/// Cheap structural check run before touching the store.
#[must_use]
pub fn has_valid_shape(token: &str, prefix: &str) -> bool {
    token
        .strip_prefix(prefix)
        .is_some_and(|rest| !rest.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn generated_token_has_prefix_and_hex_body() {
        let token = generate("crd_");

        assert!(token.starts_with("crd_"));
        let body = &token["crd_".len()..];
        assert_eq!(body.len(), TOKEN_BYTES * 2);
        assert!(body.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn generated_tokens_do_not_repeat() {
        let tokens: HashSet<String> = (0..1000).map(|_| generate("crd_")).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn shape_check() {
        assert!(has_valid_shape("crd_abc", "crd_"));
        assert!(!has_valid_shape("crd_", "crd_"));
        assert!(!has_valid_shape("sk-ant-fake-token", "crd_"));
        assert!(!has_valid_shape("not-a-valid-token", "crd_"));
        assert!(!has_valid_shape("", "crd_"));
    }
}
