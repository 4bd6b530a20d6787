// Utility functions

use sha2::{Digest, Sha256};

/// Hash an API key for storage
pub fn hash_api_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a new API key
pub fn generate_api_key() -> (String, String) {
    let key = format!("trl_{}", uuid::Uuid::new_v4().to_string().replace("-", ""));
    let prefix = key[..12].to_string();
    (key, prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_carry_the_prefix() {
        let (key, prefix) = generate_api_key();
        assert!(key.starts_with("trl_"));
        assert_eq!(prefix.len(), 12);
        assert!(key.starts_with(&prefix));
    }

    #[test]
    fn hashing_is_stable_and_hex_encoded() {
        let a = hash_api_key("trl_abc");
        let b = hash_api_key("trl_abc");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
