use sha2::{Digest, Sha256};

/// Salted, truncated hash of an identifier for log output.
///
/// User ids never appear raw in logs; the same id always maps to the same
/// 8-hex-char token for a given salt, so log lines stay correlatable.
pub fn log_safe_id(id: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(id.as_bytes());
    let hash = hasher.finalize();

    hex::encode(&hash[..4])
}

/// Lowercase hex SHA-256 over `parts` joined by the unit separator (0x1f)
pub fn sha256_joined(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}
