use std::sync::Arc;

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of the shared secret, the form clients send.
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Checks client-supplied digests against the one derived from the
/// configured secret at startup.
#[derive(Clone)]
pub struct AuthGate {
    digest: Arc<str>,
}

impl AuthGate {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            digest: hash_password(secret).into(),
        }
    }

    pub fn verify(&self, candidate: &str) -> bool {
        constant_time_eq(candidate.as_bytes(), self.digest.as_bytes())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }

    diff == 0
}
