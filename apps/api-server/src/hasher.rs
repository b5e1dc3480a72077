//! Password hashing injected into the users schema.

use domain::handlers::PasswordHasher;
use domain::CoreError;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Salted SHA-256, stored as `sha256$<salt>$<hex digest>`.
pub struct SaltedSha256;

impl SaltedSha256 {
    fn digest(salt: &str, plain: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(plain.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    #[cfg(test)]
    pub fn verify(stored: &str, plain: &str) -> bool {
        match stored.split('$').collect::<Vec<_>>().as_slice() {
            ["sha256", salt, digest] => Self::digest(salt, plain) == *digest,
            _ => false,
        }
    }
}

impl PasswordHasher for SaltedSha256 {
    fn hash(&self, plain: &str) -> Result<String, CoreError> {
        let salt = Uuid::new_v4().simple().to_string();
        Ok(format!("sha256${}${}", salt, Self::digest(&salt, plain)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_are_salted_and_verifiable() {
        let a = SaltedSha256.hash("s3cret").unwrap();
        let b = SaltedSha256.hash("s3cret").unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("sha256$"));
        assert!(SaltedSha256::verify(&a, "s3cret"));
        assert!(!SaltedSha256::verify(&a, "other"));
        assert!(!SaltedSha256::verify("seed$disabled", "s3cret"));
    }
}
