//! Field handlers shipped with the domain.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::schema::FieldHandler;
use crate::{CoreError, Value};

/// Password hashing primitive, provided by the application.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, plain: &str) -> Result<String, CoreError>;
}

/// Turns a plaintext password into a stored hash column.
///
/// Empty or non-string input is discarded, which leaves the stored hash
/// untouched on update.
pub struct PasswordHashField<H> {
    hasher: H,
    column: &'static str,
}

impl<H: PasswordHasher> PasswordHashField<H> {
    pub fn new(hasher: H, column: &'static str) -> Self {
        Self { hasher, column }
    }
}

#[async_trait]
impl<H: PasswordHasher> FieldHandler for PasswordHashField<H> {
    fn name(&self) -> &'static str {
        "password-hash"
    }

    async fn resolve(&self, raw: &JsonValue) -> Result<Option<(&'static str, Value)>, CoreError> {
        let Some(plain) = raw.as_str().filter(|s| !s.is_empty()) else {
            return Ok(None);
        };
        let hashed = self.hasher.hash(plain)?;
        Ok(Some((self.column, Value::Text(hashed))))
    }
}
