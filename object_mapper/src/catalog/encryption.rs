//! Field-level encryption hook

use std::fmt::Debug;

use crate::errors::MapperError;

/// Symmetric text encryption keyed by the field's declared key name.
///
/// Encryption must be deterministic for equality filters on encrypted fields to match.
pub trait Encryptor: Debug + Send + Sync {
    fn encrypt(&self, key: &str, plain: &str) -> Result<String, MapperError>;

    fn decrypt(&self, key: &str, cipher: &str) -> Result<String, MapperError>;
}
