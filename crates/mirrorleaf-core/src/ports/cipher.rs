//! Encryption port
//!
//! Encryption primitives are opaque to the engine. A failure never touches
//! cache or tree state; the caller re-prompts for the password.

use thiserror::Error;

/// Failure of an encryption primitive
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CipherError {
    /// Password did not decrypt the payload
    #[error("Wrong password")]
    WrongPassword,

    /// Any other primitive failure
    #[error("Cipher failure: {0}")]
    Failed(String),
}

/// Port trait for content encryption
#[async_trait::async_trait]
pub trait ICipher: Send + Sync {
    async fn encrypt(&self, plaintext: &str, password: &str) -> Result<String, CipherError>;

    async fn decrypt(&self, ciphertext: &str, password: &str) -> Result<String, CipherError>;
}
