//! Secret material: environment-based resolution and at-rest sealing of
//! user credentials.
//!
//! Every secret the daemon needs (OAuth client id and secret, the YouTube
//! API key, the credential sealing key) is named in config by an
//! environment variable. For container deployments, `<VAR>_FILE` may point
//! at a mounted secret file instead; the file is consulted only when the
//! plain variable is absent or empty.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};

const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("secret env var '{0}' is not set (set it, or point '{0}_FILE' at a secret file)")]
    Missing(String),

    #[error("secret file '{path}' (named by '{var}_FILE') is unreadable: {source}")]
    UnreadableFile {
        var: String,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("secret env var '{0}' holds invalid UTF-8")]
    InvalidUtf8(String),

    #[error("credential sealing key must decode to 32 bytes of base64: {0}")]
    BadSealingKey(String),

    #[error("failed to seal credential material: {0}")]
    Seal(String),

    #[error("failed to unseal credential material: {0}")]
    Unseal(String),
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Reads the secret named by `var`, trimming surrounding whitespace. When
/// the variable is unset or empty, `<var>_FILE` is tried as the path of a
/// file holding the secret.
pub fn secret_from_env(var: &str) -> Result<SecretString> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => {
            return Ok(SecretString::from(value.trim()));
        }
        Err(std::env::VarError::NotUnicode(_)) => {
            return Err(SecretError::InvalidUtf8(var.to_string()));
        }
        _ => {}
    }

    let file_var = format!("{}_FILE", var);
    match std::env::var(&file_var) {
        Ok(path) if !path.is_empty() => {
            let content =
                std::fs::read_to_string(&path).map_err(|source| SecretError::UnreadableFile {
                    var: var.to_string(),
                    path,
                    source,
                })?;
            Ok(SecretString::from(content.trim()))
        }
        _ => Err(SecretError::Missing(var.to_string())),
    }
}

/// Seals credential material at rest with AES-256-GCM. Each user's token
/// set is sealed as one blob with a fresh nonce per write.
pub struct CredentialSealer {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for CredentialSealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSealer").finish_non_exhaustive()
    }
}

impl CredentialSealer {
    /// Builds a sealer from a base64-encoded 32-byte key.
    pub fn from_base64_key(key: &SecretString) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(key.expose_secret())
            .map_err(|e| SecretError::BadSealingKey(e.to_string()))?;
        Self::from_key_bytes(&bytes)
    }

    pub fn from_key_bytes(key: &[u8]) -> Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| SecretError::BadSealingKey(format!("got {} bytes", key.len())))?;
        Ok(Self { cipher })
    }

    /// Returns (ciphertext, nonce).
    pub fn seal(&self, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| SecretError::Seal(e.to_string()))?;
        Ok((ciphertext, nonce.to_vec()))
    }

    pub fn unseal(&self, ciphertext: &[u8], nonce: &[u8]) -> Result<Vec<u8>> {
        if nonce.len() != NONCE_LEN {
            return Err(SecretError::Unseal(format!(
                "nonce is {} bytes, expected {}",
                nonce.len(),
                NONCE_LEN
            )));
        }
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| SecretError::Unseal(e.to_string()))
    }
}
