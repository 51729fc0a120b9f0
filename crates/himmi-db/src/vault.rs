//! Credential vault — AES-256-GCM encryption of tenant-supplied upstream
//! keys at rest. Ciphertext layout is `base64(nonce || ciphertext)`; the
//! 96-bit nonce is random per encryption.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use himmi_core::{GatewayError, Result};

const NONCE_LEN: usize = 12;

pub struct Vault {
    cipher: Aes256Gcm,
}

impl Vault {
    /// Build from a 32-byte base64 key, the `ENCRYPTION_KEY` format.
    pub fn from_base64_key(key_b64: &str) -> Result<Self> {
        let key = BASE64
            .decode(key_b64)
            .map_err(|e| GatewayError::Config(format!("encryption key is not valid base64: {e}")))?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| GatewayError::Config("encryption key must be 32 bytes".into()))?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| GatewayError::CredentialDecrypt(format!("encrypt failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    pub fn decrypt(&self, token: &str) -> Result<String> {
        let raw = BASE64
            .decode(token)
            .map_err(|e| GatewayError::CredentialDecrypt(format!("bad base64: {e}")))?;
        if raw.len() < NONCE_LEN {
            return Err(GatewayError::CredentialDecrypt("ciphertext too short".into()));
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| GatewayError::CredentialDecrypt(format!("decrypt failed: {e}")))?;
        String::from_utf8(plaintext)
            .map_err(|e| GatewayError::CredentialDecrypt(format!("not utf-8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vault() -> Vault {
        Vault::from_base64_key(&BASE64.encode([42u8; 32])).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let vault = test_vault();
        let token = vault.encrypt("sk-upstream-secret").unwrap();
        assert_ne!(token, "sk-upstream-secret");
        assert_eq!(vault.decrypt(&token).unwrap(), "sk-upstream-secret");
    }

    #[test]
    fn test_nonce_is_fresh_per_encryption() {
        let vault = test_vault();
        let a = vault.encrypt("same input").unwrap();
        let b = vault.encrypt("same input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let vault = test_vault();
        let token = vault.encrypt("secret").unwrap();
        let mut raw = BASE64.decode(&token).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        let tampered = BASE64.encode(raw);
        assert!(matches!(
            vault.decrypt(&tampered),
            Err(GatewayError::CredentialDecrypt(_))
        ));
    }

    #[test]
    fn test_garbage_input_rejected() {
        let vault = test_vault();
        assert!(vault.decrypt("not base64 at all!").is_err());
        assert!(vault.decrypt("QQ==").is_err()); // shorter than a nonce
    }

    #[test]
    fn test_wrong_key_length_rejected() {
        assert!(Vault::from_base64_key(&BASE64.encode([1u8; 16])).is_err());
    }
}
