use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::LinkError;

type HmacSha256 = Hmac<Sha256>;

/// AES-256-GCM for tokens at rest, HMAC-SHA256 for the session cookie.
pub struct CryptoEngine {
    cipher: Aes256Gcm,
    signer: HmacSha256,
}

impl CryptoEngine {
    /// Create a new CryptoEngine from base64-encoded keys.
    pub fn new(master_key_b64: &str, hmac_secret_b64: &str) -> Result<Self, LinkError> {
        let master_key = base64::engine::general_purpose::STANDARD
            .decode(master_key_b64)
            .map_err(|e| LinkError::Crypto(format!("Invalid MASTER_KEY base64: {e}")))?;

        if master_key.len() != 32 {
            return Err(LinkError::Crypto(format!(
                "MASTER_KEY must be 32 bytes, got {}",
                master_key.len()
            )));
        }

        let hmac_key = base64::engine::general_purpose::STANDARD
            .decode(hmac_secret_b64)
            .map_err(|e| LinkError::Crypto(format!("Invalid SESSION_SECRET base64: {e}")))?;

        let cipher = Aes256Gcm::new_from_slice(&master_key)
            .map_err(|e| LinkError::Crypto(format!("Failed to init AES cipher: {e}")))?;
        let signer = <HmacSha256 as Mac>::new_from_slice(&hmac_key)
            .map_err(|e| LinkError::Crypto(format!("Failed to init HMAC: {e}")))?;

        Ok(Self { cipher, signer })
    }

    /// Encrypt plaintext using AES-256-GCM. Returns base64(nonce || ciphertext).
    pub fn encrypt(&self, plaintext: &str) -> Result<String, LinkError> {
        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| LinkError::Crypto(format!("Encryption failed: {e}")))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend_from_slice(&ciphertext);

        Ok(base64::engine::general_purpose::STANDARD.encode(&combined))
    }

    /// Decrypt base64(nonce || ciphertext) back to plaintext.
    pub fn decrypt(&self, encrypted_b64: &str) -> Result<String, LinkError> {
        let combined = base64::engine::general_purpose::STANDARD
            .decode(encrypted_b64)
            .map_err(|e| LinkError::Crypto(format!("Invalid base64: {e}")))?;

        if combined.len() < 12 {
            return Err(LinkError::Crypto("Ciphertext too short".into()));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| LinkError::Crypto(format!("Decryption failed: {e}")))?;

        String::from_utf8(plaintext)
            .map_err(|e| LinkError::Crypto(format!("Invalid UTF-8 after decrypt: {e}")))
    }

    /// Session cookie value: `<payload>.<base64url hmac>`.
    pub fn sign_session(&self, payload: &str) -> String {
        let mut mac = self.signer.clone();
        mac.update(payload.as_bytes());
        let tag = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        format!("{payload}.{tag}")
    }

    /// Payload of a session cookie value, or `None` if the tag does not match.
    pub fn open_session<'a>(&self, value: &'a str) -> Option<&'a str> {
        let (payload, tag) = value.rsplit_once('.')?;
        let tag = URL_SAFE_NO_PAD.decode(tag).ok()?;

        let mut mac = self.signer.clone();
        mac.update(payload.as_bytes());
        mac.verify_slice(&tag).ok()?;
        Some(payload)
    }
}

/// 32 random bytes, base64url. Used for single-use OAuth state tokens.
pub fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
