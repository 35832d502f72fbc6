//! Column Sealing
//!
//! AES-256-GCM for payload columns (nonce || ciphertext, column name as
//! associated data) and HMAC-SHA256 for row seals and the audit chain.
//! The 32-byte store key is provisioned externally.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::logic::error::{PipelineError, PipelineResult};

type HmacSha256 = Hmac<Sha256>;

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const MAC_KEY_CONTEXT: &[u8] = b"oathkeeper.row-seal.v1";

// ============================================================================
// STORE KEY
// ============================================================================

/// Opaque provisioned secret
#[derive(Clone)]
pub struct StoreKey([u8; KEY_LEN]);

impl StoreKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a 64 character hex string
    pub fn from_hex(value: &str) -> PipelineResult<Self> {
        let raw = hex::decode(value.trim())
            .map_err(|e| PipelineError::Storage(format!("store key is not hex: {}", e)))?;
        let bytes: [u8; KEY_LEN] = raw.try_into().map_err(|v: Vec<u8>| {
            PipelineError::Storage(format!("store key must be {} bytes, got {}", KEY_LEN, v.len()))
        })?;
        Ok(Self(bytes))
    }

    /// Fresh random key (tests, first-run provisioning tools)
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl std::fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StoreKey(..)")
    }
}

// ============================================================================
// SEALER
// ============================================================================

pub struct Sealer {
    cipher: Aes256Gcm,
    /// Derived subkey, zero-padded to the SHA-256 block as HMAC does
    mac_key: hmac::digest::Key<HmacSha256>,
}

impl Sealer {
    pub fn new(key: &StoreKey) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));

        // Separate subkey so the MAC never reuses the cipher key directly
        let mut hasher = Sha256::new();
        hasher.update(MAC_KEY_CONTEXT);
        hasher.update(key.0);
        let mut mac_key = hmac::digest::Key::<HmacSha256>::default();
        mac_key[..32].copy_from_slice(&hasher.finalize());

        Self { cipher, mac_key }
    }

    /// Encrypt one column value
    pub fn seal(&self, column: &str, plaintext: &[u8]) -> PipelineResult<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self.cipher.encrypt(
            &nonce,
            Payload { msg: plaintext, aad: column.as_bytes() },
        )?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt one column value
    pub fn open(&self, column: &str, blob: &[u8]) -> PipelineResult<Vec<u8>> {
        if blob.len() < NONCE_LEN {
            return Err(PipelineError::Storage(format!("{}: sealed value truncated", column)));
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = self.cipher.decrypt(
            Nonce::from_slice(nonce),
            Payload { msg: ciphertext, aad: column.as_bytes() },
        )?;
        Ok(plaintext)
    }

    pub fn seal_str(&self, column: &str, value: &str) -> PipelineResult<Vec<u8>> {
        self.seal(column, value.as_bytes())
    }

    pub fn open_string(&self, column: &str, blob: &[u8]) -> PipelineResult<String> {
        String::from_utf8(self.open(column, blob)?)
            .map_err(|_| PipelineError::Storage(format!("{}: sealed value is not utf-8", column)))
    }

    pub fn seal_f32(&self, column: &str, value: f32) -> PipelineResult<Vec<u8>> {
        self.seal(column, &value.to_le_bytes())
    }

    pub fn open_f32(&self, column: &str, blob: &[u8]) -> PipelineResult<f32> {
        let bytes: [u8; 4] = self
            .open(column, blob)?
            .try_into()
            .map_err(|_| PipelineError::Storage(format!("{}: bad f32 width", column)))?;
        Ok(f32::from_le_bytes(bytes))
    }

    /// Hex HMAC over canonical bytes
    pub fn mac(&self, canonical: &[u8]) -> String {
        let mut mac = self.new_mac();
        mac.update(canonical);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of a hex HMAC
    pub fn verify_mac(&self, canonical: &[u8], expected_hex: &str) -> bool {
        let Ok(expected) = hex::decode(expected_hex) else {
            return false;
        };
        let mut mac = self.new_mac();
        mac.update(canonical);
        mac.verify_slice(&expected).is_ok()
    }

    fn new_mac(&self) -> HmacSha256 {
        <HmacSha256 as KeyInit>::new(&self.mac_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_string() {
        let sealer = Sealer::new(&StoreKey::generate());
        let blob = sealer.seal_str("label", "porn").unwrap();
        assert_ne!(&blob[NONCE_LEN..], b"porn");
        assert_eq!(sealer.open_string("label", &blob).unwrap(), "porn");
    }

    #[test]
    fn test_nonce_is_fresh() {
        let sealer = Sealer::new(&StoreKey::generate());
        let a = sealer.seal_str("notes", "same").unwrap();
        let b = sealer.seal_str("notes", "same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_column_binding() {
        let sealer = Sealer::new(&StoreKey::generate());
        let blob = sealer.seal_str("label", "sexy").unwrap();
        assert!(sealer.open("notes", &blob).is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let blob = Sealer::new(&StoreKey::generate()).seal_f32("confidence", 0.81).unwrap();
        let other = Sealer::new(&StoreKey::generate());
        assert!(matches!(other.open_f32("confidence", &blob), Err(PipelineError::Storage(_))));
    }

    #[test]
    fn test_f32_exact() {
        let sealer = Sealer::new(&StoreKey::generate());
        let blob = sealer.seal_f32("confidence", 0.81).unwrap();
        assert_eq!(sealer.open_f32("confidence", &blob).unwrap(), 0.81);
    }

    #[test]
    fn test_mac_verify() {
        let sealer = Sealer::new(&StoreKey::generate());
        let tag = sealer.mac(b"1|1000|porn");
        assert!(sealer.verify_mac(b"1|1000|porn", &tag));
        assert!(!sealer.verify_mac(b"1|1000|sexy", &tag));
        assert!(!sealer.verify_mac(b"1|1000|porn", "zz"));
    }

    #[test]
    fn test_block_key_matches_subkey_hmac() {
        let sealer = Sealer::new(&StoreKey::from_bytes([7u8; KEY_LEN]));
        let mut reference = <HmacSha256 as Mac>::new_from_slice(&sealer.mac_key[..32]).unwrap();
        reference.update(b"event|1");
        assert_eq!(sealer.mac(b"event|1"), hex::encode(reference.finalize().into_bytes()));
    }

    #[test]
    fn test_key_from_hex() {
        let hex_key = "00".repeat(KEY_LEN);
        assert!(StoreKey::from_hex(&hex_key).is_ok());
        assert!(StoreKey::from_hex("abcd").is_err());
        assert!(StoreKey::from_hex("not hex").is_err());
        assert_eq!(format!("{:?}", StoreKey::generate()), "StoreKey(..)");
    }
}
