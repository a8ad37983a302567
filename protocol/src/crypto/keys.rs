//! # Key Material & Per-Order Key Derivation
//!
//! The merchant secret never signs anything directly. For every order the
//! gateway derives a fresh key, the *pepper*, by encrypting the order
//! number with triple DES:
//!
//! - CBC mode, all-zero IV.
//! - Plaintext zero-padded to the next 8-byte boundary. Input that is
//!   already a multiple of 8 gets no extra block.
//! - 24-byte secrets run EDE3, 16-byte secrets run EDE2 (K1 reused as K3).
//!
//! The result is whatever the ciphertext is. It is used as raw HMAC key
//! bytes, never printed. Both `Debug` impls here redact.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockEncryptMut, KeyIvInit};
use des::{TdesEde2, TdesEde3};
use serde::{Deserialize, Serialize};

use crate::error::RedsysError;

/// Triple-DES block size. Also the IV length.
pub const DES_BLOCK_SIZE: usize = 8;

/// Two-key triple DES.
pub const TDES_EDE2_KEY_LENGTH: usize = 16;

/// Three-key triple DES. What the merchant module normally hands out.
pub const TDES_EDE3_KEY_LENGTH: usize = 24;

type TdesEde3CbcEnc = cbc::Encryptor<TdesEde3>;
type TdesEde2CbcEnc = cbc::Encryptor<TdesEde2>;

// ---------------------------------------------------------------------------
// SharedSecret
// ---------------------------------------------------------------------------

/// The merchant's base64 secret, as issued by the bank.
///
/// Stored in its textual form so configuration round-trips unchanged.
/// Decoding and length checks happen in [`SharedSecret::key_bytes`].
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SharedSecret(String);

impl SharedSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// True when no secret has been configured.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Decode to raw triple-DES key bytes.
    ///
    /// # Errors
    ///
    /// [`RedsysError::InvalidKeyMaterial`] if the text is not standard
    /// base64 or does not decode to 16 or 24 bytes.
    pub fn key_bytes(&self) -> Result<Vec<u8>, RedsysError> {
        let bytes = STANDARD
            .decode(self.0.trim())
            .map_err(|e| RedsysError::InvalidKeyMaterial(format!("secret is not base64: {}", e)))?;

        match bytes.len() {
            TDES_EDE2_KEY_LENGTH | TDES_EDE3_KEY_LENGTH => Ok(bytes),
            n => Err(RedsysError::InvalidKeyMaterial(format!(
                "secret decodes to {} bytes, expected {} or {}",
                n, TDES_EDE2_KEY_LENGTH, TDES_EDE3_KEY_LENGTH
            ))),
        }
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecret(<redacted>)")
    }
}

// ---------------------------------------------------------------------------
// Pepper
// ---------------------------------------------------------------------------

/// Per-order HMAC key. Valid for exactly one order number.
#[derive(Clone, PartialEq, Eq)]
pub struct Pepper(Vec<u8>);

impl Pepper {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Pepper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pepper({} bytes, <redacted>)", self.0.len())
    }
}

/// Derive the per-order key for `order` under `secret`.
///
/// Deterministic: same inputs, same pepper, on our side and on the
/// gateway's. Output length is the zero-padded input length, a multiple
/// of 8.
///
/// # Errors
///
/// [`RedsysError::InvalidKeyMaterial`] when the secret is unusable.
pub fn derive_pepper(order: &str, secret: &SharedSecret) -> Result<Pepper, RedsysError> {
    let key = secret.key_bytes()?;
    let iv = [0u8; DES_BLOCK_SIZE];

    let mut buffer = order.as_bytes().to_vec();
    let remainder = buffer.len() % DES_BLOCK_SIZE;
    if remainder != 0 {
        buffer.resize(buffer.len() + DES_BLOCK_SIZE - remainder, 0);
    }
    let len = buffer.len();

    let encrypted_len = match key.len() {
        TDES_EDE3_KEY_LENGTH => TdesEde3CbcEnc::new_from_slices(&key, &iv)
            .map_err(|e| RedsysError::InvalidKeyMaterial(e.to_string()))?
            .encrypt_padded_mut::<NoPadding>(&mut buffer, len)
            .map_err(|_| RedsysError::InvalidKeyMaterial("block encryption failed".to_string()))?
            .len(),
        _ => TdesEde2CbcEnc::new_from_slices(&key, &iv)
            .map_err(|e| RedsysError::InvalidKeyMaterial(e.to_string()))?
            .encrypt_padded_mut::<NoPadding>(&mut buffer, len)
            .map_err(|_| RedsysError::InvalidKeyMaterial("block encryption failed".to_string()))?
            .len(),
    };
    buffer.truncate(encrypted_len);

    Ok(Pepper(buffer))
}
