//! # Envelope Signatures
//!
//! HMAC-SHA256, keyed with the per-order pepper, over the *base64 text* of
//! the merchant parameters. Not over the JSON. Not over the decoded bytes.
//! Over the exact ASCII string that travels in `Ds_MerchantParameters`.
//!
//! Signatures are carried as standard base64 (with `+`, `/`, `=`). The
//! gateway sometimes echoes them back URL-safe or with padding mangled, so
//! comparison first strips everything that is not an ASCII letter or digit
//! and then compares in constant time.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::keys::{derive_pepper, Pepper, SharedSecret};
use crate::error::RedsysError;

type HmacSha256 = Hmac<Sha256>;

/// Raw HMAC-SHA256 of `payload` keyed with an already-derived pepper.
pub fn hmac_with_pepper(pepper: &Pepper, payload: &str) -> Result<Vec<u8>, RedsysError> {
    let mut mac = HmacSha256::new_from_slice(pepper.as_bytes())
        .map_err(|e| RedsysError::InvalidKeyMaterial(e.to_string()))?;
    mac.update(payload.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Sign `payload` for `order`. Returns the 32 raw MAC bytes.
///
/// ```
/// use redsys_protocol::crypto::{sign, SharedSecret};
///
/// let secret = SharedSecret::new("sq7HjrUOBfKmC576ILgskD5srU870gJ7");
/// let mac = sign("1446068581", "eyJBIjoiQiJ9", &secret).unwrap();
/// assert_eq!(mac.len(), 32);
/// ```
pub fn sign(order: &str, payload: &str, secret: &SharedSecret) -> Result<Vec<u8>, RedsysError> {
    let pepper = derive_pepper(order, secret)?;
    hmac_with_pepper(&pepper, payload)
}

/// [`sign`], then standard base64. This is what goes in `Ds_Signature`.
pub fn sign_to_base64(
    order: &str,
    payload: &str,
    secret: &SharedSecret,
) -> Result<String, RedsysError> {
    sign(order, payload, secret).map(|mac| STANDARD.encode(mac))
}

/// Recompute the signature for `order`/`payload` and compare it with
/// `claimed`.
///
/// # Errors
///
/// - [`RedsysError::SignatureMismatch`] if they differ.
/// - [`RedsysError::InvalidKeyMaterial`] if the secret is unusable.
pub fn verify(
    order: &str,
    payload: &str,
    secret: &SharedSecret,
    claimed: &str,
) -> Result<(), RedsysError> {
    let expected = sign_to_base64(order, payload, secret)?;
    if signatures_match(&expected, claimed) {
        Ok(())
    } else {
        Err(RedsysError::SignatureMismatch)
    }
}

/// Compare two textual signatures after dropping every character that is
/// not ASCII alphanumeric.
///
/// Standard and URL-safe renderings of the same MAC compare equal, as do
/// padded and unpadded ones. The byte comparison is constant time; only
/// the normalized lengths can leak.
pub fn signatures_match(a: &str, b: &str) -> bool {
    let a = normalize(a);
    let b = normalize(b);
    if a.is_empty() || a.len() != b.len() {
        return false;
    }
    a.as_slice().ct_eq(b.as_slice()).into()
}

fn normalize(signature: &str) -> Vec<u8> {
    signature
        .bytes()
        .filter(|b| b.is_ascii_alphanumeric())
        .collect()
}
