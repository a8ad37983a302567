//! # Cryptographic Primitives
//!
//! Two pieces, both dictated by the gateway:
//!
//! - **keys**: the merchant secret and triple-DES derivation of the
//!   per-order pepper.
//! - **signatures**: HMAC-SHA256 over the parameter blob, and the
//!   normalized constant-time comparison used on inbound signatures.
//!
//! Nothing here is novel. Everything is a thin wrapper over RustCrypto
//! implementations, and the output must stay bit-exact with the gateway.

pub mod keys;
pub mod signatures;

pub use keys::{derive_pepper, Pepper, SharedSecret};
pub use signatures::{sign, sign_to_base64, signatures_match, verify};
