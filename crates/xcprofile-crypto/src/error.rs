//! Cryptographic error types for `xcprofile-crypto`.

use thiserror::Error;

/// Errors produced by the payload cipher and the at-rest sealer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    /// Key length does not match what the algorithm requires.
    #[error("invalid key length: {actual} bytes (expected {expected})")]
    BadKey {
        /// Length of the key that was supplied.
        actual: usize,
        /// Length the algorithm requires.
        expected: usize,
    },

    /// Ciphertext is not block aligned or its final block does not unpad
    /// to a valid length. Also the usual symptom of a wrong password.
    #[error("invalid padding: ciphertext does not unpad to a valid length")]
    BadPadding,

    /// Sealed data is shorter than nonce + tag.
    #[error("sealed data too short: {0} bytes")]
    Truncated(usize),

    /// AEAD tag verification failed: tampered data or wrong key.
    #[error("authenticated decryption failed: tag mismatch")]
    Authentication,

    /// The backend refused to encrypt (should not happen with valid keys).
    #[error("encryption failed: {0}")]
    Encryption(String),
}

/// Errors produced while turning a password into key material.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyDerivationError {
    /// The password has no bytes; it cannot double as its own salt.
    #[error("password is empty")]
    EmptyPassword,

    /// Derivation parameters are unusable (e.g. zero iterations).
    #[error("invalid derivation parameters: {0}")]
    InvalidParams(String),
}
