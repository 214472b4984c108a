//! AES-256-GCM sealing for secrets kept at rest by the file keychain.
//!
//! Wire format: `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
//! A fresh nonce is drawn from `OsRng` for every call to [`seal`].

use rand::rngs::OsRng;
use rand::RngCore;
use ring::aead;
use zeroize::Zeroize;

use crate::error::CipherError;
use crate::memory::SecretBuffer;

/// AES-256-GCM key length in bytes.
pub const KEY_LEN: usize = 32;

/// Nonce length in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// Tag length in bytes (128 bits).
pub const TAG_LEN: usize = 16;

fn less_safe_key(key: &[u8]) -> Result<aead::LessSafeKey, CipherError> {
    if key.len() != KEY_LEN {
        return Err(CipherError::BadKey {
            actual: key.len(),
            expected: KEY_LEN,
        });
    }
    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, key)
        .map_err(|_| CipherError::Encryption("failed to create AES-256-GCM key".into()))?;
    Ok(aead::LessSafeKey::new(unbound))
}

/// Seal `plaintext`, binding `aad` into the tag.
///
/// # Errors
///
/// [`CipherError::BadKey`] for a key that is not 32 bytes.
pub fn seal(plaintext: &[u8], key: &[u8], aad: &[u8]) -> Result<Vec<u8>, CipherError> {
    let key = less_safe_key(key)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = plaintext.to_vec();
    let Ok(tag) = key.seal_in_place_separate_tag(nonce, aead::Aad::from(aad), &mut in_out) else {
        in_out.zeroize();
        return Err(CipherError::Encryption("AES-256-GCM seal failed".into()));
    };

    let mut out = Vec::with_capacity(
        NONCE_LEN
            .saturating_add(in_out.len())
            .saturating_add(TAG_LEN),
    );
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&in_out);
    out.extend_from_slice(tag.as_ref());
    Ok(out)
}

/// Open data produced by [`seal`] with the same key and `aad`.
///
/// # Errors
///
/// - [`CipherError::BadKey`] for a key that is not 32 bytes
/// - [`CipherError::Truncated`] if `sealed` cannot hold a nonce and a tag
/// - [`CipherError::Authentication`] on any tag mismatch
pub fn open(sealed: &[u8], key: &[u8], aad: &[u8]) -> Result<SecretBuffer, CipherError> {
    let key = less_safe_key(key)?;

    if sealed.len() < NONCE_LEN.saturating_add(TAG_LEN) {
        return Err(CipherError::Truncated(sealed.len()));
    }
    let (nonce_bytes, ct_tag) = sealed.split_at(NONCE_LEN);
    let nonce = aead::Nonce::try_assume_unique_for_key(nonce_bytes)
        .map_err(|_| CipherError::Truncated(sealed.len()))?;

    let mut buffer = ct_tag.to_vec();
    let result = key
        .open_in_place(nonce, aead::Aad::from(aad), &mut buffer)
        .map(|plaintext| SecretBuffer::new(plaintext))
        .map_err(|_| CipherError::Authentication);
    buffer.zeroize();
    result
}
