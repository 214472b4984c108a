//! AES-128-CBC payload cipher with PKCS#7 padding.
//!
//! Encrypts the two sensitive files of a profile archive (the keychain and
//! the account metadata).
//!
//! # IV convention
//!
//! Archives are written with no explicit IV, which the platform transform
//! treats as sixteen zero bytes. [`ZERO_IV`] reproduces that. With a
//! deterministic key this means identical plaintexts produce identical
//! ciphertexts; confidentiality rests on the archive password alone.

use aes::Aes128;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use zeroize::Zeroize;

use crate::error::CipherError;
use crate::memory::SecretBuffer;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// AES-128 key length in bytes.
pub const KEY_LEN: usize = 16;

/// AES block length in bytes.
pub const BLOCK_LEN: usize = 16;

/// Initialization vector used for every payload.
pub const ZERO_IV: [u8; BLOCK_LEN] = [0u8; BLOCK_LEN];

/// Encrypt `plaintext` under `key`.
///
/// The output is always a non-empty multiple of [`BLOCK_LEN`].
///
/// # Errors
///
/// Returns [`CipherError::BadKey`] if `key` is not exactly 16 bytes.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>, CipherError> {
    let encryptor = Aes128CbcEnc::new_from_slices(key, &ZERO_IV).map_err(|_| bad_key(key))?;
    Ok(encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

/// Decrypt `ciphertext` under `key` and strip the padding.
///
/// # Errors
///
/// - [`CipherError::BadKey`] if `key` is not exactly 16 bytes
/// - [`CipherError::BadPadding`] if the ciphertext is empty, not block
///   aligned, or its last block does not unpad (typically a wrong password)
pub fn decrypt(ciphertext: &[u8], key: &[u8]) -> Result<SecretBuffer, CipherError> {
    let decryptor = Aes128CbcDec::new_from_slices(key, &ZERO_IV).map_err(|_| bad_key(key))?;

    if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
        return Err(CipherError::BadPadding);
    }

    let mut plaintext = decryptor
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CipherError::BadPadding)?;
    let result = SecretBuffer::new(&plaintext);
    plaintext.zeroize();
    Ok(result)
}

const fn bad_key(key: &[u8]) -> CipherError {
    CipherError::BadKey {
        actual: key.len(),
        expected: KEY_LEN,
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
