//! PBKDF2-HMAC-SHA256 key derivation.
//!
//! - [`derive_profile_key`]: the profile archive key. Salt is the password
//!   itself and the iteration count is fixed, so a given password always maps
//!   to the same 128-bit key. Existing `.developerprofile` archives depend on
//!   these exact parameters; changing any of them breaks every archive.
//! - [`pbkdf2_sha256`]: general form with a caller-provided salt, used for
//!   keychain files written by this tool.

use crate::error::KeyDerivationError;
use crate::memory::SecretBytes;
use zeroize::Zeroize;

/// Iteration count of the profile archive key.
pub const PROFILE_KDF_ITERATIONS: u32 = 33_333;

/// Profile archive key length in bytes (AES-128).
pub const PROFILE_KEY_LEN: usize = 16;

/// Key protecting the two encrypted payloads of a profile archive.
pub type DerivedKey = SecretBytes<PROFILE_KEY_LEN>;

/// Derive the archive key for `password`.
///
/// # Errors
///
/// Returns [`KeyDerivationError::EmptyPassword`] for `""`. Every non-empty
/// string succeeds.
pub fn derive_profile_key(password: &str) -> Result<DerivedKey, KeyDerivationError> {
    if password.is_empty() {
        return Err(KeyDerivationError::EmptyPassword);
    }
    let bytes = password.as_bytes();
    pbkdf2_sha256(bytes, bytes, PROFILE_KDF_ITERATIONS)
}

/// Derive `N` bytes with PBKDF2-HMAC-SHA256.
///
/// # Errors
///
/// Returns [`KeyDerivationError::InvalidParams`] when `iterations` is zero.
pub fn pbkdf2_sha256<const N: usize>(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
) -> Result<SecretBytes<N>, KeyDerivationError> {
    if iterations == 0 {
        return Err(KeyDerivationError::InvalidParams(
            "iteration count must be at least 1".into(),
        ));
    }

    let mut output = [0u8; N];
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(password, salt, iterations, &mut output);
    let key = SecretBytes::new(output);
    output.zeroize();
    Ok(key)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_key_is_128_bits() {
        let key = derive_profile_key("password").expect("derive should succeed");
        assert_eq!(key.expose().len(), 16);
    }

    #[test]
    fn profile_key_matches_reference_vector() {
        // PBKDF2-HMAC-SHA256(P = S = "password", c = 33333, dkLen = 16)
        let key = derive_profile_key("password").expect("derive should succeed");
        assert_eq!(
            key.expose(),
            &[
                0x52, 0x49, 0xe2, 0x2e, 0x80, 0x9f, 0x69, 0x87, 0x39, 0xf5, 0x12, 0xee, 0xe2,
                0xf9, 0x9c, 0x14
            ]
        );
    }

    #[test]
    fn profile_key_is_deterministic() {
        let a = derive_profile_key("s3cret").expect("derive should succeed");
        let b = derive_profile_key("s3cret").expect("derive should succeed");
        assert_eq!(a.expose(), b.expose());
    }

    #[test]
    fn different_passwords_different_keys() {
        let a = derive_profile_key("alpha").expect("derive should succeed");
        let b = derive_profile_key("bravo").expect("derive should succeed");
        assert_ne!(a.expose(), b.expose());
    }

    #[test]
    fn empty_password_is_rejected() {
        let err = derive_profile_key("").expect_err("empty password must fail");
        assert_eq!(err, KeyDerivationError::EmptyPassword);
    }

    #[test]
    fn zero_iterations_rejected() {
        let err = pbkdf2_sha256::<32>(b"pw", b"salt", 0).expect_err("should fail");
        assert!(matches!(err, KeyDerivationError::InvalidParams(_)));
    }

    #[test]
    fn general_form_agrees_with_profile_key() {
        let general = pbkdf2_sha256::<16>(b"password", b"password", PROFILE_KDF_ITERATIONS)
            .expect("derive should succeed");
        let profile = derive_profile_key("password").expect("derive should succeed");
        assert_eq!(general.expose(), profile.expose());
    }
}
