//! `xcprofile-crypto`: primitives for encrypted developer profiles.
//!
//! No filesystem access and no logging: everything here is a pure function of
//! its inputs (plus `OsRng` for at-rest sealing).

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::arithmetic_side_effects))]

pub mod error;
pub mod memory;

pub mod kdf;

pub mod cipher;
pub mod sealed;

pub use error::{CipherError, KeyDerivationError};
pub use kdf::{derive_profile_key, pbkdf2_sha256, DerivedKey, PROFILE_KDF_ITERATIONS};
pub use memory::{disable_core_dumps, SecretBuffer, SecretBytes};
