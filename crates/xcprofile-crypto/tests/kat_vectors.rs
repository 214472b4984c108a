#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

//! Known-answer vectors for archive compatibility.
//!
//! Reference values were produced with an independent PBKDF2 / AES-CBC
//! implementation using the archive parameters: PBKDF2-HMAC-SHA256, salt =
//! password, 33 333 iterations, 16-byte key, AES-128-CBC, zero IV, PKCS#7.

use data_encoding::HEXLOWER;
use xcprofile_crypto::cipher::{decrypt, encrypt};
use xcprofile_crypto::derive_profile_key;

#[test]
fn profile_key_vectors() {
    let cases = [
        ("password", "5249e22e809f698739f512eee2f99c14"),
        ("correct horse", "2b7479220c1ed90dc86b99a2b8368485"),
    ];
    for (password, expected) in cases {
        let key = derive_profile_key(password).unwrap();
        assert_eq!(HEXLOWER.encode(key.expose()), expected, "password {password:?}");
    }
}

#[test]
fn payload_ciphertext_vector() {
    let key = derive_profile_key("password").unwrap();
    let ct = encrypt(b"developer profile payload", key.expose()).unwrap();
    assert_eq!(
        HEXLOWER.encode(&ct),
        "5a543017694ed546583c522de11cf4e4d7ca9b2e5be318240eb07ddb9afbf1fe"
    );
}

#[test]
fn empty_payload_vector() {
    let key = derive_profile_key("password").unwrap();
    let ct = encrypt(b"", key.expose()).unwrap();
    assert_eq!(HEXLOWER.encode(&ct), "a79912e4c1002396caf50af475d579c2");
}

#[test]
fn decrypts_reference_ciphertext() {
    let key = derive_profile_key("password").unwrap();
    let ct = HEXLOWER
        .decode(b"5a543017694ed546583c522de11cf4e4d7ca9b2e5be318240eb07ddb9afbf1fe")
        .unwrap();
    let pt = decrypt(&ct, key.expose()).unwrap();
    assert_eq!(pt.expose(), b"developer profile payload");
}
