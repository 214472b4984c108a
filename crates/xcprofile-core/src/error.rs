//! Error types for `xcprofile-core`.
//!
//! Structural failures (unpack, key derivation, payload decryption, store
//! enumeration, a record without a decrypt ACL) are fatal and surface as
//! [`ProfileError`]. Per-item failures inside best-effort loops are logged
//! by the caller and never reach this type.

use std::path::PathBuf;

use thiserror::Error;
use xcprofile_crypto::{CipherError, KeyDerivationError};

/// Errors produced by profile operations.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// The input path does not follow the `.developerprofile` naming convention.
    #[error("not a developer profile archive: {0}")]
    NotAnArchive(PathBuf),

    /// The archive could not be extracted.
    #[error("failed to unpack profile: {0}")]
    UnpackFailed(String),

    /// The working tree could not be packed back into an archive.
    #[error("failed to pack profile: {0}")]
    PackFailed(String),

    /// A payload expected at a fixed path inside the archive is absent.
    #[error("profile payload missing: {0}")]
    MissingPayload(PathBuf),

    /// The operation exists in the interface but has no implementation.
    #[error("{0} is not implemented")]
    NotImplemented(&'static str),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error(transparent)]
    KeyDerivation(#[from] KeyDerivationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Accounts(#[from] AccountImportError),

    /// I/O error from the filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced by a credential store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store file is missing or not a store.
    #[error("cannot open keychain {path}: {reason}")]
    CannotOpen {
        /// Location that was opened.
        path: PathBuf,
        /// Underlying cause.
        reason: String,
    },

    /// The password did not unlock the store.
    #[error("cannot unlock keychain: {0}")]
    CannotUnlock(String),

    /// Secret items could not be listed or decoded.
    #[error("keychain enumeration failed: {0}")]
    EnumerationFailed(String),

    /// A record carries no access-control entry for the decrypt authorization.
    #[error("no access control entry for decrypt on record {record}")]
    NoMatchingAccessEntry {
        /// Store-assigned identifier of the offending record.
        record: String,
    },

    /// The operation needs an unlocked store.
    #[error("keychain is locked")]
    Locked,

    /// An equivalent item already exists in the destination.
    #[error("duplicate keychain item: {0}")]
    DuplicateItem(String),

    /// No record with the given identifier.
    #[error("keychain record not found: {0}")]
    RecordNotFound(String),

    /// An identity container could not be decoded with the given passphrase.
    #[error("invalid identity container: {0}")]
    InvalidIdentity(String),

    /// Persisting the store failed.
    #[error("failed to write keychain: {0}")]
    Write(String),
}

/// Errors produced while merging account settings.
#[derive(Debug, Error)]
pub enum AccountImportError {
    /// The bundle's account metadata carries a version other than the one
    /// supported.
    #[error("unsupported account metadata version: {}", .0.as_deref().unwrap_or("<missing>"))]
    UnsupportedVersion(Option<String>),

    /// The metadata has no `DeveloperAccounts.accounts` list.
    #[error("account metadata has no account list")]
    MissingAccounts,

    /// The bundle's account metadata is not a readable property list.
    #[error("cannot read account metadata: {0}")]
    MetadataUnreadable(String),

    /// The destination registry exists but cannot be parsed.
    #[error("cannot read account registry: {0}")]
    RegistryUnreadable(String),

    /// The destination registry could not be written.
    #[error("cannot write account registry: {0}")]
    RegistryWrite(String),
}
