//! `xcprofile-core`: the developer profile pipeline.
//!
//! Decrypts `.developerprofile` archives, imports their credentials, signing
//! identities, account settings and provisioning profiles, and prepares them
//! for re-export. Archive format and credential store are reached through the
//! [`ProfileArchive`] and [`Keychain`] traits.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::arithmetic_side_effects))]

pub mod accounts;
pub mod archive;
pub mod error;
mod fsio;
pub mod keychain;
pub mod layout;
pub mod profile;
pub mod provisioning;
pub mod settings;
pub mod transfer;

pub use accounts::{AccountEntry, AccountRegistry, AccountSettingsMerge, XcodeDefaults};
pub use archive::{CompressionLevel, ProfileArchive, ZipProfileArchive};
pub use error::{AccountImportError, ProfileError, StoreError};
pub use keychain::{
    AccessPolicy, Authorization, CredentialRecord, FileKeychain, FileKeychainBackend, Keychain,
    KeychainBackend, MemoryKeychain, RecordId,
};
pub use profile::{DecryptedProfile, EncryptedProfile, ImportDestination, ImportReport, WorkingTree};
pub use settings::Settings;
pub use transfer::{CredentialTransfer, TransferSummary};
