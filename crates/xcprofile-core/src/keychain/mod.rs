//! Credential store capability.
//!
//! The pipeline never talks to a platform keychain directly. It opens stores
//! through a [`KeychainBackend`] and manipulates them through the
//! object-safe [`Keychain`] trait:
//!
//! - [`FileKeychain`]: portable on-disk store (JSON document, secrets sealed
//!   with AES-256-GCM)
//! - [`MemoryKeychain`]: in-memory store for tests and dry runs
//!
//! Access control is modelled after keychain ACLs: an [`AccessPolicy`] is an
//! ordered list of `(authorization, trusted applications)` pairs.

pub mod file;
pub mod identity;
pub mod memory;

use std::fmt;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::StoreError;

pub use file::{FileKeychain, FileKeychainBackend};
pub use identity::Identity;
pub use memory::MemoryKeychain;

/// Tools allowed to use imported signing material.
pub const CODESIGNING_APPLICATIONS: [&str; 4] = [
    "/usr/bin/codesign",
    "/usr/bin/security",
    "/usr/bin/productbuild",
    "/usr/bin/xcodebuild",
];

// ---------------------------------------------------------------------------
// Access control
// ---------------------------------------------------------------------------

/// An operation an access-control entry governs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Authorization {
    #[serde(rename = "ACLAuthorizationDecrypt")]
    Decrypt,
    #[serde(rename = "ACLAuthorizationDerive")]
    Derive,
    #[serde(rename = "ACLAuthorizationExportClear")]
    ExportClear,
    #[serde(rename = "ACLAuthorizationExportWrapped")]
    ExportWrapped,
    #[serde(rename = "ACLAuthorizationMAC")]
    Mac,
    #[serde(rename = "ACLAuthorizationSign")]
    Sign,
    #[serde(rename = "ACLAuthorizationEncrypt")]
    Encrypt,
    #[serde(rename = "ACLAuthorizationChangeACL")]
    ChangeAcl,
}

impl Authorization {
    /// Authorizations scoped to the trusted tools on imported items.
    pub const RESTRICTED: [Self; 6] = [
        Self::Decrypt,
        Self::Derive,
        Self::ExportClear,
        Self::ExportWrapped,
        Self::Mac,
        Self::Sign,
    ];
}

/// Which callers may exercise an authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "paths", rename_all = "camelCase")]
pub enum ApplicationList {
    /// No restriction: any application.
    Any,
    /// Only the listed executables. An empty list means nobody without a prompt.
    Trusted(Vec<PathBuf>),
}

/// One `(authorization, applications)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEntry {
    pub authorization: Authorization,
    pub applications: ApplicationList,
}

/// Ordered access-control list attached to a keychain item.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub description: String,
    pub entries: Vec<AccessEntry>,
}

impl AccessPolicy {
    /// Every [`Authorization::RESTRICTED`] operation limited to `applications`;
    /// encrypt stays open to anyone.
    #[must_use]
    pub fn restricted_to(description: &str, applications: &[PathBuf]) -> Self {
        let mut entries: Vec<AccessEntry> = Authorization::RESTRICTED
            .iter()
            .map(|&authorization| AccessEntry {
                authorization,
                applications: ApplicationList::Trusted(applications.to_vec()),
            })
            .collect();
        entries.push(AccessEntry {
            authorization: Authorization::Encrypt,
            applications: ApplicationList::Any,
        });
        Self {
            description: description.to_string(),
            entries,
        }
    }

    /// Policy applied to imported signing material.
    #[must_use]
    pub fn codesigning() -> Self {
        let apps: Vec<PathBuf> = CODESIGNING_APPLICATIONS.iter().map(PathBuf::from).collect();
        Self::restricted_to("Identity", &apps)
    }

    /// Policy with every authorization open. Used for items created by tools
    /// that do not set one.
    #[must_use]
    pub fn unrestricted(description: &str) -> Self {
        Self {
            description: description.to_string(),
            entries: Authorization::RESTRICTED
                .iter()
                .chain(std::iter::once(&Authorization::Encrypt))
                .map(|&authorization| AccessEntry {
                    authorization,
                    applications: ApplicationList::Any,
                })
                .collect(),
        }
    }

    /// First entry governing `authorization`.
    #[must_use]
    pub fn entry(&self, authorization: Authorization) -> Option<&AccessEntry> {
        self.entries
            .iter()
            .find(|e| e.authorization == authorization)
    }

    /// Clear the application list of the first entry for `authorization`,
    /// leaving every other entry as it was. Returns `false` when the policy
    /// has no such entry.
    pub fn unrestrict(&mut self, authorization: Authorization) -> bool {
        self.entries
            .iter_mut()
            .find(|e| e.authorization == authorization)
            .map(|e| e.applications = ApplicationList::Any)
            .is_some()
    }
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

/// Store-assigned identifier of a keychain item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A generic-password item: service + account + secret bytes.
#[derive(Clone)]
pub struct CredentialRecord {
    pub id: RecordId,
    pub service: String,
    pub account: String,
    pub label: Option<String>,
    pub secret: Zeroizing<Vec<u8>>,
    pub access: AccessPolicy,
}

impl CredentialRecord {
    /// Uniqueness key inside a store.
    #[must_use]
    pub fn item_key(&self) -> (&str, &str) {
        (&self.service, &self.account)
    }
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("id", &self.id)
            .field("service", &self.service)
            .field("account", &self.account)
            .field("label", &self.label)
            .field("secret", &"***")
            .field("access", &self.access)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// An opened credential store.
pub trait Keychain {
    /// Unlock with `password`. Unlocking an unlocked store re-verifies.
    ///
    /// # Errors
    ///
    /// [`StoreError::CannotUnlock`] on a wrong password.
    fn unlock(&mut self, password: &SecretString) -> Result<(), StoreError>;

    /// Every generic-password item, secrets included.
    ///
    /// # Errors
    ///
    /// [`StoreError::Locked`] or [`StoreError::EnumerationFailed`].
    fn secret_records(&self) -> Result<Vec<CredentialRecord>, StoreError>;

    /// Store a copy of `record` protected by `access`.
    ///
    /// # Errors
    ///
    /// [`StoreError::DuplicateItem`] when an item with the same service and
    /// account exists; write failures otherwise.
    fn add_record(
        &mut self,
        record: &CredentialRecord,
        access: &AccessPolicy,
    ) -> Result<RecordId, StoreError>;

    /// Decode a PKCS#12 container with `passphrase` and store its identity.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidIdentity`] for an undecodable container,
    /// [`StoreError::DuplicateItem`] if the certificate is already present.
    fn import_identity(
        &mut self,
        container: &[u8],
        passphrase: &SecretString,
        access: &AccessPolicy,
    ) -> Result<RecordId, StoreError>;

    /// Identities currently held.
    ///
    /// # Errors
    ///
    /// [`StoreError::Locked`] or [`StoreError::EnumerationFailed`].
    fn identities(&self) -> Result<Vec<Identity>, StoreError>;

    /// Current access policy of a record.
    ///
    /// # Errors
    ///
    /// [`StoreError::RecordNotFound`].
    fn access_policy(&self, id: &RecordId) -> Result<AccessPolicy, StoreError>;

    /// Replace the access policy of a record.
    ///
    /// # Errors
    ///
    /// [`StoreError::RecordNotFound`] or a write failure.
    fn set_access_policy(&mut self, id: &RecordId, access: AccessPolicy)
        -> Result<(), StoreError>;
}

/// Opens stores by path.
pub trait KeychainBackend {
    /// # Errors
    ///
    /// [`StoreError::CannotOpen`] when `path` is not a readable store.
    fn open(&self, path: &Path) -> Result<Box<dyn Keychain>, StoreError>;
}
