//! Portable keychain file.
//!
//! A JSON document holding generic-password records and identities. Metadata
//! (service, account, access policies, certificates) is stored in the clear;
//! secret values and private keys are sealed with AES-256-GCM under a key
//! derived from the keychain password with PBKDF2-HMAC-SHA256 and a random
//! salt. Each sealed value binds its record id as associated data so blobs
//! cannot be swapped between records.
//!
//! Every mutation rewrites the file atomically with `0600` permissions.

use std::fs;
use std::path::{Path, PathBuf};

use data_encoding::HEXLOWER;
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use xcprofile_crypto::{pbkdf2_sha256, sealed, CipherError, SecretBytes};
use zeroize::Zeroizing;

use super::identity::{certificate_id, Identity};
use super::{AccessPolicy, CredentialRecord, Keychain, KeychainBackend, RecordId};
use crate::error::StoreError;
use crate::fsio;

/// Current document version.
pub const FORMAT_VERSION: u32 = 1;

/// PBKDF2 iterations for newly created keychains.
pub const DEFAULT_ITERATIONS: u32 = 210_000;

const SALT_LEN: usize = 16;
const VERIFIER_PLAINTEXT: &[u8] = b"xcprofile-keychain";
const VERIFIER_AAD: &[u8] = b"verifier";

type StoreKey = SecretBytes<{ sealed::KEY_LEN }>;

// ---------------------------------------------------------------------------
// On-disk document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KdfParams {
    salt: String,
    iterations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRecord {
    id: RecordId,
    service: String,
    account: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    secret: String,
    access: AccessPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredIdentity {
    id: RecordId,
    certificate: String,
    private_key: String,
    access: AccessPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeychainDocument {
    version: u32,
    kdf: KdfParams,
    verifier: String,
    #[serde(default)]
    records: Vec<StoredRecord>,
    #[serde(default)]
    identities: Vec<StoredIdentity>,
}

// ---------------------------------------------------------------------------
// FileKeychain
// ---------------------------------------------------------------------------

/// A keychain backed by a single JSON file.
pub struct FileKeychain {
    path: PathBuf,
    document: KeychainDocument,
    key: Option<StoreKey>,
}

impl std::fmt::Debug for FileKeychain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileKeychain")
            .field("path", &self.path)
            .field("records", &self.document.records.len())
            .field("identities", &self.document.identities.len())
            .field("unlocked", &self.key.is_some())
            .finish()
    }
}

impl FileKeychain {
    /// Create an empty keychain at `path`, replacing any file there. The
    /// returned handle is unlocked.
    ///
    /// # Errors
    ///
    /// [`StoreError::Write`] if the file cannot be written.
    pub fn create(path: &Path, password: &SecretString) -> Result<Self, StoreError> {
        Self::create_with_iterations(path, password, DEFAULT_ITERATIONS)
    }

    /// [`FileKeychain::create`] with an explicit PBKDF2 iteration count.
    ///
    /// # Errors
    ///
    /// [`StoreError::Write`] if the file cannot be written or `iterations`
    /// is zero.
    pub fn create_with_iterations(
        path: &Path,
        password: &SecretString,
        iterations: u32,
    ) -> Result<Self, StoreError> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);

        let key = derive_store_key(password, &salt, iterations)
            .map_err(|e| StoreError::Write(e.to_string()))?;
        let verifier = sealed::seal(VERIFIER_PLAINTEXT, key.expose(), VERIFIER_AAD)
            .map_err(|e| StoreError::Write(e.to_string()))?;

        let keychain = Self {
            path: path.to_path_buf(),
            document: KeychainDocument {
                version: FORMAT_VERSION,
                kdf: KdfParams {
                    salt: HEXLOWER.encode(&salt),
                    iterations,
                },
                verifier: HEXLOWER.encode(&verifier),
                records: Vec::new(),
                identities: Vec::new(),
            },
            key: Some(key),
        };
        keychain.persist()?;
        tracing::debug!(path = %path.display(), "created keychain");
        Ok(keychain)
    }

    /// Open an existing keychain. The handle starts locked.
    ///
    /// # Errors
    ///
    /// [`StoreError::CannotOpen`] if the file is missing, unreadable, or not
    /// a keychain document of a supported version.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let cannot_open = |reason: String| StoreError::CannotOpen {
            path: path.to_path_buf(),
            reason,
        };
        let bytes = fs::read(path).map_err(|e| cannot_open(e.to_string()))?;
        let document: KeychainDocument =
            serde_json::from_slice(&bytes).map_err(|e| cannot_open(e.to_string()))?;
        if document.version != FORMAT_VERSION {
            return Err(cannot_open(format!(
                "unsupported keychain version {}",
                document.version
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            document,
            key: None,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn is_unlocked(&self) -> bool {
        self.key.is_some()
    }

    fn key(&self) -> Result<&[u8], StoreError> {
        self.key
            .as_ref()
            .map(|k| k.expose().as_slice())
            .ok_or(StoreError::Locked)
    }

    fn persist(&self) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(&self.document)
            .map_err(|e| StoreError::Write(e.to_string()))?;
        fsio::write_atomic(&self.path, &json, true)
            .map_err(|e| StoreError::Write(format!("{}: {e}", self.path.display())))
    }

    fn seal_for(&self, id: &RecordId, plaintext: &[u8]) -> Result<String, StoreError> {
        let sealed = sealed::seal(plaintext, self.key()?, id.0.as_bytes())
            .map_err(|e| StoreError::Write(e.to_string()))?;
        Ok(HEXLOWER.encode(&sealed))
    }

    fn open_for(&self, id: &RecordId, hex: &str) -> Result<Zeroizing<Vec<u8>>, StoreError> {
        let key = self.key()?;
        let sealed = HEXLOWER
            .decode(hex.as_bytes())
            .map_err(|e| StoreError::EnumerationFailed(format!("record {id}: {e}")))?;
        let plain = sealed::open(&sealed, key, id.0.as_bytes())
            .map_err(|e| StoreError::EnumerationFailed(format!("record {id}: {e}")))?;
        Ok(Zeroizing::new(plain.expose().to_vec()))
    }

    fn policy_slot(&mut self, id: &RecordId) -> Option<&mut AccessPolicy> {
        if let Some(record) = self.document.records.iter_mut().find(|r| &r.id == id) {
            return Some(&mut record.access);
        }
        self.document
            .identities
            .iter_mut()
            .find(|i| &i.id == id)
            .map(|i| &mut i.access)
    }
}

fn derive_store_key(
    password: &SecretString,
    salt: &[u8],
    iterations: u32,
) -> Result<StoreKey, xcprofile_crypto::KeyDerivationError> {
    pbkdf2_sha256(password.expose_secret().as_bytes(), salt, iterations)
}

impl Keychain for FileKeychain {
    fn unlock(&mut self, password: &SecretString) -> Result<(), StoreError> {
        let salt = HEXLOWER
            .decode(self.document.kdf.salt.as_bytes())
            .map_err(|e| StoreError::CannotUnlock(format!("corrupt salt: {e}")))?;
        let verifier = HEXLOWER
            .decode(self.document.verifier.as_bytes())
            .map_err(|e| StoreError::CannotUnlock(format!("corrupt verifier: {e}")))?;

        let key = derive_store_key(password, &salt, self.document.kdf.iterations)
            .map_err(|e| StoreError::CannotUnlock(e.to_string()))?;
        match sealed::open(&verifier, key.expose(), VERIFIER_AAD) {
            Ok(plain) if plain.expose() == VERIFIER_PLAINTEXT => {
                self.key = Some(key);
                tracing::debug!(path = %self.path.display(), "keychain unlocked");
                Ok(())
            }
            Ok(_) | Err(CipherError::Authentication) => {
                Err(StoreError::CannotUnlock("incorrect password".into()))
            }
            Err(e) => Err(StoreError::CannotUnlock(e.to_string())),
        }
    }

    fn secret_records(&self) -> Result<Vec<CredentialRecord>, StoreError> {
        self.key()?;
        self.document
            .records
            .iter()
            .map(|stored| {
                Ok(CredentialRecord {
                    id: stored.id.clone(),
                    service: stored.service.clone(),
                    account: stored.account.clone(),
                    label: stored.label.clone(),
                    secret: self.open_for(&stored.id, &stored.secret)?,
                    access: stored.access.clone(),
                })
            })
            .collect()
    }

    fn add_record(
        &mut self,
        record: &CredentialRecord,
        access: &AccessPolicy,
    ) -> Result<RecordId, StoreError> {
        self.key()?;
        if self
            .document
            .records
            .iter()
            .any(|r| r.service == record.service && r.account == record.account)
        {
            return Err(StoreError::DuplicateItem(format!(
                "{}/{}",
                record.service, record.account
            )));
        }

        let id = RecordId(uuid::Uuid::new_v4().to_string());
        let secret = self.seal_for(&id, &record.secret)?;
        self.document.records.push(StoredRecord {
            id: id.clone(),
            service: record.service.clone(),
            account: record.account.clone(),
            label: record.label.clone(),
            secret,
            access: access.clone(),
        });
        if let Err(e) = self.persist() {
            self.document.records.pop();
            return Err(e);
        }
        Ok(id)
    }

    fn import_identity(
        &mut self,
        container: &[u8],
        passphrase: &SecretString,
        access: &AccessPolicy,
    ) -> Result<RecordId, StoreError> {
        self.key()?;
        let identity = Identity::from_pkcs12(container, passphrase, access.clone())?;
        if self.document.identities.iter().any(|i| i.id == identity.id) {
            return Err(StoreError::DuplicateItem(format!("identity {}", identity.id)));
        }

        let private_key = self.seal_for(&identity.id, &identity.private_key)?;
        self.document.identities.push(StoredIdentity {
            id: identity.id.clone(),
            certificate: HEXLOWER.encode(&identity.certificate),
            private_key,
            access: identity.access,
        });
        if let Err(e) = self.persist() {
            self.document.identities.pop();
            return Err(e);
        }
        Ok(identity.id)
    }

    fn identities(&self) -> Result<Vec<Identity>, StoreError> {
        self.key()?;
        self.document
            .identities
            .iter()
            .map(|stored| {
                let certificate = HEXLOWER
                    .decode(stored.certificate.as_bytes())
                    .map_err(|e| StoreError::EnumerationFailed(format!("identity {}: {e}", stored.id)))?;
                if certificate_id(&certificate) != stored.id {
                    return Err(StoreError::EnumerationFailed(format!(
                        "identity {} does not match its certificate",
                        stored.id
                    )));
                }
                Ok(Identity {
                    id: stored.id.clone(),
                    certificate,
                    private_key: self.open_for(&stored.id, &stored.private_key)?,
                    access: stored.access.clone(),
                })
            })
            .collect()
    }

    fn access_policy(&self, id: &RecordId) -> Result<AccessPolicy, StoreError> {
        self.document
            .records
            .iter()
            .find(|r| &r.id == id)
            .map(|r| &r.access)
            .or_else(|| {
                self.document
                    .identities
                    .iter()
                    .find(|i| &i.id == id)
                    .map(|i| &i.access)
            })
            .cloned()
            .ok_or_else(|| StoreError::RecordNotFound(id.to_string()))
    }

    fn set_access_policy(
        &mut self,
        id: &RecordId,
        access: AccessPolicy,
    ) -> Result<(), StoreError> {
        self.key()?;
        let slot = self
            .policy_slot(id)
            .ok_or_else(|| StoreError::RecordNotFound(id.to_string()))?;
        let previous = std::mem::replace(slot, access);
        let result = self.persist();
        if result.is_err() {
            if let Some(slot) = self.policy_slot(id) {
                *slot = previous;
            }
        }
        result
    }
}

/// Opens [`FileKeychain`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileKeychainBackend;

impl KeychainBackend for FileKeychainBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn Keychain>, StoreError> {
        Ok(Box::new(FileKeychain::open(path)?))
    }
}
