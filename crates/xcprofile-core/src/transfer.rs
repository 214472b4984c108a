//! Moving credentials between keychains.
//!
//! Token and identity imports are best effort per item: a record or container
//! that cannot be copied is logged and skipped. Opening, unlocking and
//! enumerating the source are fatal. Re-scoping access is all or nothing.

use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;

use crate::error::{ProfileError, StoreError};
use crate::fsio;
use crate::keychain::{
    AccessPolicy, Authorization, Keychain, KeychainBackend, CODESIGNING_APPLICATIONS,
};

/// Description stamped on access policies of imported items.
const IMPORT_POLICY_DESCRIPTION: &str = "Identity";

/// Outcome of a best-effort bulk copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferSummary {
    pub transferred: usize,
    pub failed: usize,
}

impl TransferSummary {
    fn record(&mut self, ok: bool) {
        if ok {
            self.transferred = self.transferred.saturating_add(1);
        } else {
            self.failed = self.failed.saturating_add(1);
        }
    }
}

/// Copies tokens and identities out of a profile's keychain.
pub struct CredentialTransfer {
    backend: Box<dyn KeychainBackend>,
    trusted_applications: Vec<PathBuf>,
}

impl std::fmt::Debug for CredentialTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialTransfer")
            .field("trusted_applications", &self.trusted_applications)
            .finish_non_exhaustive()
    }
}

impl CredentialTransfer {
    /// Transfer using `backend` to open source keychains. Imported items are
    /// restricted to the code-signing toolchain.
    pub fn new(backend: impl KeychainBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            trusted_applications: CODESIGNING_APPLICATIONS.iter().map(PathBuf::from).collect(),
        }
    }

    /// Replace the applications imported items are restricted to.
    #[must_use]
    pub fn with_trusted_applications(mut self, applications: Vec<PathBuf>) -> Self {
        self.trusted_applications = applications;
        self
    }

    #[must_use]
    pub fn trusted_applications(&self) -> &[PathBuf] {
        &self.trusted_applications
    }

    /// Access policy applied to every imported item.
    #[must_use]
    pub fn import_policy(&self) -> AccessPolicy {
        AccessPolicy::restricted_to(IMPORT_POLICY_DESCRIPTION, &self.trusted_applications)
    }

    fn open_unlocked(
        &self,
        path: &Path,
        password: &SecretString,
    ) -> Result<Box<dyn Keychain>, StoreError> {
        let mut keychain = self.backend.open(path)?;
        keychain.unlock(password)?;
        Ok(keychain)
    }

    /// Copy every generic-password record of the keychain at `source` into
    /// `destination`.
    ///
    /// # Errors
    ///
    /// Fails only when the source cannot be opened, unlocked or enumerated.
    /// Records the destination refuses are counted in
    /// [`TransferSummary::failed`].
    pub fn import_tokens(
        &self,
        source: &Path,
        password: &SecretString,
        destination: &mut dyn Keychain,
    ) -> Result<TransferSummary, StoreError> {
        let keychain = self.open_unlocked(source, password)?;
        let records = keychain.secret_records()?;
        let policy = self.import_policy();

        let mut summary = TransferSummary::default();
        for record in &records {
            match destination.add_record(record, &policy) {
                Ok(id) => {
                    tracing::debug!(service = %record.service, account = %record.account, %id, "imported credential record");
                    summary.record(true);
                }
                Err(e) => {
                    tracing::warn!(
                        service = %record.service,
                        account = %record.account,
                        error = %e,
                        "skipping credential record"
                    );
                    summary.record(false);
                }
            }
        }

        tracing::info!(
            source = %source.display(),
            transferred = summary.transferred,
            failed = summary.failed,
            "credential records imported"
        );
        Ok(summary)
    }

    /// Import every identity container in `directory` into `destination`,
    /// opening each with `password`.
    ///
    /// # Errors
    ///
    /// [`ProfileError::MissingPayload`] if `directory` does not exist, or an
    /// I/O error when it cannot be listed. Individual containers that fail to
    /// read or decode are counted in [`TransferSummary::failed`].
    pub fn import_identities(
        &self,
        directory: &Path,
        password: &SecretString,
        destination: &mut dyn Keychain,
    ) -> Result<TransferSummary, ProfileError> {
        if !directory.is_dir() {
            return Err(ProfileError::MissingPayload(directory.to_path_buf()));
        }
        let policy = self.import_policy();

        let mut summary = TransferSummary::default();
        for path in fsio::list_files(directory)? {
            let result = fs::read(&path)
                .map_err(|e| StoreError::InvalidIdentity(e.to_string()))
                .and_then(|bytes| destination.import_identity(&bytes, password, &policy));
            match result {
                Ok(id) => {
                    tracing::debug!(file = %path.display(), %id, "imported identity");
                    summary.record(true);
                }
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "skipping identity container");
                    summary.record(false);
                }
            }
        }

        tracing::info!(
            directory = %directory.display(),
            transferred = summary.transferred,
            failed = summary.failed,
            "identities imported"
        );
        Ok(summary)
    }

    /// Open the decrypt authorization of every record in the keychain at
    /// `source` to any application, leaving all other entries as they are.
    /// Returns the number of records updated.
    ///
    /// Every record is checked before any is written, so a store with a
    /// record lacking a decrypt entry is left unmodified.
    ///
    /// # Errors
    ///
    /// [`StoreError::NoMatchingAccessEntry`] for such a record; open, unlock,
    /// enumeration and write failures.
    pub fn rescope_access(
        &self,
        source: &Path,
        password: &SecretString,
    ) -> Result<usize, StoreError> {
        let mut keychain = self.open_unlocked(source, password)?;
        let records = keychain.secret_records()?;

        let mut updates = Vec::with_capacity(records.len());
        for record in &records {
            let mut policy = keychain.access_policy(&record.id)?;
            if !policy.unrestrict(Authorization::Decrypt) {
                return Err(StoreError::NoMatchingAccessEntry {
                    record: record.id.to_string(),
                });
            }
            updates.push((record.id.clone(), policy));
        }

        let count = updates.len();
        for (id, policy) in updates {
            keychain.set_access_policy(&id, policy)?;
        }
        tracing::info!(source = %source.display(), records = count, "rescoped keychain access");
        Ok(count)
    }
}
