//! Encrypted and decrypted developer profiles.
//!
//! [`EncryptedProfile::decrypt`] unpacks the archive into a [`WorkingTree`]
//! and decrypts the keychain and account payloads in place. The resulting
//! [`DecryptedProfile`] owns that tree: dropping it (on success, error or
//! early return) removes the plaintext from disk unless the caller persists
//! it explicitly.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use tempfile::TempDir;
use xcprofile_crypto::{cipher, derive_profile_key};
use zeroize::Zeroizing;

use crate::accounts::{AccountSettingsMerge, XcodeDefaults};
use crate::archive::ProfileArchive;
use crate::error::ProfileError;
use crate::fsio;
use crate::keychain::Keychain;
use crate::layout::{self, ProfileLayout};
use crate::provisioning;
use crate::transfer::{CredentialTransfer, TransferSummary};

// ---------------------------------------------------------------------------
// WorkingTree
// ---------------------------------------------------------------------------

/// Exclusive owner of a scratch directory. Removed on drop unless persisted.
///
/// Both kinds of tree are created owner-only (`0700` on unix).
#[derive(Debug)]
pub struct WorkingTree {
    dir: TreeDir,
}

#[derive(Debug)]
enum TreeDir {
    /// Fresh `xcprofile-*` directory under the system temp dir.
    Temp(TempDir),
    /// Caller-chosen location.
    Fixed(PathBuf),
    /// Persisted or closed.
    Released,
}

impl WorkingTree {
    /// Create an empty directory at `location`, or a fresh `xcprofile-*`
    /// directory under the system temp dir. Anything already at `location`
    /// is deleted first.
    ///
    /// # Errors
    ///
    /// I/O errors from removing the old tree or creating the new one.
    pub fn allocate(location: Option<PathBuf>) -> io::Result<Self> {
        let dir = match location {
            None => TreeDir::Temp(tempfile::Builder::new().prefix("xcprofile-").tempdir()?),
            Some(path) => {
                if path.exists() {
                    tracing::debug!(path = %path.display(), "removing existing working directory");
                    fs::remove_dir_all(&path)?;
                }
                create_private_dir(&path)?;
                TreeDir::Fixed(path)
            }
        };
        Ok(Self { dir })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        match &self.dir {
            TreeDir::Temp(dir) => dir.path(),
            TreeDir::Fixed(path) => path,
            TreeDir::Released => Path::new(""),
        }
    }

    /// Keep the directory on disk and hand its path to the caller.
    #[must_use]
    pub fn persist(mut self) -> PathBuf {
        match std::mem::replace(&mut self.dir, TreeDir::Released) {
            TreeDir::Temp(dir) => dir.keep(),
            TreeDir::Fixed(path) => path,
            TreeDir::Released => PathBuf::new(),
        }
    }

    /// Remove the directory now, reporting failure to the caller instead of
    /// the log.
    ///
    /// # Errors
    ///
    /// The I/O error from removing the tree. A tree that is already gone is
    /// not an error.
    pub fn close(mut self) -> io::Result<()> {
        release(std::mem::replace(&mut self.dir, TreeDir::Released))
    }
}

fn create_private_dir(path: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path)
}

fn release(dir: TreeDir) -> io::Result<()> {
    let result = match dir {
        TreeDir::Temp(dir) => dir.close(),
        TreeDir::Fixed(path) => fs::remove_dir_all(path),
        TreeDir::Released => Ok(()),
    };
    match result {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

impl Drop for WorkingTree {
    fn drop(&mut self) {
        if matches!(self.dir, TreeDir::Released) {
            return;
        }
        let path = self.path().to_path_buf();
        match release(std::mem::replace(&mut self.dir, TreeDir::Released)) {
            Ok(()) => tracing::debug!(path = %path.display(), "removed working directory"),
            Err(e) => tracing::error!(
                path = %path.display(),
                error = %e,
                "failed to remove working directory"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// EncryptedProfile
// ---------------------------------------------------------------------------

/// A `.developerprofile` archive on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedProfile {
    archive_path: PathBuf,
}

impl EncryptedProfile {
    #[must_use]
    pub fn new(archive_path: impl Into<PathBuf>) -> Self {
        Self {
            archive_path: archive_path.into(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.archive_path
    }

    /// Decrypt into a fresh temporary working tree.
    ///
    /// # Errors
    ///
    /// See [`EncryptedProfile::decrypt_into`].
    pub fn decrypt(
        &self,
        password: &SecretString,
        archive: &dyn ProfileArchive,
    ) -> Result<DecryptedProfile, ProfileError> {
        self.decrypt_into(password, archive, None)
    }

    /// Unpack into `work_dir` (or a fresh temporary directory) and decrypt
    /// both payloads in place.
    ///
    /// # Errors
    ///
    /// - [`ProfileError::NotAnArchive`] if the file name lacks `.developerprofile`
    /// - [`ProfileError::UnpackFailed`] from the archive
    /// - [`ProfileError::MissingPayload`] if a payload is absent
    /// - [`ProfileError::KeyDerivation`] for an empty password
    /// - [`ProfileError::Cipher`] for a wrong password or corrupt payload
    ///
    /// The working tree is removed on every error path.
    pub fn decrypt_into(
        &self,
        password: &SecretString,
        archive: &dyn ProfileArchive,
        work_dir: Option<PathBuf>,
    ) -> Result<DecryptedProfile, ProfileError> {
        if !layout::is_profile_archive(&self.archive_path) {
            return Err(ProfileError::NotAnArchive(self.archive_path.clone()));
        }
        let _span =
            tracing::info_span!("decrypt", archive = %self.archive_path.display()).entered();

        let tree = WorkingTree::allocate(work_dir)?;
        archive.unpack(&self.archive_path, tree.path())?;

        let layout = ProfileLayout::new(tree.path());
        let payloads = layout.encrypted_payloads();
        if let Some(missing) = payloads.iter().find(|p| !p.is_file()) {
            return Err(ProfileError::MissingPayload(missing.clone()));
        }

        let key = derive_profile_key(password.expose_secret())?;
        for payload in &payloads {
            let ciphertext = fs::read(payload)?;
            let plaintext = cipher::decrypt(&ciphertext, key.expose())?;
            fsio::write_atomic(payload, plaintext.expose(), true)?;
        }

        tracing::info!(work_dir = %tree.path().display(), "profile decrypted");
        Ok(DecryptedProfile {
            origin: self.archive_path.clone(),
            tree,
            password: SecretString::from(password.expose_secret().to_string()),
        })
    }

    /// Decrypt, run `f` against the decrypted profile, then remove the
    /// working tree whatever `f` returned.
    ///
    /// # Errors
    ///
    /// Decryption errors, or whatever `f` returns.
    pub fn with_decrypted<T>(
        &self,
        password: &SecretString,
        archive: &dyn ProfileArchive,
        f: impl FnOnce(&DecryptedProfile) -> Result<T, ProfileError>,
    ) -> Result<T, ProfileError> {
        let profile = self.decrypt(password, archive)?;
        let result = f(&profile);
        if let Err(e) = profile.close() {
            tracing::error!(error = %e, "failed to remove working directory");
        }
        result
    }
}

// ---------------------------------------------------------------------------
// DecryptedProfile
// ---------------------------------------------------------------------------

/// Where [`DecryptedProfile::import_all`] puts things.
pub struct ImportDestination<'a> {
    pub keychain: &'a mut dyn Keychain,
    pub defaults: &'a XcodeDefaults,
    pub provisioning_profiles: &'a Path,
}

/// What [`DecryptedProfile::import_all`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub tokens: TransferSummary,
    pub identities: TransferSummary,
    pub accounts_added: Vec<String>,
    pub profiles_placed: usize,
}

/// Plaintext working tree of a profile.
pub struct DecryptedProfile {
    origin: PathBuf,
    tree: WorkingTree,
    password: SecretString,
}

impl fmt::Debug for DecryptedProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptedProfile")
            .field("origin", &self.origin)
            .field("work_dir", &self.tree.path())
            .finish_non_exhaustive()
    }
}

impl DecryptedProfile {
    /// Archive this profile was decrypted from.
    #[must_use]
    pub fn origin(&self) -> &Path {
        &self.origin
    }

    #[must_use]
    pub fn work_dir(&self) -> &Path {
        self.tree.path()
    }

    #[must_use]
    pub fn layout(&self) -> ProfileLayout {
        ProfileLayout::new(self.tree.path())
    }

    /// Encrypt both payloads under `password` (which may differ from the one
    /// used to decrypt) and pack the tree over the original archive.
    ///
    /// # Errors
    ///
    /// [`ProfileError::PackFailed`], key derivation, cipher and I/O errors.
    pub fn encrypt(
        self,
        password: &SecretString,
        archive: &dyn ProfileArchive,
    ) -> Result<EncryptedProfile, ProfileError> {
        let layout = self.layout();
        let key = derive_profile_key(password.expose_secret())?;
        for payload in layout.encrypted_payloads() {
            let plaintext = Zeroizing::new(fs::read(&payload)?);
            let ciphertext = cipher::encrypt(&plaintext, key.expose())?;
            fsio::write_atomic(&payload, &ciphertext, true)?;
        }

        archive.pack(&layout.profile_root(), &self.origin)?;
        tracing::info!(archive = %self.origin.display(), "profile encrypted");
        Ok(EncryptedProfile::new(self.origin.clone()))
    }

    /// Import tokens, identities, accounts and provisioning profiles, in
    /// that order. Stops at the first fatal error without undoing earlier
    /// steps.
    ///
    /// # Errors
    ///
    /// Fatal errors of any step; per-item failures only show up in the
    /// report.
    pub fn import_all(
        &self,
        transfer: &CredentialTransfer,
        destination: ImportDestination<'_>,
    ) -> Result<ImportReport, ProfileError> {
        let layout = self.layout();
        let _span = tracing::info_span!("import", archive = %self.origin.display()).entered();

        let tokens =
            transfer.import_tokens(&layout.keychain(), &self.password, &mut *destination.keychain)?;
        let identities = transfer.import_identities(
            &layout.identities_dir(),
            &self.password,
            &mut *destination.keychain,
        )?;
        let accounts_added = self.import_accounts_only(destination.defaults)?;
        let profiles_placed =
            provisioning::place_profiles(&layout.profiles_dir(), destination.provisioning_profiles)?;

        Ok(ImportReport {
            tokens,
            identities,
            accounts_added,
            profiles_placed,
        })
    }

    /// Merge only the bundle's accounts into `defaults`.
    ///
    /// # Errors
    ///
    /// [`ProfileError::Accounts`].
    pub fn import_accounts_only(&self, defaults: &XcodeDefaults) -> Result<Vec<String>, ProfileError> {
        let added = AccountSettingsMerge::new(defaults.clone()).run(&self.layout().accounts())?;
        Ok(added)
    }

    /// Open the decrypt authorization of every record in the bundled keychain
    /// so another machine can import it. Follow with [`Self::encrypt`].
    ///
    /// # Errors
    ///
    /// [`ProfileError::Store`] from re-scoping.
    pub fn reexport(&self, transfer: &CredentialTransfer) -> Result<usize, ProfileError> {
        let keychain = self.layout().keychain();
        let count = transfer.rescope_access(&keychain, &self.password)?;
        tracing::info!(keychain = %keychain.display(), records = count, "keychain ready for export");
        Ok(count)
    }

    /// Check that bundled tokens are still valid.
    ///
    /// # Errors
    ///
    /// Always [`ProfileError::NotImplemented`]: there is no check yet, and
    /// reporting "invalid" would hide that.
    pub const fn validate_tokens(&self) -> Result<bool, ProfileError> {
        Err(ProfileError::NotImplemented("token validation"))
    }

    /// Remove the working tree now.
    ///
    /// # Errors
    ///
    /// The removal error, if any.
    pub fn close(self) -> io::Result<()> {
        self.tree.close()
    }

    /// Keep the decrypted tree on disk and return its location.
    #[must_use]
    pub fn persist(self) -> PathBuf {
        self.tree.persist()
    }
}
