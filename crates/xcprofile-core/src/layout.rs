//! Fixed on-disk layout of an unpacked developer profile.
//!
//! ```text
//! <working tree>/
//! └── developer/
//!     ├── accounts.keychain   (encrypted payload)
//!     ├── accounts.plist      (encrypted payload)
//!     ├── identities/         (one PKCS#12 container per identity)
//!     └── profiles/           (one provisioning profile per file)
//! ```

use std::path::{Path, PathBuf};

/// Marker every profile archive name must contain.
pub const ARCHIVE_MARKER: &str = ".developerprofile";

/// Top-level directory inside the archive.
pub const PROFILE_ROOT: &str = "developer";

pub const KEYCHAIN_FILE: &str = "developer/accounts.keychain";
pub const ACCOUNTS_FILE: &str = "developer/accounts.plist";
pub const IDENTITIES_DIR: &str = "developer/identities";
pub const PROFILES_DIR: &str = "developer/profiles";

/// Whether `path` names a profile archive.
#[must_use]
pub fn is_profile_archive(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.contains(ARCHIVE_MARKER))
}

/// Resolves the fixed payload locations against a working-tree root.
#[derive(Debug, Clone)]
pub struct ProfileLayout {
    root: PathBuf,
}

impl ProfileLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The `developer/` subtree that gets packed on re-encryption.
    #[must_use]
    pub fn profile_root(&self) -> PathBuf {
        self.root.join(PROFILE_ROOT)
    }

    #[must_use]
    pub fn keychain(&self) -> PathBuf {
        self.root.join(KEYCHAIN_FILE)
    }

    #[must_use]
    pub fn accounts(&self) -> PathBuf {
        self.root.join(ACCOUNTS_FILE)
    }

    #[must_use]
    pub fn identities_dir(&self) -> PathBuf {
        self.root.join(IDENTITIES_DIR)
    }

    #[must_use]
    pub fn profiles_dir(&self) -> PathBuf {
        self.root.join(PROFILES_DIR)
    }

    /// Both encrypted payloads, keychain first.
    #[must_use]
    pub fn encrypted_payloads(&self) -> [PathBuf; 2] {
        [self.keychain(), self.accounts()]
    }
}
