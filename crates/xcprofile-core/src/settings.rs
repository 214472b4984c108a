//! User settings, stored as plain JSON in the platform config directory.
//!
//! Every field is optional on disk; missing fields take their defaults, and a
//! missing or corrupt file yields [`Settings::default`]. Command-line flags
//! override these values.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::accounts::XcodeDefaults;
use crate::archive::CompressionLevel;
use crate::fsio;
use crate::keychain::CODESIGNING_APPLICATIONS;
use crate::provisioning;

// ── Settings ───────────────────────────────────────────────────────

/// Persistent defaults for the command-line tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Destination keychain for imports. `None` means the default login
    /// keychain location.
    #[serde(default)]
    pub keychain_path: Option<PathBuf>,

    /// Xcode defaults plist receiving account entries.
    #[serde(default)]
    pub xcode_defaults_path: Option<PathBuf>,

    /// Where provisioning profiles are placed.
    #[serde(default)]
    pub provisioning_profiles_dir: Option<PathBuf>,

    /// Applications imported credentials are restricted to.
    #[serde(default = "default_trusted_applications")]
    pub trusted_applications: Vec<PathBuf>,

    /// Fixed working directory; a fresh temporary one when unset.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    /// `tracing` filter directive, e.g. `"info"` or `"xcprofile_core=debug"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// ZIP compression level for re-exported archives (0-9).
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            keychain_path: None,
            xcode_defaults_path: None,
            provisioning_profiles_dir: None,
            trusted_applications: default_trusted_applications(),
            work_dir: None,
            log_level: default_log_level(),
            compression_level: default_compression_level(),
        }
    }
}

fn default_trusted_applications() -> Vec<PathBuf> {
    CODESIGNING_APPLICATIONS.iter().map(PathBuf::from).collect()
}
fn default_log_level() -> String {
    "info".into()
}
const fn default_compression_level() -> u32 {
    CompressionLevel::DEFAULT.level()
}

// ── File I/O ───────────────────────────────────────────────────────

const SETTINGS_FILE: &str = "settings.json";

impl Settings {
    /// `<config dir>/xcprofile`, e.g. `~/.config/xcprofile` on Linux.
    #[must_use]
    pub fn default_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("xcprofile"))
    }

    /// Load `{dir}/settings.json`, falling back to defaults.
    #[must_use]
    pub fn load(dir: &Path) -> Self {
        let path = dir.join(SETTINGS_FILE);
        fs::read_to_string(&path).map_or_else(
            |_| Self::default(),
            |contents| {
                serde_json::from_str(&contents).unwrap_or_else(|e| {
                    tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt settings file");
                    Self::default()
                })
            },
        )
    }

    /// Persist to `{dir}/settings.json` atomically, owner-only on unix.
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` if the directory cannot be created or the
    /// write/rename fails.
    pub fn save(&self, dir: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::create_dir_all(dir)?;
        fsio::write_atomic(&dir.join(SETTINGS_FILE), json.as_bytes(), true)
    }

    #[must_use]
    pub fn compression(&self) -> CompressionLevel {
        CompressionLevel::new(self.compression_level)
    }

    /// Import keychain: the configured one, else `<data dir>/xcprofile/login.keychain`.
    #[must_use]
    pub fn resolve_keychain(&self) -> Option<PathBuf> {
        self.keychain_path
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join("xcprofile").join("login.keychain")))
    }

    #[must_use]
    pub fn resolve_xcode_defaults(&self) -> Option<XcodeDefaults> {
        self.xcode_defaults_path
            .clone()
            .map(XcodeDefaults::new)
            .or_else(XcodeDefaults::user_default)
    }

    #[must_use]
    pub fn resolve_provisioning_dir(&self) -> Option<PathBuf> {
        self.provisioning_profiles_dir
            .clone()
            .or_else(provisioning::default_profiles_dir)
    }
}

// ── Tests ──────────────────────────────────────────────────────────
