//! Placement of provisioning profiles.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ProfileError;
use crate::fsio;

/// `~/Library/MobileDevice/Provisioning Profiles` for the current user.
#[must_use]
pub fn default_profiles_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join("Library/MobileDevice/Provisioning Profiles"))
}

/// Copy every profile in `source` into `destination`, replacing files of the
/// same name. Returns the number of profiles placed.
///
/// # Errors
///
/// [`ProfileError::MissingPayload`] if `source` is absent; I/O errors from
/// listing, reading or writing. Placement stops at the first failure.
pub fn place_profiles(source: &Path, destination: &Path) -> Result<usize, ProfileError> {
    if !source.is_dir() {
        return Err(ProfileError::MissingPayload(source.to_path_buf()));
    }
    fs::create_dir_all(destination)?;

    let mut placed = 0usize;
    for file in fsio::list_files(source)? {
        let Some(name) = file.file_name() else {
            continue;
        };
        let target = destination.join(name);
        let replacing = target.exists();
        fsio::write_atomic(&target, &fs::read(&file)?, false)?;
        tracing::debug!(profile = %target.display(), replacing, "placed provisioning profile");
        placed = placed.saturating_add(1);
    }

    tracing::info!(
        destination = %destination.display(),
        profiles = placed,
        "provisioning profiles placed"
    );
    Ok(placed)
}
