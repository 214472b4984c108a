//! Subcommand implementations.

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use thiserror::Error;
use xcprofile_core::{
    CredentialTransfer, DecryptedProfile, EncryptedProfile, FileKeychain, FileKeychainBackend,
    ImportDestination, Keychain, ProfileError, Settings, StoreError, ZipProfileArchive,
};

/// Failure of a subcommand.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// A destination could not be determined from flags or settings.
    #[error("cannot determine {0}; set it in the settings file")]
    Unresolved(&'static str),
}

/// How a successful command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    ValidationFailed,
}

/// Options shared by every subcommand.
#[derive(Debug)]
pub struct Context {
    pub settings: Settings,
    pub work_dir: Option<PathBuf>,
    pub keep_work_dir: bool,
}

impl Context {
    fn archive(&self) -> ZipProfileArchive {
        ZipProfileArchive::new(self.settings.compression())
    }

    fn transfer(&self) -> CredentialTransfer {
        CredentialTransfer::new(FileKeychainBackend)
            .with_trusted_applications(self.settings.trusted_applications.clone())
    }

    fn decrypt(
        &self,
        path: &Path,
        password: &SecretString,
    ) -> Result<DecryptedProfile, ProfileError> {
        EncryptedProfile::new(path).decrypt_into(password, &self.archive(), self.work_dir.clone())
    }

    fn finish(&self, profile: DecryptedProfile) {
        if self.keep_work_dir {
            let kept = profile.persist();
            tracing::warn!(path = %kept.display(), "decrypted working directory kept on disk");
        } else if let Err(e) = profile.close() {
            tracing::error!(error = %e, "failed to remove working directory");
        }
    }
}

/// Arguments of `import`.
#[derive(Debug)]
pub struct ImportArgs {
    pub path: PathBuf,
    pub password: SecretString,
    pub accounts_only: bool,
    pub keychain: Option<PathBuf>,
    pub keychain_password: Option<SecretString>,
}

fn open_destination(path: &Path, password: &SecretString) -> Result<FileKeychain, StoreError> {
    if path.exists() {
        let mut keychain = FileKeychain::open(path)?;
        keychain.unlock(password)?;
        return Ok(keychain);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::Write(e.to_string()))?;
    }
    tracing::info!(path = %path.display(), "creating destination keychain");
    FileKeychain::create(path, password)
}

/// Decrypt and import everything, or only the accounts.
///
/// # Errors
///
/// Any fatal error of the pipeline.
pub fn import(ctx: &Context, args: &ImportArgs) -> Result<Outcome, CommandError> {
    let defaults = ctx
        .settings
        .resolve_xcode_defaults()
        .ok_or(CommandError::Unresolved("Xcode defaults location"))?;

    let profile = ctx.decrypt(&args.path, &args.password)?;
    let result = if args.accounts_only {
        profile
            .import_accounts_only(&defaults)
            .map(|added| tracing::info!(accounts = added.len(), "accounts imported"))
            .map_err(CommandError::from)
    } else {
        import_everything(ctx, &profile, args, &defaults)
    };
    ctx.finish(profile);
    result.map(|()| Outcome::Success)
}

fn import_everything(
    ctx: &Context,
    profile: &DecryptedProfile,
    args: &ImportArgs,
    defaults: &xcprofile_core::XcodeDefaults,
) -> Result<(), CommandError> {
    let keychain_path = args
        .keychain
        .clone()
        .or_else(|| ctx.settings.resolve_keychain())
        .ok_or(CommandError::Unresolved("destination keychain"))?;
    let provisioning = ctx
        .settings
        .resolve_provisioning_dir()
        .ok_or(CommandError::Unresolved("provisioning profiles directory"))?;
    let keychain_password = args.keychain_password.as_ref().unwrap_or(&args.password);

    let mut keychain = open_destination(&keychain_path, keychain_password)?;
    let report = profile.import_all(
        &ctx.transfer(),
        ImportDestination {
            keychain: &mut keychain,
            defaults,
            provisioning_profiles: &provisioning,
        },
    )?;

    tracing::info!(
        keychain = %keychain_path.display(),
        tokens = report.tokens.transferred,
        tokens_skipped = report.tokens.failed,
        identities = report.identities.transferred,
        identities_skipped = report.identities.failed,
        accounts = report.accounts_added.len(),
        profiles = report.profiles_placed,
        "profile imported"
    );
    Ok(())
}

/// Relax the bundled keychain's decrypt access and re-encrypt the archive
/// in place.
///
/// # Errors
///
/// Any fatal error of the pipeline.
pub fn reexport(ctx: &Context, path: &Path, password: &SecretString) -> Result<Outcome, CommandError> {
    let profile = ctx.decrypt(path, password)?;
    if let Err(e) = profile.reexport(&ctx.transfer()) {
        ctx.finish(profile);
        return Err(e.into());
    }

    if ctx.keep_work_dir {
        tracing::warn!("working directory is always removed after re-encryption");
    }
    let output = profile.encrypt(password, &ctx.archive())?;
    tracing::info!(path = %output.path().display(), "profile re-exported");
    Ok(Outcome::Success)
}

/// Check bundled tokens.
///
/// # Errors
///
/// Any fatal error of the pipeline, including the missing validator.
pub fn validate(ctx: &Context, path: &Path, password: &SecretString) -> Result<Outcome, CommandError> {
    let profile = ctx.decrypt(path, password)?;
    let result = profile.validate_tokens();
    ctx.finish(profile);
    if result? {
        Ok(Outcome::Success)
    } else {
        Ok(Outcome::ValidationFailed)
    }
}
