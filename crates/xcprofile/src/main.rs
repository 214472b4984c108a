//! xcprofile - import and re-export password-protected developer profiles.
//!
//! This is the binary entry point.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use secrecy::SecretString;
use xcprofile_core::Settings;

use crate::commands::{CommandError, Context, ImportArgs, Outcome};

/// Exit status reserved for a profile whose tokens failed validation.
const EXIT_VALIDATION_FAILED: u8 = 64;

/// Import and re-export password-protected developer profiles.
#[derive(Parser, Debug)]
#[command(name = "xcprofile", version, about, long_about = None)]
struct Cli {
    /// Directory holding settings.json.
    #[arg(long, global = true, value_name = "DIR")]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `xcprofile_core=trace`. RUST_LOG wins.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Unpack into this directory instead of a fresh temporary one. Anything
    /// already there is deleted.
    #[arg(long, global = true, value_name = "DIR")]
    work_dir: Option<PathBuf>,

    /// Leave the decrypted working directory on disk.
    #[arg(long, global = true)]
    keep_work_dir: bool,

    #[command(subcommand)]
    command: Command,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Import credentials, identities, accounts and provisioning profiles.
    Import {
        /// Path to the .developerprofile archive.
        path: PathBuf,

        /// Profile password.
        #[arg(short, long, env = "XCPROFILE_PASSWORD", hide_env_values = true)]
        password: String,

        /// Only merge developer accounts into Xcode's settings.
        #[arg(long)]
        accounts_only: bool,

        /// Destination keychain; created if it does not exist.
        #[arg(long, value_name = "PATH")]
        keychain: Option<PathBuf>,

        /// Password of the destination keychain. Defaults to the profile password.
        #[arg(long, env = "XCPROFILE_KEYCHAIN_PASSWORD", hide_env_values = true)]
        keychain_password: Option<String>,
    },
    /// Make a profile importable on another machine and re-encrypt it in place.
    Reexport {
        /// Path to the .developerprofile archive.
        path: PathBuf,

        /// Profile password.
        #[arg(short, long, env = "XCPROFILE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Validate the tokens bundled in a profile.
    Validate {
        /// Path to the .developerprofile archive.
        path: PathBuf,

        /// Profile password.
        #[arg(short, long, env = "XCPROFILE_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let directive = if log_level.contains('=') {
        log_level.to_string()
    } else {
        format!("xcprofile={log_level},xcprofile_core={log_level},warn")
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli, settings: Settings) -> Result<Outcome, CommandError> {
    let ctx = Context {
        work_dir: cli.work_dir.or_else(|| settings.work_dir.clone()),
        keep_work_dir: cli.keep_work_dir,
        settings,
    };

    match cli.command {
        Command::Import {
            path,
            password,
            accounts_only,
            keychain,
            keychain_password,
        } => commands::import(
            &ctx,
            &ImportArgs {
                path,
                password: SecretString::from(password),
                accounts_only,
                keychain,
                keychain_password: keychain_password.map(SecretString::from),
            },
        ),
        Command::Reexport { path, password } => {
            commands::reexport(&ctx, &path, &SecretString::from(password))
        }
        Command::Validate { path, password } => {
            commands::validate(&ctx, &path, &SecretString::from(password))
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = cli
        .config
        .clone()
        .or_else(Settings::default_dir)
        .map(|dir| Settings::load(&dir))
        .unwrap_or_default();
    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| settings.log_level.clone());
    init_tracing(&log_level);

    if let Err(e) = xcprofile_crypto::disable_core_dumps() {
        tracing::warn!(error = %e, "could not disable core dumps");
    }

    match run(cli, settings) {
        Ok(Outcome::Success) => ExitCode::SUCCESS,
        Ok(Outcome::ValidationFailed) => {
            tracing::error!("token validation failed");
            ExitCode::from(EXIT_VALIDATION_FAILED)
        }
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("xcprofile: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn import_flags_parse() {
        let cli = Cli::try_parse_from([
            "xcprofile",
            "--work-dir",
            "/tmp/work",
            "import",
            "Team.developerprofile",
            "-p",
            "secret",
            "--accounts-only",
        ])
        .unwrap();
        assert_eq!(cli.work_dir, Some(PathBuf::from("/tmp/work")));
        match cli.command {
            Command::Import {
                path,
                accounts_only,
                keychain,
                ..
            } => {
                assert_eq!(path, PathBuf::from("Team.developerprofile"));
                assert!(accounts_only);
                assert!(keychain.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "xcprofile",
            "validate",
            "Team.developerprofile",
            "--password",
            "x",
            "--keep-work-dir",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert!(cli.keep_work_dir);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(matches!(cli.command, Command::Validate { .. }));
    }

    #[test]
    fn unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["xcprofile", "export", "x"]).is_err());
    }

    #[test]
    fn non_archive_path_fails_before_decrypting() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::default();
        let cli = Cli::try_parse_from([
            "xcprofile",
            "validate",
            dir.path().join("missing.zip").to_str().unwrap(),
            "-p",
            "x",
        ])
        .unwrap();
        let err = run(cli, settings).unwrap_err();
        assert!(matches!(
            err,
            CommandError::Profile(xcprofile_core::ProfileError::NotAnArchive(_))
        ));
    }
}
