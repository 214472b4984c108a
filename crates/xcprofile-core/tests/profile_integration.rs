#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

//! End-to-end tests for the profile pipeline: build a real archive, decrypt,
//! import, re-export and re-encrypt it.

use std::fs;
use std::path::{Path, PathBuf};

use plist::{Dictionary, Value};
use secrecy::SecretString;
use tempfile::TempDir;
use zeroize::Zeroizing;

use xcprofile_core::accounts::AccountRegistry;
use xcprofile_core::keychain::{ApplicationList, Authorization};
use xcprofile_core::{
    AccessPolicy, AccountImportError, CredentialRecord, CredentialTransfer, EncryptedProfile,
    FileKeychain, FileKeychainBackend, ImportDestination, Keychain, MemoryKeychain, ProfileArchive,
    ProfileError, RecordId, XcodeDefaults, ZipProfileArchive,
};
use xcprofile_crypto::{cipher, derive_profile_key, CipherError};

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

const PASSWORD: &str = "profile password";

fn secret(s: &str) -> SecretString {
    SecretString::from(s.to_string())
}

struct ProfileFixture<'a> {
    version: &'a str,
    accounts: &'a [&'a str],
    tokens: &'a [&'a str],
    identities: &'a [&'a str],
    profiles: &'a [&'a str],
    with_accounts_payload: bool,
}

impl Default for ProfileFixture<'_> {
    fn default() -> Self {
        Self {
            version: "1",
            accounts: &["alice@example.com", "bob@example.com"],
            tokens: &["alice@example.com", "bob@example.com"],
            identities: &["Apple Development", "Apple Distribution"],
            profiles: &["Team_Wildcard.mobileprovision"],
            with_accounts_payload: true,
        }
    }
}

fn accounts_plist(version: &str, usernames: &[&str]) -> Value {
    let accounts = usernames
        .iter()
        .map(|u| {
            let mut d = Dictionary::new();
            d.insert("username".into(), Value::String((*u).to_string()));
            Value::Dictionary(d)
        })
        .collect();
    let mut developer = Dictionary::new();
    developer.insert("accounts".into(), Value::Array(accounts));
    let mut root = Dictionary::new();
    root.insert("AccountsPlistVersion".into(), Value::String(version.into()));
    root.insert("DeveloperAccounts".into(), Value::Dictionary(developer));
    Value::Dictionary(root)
}

fn encrypt_file(path: &Path, password: &str) {
    let key = derive_profile_key(password).unwrap();
    let plaintext = fs::read(path).unwrap();
    fs::write(path, cipher::encrypt(&plaintext, key.expose()).unwrap()).unwrap();
}

/// Build `<dir>/Team.developerprofile` from `fixture`.
fn build_profile(dir: &Path, fixture: &ProfileFixture<'_>) -> PathBuf {
    let developer = dir.join("staging").join("developer");
    fs::create_dir_all(developer.join("identities")).unwrap();
    fs::create_dir_all(developer.join("profiles")).unwrap();

    let keychain_path = developer.join("accounts.keychain");
    let mut keychain =
        FileKeychain::create_with_iterations(&keychain_path, &secret(PASSWORD), 1).unwrap();
    for account in fixture.tokens {
        let record = CredentialRecord {
            id: RecordId(String::new()),
            service: "Xcode-Token".into(),
            account: (*account).to_string(),
            label: None,
            secret: Zeroizing::new(format!("token:{account}").into_bytes()),
            access: AccessPolicy::default(),
        };
        keychain
            .add_record(&record, &AccessPolicy::codesigning())
            .unwrap();
    }
    encrypt_file(&keychain_path, PASSWORD);

    if fixture.with_accounts_payload {
        let accounts_path = developer.join("accounts.plist");
        accounts_plist(fixture.version, fixture.accounts)
            .to_file_xml(&accounts_path)
            .unwrap();
        encrypt_file(&accounts_path, PASSWORD);
    }

    for name in fixture.identities {
        let cert = format!("certificate for {name}");
        let der = p12::PFX::new(cert.as_bytes(), b"private key", None, PASSWORD, name)
            .unwrap()
            .to_der();
        fs::write(developer.join("identities").join(format!("{name}.p12")), der).unwrap();
    }
    for name in fixture.profiles {
        fs::write(developer.join("profiles").join(name), name.as_bytes()).unwrap();
    }

    let archive_path = dir.join("Team.developerprofile");
    ZipProfileArchive::default()
        .pack(&developer, &archive_path)
        .unwrap();
    fs::remove_dir_all(dir.join("staging")).unwrap();
    archive_path
}

fn transfer() -> CredentialTransfer {
    CredentialTransfer::new(FileKeychainBackend)
}

// ---------------------------------------------------------------------------
// Decrypt
// ---------------------------------------------------------------------------

#[test]
fn decrypt_exposes_plaintext_payloads_and_cleans_up() {
    let dir = TempDir::new().unwrap();
    let archive_path = build_profile(dir.path(), &ProfileFixture::default());
    let work = dir.path().join("work");

    let profile = EncryptedProfile::new(&archive_path)
        .decrypt_into(&secret(PASSWORD), &ZipProfileArchive::default(), Some(work.clone()))
        .unwrap();
    assert_eq!(profile.work_dir(), work);
    assert_eq!(profile.origin(), archive_path);

    let layout = profile.layout();
    let mut keychain = FileKeychain::open(&layout.keychain()).unwrap();
    keychain.unlock(&secret(PASSWORD)).unwrap();
    assert_eq!(keychain.secret_records().unwrap().len(), 2);
    let metadata = Value::from_file(layout.accounts()).unwrap();
    assert!(metadata.as_dictionary().unwrap().contains_key("DeveloperAccounts"));

    drop(profile);
    assert!(!work.exists());
}

#[test]
fn wrong_password_fails_and_leaves_nothing_behind() {
    let dir = TempDir::new().unwrap();
    let archive_path = build_profile(dir.path(), &ProfileFixture::default());
    let work = dir.path().join("work");

    let err = EncryptedProfile::new(&archive_path)
        .decrypt_into(&secret("not the password"), &ZipProfileArchive::default(), Some(work.clone()))
        .unwrap_err();
    assert!(matches!(err, ProfileError::Cipher(CipherError::BadPadding)));
    assert!(!work.exists());
}

#[test]
fn empty_password_is_rejected() {
    let dir = TempDir::new().unwrap();
    let archive_path = build_profile(dir.path(), &ProfileFixture::default());
    let err = EncryptedProfile::new(&archive_path)
        .decrypt_into(&secret(""), &ZipProfileArchive::default(), Some(dir.path().join("w")))
        .unwrap_err();
    assert!(matches!(err, ProfileError::KeyDerivation(_)));
}

#[test]
fn archive_name_must_carry_marker() {
    let dir = TempDir::new().unwrap();
    let archive_path = build_profile(dir.path(), &ProfileFixture::default());
    let renamed = dir.path().join("Team.zip");
    fs::rename(&archive_path, &renamed).unwrap();

    let err = EncryptedProfile::new(&renamed)
        .decrypt(&secret(PASSWORD), &ZipProfileArchive::default())
        .unwrap_err();
    assert!(matches!(err, ProfileError::NotAnArchive(p) if p == renamed));
}

#[test]
fn missing_payload_is_fatal_and_cleaned_up() {
    let dir = TempDir::new().unwrap();
    let fixture = ProfileFixture {
        with_accounts_payload: false,
        ..ProfileFixture::default()
    };
    let archive_path = build_profile(dir.path(), &fixture);
    let work = dir.path().join("work");

    let err = EncryptedProfile::new(&archive_path)
        .decrypt_into(&secret(PASSWORD), &ZipProfileArchive::default(), Some(work.clone()))
        .unwrap_err();
    assert!(matches!(err, ProfileError::MissingPayload(p) if p.ends_with("developer/accounts.plist")));
    assert!(!work.exists());
}

#[test]
fn existing_work_dir_is_replaced() {
    let dir = TempDir::new().unwrap();
    let archive_path = build_profile(dir.path(), &ProfileFixture::default());
    let work = dir.path().join("work");
    fs::create_dir_all(&work).unwrap();
    fs::write(work.join("leftover"), b"old").unwrap();

    let profile = EncryptedProfile::new(&archive_path)
        .decrypt_into(&secret(PASSWORD), &ZipProfileArchive::default(), Some(work.clone()))
        .unwrap();
    assert!(!work.join("leftover").exists());
    profile.close().unwrap();
}

#[test]
fn scoped_decrypt_removes_tree_even_when_body_fails() {
    let dir = TempDir::new().unwrap();
    let archive_path = build_profile(dir.path(), &ProfileFixture::default());
    let encrypted = EncryptedProfile::new(&archive_path);

    let mut seen = None;
    let result: Result<(), ProfileError> =
        encrypted.with_decrypted(&secret(PASSWORD), &ZipProfileArchive::default(), |profile| {
            seen = Some(profile.work_dir().to_path_buf());
            profile.validate_tokens().map(|_| ())
        });

    assert!(matches!(result, Err(ProfileError::NotImplemented(_))));
    assert!(!seen.unwrap().exists());
}

#[test]
fn persisted_tree_is_kept() {
    let dir = TempDir::new().unwrap();
    let archive_path = build_profile(dir.path(), &ProfileFixture::default());
    let profile = EncryptedProfile::new(&archive_path)
        .decrypt_into(
            &secret(PASSWORD),
            &ZipProfileArchive::default(),
            Some(dir.path().join("kept")),
        )
        .unwrap();
    let kept = profile.persist();
    assert!(kept.join("developer/accounts.plist").is_file());
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

#[test]
fn import_all_populates_every_destination() {
    let dir = TempDir::new().unwrap();
    let archive_path = build_profile(dir.path(), &ProfileFixture::default());
    let defaults = XcodeDefaults::new(dir.path().join("com.apple.dt.Xcode.plist"));
    defaults
        .store(&AccountRegistry::from_usernames(["alice@example.com"]))
        .unwrap();
    let profiles_dir = dir.path().join("Provisioning Profiles");
    let mut keychain = MemoryKeychain::new();

    let profile = EncryptedProfile::new(&archive_path)
        .decrypt(&secret(PASSWORD), &ZipProfileArchive::default())
        .unwrap();
    let report = profile
        .import_all(
            &transfer(),
            ImportDestination {
                keychain: &mut keychain,
                defaults: &defaults,
                provisioning_profiles: &profiles_dir,
            },
        )
        .unwrap();
    profile.close().unwrap();

    assert_eq!(report.tokens.transferred, 2);
    assert_eq!(report.identities.transferred, 2);
    assert_eq!(report.accounts_added, ["bob@example.com"]);
    assert_eq!(report.profiles_placed, 1);

    let records = keychain.secret_records().unwrap();
    assert!(records
        .iter()
        .any(|r| r.secret.as_slice() == b"token:alice@example.com"));
    for record in &records {
        assert_eq!(record.access.description, "Identity");
        assert!(matches!(
            record.access.entry(Authorization::Decrypt).unwrap().applications,
            ApplicationList::Trusted(ref apps) if apps.len() == 4
        ));
    }
    assert_eq!(keychain.identities().unwrap().len(), 2);
    assert_eq!(defaults.load().unwrap().len(), 2);
    assert!(profiles_dir.join("Team_Wildcard.mobileprovision").is_file());
}

#[test]
fn import_is_not_atomic() {
    let dir = TempDir::new().unwrap();
    let fixture = ProfileFixture {
        version: "2",
        ..ProfileFixture::default()
    };
    let archive_path = build_profile(dir.path(), &fixture);
    let defaults = XcodeDefaults::new(dir.path().join("com.apple.dt.Xcode.plist"));
    let profiles_dir = dir.path().join("profiles-out");
    let mut keychain = MemoryKeychain::new();

    let profile = EncryptedProfile::new(&archive_path)
        .decrypt(&secret(PASSWORD), &ZipProfileArchive::default())
        .unwrap();
    let err = profile
        .import_all(
            &transfer(),
            ImportDestination {
                keychain: &mut keychain,
                defaults: &defaults,
                provisioning_profiles: &profiles_dir,
            },
        )
        .unwrap_err();

    assert!(matches!(
        err,
        ProfileError::Accounts(AccountImportError::UnsupportedVersion(_))
    ));
    // Earlier steps stay applied; later ones never ran.
    assert_eq!(keychain.secret_records().unwrap().len(), 2);
    assert!(!defaults.path().exists());
    assert!(!profiles_dir.exists());
}

#[test]
fn import_accounts_only_touches_registry_alone() {
    let dir = TempDir::new().unwrap();
    let archive_path = build_profile(dir.path(), &ProfileFixture::default());
    let defaults = XcodeDefaults::new(dir.path().join("com.apple.dt.Xcode.plist"));

    let added = EncryptedProfile::new(&archive_path)
        .with_decrypted(&secret(PASSWORD), &ZipProfileArchive::default(), |profile| {
            profile.import_accounts_only(&defaults)
        })
        .unwrap();

    assert_eq!(added, ["alice@example.com", "bob@example.com"]);
    assert_eq!(defaults.load().unwrap().len(), 2);
}

// ---------------------------------------------------------------------------
// Re-export
// ---------------------------------------------------------------------------

#[test]
fn reexport_opens_decrypt_and_reencrypts_under_new_password() {
    let dir = TempDir::new().unwrap();
    let archive_path = build_profile(dir.path(), &ProfileFixture::default());
    let archive = ZipProfileArchive::default();

    let profile = EncryptedProfile::new(&archive_path)
        .decrypt(&secret(PASSWORD), &archive)
        .unwrap();
    assert_eq!(profile.reexport(&transfer()).unwrap(), 2);
    let work = profile.work_dir().to_path_buf();
    let reencrypted = profile.encrypt(&secret("new password"), &archive).unwrap();
    assert_eq!(reencrypted.path(), archive_path);
    assert!(!work.exists());

    assert!(matches!(
        reencrypted.decrypt(&secret(PASSWORD), &archive),
        Err(ProfileError::Cipher(_))
    ));

    let reopened = reencrypted
        .decrypt(&secret("new password"), &archive)
        .unwrap();
    let mut keychain = FileKeychain::open(&reopened.layout().keychain()).unwrap();
    keychain.unlock(&secret(PASSWORD)).unwrap();

    let original = AccessPolicy::codesigning();
    for record in keychain.secret_records().unwrap() {
        for (before, after) in original.entries.iter().zip(&record.access.entries) {
            if before.authorization == Authorization::Decrypt {
                assert_eq!(after.applications, ApplicationList::Any);
            } else {
                assert_eq!(before, after);
            }
        }
    }
}

#[test]
fn validate_tokens_is_explicitly_unimplemented() {
    let dir = TempDir::new().unwrap();
    let archive_path = build_profile(dir.path(), &ProfileFixture::default());
    let profile = EncryptedProfile::new(&archive_path)
        .decrypt(&secret(PASSWORD), &ZipProfileArchive::default())
        .unwrap();
    assert!(matches!(
        profile.validate_tokens(),
        Err(ProfileError::NotImplemented("token validation"))
    ));
}
