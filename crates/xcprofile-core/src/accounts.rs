//! Developer account metadata and the merge into Xcode's account list.
//!
//! The bundle carries a versioned property list:
//!
//! ```text
//! AccountsPlistVersion = "1"
//! DeveloperAccounts = { accounts = ( { username = "dev@example.com"; ... }, ... ) }
//! ```
//!
//! The destination is the Xcode defaults domain, where the account list lives
//! under `DVTDeveloperAccountManagerAppleIDLists` → `IDE.Prod`. Merging is a
//! set union by username: existing entries are never removed or rewritten.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use plist::{Dictionary, Value};

use crate::error::AccountImportError;
use crate::fsio;

/// The only account metadata version understood.
pub const SUPPORTED_VERSION: &str = "1";

const VERSION_KEY: &str = "AccountsPlistVersion";
const DEVELOPER_ACCOUNTS_KEY: &str = "DeveloperAccounts";
const ACCOUNT_LIST_KEY: &str = "accounts";
const USERNAME_KEY: &str = "username";

/// Xcode defaults domain.
pub const XCODE_DOMAIN: &str = "com.apple.dt.Xcode";
const APPLE_ID_LISTS_KEY: &str = "DVTDeveloperAccountManagerAppleIDLists";
const PRODUCTION_LIST_KEY: &str = "IDE.Prod";

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// One developer account. Fields other than `username` are carried through
/// untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountEntry {
    pub username: String,
    pub extra: Dictionary,
}

impl AccountEntry {
    #[must_use]
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            extra: Dictionary::new(),
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        let dict = value.as_dictionary()?;
        let username = dict.get(USERNAME_KEY)?.as_string()?.to_string();
        let mut extra = dict.clone();
        extra.remove(USERNAME_KEY);
        Some(Self { username, extra })
    }

    fn to_value(&self) -> Value {
        let mut dict = self.extra.clone();
        dict.insert(USERNAME_KEY.to_string(), Value::String(self.username.clone()));
        Value::Dictionary(dict)
    }
}

/// Ordered set of accounts, unique by username.
///
/// A registry loaded from a defaults file also keeps that file's list
/// verbatim: duplicate usernames and elements that are not account
/// dictionaries stay where they were, and new accounts are appended.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountRegistry {
    entries: Vec<AccountEntry>,
    items: Vec<Value>,
}

impl AccountRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from entries; later duplicates of a username are dropped.
    pub fn from_entries(entries: impl IntoIterator<Item = AccountEntry>) -> Self {
        let mut registry = Self::new();
        for entry in entries {
            registry.insert(entry);
        }
        registry
    }

    /// Registry of bare entries for `usernames`.
    pub fn from_usernames<S: Into<String>>(usernames: impl IntoIterator<Item = S>) -> Self {
        Self::from_entries(usernames.into_iter().map(AccountEntry::new))
    }

    fn from_list(list: &[Value]) -> Self {
        let mut entries: Vec<AccountEntry> = Vec::new();
        for entry in list.iter().filter_map(AccountEntry::from_value) {
            if !entries.iter().any(|e| e.username == entry.username) {
                entries.push(entry);
            }
        }
        Self {
            entries,
            items: list.to_vec(),
        }
    }

    fn to_list(&self) -> Vec<Value> {
        self.items.clone()
    }

    #[must_use]
    pub fn contains(&self, username: &str) -> bool {
        self.entries.iter().any(|e| e.username == username)
    }

    /// Add `entry` unless its username is present. Returns whether it was added.
    pub fn insert(&mut self, entry: AccountEntry) -> bool {
        if self.contains(&entry.username) {
            return false;
        }
        self.items.push(entry.to_value());
        self.entries.push(entry);
        true
    }

    #[must_use]
    pub fn entries(&self) -> &[AccountEntry] {
        &self.entries
    }

    #[must_use]
    pub fn usernames(&self) -> BTreeSet<&str> {
        self.entries.iter().map(|e| e.username.as_str()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add a bare entry for every username of `other` not already present.
    /// Returns the added usernames, sorted.
    pub fn union_with(&mut self, other: &Self) -> Vec<String> {
        let missing: BTreeSet<String> = other
            .usernames()
            .into_iter()
            .filter(|name| !self.contains(name))
            .map(str::to_string)
            .collect();
        for name in &missing {
            self.insert(AccountEntry::new(name.clone()));
        }
        missing.into_iter().collect()
    }
}

/// Merge `bundle` into `destination` by username. Applying the same bundle
/// twice leaves `destination` as after the first application.
pub fn apply(bundle: &AccountRegistry, destination: &mut AccountRegistry) -> Vec<String> {
    destination.union_with(bundle)
}

// ---------------------------------------------------------------------------
// Bundle metadata
// ---------------------------------------------------------------------------

/// Validate and extract the account list of a bundle's metadata.
///
/// # Errors
///
/// [`AccountImportError::UnsupportedVersion`] unless the version tag is
/// exactly [`SUPPORTED_VERSION`]; [`AccountImportError::MissingAccounts`]
/// when `DeveloperAccounts.accounts` is absent or not a list.
pub fn parse_bundle_accounts(metadata: &Value) -> Result<AccountRegistry, AccountImportError> {
    let root = metadata
        .as_dictionary()
        .ok_or_else(|| AccountImportError::MetadataUnreadable("root is not a dictionary".into()))?;

    let version = root.get(VERSION_KEY).and_then(Value::as_string);
    if version != Some(SUPPORTED_VERSION) {
        return Err(AccountImportError::UnsupportedVersion(
            version.map(str::to_string),
        ));
    }

    let list = root
        .get(DEVELOPER_ACCOUNTS_KEY)
        .and_then(Value::as_dictionary)
        .and_then(|d| d.get(ACCOUNT_LIST_KEY))
        .and_then(Value::as_array)
        .ok_or(AccountImportError::MissingAccounts)?;

    let entries: Vec<AccountEntry> = list.iter().filter_map(AccountEntry::from_value).collect();
    let ignored = list.len().saturating_sub(entries.len());
    if ignored > 0 {
        tracing::warn!(ignored, "account metadata has entries without a username");
    }
    Ok(AccountRegistry::from_entries(entries))
}

/// [`parse_bundle_accounts`] on a file.
///
/// # Errors
///
/// [`AccountImportError::MetadataUnreadable`] if the file is not a property
/// list, plus the errors of [`parse_bundle_accounts`].
pub fn read_bundle_accounts(path: &Path) -> Result<AccountRegistry, AccountImportError> {
    let metadata = Value::from_file(path)
        .map_err(|e| AccountImportError::MetadataUnreadable(format!("{}: {e}", path.display())))?;
    parse_bundle_accounts(&metadata)
}

// ---------------------------------------------------------------------------
// Destination registry
// ---------------------------------------------------------------------------

/// The Xcode defaults property list holding the account registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XcodeDefaults {
    path: PathBuf,
}

impl XcodeDefaults {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/Library/Preferences/com.apple.dt.Xcode.plist` for the current user.
    #[must_use]
    pub fn user_default() -> Option<Self> {
        dirs::home_dir().map(|home| {
            Self::new(
                home.join("Library/Preferences")
                    .join(format!("{XCODE_DOMAIN}.plist")),
            )
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_root(&self) -> Result<Dictionary, AccountImportError> {
        if !self.path.exists() {
            return Ok(Dictionary::new());
        }
        let value = Value::from_file(&self.path).map_err(|e| {
            AccountImportError::RegistryUnreadable(format!("{}: {e}", self.path.display()))
        })?;
        value.into_dictionary().ok_or_else(|| {
            AccountImportError::RegistryUnreadable(format!(
                "{}: root is not a dictionary",
                self.path.display()
            ))
        })
    }

    fn unreadable(&self, what: &str) -> AccountImportError {
        AccountImportError::RegistryUnreadable(format!("{}: {what}", self.path.display()))
    }

    /// The account list dictionary and its production list, each `None` when
    /// absent. A key holding the wrong type is an error, never an empty list.
    fn production_list<'a>(
        &self,
        root: &'a Dictionary,
    ) -> Result<(Option<&'a Dictionary>, Option<&'a Vec<Value>>), AccountImportError> {
        let Some(lists) = root.get(APPLE_ID_LISTS_KEY) else {
            return Ok((None, None));
        };
        let lists = lists
            .as_dictionary()
            .ok_or_else(|| self.unreadable(&format!("{APPLE_ID_LISTS_KEY} is not a dictionary")))?;
        let list = match lists.get(PRODUCTION_LIST_KEY) {
            None => None,
            Some(value) => Some(value.as_array().ok_or_else(|| {
                self.unreadable(&format!("{PRODUCTION_LIST_KEY} is not an array"))
            })?),
        };
        Ok((Some(lists), list))
    }

    /// Current account registry. A missing file or key is an empty registry.
    ///
    /// # Errors
    ///
    /// [`AccountImportError::RegistryUnreadable`] for an unparseable file or
    /// an account list key of the wrong type.
    pub fn load(&self) -> Result<AccountRegistry, AccountImportError> {
        let root = self.read_root()?;
        let (_, list) = self.production_list(&root)?;
        Ok(list.map_or_else(AccountRegistry::new, |l| AccountRegistry::from_list(l)))
    }

    /// Write `registry` as the production account list, keeping every other
    /// key of the defaults file.
    ///
    /// # Errors
    ///
    /// [`AccountImportError::RegistryUnreadable`] if the existing file cannot
    /// be parsed or its account list has the wrong shape,
    /// [`AccountImportError::RegistryWrite`] if writing fails.
    pub fn store(&self, registry: &AccountRegistry) -> Result<(), AccountImportError> {
        let mut root = self.read_root()?;

        let mut lists = self.production_list(&root)?.0.cloned().unwrap_or_default();
        lists.insert(
            PRODUCTION_LIST_KEY.to_string(),
            Value::Array(registry.to_list()),
        );
        root.insert(APPLE_ID_LISTS_KEY.to_string(), Value::Dictionary(lists));

        let mut buf = Vec::new();
        Value::Dictionary(root)
            .to_writer_binary(&mut buf)
            .map_err(|e| AccountImportError::RegistryWrite(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AccountImportError::RegistryWrite(e.to_string()))?;
        }
        fsio::write_atomic(&self.path, &buf, false).map_err(|e| {
            AccountImportError::RegistryWrite(format!("{}: {e}", self.path.display()))
        })
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Merges a bundle's account metadata into an [`XcodeDefaults`] registry.
#[derive(Debug, Clone)]
pub struct AccountSettingsMerge {
    defaults: XcodeDefaults,
}

impl AccountSettingsMerge {
    #[must_use]
    pub const fn new(defaults: XcodeDefaults) -> Self {
        Self { defaults }
    }

    /// Validate `metadata`, union its accounts into the registry, and persist
    /// the registry if anything was added. Returns the added usernames.
    ///
    /// # Errors
    ///
    /// Any [`AccountImportError`]; on error the registry file is untouched.
    pub fn run(&self, metadata: &Path) -> Result<Vec<String>, AccountImportError> {
        let bundle = read_bundle_accounts(metadata)?;
        let mut registry = self.defaults.load()?;

        let added = apply(&bundle, &mut registry);
        if added.is_empty() {
            tracing::info!("no new developer accounts, nothing to merge");
            return Ok(added);
        }

        self.defaults.store(&registry)?;
        tracing::info!(
            accounts = ?added,
            registry = %self.defaults.path().display(),
            "merged developer accounts"
        );
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(version: Option<&str>, usernames: &[&str]) -> Value {
        let accounts: Vec<Value> = usernames
            .iter()
            .map(|u| {
                let mut d = Dictionary::new();
                d.insert(USERNAME_KEY.into(), Value::String((*u).into()));
                Value::Dictionary(d)
            })
            .collect();
        let mut developer = Dictionary::new();
        developer.insert(ACCOUNT_LIST_KEY.into(), Value::Array(accounts));
        let mut root = Dictionary::new();
        if let Some(v) = version {
            root.insert(VERSION_KEY.into(), Value::String(v.into()));
        }
        root.insert(DEVELOPER_ACCOUNTS_KEY.into(), Value::Dictionary(developer));
        Value::Dictionary(root)
    }

    #[test]
    fn union_adds_only_missing_usernames() {
        let mut dest = AccountRegistry::from_usernames(["alice"]);
        let bundle = AccountRegistry::from_usernames(["bob", "alice", "carol"]);
        assert_eq!(apply(&bundle, &mut dest), ["bob", "carol"]);
        assert_eq!(dest.usernames(), BTreeSet::from(["alice", "bob", "carol"]));
        assert!(apply(&bundle, &mut dest).is_empty());
    }

    #[test]
    fn existing_entry_fields_are_kept() {
        let mut alice = AccountEntry::new("alice");
        alice
            .extra
            .insert("identifier".into(), Value::String("A1".into()));
        let mut dest = AccountRegistry::from_entries([alice.clone()]);
        apply(&AccountRegistry::from_usernames(["alice"]), &mut dest);
        assert_eq!(dest.entries(), [alice]);
    }

    #[test]
    fn version_gate() {
        let err = parse_bundle_accounts(&metadata(Some("2"), &["alice"])).unwrap_err();
        assert!(matches!(err, AccountImportError::UnsupportedVersion(Some(v)) if v == "2"));
        let err = parse_bundle_accounts(&metadata(None, &["alice"])).unwrap_err();
        assert!(matches!(err, AccountImportError::UnsupportedVersion(None)));
    }

    #[test]
    fn missing_account_list() {
        let mut root = Dictionary::new();
        root.insert(VERSION_KEY.into(), Value::String("1".into()));
        let err = parse_bundle_accounts(&Value::Dictionary(root)).unwrap_err();
        assert!(matches!(err, AccountImportError::MissingAccounts));
    }

    #[test]
    fn parse_skips_entries_without_username() {
        let mut value = metadata(Some("1"), &["alice"]);
        value
            .as_dictionary_mut()
            .and_then(|d| d.get_mut(DEVELOPER_ACCOUNTS_KEY))
            .and_then(Value::as_dictionary_mut)
            .and_then(|d| d.get_mut(ACCOUNT_LIST_KEY))
            .and_then(Value::as_array_mut)
            .unwrap()
            .push(Value::String("stray".into()));
        let registry = parse_bundle_accounts(&value).unwrap();
        assert_eq!(registry.usernames(), BTreeSet::from(["alice"]));
    }

    #[test]
    fn defaults_roundtrip_preserves_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("com.apple.dt.Xcode.plist");
        let mut root = Dictionary::new();
        root.insert("IDEIndexDisable".into(), Value::Boolean(true));
        Value::Dictionary(root).to_file_binary(&path).unwrap();

        let defaults = XcodeDefaults::new(&path);
        assert!(defaults.load().unwrap().is_empty());
        defaults
            .store(&AccountRegistry::from_usernames(["alice"]))
            .unwrap();

        let reread = Value::from_file(&path).unwrap();
        let reread = reread.as_dictionary().unwrap();
        assert_eq!(reread.get("IDEIndexDisable"), Some(&Value::Boolean(true)));
        assert_eq!(
            defaults.load().unwrap().usernames(),
            BTreeSet::from(["alice"])
        );
    }

    #[test]
    fn loaded_list_is_written_back_verbatim() {
        let mut alice = Dictionary::new();
        alice.insert(USERNAME_KEY.into(), Value::String("alice".into()));
        let list = vec![
            Value::Dictionary(alice.clone()),
            Value::Boolean(false),
            Value::Dictionary(alice),
        ];
        let mut registry = AccountRegistry::from_list(&list);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.to_list(), list);

        assert_eq!(registry.union_with(&AccountRegistry::from_usernames(["bob"])), ["bob"]);
        let written = registry.to_list();
        assert_eq!(written.len(), 4);
        assert_eq!(&written[..3], list.as_slice());
    }

    #[test]
    fn missing_defaults_file_is_empty_registry() {
        let dir = tempfile::tempdir().unwrap();
        let defaults = XcodeDefaults::new(dir.path().join("absent.plist"));
        assert!(defaults.load().unwrap().is_empty());
    }
}
