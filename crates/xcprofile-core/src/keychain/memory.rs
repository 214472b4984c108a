//! In-memory keychain.

use secrecy::{ExposeSecret, SecretString};

use super::identity::Identity;
use super::{AccessPolicy, CredentialRecord, Keychain, RecordId};
use crate::error::StoreError;

/// Keychain that lives only as long as the value. Useful as an import
/// destination in tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryKeychain {
    password: Option<SecretString>,
    unlocked: bool,
    records: Vec<CredentialRecord>,
    identities: Vec<Identity>,
    next_id: u64,
}

impl MemoryKeychain {
    /// An empty, unlocked keychain with no password.
    #[must_use]
    pub fn new() -> Self {
        Self {
            unlocked: true,
            ..Self::default()
        }
    }

    /// An empty keychain that must be unlocked with `password` first.
    #[must_use]
    pub fn with_password(password: SecretString) -> Self {
        Self {
            password: Some(password),
            ..Self::default()
        }
    }

    pub fn lock(&mut self) {
        self.unlocked = self.password.is_none();
    }

    fn ensure_unlocked(&self) -> Result<(), StoreError> {
        if self.unlocked {
            Ok(())
        } else {
            Err(StoreError::Locked)
        }
    }

    fn allocate_id(&mut self) -> RecordId {
        self.next_id = self.next_id.saturating_add(1);
        RecordId(format!("mem-{}", self.next_id))
    }
}

impl Keychain for MemoryKeychain {
    fn unlock(&mut self, password: &SecretString) -> Result<(), StoreError> {
        match &self.password {
            Some(expected) if expected.expose_secret() != password.expose_secret() => {
                Err(StoreError::CannotUnlock("incorrect password".into()))
            }
            _ => {
                self.unlocked = true;
                Ok(())
            }
        }
    }

    fn secret_records(&self) -> Result<Vec<CredentialRecord>, StoreError> {
        self.ensure_unlocked()?;
        Ok(self.records.clone())
    }

    fn add_record(
        &mut self,
        record: &CredentialRecord,
        access: &AccessPolicy,
    ) -> Result<RecordId, StoreError> {
        self.ensure_unlocked()?;
        if self.records.iter().any(|r| r.item_key() == record.item_key()) {
            return Err(StoreError::DuplicateItem(format!(
                "{}/{}",
                record.service, record.account
            )));
        }
        let id = self.allocate_id();
        let mut stored = record.clone();
        stored.id = id.clone();
        stored.access = access.clone();
        self.records.push(stored);
        Ok(id)
    }

    fn import_identity(
        &mut self,
        container: &[u8],
        passphrase: &SecretString,
        access: &AccessPolicy,
    ) -> Result<RecordId, StoreError> {
        self.ensure_unlocked()?;
        let identity = Identity::from_pkcs12(container, passphrase, access.clone())?;
        if self.identities.iter().any(|i| i.id == identity.id) {
            return Err(StoreError::DuplicateItem(format!("identity {}", identity.id)));
        }
        let id = identity.id.clone();
        self.identities.push(identity);
        Ok(id)
    }

    fn identities(&self) -> Result<Vec<Identity>, StoreError> {
        self.ensure_unlocked()?;
        Ok(self.identities.clone())
    }

    fn access_policy(&self, id: &RecordId) -> Result<AccessPolicy, StoreError> {
        self.records
            .iter()
            .find(|r| &r.id == id)
            .map(|r| r.access.clone())
            .or_else(|| {
                self.identities
                    .iter()
                    .find(|i| &i.id == id)
                    .map(|i| i.access.clone())
            })
            .ok_or_else(|| StoreError::RecordNotFound(id.to_string()))
    }

    fn set_access_policy(
        &mut self,
        id: &RecordId,
        access: AccessPolicy,
    ) -> Result<(), StoreError> {
        self.ensure_unlocked()?;
        if let Some(record) = self.records.iter_mut().find(|r| &r.id == id) {
            record.access = access;
            return Ok(());
        }
        if let Some(identity) = self.identities.iter_mut().find(|i| &i.id == id) {
            identity.access = access;
            return Ok(());
        }
        Err(StoreError::RecordNotFound(id.to_string()))
    }
}
