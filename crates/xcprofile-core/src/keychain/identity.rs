//! Signing identities decoded from PKCS#12 containers.

use std::fmt;

use data_encoding::HEXLOWER;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::{AccessPolicy, RecordId};
use crate::error::StoreError;

/// A certificate paired with its private key.
#[derive(Clone)]
pub struct Identity {
    /// Lowercase hex SHA-256 of the leaf certificate DER.
    pub id: RecordId,
    /// Leaf certificate, DER.
    pub certificate: Vec<u8>,
    /// PKCS#8 private key, DER.
    pub private_key: Zeroizing<Vec<u8>>,
    pub access: AccessPolicy,
}

impl Identity {
    /// Decode the first key and certificate of a PKCS#12 container.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidIdentity`] when the container does not parse, the
    /// passphrase fails the MAC check, or either bag is empty.
    pub fn from_pkcs12(
        container: &[u8],
        passphrase: &SecretString,
        access: AccessPolicy,
    ) -> Result<Self, StoreError> {
        let password = passphrase.expose_secret();
        let pfx = p12::PFX::parse(container)
            .map_err(|e| StoreError::InvalidIdentity(format!("failed to parse PKCS#12: {e:?}")))?;

        if !pfx.verify_mac(password) {
            return Err(StoreError::InvalidIdentity(
                "passphrase does not match container".into(),
            ));
        }

        let keys = pfx
            .key_bags(password)
            .map_err(|e| StoreError::InvalidIdentity(format!("failed to read key bags: {e:?}")))?;
        let certs = pfx.cert_x509_bags(password).map_err(|e| {
            StoreError::InvalidIdentity(format!("failed to read certificate bags: {e:?}"))
        })?;

        let certificate = certs
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::InvalidIdentity("no certificate in container".into()))?;
        let private_key = keys
            .into_iter()
            .next()
            .map(Zeroizing::new)
            .ok_or_else(|| StoreError::InvalidIdentity("no private key in container".into()))?;

        Ok(Self {
            id: certificate_id(&certificate),
            certificate,
            private_key,
            access,
        })
    }
}

/// Stable identifier of a certificate.
#[must_use]
pub fn certificate_id(der: &[u8]) -> RecordId {
    RecordId(HEXLOWER.encode(&Sha256::digest(der)))
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("certificate_len", &self.certificate.len())
            .field("private_key", &"***")
            .field("access", &self.access)
            .finish()
    }
}
