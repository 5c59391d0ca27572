//! Wallet provisioning for mining identities
//!
//! The miner never holds keys itself. A [`WalletProvisioner`] hands out the
//! address of each identity's wallet and the signature it produced over the
//! service's terms message. The bundled [`CredentialFile`] reads both from a
//! JSON file prepared ahead of time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::identity::{Identity, IdentityId};

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("No wallet credentials for identity {0}")]
    Missing(IdentityId),

    #[error("Wallet provisioning failed: {0}")]
    Provisioning(String),

    #[error("File I/O error: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Invalid wallet file format: {0}")]
    InvalidFormat(#[from] serde_json::Error),
}

/// Address plus the signing material registration needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletCredentials {
    pub address: String,
    pub signature: String,
    pub public_key: String,
}

#[async_trait]
pub trait WalletProvisioner: Send + Sync {
    /// Create or recover the identity's wallet and return its address
    async fn provision(&self, identity: &Identity) -> Result<String, WalletError>;

    /// Credentials for registering with the service, signed over `message`
    async fn sign(&self, identity: &Identity, message: &str)
        -> Result<WalletCredentials, WalletError>;

    /// Open the wallet session used while the identity runs
    async fn open(&self, identity: &Identity) -> Result<(), WalletError>;

    async fn close(&self, identity: &Identity) -> Result<(), WalletError>;
}

/// Pre-signed credentials keyed by identity id
pub struct CredentialFile {
    path: PathBuf,
    entries: BTreeMap<IdentityId, WalletCredentials>,
}

impl CredentialFile {
    pub fn load(path: &Path) -> Result<Self, WalletError> {
        let entries = match fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, id: IdentityId) -> Result<&WalletCredentials, WalletError> {
        self.entries.get(&id).ok_or(WalletError::Missing(id))
    }
}

#[async_trait]
impl WalletProvisioner for CredentialFile {
    async fn provision(&self, identity: &Identity) -> Result<String, WalletError> {
        let entry = self.entry(identity.id)?;
        if entry.address.trim().is_empty() {
            return Err(WalletError::Provisioning(format!(
                "empty address for identity {}",
                identity.id
            )));
        }
        info!(identity = identity.id, address = %entry.address, "wallet ready");
        Ok(entry.address.clone())
    }

    async fn sign(
        &self,
        identity: &Identity,
        message: &str,
    ) -> Result<WalletCredentials, WalletError> {
        let entry = self.entry(identity.id)?;
        if entry.signature.is_empty() || entry.public_key.is_empty() {
            return Err(WalletError::Provisioning(format!(
                "identity {} has no signature on file",
                identity.id
            )));
        }
        debug!(identity = identity.id, message_len = message.len(), "using stored signature");
        Ok(entry.clone())
    }

    async fn open(&self, identity: &Identity) -> Result<(), WalletError> {
        self.entry(identity.id).map(|_| ())
    }

    async fn close(&self, identity: &Identity) -> Result<(), WalletError> {
        debug!(identity = identity.id, "wallet session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn credential_file(json: &str) -> (NamedTempFile, CredentialFile) {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        let credentials = CredentialFile::load(file.path()).unwrap();
        (file, credentials)
    }

    #[tokio::test]
    async fn test_provision_and_sign() {
        let (_file, wallet) = credential_file(
            r#"{ "1": { "address": "addr1", "signature": "sig1", "public_key": "pk1" } }"#,
        );
        let identity = Identity::new(1, "alpha");

        assert_eq!(wallet.len(), 1);
        assert_eq!(wallet.provision(&identity).await.unwrap(), "addr1");
        let credentials = wallet.sign(&identity, "I agree").await.unwrap();
        assert_eq!(credentials.signature, "sig1");
        assert!(wallet.open(&identity).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_identity() {
        let (_file, wallet) = credential_file("{}");
        let identity = Identity::new(9, "nobody");

        assert!(wallet.is_empty());
        assert!(matches!(
            wallet.provision(&identity).await,
            Err(WalletError::Missing(9))
        ));
    }

    #[tokio::test]
    async fn test_unsigned_entry() {
        let (_file, wallet) = credential_file(
            r#"{ "2": { "address": "addr2", "signature": "", "public_key": "" } }"#,
        );
        let identity = Identity::new(2, "beta");

        assert!(wallet.provision(&identity).await.is_ok());
        assert!(matches!(
            wallet.sign(&identity, "msg").await,
            Err(WalletError::Provisioning(_))
        ));
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = CredentialFile::load(&dir.path().join("wallets.json")).unwrap();
        assert!(wallet.is_empty());
    }

    #[test]
    fn test_invalid_format() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[1, 2").unwrap();
        assert!(matches!(
            CredentialFile::load(file.path()),
            Err(WalletError::InvalidFormat(_))
        ));
    }
}
