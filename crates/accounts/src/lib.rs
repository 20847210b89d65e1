//! Per-account credential and state directories.
//!
//! Accounts live under `{state_dir}/accounts/`: an `index.json` listing
//! account metadata plus one directory per account holding `setup.json`
//! (key material, proxy address, signature type) at mode 0600. All
//! rewrites are atomic. The `default` account always exists and the last
//! remaining account cannot be deleted.

use anyhow::Context;
use chrono::{DateTime, Utc};
use polytrade_core::JsonStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// The account that always exists.
pub const DEFAULT_ACCOUNT_ID: &str = "default";

/// Errors from account management.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("account not found: {0}")]
    NotFound(String),

    #[error("account already exists: {0}")]
    AlreadyExists(String),

    #[error("cannot delete the last account")]
    LastAccount,

    #[error("cannot delete the default account while it is the only one")]
    DefaultProtected,

    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// Account metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Contents of an account's `setup.json`.
///
/// The key material arrives opaque; the keystore layer above decides
/// whether it is encrypted. Signature type keeps the exchange's numeric
/// encoding (0 = EOA, 1 = proxy, 2 = gnosis-safe proxy).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountSetup {
    pub private_key: String,
    pub proxy_address: Option<String>,
    pub signature_type: u8,
}

/// The account manager over one state directory.
#[derive(Debug, Clone)]
pub struct AccountManager {
    accounts_dir: PathBuf,
    index: JsonStore,
}

impl AccountManager {
    /// Opens (and initializes) the account store under `state_dir`.
    ///
    /// The default account is created when missing.
    pub fn open(state_dir: impl AsRef<Path>) -> Result<Self, AccountError> {
        let accounts_dir = state_dir.as_ref().join("accounts");
        std::fs::create_dir_all(&accounts_dir)
            .with_context(|| format!("creating {}", accounts_dir.display()))?;
        let manager = Self {
            index: JsonStore::with_path(accounts_dir.join("index.json")),
            accounts_dir,
        };

        let mut index = manager.load_index()?;
        if !index.contains_key(DEFAULT_ACCOUNT_ID) {
            let now = Utc::now();
            index.insert(
                DEFAULT_ACCOUNT_ID.to_string(),
                Account {
                    id: DEFAULT_ACCOUNT_ID.to_string(),
                    name: "Default".to_string(),
                    created_at: now,
                    updated_at: now,
                },
            );
            manager.save_index(&index)?;
            info!("created default account");
        }
        Ok(manager)
    }

    fn load_index(&self) -> Result<BTreeMap<String, Account>, AccountError> {
        Ok(self.index.load()?)
    }

    fn save_index(&self, index: &BTreeMap<String, Account>) -> Result<(), AccountError> {
        Ok(self.index.save(index)?)
    }

    /// All accounts, id-ordered.
    pub fn list(&self) -> Result<Vec<Account>, AccountError> {
        Ok(self.load_index()?.into_values().collect())
    }

    /// One account by id.
    pub fn get(&self, id: &str) -> Result<Account, AccountError> {
        self.load_index()?
            .remove(id)
            .ok_or_else(|| AccountError::NotFound(id.to_string()))
    }

    /// Creates a new account with a generated id.
    pub fn create(&self, name: &str) -> Result<Account, AccountError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.create_with_id(&id, name)
    }

    /// Creates an account with an explicit id.
    pub fn create_with_id(&self, id: &str, name: &str) -> Result<Account, AccountError> {
        let mut index = self.load_index()?;
        if index.contains_key(id) {
            return Err(AccountError::AlreadyExists(id.to_string()));
        }
        let now = Utc::now();
        let account = Account {
            id: id.to_string(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };
        index.insert(id.to_string(), account.clone());
        self.save_index(&index)?;
        info!(id, name, "account created");
        Ok(account)
    }

    /// Renames an account.
    pub fn rename(&self, id: &str, name: &str) -> Result<Account, AccountError> {
        let mut index = self.load_index()?;
        let account = index
            .get_mut(id)
            .ok_or_else(|| AccountError::NotFound(id.to_string()))?;
        account.name = name.to_string();
        account.updated_at = Utc::now();
        let updated = account.clone();
        self.save_index(&index)?;
        Ok(updated)
    }

    /// Deletes an account and its directory. The last remaining account
    /// (and in particular a lone default) cannot be deleted.
    pub fn delete(&self, id: &str) -> Result<(), AccountError> {
        let mut index = self.load_index()?;
        if !index.contains_key(id) {
            return Err(AccountError::NotFound(id.to_string()));
        }
        if index.len() == 1 {
            return Err(if id == DEFAULT_ACCOUNT_ID {
                AccountError::DefaultProtected
            } else {
                AccountError::LastAccount
            });
        }
        index.remove(id);
        self.save_index(&index)?;

        let dir = self.account_dir(id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)
                .with_context(|| format!("removing {}", dir.display()))?;
        }
        info!(id, "account deleted");
        Ok(())
    }

    /// The account's state directory.
    #[must_use]
    pub fn account_dir(&self, id: &str) -> PathBuf {
        self.accounts_dir.join(id)
    }

    /// Writes `setup.json` atomically at mode 0600.
    pub fn write_setup(&self, id: &str, setup: &AccountSetup) -> Result<(), AccountError> {
        // Existence check keeps stray ids from creating orphan dirs.
        self.get(id)?;
        let path = self.account_dir(id).join("setup.json");
        let store = JsonStore::with_path(&path);
        store.save(setup)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("chmod {}", path.display()))?;
        }
        Ok(())
    }

    /// Reads `setup.json`; `None` when the account has no credentials yet.
    pub fn read_setup(&self, id: &str) -> Result<Option<AccountSetup>, AccountError> {
        self.get(id)?;
        let path = self.account_dir(id).join("setup.json");
        if !path.exists() {
            return Ok(None);
        }
        let setup: AccountSetup = JsonStore::with_path(&path).load_required()?;
        Ok(Some(setup))
    }
}
