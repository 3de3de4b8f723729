//! Credential storage for huddle clients.
//!
//! A backend hands out two bearer tokens, an access token and an optional
//! refresh token. [`CredentialStore`] keeps them per service name, keyed by
//! [`TokenKind`]. Shells pick an in-memory store for tests, a JSON file, or
//! the OS keyring (`os-keyring` feature). [`TokenVault`] is the pair view the
//! REST client reads from.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, RwLock},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Atomic JSON persistence helpers and the file-backed store.
pub mod file;
/// Access/refresh token pair on top of a credential store.
pub mod vault;

pub use file::{FileCredentialStore, PersistError, clear_json, load_json, save_json_atomic};
pub use vault::{TokenPair, TokenVault};

/// Which of the two backend tokens an entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub const ALL: [TokenKind; 2] = [TokenKind::Access, TokenKind::Refresh];

    /// Account name used for keyring entries.
    pub fn account(self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.account())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
    #[error("credential store backend failure: {0}")]
    Backend(String),
}

/// Token storage scoped by service name.
///
/// An absent token is `Ok(None)`, never an error, and removing an absent
/// token succeeds.
pub trait CredentialStore: Send + Sync {
    fn store_token(&self, service: &str, kind: TokenKind, token: &str)
    -> Result<(), CredentialError>;

    fn load_token(&self, service: &str, kind: TokenKind) -> Result<Option<String>, CredentialError>;

    fn remove_token(&self, service: &str, kind: TokenKind) -> Result<(), CredentialError>;
}

/// Tokens held for one service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ServiceTokens {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh: Option<String>,
}

impl ServiceTokens {
    pub(crate) fn get(&self, kind: TokenKind) -> Option<&String> {
        match kind {
            TokenKind::Access => self.access.as_ref(),
            TokenKind::Refresh => self.refresh.as_ref(),
        }
    }

    pub(crate) fn slot(&mut self, kind: TokenKind) -> &mut Option<String> {
        match kind {
            TokenKind::Access => &mut self.access,
            TokenKind::Refresh => &mut self.refresh,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.access.is_none() && self.refresh.is_none()
    }
}

fn poisoned<T>(_: T) -> CredentialError {
    CredentialError::Backend("poisoned lock".to_owned())
}

/// Process-local store; tokens vanish on exit. Clones share storage.
#[derive(Clone, Default)]
pub struct MemoryCredentialStore {
    services: Arc<RwLock<HashMap<String, ServiceTokens>>>,
}

impl CredentialStore for MemoryCredentialStore {
    fn store_token(
        &self,
        service: &str,
        kind: TokenKind,
        token: &str,
    ) -> Result<(), CredentialError> {
        let mut services = self.services.write().map_err(poisoned)?;
        *services.entry(service.to_owned()).or_default().slot(kind) = Some(token.to_owned());
        Ok(())
    }

    fn load_token(
        &self,
        service: &str,
        kind: TokenKind,
    ) -> Result<Option<String>, CredentialError> {
        let services = self.services.read().map_err(poisoned)?;
        Ok(services
            .get(service)
            .and_then(|tokens| tokens.get(kind))
            .cloned())
    }

    fn remove_token(&self, service: &str, kind: TokenKind) -> Result<(), CredentialError> {
        let mut services = self.services.write().map_err(poisoned)?;
        if let Some(tokens) = services.get_mut(service) {
            tokens.slot(kind).take();
            if tokens.is_empty() {
                services.remove(service);
            }
        }
        Ok(())
    }
}

/// OS keyring store. One entry per service and [`TokenKind::account`].
#[cfg(feature = "os-keyring")]
#[derive(Default, Clone, Copy)]
pub struct KeyringCredentialStore;

#[cfg(feature = "os-keyring")]
impl KeyringCredentialStore {
    fn entry(service: &str, kind: TokenKind) -> Result<keyring::Entry, CredentialError> {
        keyring::Entry::new(service, kind.account()).map_err(map_keyring_error)
    }
}

#[cfg(feature = "os-keyring")]
fn map_keyring_error(err: keyring::Error) -> CredentialError {
    match err {
        keyring::Error::NoStorageAccess(inner) => CredentialError::Unavailable(inner.to_string()),
        other => CredentialError::Backend(other.to_string()),
    }
}

#[cfg(feature = "os-keyring")]
impl CredentialStore for KeyringCredentialStore {
    fn store_token(
        &self,
        service: &str,
        kind: TokenKind,
        token: &str,
    ) -> Result<(), CredentialError> {
        Self::entry(service, kind)?
            .set_password(token)
            .map_err(map_keyring_error)
    }

    fn load_token(
        &self,
        service: &str,
        kind: TokenKind,
    ) -> Result<Option<String>, CredentialError> {
        match Self::entry(service, kind)?.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(map_keyring_error(err)),
        }
    }

    fn remove_token(&self, service: &str, kind: TokenKind) -> Result<(), CredentialError> {
        match Self::entry(service, kind)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(map_keyring_error(err)),
        }
    }
}
