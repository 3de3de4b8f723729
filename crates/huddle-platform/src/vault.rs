use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{CredentialError, CredentialStore, TokenKind};

/// `POST /api/token/` response body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenPair {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

/// Access/refresh tokens for one backend, scoped under a service name.
#[derive(Clone)]
pub struct TokenVault {
    store: Arc<dyn CredentialStore>,
    service: String,
}

impl TokenVault {
    pub fn new(store: Arc<dyn CredentialStore>, service: impl Into<String>) -> Self {
        Self {
            store,
            service: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Replace the stored pair. A pair without a refresh token drops the old one.
    pub fn save(&self, tokens: &TokenPair) -> Result<(), CredentialError> {
        self.store
            .store_token(&self.service, TokenKind::Access, &tokens.access)?;
        match &tokens.refresh {
            Some(refresh) => self
                .store
                .store_token(&self.service, TokenKind::Refresh, refresh),
            None => self.store.remove_token(&self.service, TokenKind::Refresh),
        }
    }

    pub fn token(&self, kind: TokenKind) -> Result<Option<String>, CredentialError> {
        self.store.load_token(&self.service, kind)
    }

    pub fn access_token(&self) -> Result<Option<String>, CredentialError> {
        self.token(TokenKind::Access)
    }

    pub fn refresh_token(&self) -> Result<Option<String>, CredentialError> {
        self.token(TokenKind::Refresh)
    }

    /// Whether an access token is stored. Store failures count as "no".
    pub fn has_access_token(&self) -> bool {
        match self.access_token() {
            Ok(token) => token.is_some_and(|token| !token.is_empty()),
            Err(err) => {
                warn!(service = %self.service, error = %err, "credential store read failed");
                false
            }
        }
    }

    /// Forget both tokens.
    pub fn clear(&self) -> Result<(), CredentialError> {
        for kind in TokenKind::ALL {
            self.store.remove_token(&self.service, kind)?;
        }
        Ok(())
    }
}
