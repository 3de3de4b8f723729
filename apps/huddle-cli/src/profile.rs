//! Non-secret login metadata remembered between runs.

use std::path::Path;

use huddle_core::{Participant, UserProfile};
use huddle_platform::{PersistError, clear_json, load_json, save_json_atomic};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthProfile {
    /// Backend base URL the login was made against.
    pub backend_url: String,
    pub username: String,
    /// Filled in once `/api/me/` has answered.
    #[serde(default)]
    pub user_id: Option<u64>,
}

impl AuthProfile {
    pub fn new(backend_url: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            backend_url: backend_url.into(),
            username: username.into(),
            user_id: None,
        }
    }

    pub fn with_user(mut self, user: &UserProfile) -> Self {
        self.username = user.username.clone();
        self.user_id = Some(user.id);
        self
    }

    /// Best-known identity when `/api/me/` cannot be reached.
    pub fn participant(&self) -> Participant {
        match self.user_id {
            Some(id) => Participant::new(id, self.username.clone()),
            None => Participant::named(self.username.clone()),
        }
    }
}

pub fn load_auth_profile(path: &Path) -> Result<Option<AuthProfile>, PersistError> {
    load_json(path)
}

pub fn save_auth_profile(path: &Path, profile: &AuthProfile) -> Result<(), PersistError> {
    save_json_atomic(path, profile)
}

pub fn clear_auth_profile(path: &Path) -> Result<(), PersistError> {
    clear_json(path)
}
