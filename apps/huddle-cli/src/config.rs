//! Environment-backed runtime configuration for the `huddle` CLI.

use std::{env, path::PathBuf};

use huddle_core::{ChatError, Endpoints, Platform, RetryPolicy, SessionOptions};
use thiserror::Error;

const DEFAULT_DATA_DIR: &str = "./.huddle";
const CREDENTIALS_FILENAME: &str = "credentials.json";
const PROFILE_FILENAME: &str = "profile.json";
const PREFERENCES_FILENAME: &str = "preferences.json";
const DEFAULT_TIMELINE_MAX_ITEMS: usize = 1_200;
const DEFAULT_OPEN_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_OPEN_RETRY_BASE_MS: u64 = 500;
const DEFAULT_OPEN_RETRY_MAX_MS: u64 = 30_000;

/// Runtime configuration used by the CLI.
#[derive(Debug, Clone, PartialEq)]
pub struct CliConfig {
    /// Explicit backend base URL; overrides the platform default.
    pub backend_url: Option<String>,
    /// Where the backend runs relative to this client.
    pub platform: Platform,
    /// Directory for tokens, profile and preferences.
    pub data_dir: PathBuf,
    /// Message Store retention cap.
    pub timeline_max_items: usize,
    /// Backoff used when the user asks to retry opening a conversation.
    pub open_retry: RetryPolicy,
}

impl CliConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let backend_url = optional_trimmed_env("HUDDLE_BACKEND_URL", &mut lookup);
        let platform = match optional_trimmed_env("HUDDLE_PLATFORM", &mut lookup) {
            None => Platform::default(),
            Some(value) => parse_platform(value)?,
        };
        let data_dir = optional_trimmed_env("HUDDLE_DATA_DIR", &mut lookup)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        let timeline_max_items = parse_optional(
            "HUDDLE_TIMELINE_MAX_ITEMS",
            DEFAULT_TIMELINE_MAX_ITEMS,
            &mut lookup,
        )?;
        if timeline_max_items == 0 {
            return Err(ConfigError::InvalidValue {
                key: "HUDDLE_TIMELINE_MAX_ITEMS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        let retry_attempts = parse_optional(
            "HUDDLE_OPEN_RETRY_ATTEMPTS",
            DEFAULT_OPEN_RETRY_ATTEMPTS,
            &mut lookup,
        )?;
        let retry_base_ms = parse_optional(
            "HUDDLE_OPEN_RETRY_BASE_MS",
            DEFAULT_OPEN_RETRY_BASE_MS,
            &mut lookup,
        )?;
        let retry_max_ms = parse_optional(
            "HUDDLE_OPEN_RETRY_MAX_MS",
            DEFAULT_OPEN_RETRY_MAX_MS,
            &mut lookup,
        )?;
        if retry_base_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "HUDDLE_OPEN_RETRY_BASE_MS",
                value: "0".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        Ok(Self {
            backend_url,
            platform,
            data_dir,
            timeline_max_items,
            open_retry: RetryPolicy::new(retry_base_ms, retry_max_ms)
                .with_max_attempts(retry_attempts),
        })
    }

    /// REST and realtime routes for the configured backend.
    pub fn endpoints(&self) -> Result<Endpoints, ChatError> {
        match &self.backend_url {
            Some(url) => Endpoints::new(url),
            None => Ok(Endpoints::for_platform(self.platform)),
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            max_items: self.timeline_max_items,
        }
    }

    /// Credential-store service name, one per backend so tokens never leak
    /// across servers.
    pub fn credential_service(&self, endpoints: &Endpoints) -> String {
        format!(
            "huddle-{}",
            slugify_component(endpoints.http_base().as_str(), 64)
        )
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.data_dir.join(CREDENTIALS_FILENAME)
    }

    pub fn profile_path(&self) -> PathBuf {
        self.data_dir.join(PROFILE_FILENAME)
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.data_dir.join(PREFERENCES_FILENAME)
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("invalid {key}='{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

fn parse_platform(value: String) -> Result<Platform, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "host" => Ok(Platform::Host),
        "android" | "android-emulator" => Ok(Platform::AndroidEmulator),
        _ => Err(ConfigError::InvalidValue {
            key: "HUDDLE_PLATFORM",
            value,
            reason: "expected 'host' or 'android'".to_owned(),
        }),
    }
}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional<T, F>(key: &'static str, default: T, lookup: &mut F) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value.parse::<T>().map_err(|err| ConfigError::InvalidValue {
        key,
        value,
        reason: err.to_string(),
    })
}

fn slugify_component(input: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(input.len().min(max_len));
    let mut last_was_sep = false;
    for ch in input.chars() {
        let next = if ch.is_ascii_alphanumeric() {
            ch.to_ascii_lowercase()
        } else {
            '_'
        };

        if next == '_' {
            if last_was_sep {
                continue;
            }
            last_was_sep = true;
        } else {
            last_was_sep = false;
        }

        out.push(next);
        if out.len() >= max_len {
            break;
        }
    }

    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "default".to_owned()
    } else {
        trimmed.to_owned()
    }
}
