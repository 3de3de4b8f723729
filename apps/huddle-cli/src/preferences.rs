//! Display preferences passed explicitly to the views.

use std::{fmt, path::Path, str::FromStr};

use colored::{Color, ColoredString, Colorize};
use huddle_platform::{PersistError, load_json, save_json_atomic};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

impl Theme {
    fn own_color(self) -> Color {
        match self {
            Self::Dark => Color::BrightCyan,
            Self::Light => Color::Blue,
        }
    }

    fn other_color(self) -> Color {
        match self {
            Self::Dark => Color::BrightGreen,
            Self::Light => Color::Magenta,
        }
    }

    fn muted_color(self) -> Color {
        match self {
            Self::Dark => Color::BrightBlack,
            Self::Light => Color::Black,
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Dark => "dark",
            Self::Light => "light",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Preferences {
    pub theme: Theme,
    /// One line per message, no blank separators.
    pub compact_mode: bool,
    pub underline_links: bool,
    pub show_typing_indicators: bool,
    /// Ask before speaking in huddles.
    pub raise_hand: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            theme: Theme::Dark,
            compact_mode: false,
            underline_links: true,
            show_typing_indicators: true,
            raise_hand: false,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreferenceError {
    #[error(
        "unknown preference '{0}' (expected one of {keys})",
        keys = Preferences::KEYS.join(", ")
    )]
    UnknownKey(String),
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

impl Preferences {
    pub const KEYS: [&'static str; 5] = [
        "theme",
        "compact_mode",
        "underline_links",
        "show_typing_indicators",
        "raise_hand",
    ];

    pub fn load(path: &Path) -> Result<Self, PersistError> {
        Ok(load_json(path)?.unwrap_or_default())
    }

    pub fn save(&self, path: &Path) -> Result<(), PersistError> {
        save_json_atomic(path, self)
    }

    /// Apply one `key=value` change from the command line.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), PreferenceError> {
        match key.trim() {
            "theme" => self.theme = value.parse()?,
            "compact_mode" | "compact" => self.compact_mode = parse_flag("compact_mode", value)?,
            "underline_links" => self.underline_links = parse_flag("underline_links", value)?,
            "show_typing_indicators" | "typing" => {
                self.show_typing_indicators = parse_flag("show_typing_indicators", value)?;
            }
            "raise_hand" => self.raise_hand = parse_flag("raise_hand", value)?,
            other => return Err(PreferenceError::UnknownKey(other.to_owned())),
        }
        Ok(())
    }

    pub fn own_name(&self, name: &str) -> ColoredString {
        name.color(self.theme.own_color()).bold()
    }

    pub fn other_name(&self, name: &str) -> ColoredString {
        name.color(self.theme.other_color()).bold()
    }

    pub fn muted(&self, text: &str) -> ColoredString {
        text.color(self.theme.muted_color())
    }

    /// Message body with links underlined when enabled.
    pub fn body(&self, text: &str) -> String {
        if !self.underline_links {
            return text.to_owned();
        }
        text.split(' ')
            .map(|word| {
                if word.starts_with("http://") || word.starts_with("https://") {
                    word.underline().to_string()
                } else {
                    word.to_owned()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl FromStr for Theme {
    type Err = PreferenceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dark" => Ok(Self::Dark),
            "light" => Ok(Self::Light),
            _ => Err(PreferenceError::InvalidValue {
                key: "theme",
                value: value.to_owned(),
                reason: "expected dark or light",
            }),
        }
    }
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, PreferenceError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => Err(PreferenceError::InvalidValue {
            key,
            value: value.to_owned(),
            reason: "expected on or off",
        }),
    }
}
