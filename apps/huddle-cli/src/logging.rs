//! Tracing/logging bootstrap for the CLI.

use std::{env, io};

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,huddle_cli=debug,huddle_core=debug,huddle_backend=debug";

/// Initialize the global tracing subscriber, writing to stderr so chat output
/// on stdout stays clean.
///
/// Precedence:
/// 1) `RUST_LOG`
/// 2) `HUDDLE_CLI_LOG`
/// 3) `HUDDLE_LOG`
/// 4) internal default filter
pub fn init() {
    let env_filter = filter_from_lookup(|key| env::var(key).ok());
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_writer(io::stderr)
        .with_env_filter(env_filter)
        .try_init();
}

fn filter_from_lookup<F>(mut lookup: F) -> EnvFilter
where
    F: FnMut(&str) -> Option<String>,
{
    for key in [EnvFilter::DEFAULT_ENV, "HUDDLE_CLI_LOG", "HUDDLE_LOG"] {
        if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty())
            && let Ok(filter) = EnvFilter::try_new(value)
        {
            return filter;
        }
    }

    EnvFilter::new(DEFAULT_FILTER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_specific_filter_beats_shared_one() {
        let filter = filter_from_lookup(|key| match key {
            "HUDDLE_CLI_LOG" => Some("warn".to_owned()),
            "HUDDLE_LOG" => Some("trace".to_owned()),
            _ => None,
        });
        assert_eq!(filter.to_string(), "warn");
    }

    #[test]
    fn blank_values_fall_through_to_default() {
        let filter = filter_from_lookup(|key| match key {
            "RUST_LOG" => Some("  ".to_owned()),
            _ => None,
        });
        assert_eq!(filter.to_string(), EnvFilter::new(DEFAULT_FILTER).to_string());
    }
}
