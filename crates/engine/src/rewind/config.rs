use std::env;

use thiserror::Error;
use tracing::warn;

pub const DEFAULT_HISTORY_LEN: usize = 256;
pub const MIN_HISTORY_LEN: usize = 2;
pub const HISTORY_LEN_ENV_VAR: &str = "REWIND_HISTORY_FRAMES";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewindConfig {
    /// Ring capacity per section. The rewind horizon saturates at one less.
    pub history_len: usize,
}

impl Default for RewindConfig {
    fn default() -> Self {
        Self {
            history_len: DEFAULT_HISTORY_LEN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("history_len must be at least {min}, got {actual}")]
    HistoryTooShort { min: usize, actual: usize },
}

impl RewindConfig {
    pub fn with_history_len(history_len: usize) -> Self {
        Self { history_len }
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            history_len: resolve_history_len(defaults.history_len),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_len < MIN_HISTORY_LEN {
            return Err(ConfigError::HistoryTooShort {
                min: MIN_HISTORY_LEN,
                actual: self.history_len,
            });
        }
        Ok(())
    }

    pub fn max_horizon(&self) -> u64 {
        self.history_len.saturating_sub(1) as u64
    }
}

fn resolve_history_len(fallback: usize) -> usize {
    match env::var(HISTORY_LEN_ENV_VAR) {
        Ok(value) => parse_history_len(&value).unwrap_or_else(|| {
            warn!(
                env_var = HISTORY_LEN_ENV_VAR,
                value = value.as_str(),
                "invalid history length env var value; falling back to default"
            );
            fallback
        }),
        Err(env::VarError::NotPresent) => fallback,
        Err(err) => {
            warn!(
                env_var = HISTORY_LEN_ENV_VAR,
                error = %err,
                "unable to read history length env var; falling back to default"
            );
            fallback
        }
    }
}

fn parse_history_len(raw: &str) -> Option<usize> {
    raw.trim()
        .parse::<usize>()
        .ok()
        .filter(|len| *len >= MIN_HISTORY_LEN)
}
