//! Trivial key=value configuration reader.
//!
//! Recognized keys: `num_sites`, `num_variables`, `max_transactions`.
//! Missing file or missing keys fall back to defaults; malformed
//! values are a `SimError::Config`.

use std::path::Path;

use crate::error::{SimError, SimResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimConfig {
    pub num_sites: u64,
    pub num_variables: u64,
    /// Sizing hint for the wait-for graph; the graph itself is a
    /// `BTreeMap` and does not require pre-sizing, but the key is
    /// honored for compatibility with the configured upper bound.
    pub max_transactions: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            num_sites: 10,
            num_variables: 20,
            max_transactions: 64,
        }
    }
}

impl SimConfig {
    /// Loads from a `key=value` file, one assignment per line. `#`
    /// starts a comment. Falls back to `Default` for any key absent
    /// from the file.
    pub fn load(path: &Path) -> SimResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Loads from `path` if it exists, else returns the default
    /// configuration.
    pub fn load_or_default(path: &Path) -> SimResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    fn parse(text: &str) -> SimResult<Self> {
        let mut config = Self::default();
        for (lineno, raw_line) in text.lines().enumerate() {
            let line = raw_line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(SimError::Config(format!(
                    "line {}: expected key=value, got {:?}",
                    lineno + 1,
                    raw_line
                )));
            };
            let key = key.trim();
            let value = value.trim();
            let parsed: u64 = value.parse().map_err(|_| {
                SimError::Config(format!("line {}: invalid integer {:?} for key {:?}", lineno + 1, value, key))
            })?;
            match key {
                "num_sites" => config.num_sites = parsed,
                "num_variables" => config.num_variables = parsed,
                "max_transactions" => config.max_transactions = parsed,
                other => {
                    return Err(SimError::Config(format!("line {}: unknown config key {:?}", lineno + 1, other)));
                }
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = SimConfig::default();
        assert_eq!(config.num_sites, 10);
        assert_eq!(config.num_variables, 20);
    }

    #[test]
    fn parses_simple_file() {
        let text = "num_sites=10\nnum_variables=20\n# a comment\nmax_transactions=128\n";
        let config = SimConfig::parse(text).unwrap();
        assert_eq!(config.max_transactions, 128);
    }

    #[test]
    fn blank_and_comment_lines_ignored() {
        let text = "\n  \n# nothing here\nnum_sites=4\n";
        let config = SimConfig::parse(text).unwrap();
        assert_eq!(config.num_sites, 4);
        assert_eq!(config.num_variables, 20);
    }

    #[test]
    fn malformed_line_is_an_error() {
        let text = "num_sites 10\n";
        assert!(SimConfig::parse(text).is_err());
    }

    #[test]
    fn unknown_key_is_an_error() {
        let text = "frobnicate=1\n";
        assert!(SimConfig::parse(text).is_err());
    }
}
