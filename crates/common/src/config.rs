use tracing::debug;

use crate::{Error, Result};

/// Process-wide defaults loaded from environment variables at startup.
///
/// Per-run settings live in the strategy definition; anything it omits falls
/// back to these values.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub initial_capital: f64,
    pub default_volume: f64,
    pub slippage_bps: f64,
    /// Capacity of the candle channel between feed and strategy.
    pub feed_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_capital: 10_000.0,
            default_volume: 1.0,
            slippage_bps: 0.0,
            feed_buffer: 256,
        }
    }
}

impl Config {
    /// Load from the environment, reading `.env` if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset keys take their defaults;
    /// set but malformed keys are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let cfg = Config {
            initial_capital: parsed(&lookup, "BACKTEST_INITIAL_CAPITAL")?
                .unwrap_or(defaults.initial_capital),
            default_volume: parsed(&lookup, "BACKTEST_DEFAULT_VOLUME")?
                .unwrap_or(defaults.default_volume),
            slippage_bps: parsed(&lookup, "BACKTEST_SLIPPAGE_BPS")?
                .unwrap_or(defaults.slippage_bps),
            feed_buffer: parsed(&lookup, "BACKTEST_FEED_BUFFER")?
                .unwrap_or(defaults.feed_buffer),
        };

        if cfg.initial_capital <= 0.0 {
            return Err(Error::Config(
                "BACKTEST_INITIAL_CAPITAL must be positive".into(),
            ));
        }
        if cfg.default_volume <= 0.0 {
            return Err(Error::Config(
                "BACKTEST_DEFAULT_VOLUME must be positive".into(),
            ));
        }
        if cfg.slippage_bps < 0.0 {
            return Err(Error::Config(
                "BACKTEST_SLIPPAGE_BPS must not be negative".into(),
            ));
        }
        if cfg.feed_buffer == 0 {
            return Err(Error::Config("BACKTEST_FEED_BUFFER must be at least 1".into()));
        }

        debug!(?cfg, "Loaded process defaults");
        Ok(cfg)
    }
}

fn parsed<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            Error::Config(format!("{key} has an unparseable value: '{raw}'"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn unset_keys_take_defaults() {
        let cfg = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn set_keys_override_defaults() {
        let cfg = Config::from_lookup(lookup(&[
            ("BACKTEST_INITIAL_CAPITAL", "50000"),
            ("BACKTEST_SLIPPAGE_BPS", " 5 "),
        ]))
        .unwrap();
        assert_eq!(cfg.initial_capital, 50_000.0);
        assert_eq!(cfg.slippage_bps, 5.0);
    }

    #[test]
    fn malformed_value_is_a_config_error() {
        let err = Config::from_lookup(lookup(&[("BACKTEST_FEED_BUFFER", "lots")])).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("BACKTEST_FEED_BUFFER")));
    }

    #[test]
    fn non_positive_volume_rejected() {
        let err = Config::from_lookup(lookup(&[("BACKTEST_DEFAULT_VOLUME", "0")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
