use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::signal::ConflictPolicy;

/// The `[strategy]` table of a strategy definition file.
///
/// Example:
/// ```toml
/// [strategy]
/// type = "rsi"
/// name = "SPY RSI 14"
/// volume = 10.0
/// conflict = "skip"
///
/// [strategy.params]
/// period = 14
/// overbought = 70.0
/// oversold = 30.0
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StrategyConfig {
    /// Registered strategy type: "sma_close", "rsi", "macd" or "ibs".
    #[serde(rename = "type")]
    pub strategy_type: String,
    /// Human-readable name shown in logs and reports. Defaults to the type.
    pub name: Option<String>,
    /// Order volume per entry. Falls back to the process default.
    pub volume: Option<f64>,
    /// How to resolve bars where long and short both fire.
    #[serde(default)]
    pub conflict: ConflictPolicy,
    /// End the run after this many finished bars.
    pub stop_after_bars: Option<usize>,
    /// Type-specific parameters.
    #[serde(default)]
    pub params: BTreeMap<String, toml::Value>,
}
