use std::collections::{BTreeMap, BTreeSet};

use tracing::info;

use common::Diagnostic;

use crate::config::StrategyConfig;
use crate::indicators::{IndicatorPipeline, Macd, Rsi, Sma};
use crate::signal::{ConflictPolicy, SignalEngine};
use crate::strategies::{
    CloseVsAverageRule, IndicatorStrategy, InternalBarStrengthRule, MacdCrossRule,
    RsiThresholdRule,
};
use crate::Strategy;

/// Largest lookback any indicator parameter may ask for.
pub const MAX_PERIOD: usize = 100_000;

/// A registered strategy type with validated parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyKind {
    CloseVsAverage { period: usize },
    Rsi { period: usize, overbought: f64, oversold: f64 },
    Macd { fast: usize, slow: usize, signal: usize },
    InternalBarStrength { lower: f64, upper: f64 },
}

/// Everything needed to build fresh strategy instances, already validated.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyTemplate {
    pub name: String,
    pub kind: StrategyKind,
    pub volume: Option<f64>,
    pub conflict: ConflictPolicy,
    pub stop_after_bars: Option<usize>,
}

impl StrategyTemplate {
    /// Build a new instance with its own indicator state.
    pub fn instantiate(&self, default_volume: f64) -> Box<dyn Strategy> {
        let volume = self.volume.unwrap_or(default_volume);
        let (pipeline, engine) = match &self.kind {
            StrategyKind::CloseVsAverage { period } => (
                IndicatorPipeline::new().with(Sma::new(*period)),
                SignalEngine::new(Box::new(CloseVsAverageRule), self.conflict, volume),
            ),
            StrategyKind::Rsi {
                period,
                overbought,
                oversold,
            } => (
                IndicatorPipeline::new().with(Rsi::new(*period)),
                SignalEngine::new(
                    Box::new(RsiThresholdRule {
                        overbought: *overbought,
                        oversold: *oversold,
                    }),
                    self.conflict,
                    volume,
                ),
            ),
            StrategyKind::Macd { fast, slow, signal } => (
                IndicatorPipeline::new().with(Macd::new(*fast, *slow, *signal)),
                SignalEngine::new(Box::new(MacdCrossRule::default()), self.conflict, volume),
            ),
            StrategyKind::InternalBarStrength { lower, upper } => (
                IndicatorPipeline::new(),
                SignalEngine::new(
                    Box::new(InternalBarStrengthRule {
                        lower: *lower,
                        upper: *upper,
                    }),
                    self.conflict,
                    volume,
                ),
            ),
        };
        Box::new(IndicatorStrategy::new(
            self.name.clone(),
            pipeline,
            engine,
            self.stop_after_bars,
        ))
    }
}

type ParseFn = fn(&mut ParamReader<'_>) -> StrategyKind;

struct Entry {
    type_name: &'static str,
    params: &'static [&'static str],
    parse: ParseFn,
}

/// Compile-time registry of the strategy types a definition may name.
pub struct StrategyRegistry {
    entries: Vec<Entry>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl StrategyRegistry {
    pub fn builtin() -> Self {
        Self {
            entries: vec![
                Entry {
                    type_name: "sma_close",
                    params: &["period"],
                    parse: parse_close_vs_average,
                },
                Entry {
                    type_name: "rsi",
                    params: &["period", "overbought", "oversold"],
                    parse: parse_rsi,
                },
                Entry {
                    type_name: "macd",
                    params: &["fast", "slow", "signal"],
                    parse: parse_macd,
                },
                Entry {
                    type_name: "ibs",
                    params: &["lower", "upper"],
                    parse: parse_ibs,
                },
            ],
        }
    }

    pub fn type_names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.type_name).collect()
    }

    /// Validate a `[strategy]` table, collecting every problem found.
    pub fn validate(&self, cfg: &StrategyConfig) -> Result<StrategyTemplate, Vec<Diagnostic>> {
        let mut diagnostics = Vec::new();

        if let Some(name) = &cfg.name {
            if name.trim().is_empty() {
                diagnostics.push(Diagnostic::new("strategy.name", "must not be empty"));
            }
        }
        if let Some(volume) = cfg.volume {
            if !(volume.is_finite() && volume > 0.0) {
                diagnostics.push(Diagnostic::new(
                    "strategy.volume",
                    format!("must be a positive number, got {volume}"),
                ));
            }
        }
        if cfg.stop_after_bars == Some(0) {
            diagnostics.push(Diagnostic::new(
                "strategy.stop_after_bars",
                "must be at least 1",
            ));
        }

        let kind = match self.entries.iter().find(|e| e.type_name == cfg.strategy_type) {
            Some(entry) => {
                let mut reader = ParamReader::new(&cfg.params, entry.params);
                let kind = (entry.parse)(&mut reader);
                diagnostics.extend(reader.finish());
                Some(kind)
            }
            None => {
                diagnostics.push(Diagnostic::new(
                    "strategy.type",
                    format!(
                        "unknown strategy type '{}'; expected one of: {}",
                        cfg.strategy_type,
                        self.type_names().join(", ")
                    ),
                ));
                None
            }
        };

        match kind {
            Some(kind) if diagnostics.is_empty() => {
                let template = StrategyTemplate {
                    name: cfg.name.clone().unwrap_or_else(|| cfg.strategy_type.clone()),
                    kind,
                    volume: cfg.volume,
                    conflict: cfg.conflict,
                    stop_after_bars: cfg.stop_after_bars,
                };
                info!(name = %template.name, kind = ?template.kind, "Strategy definition validated");
                Ok(template)
            }
            _ => Err(diagnostics),
        }
    }
}

// ─── Strategy parsers ─────────────────────────────────────────────────────────

fn parse_close_vs_average(p: &mut ParamReader<'_>) -> StrategyKind {
    StrategyKind::CloseVsAverage {
        period: p.usize("period", 20, 1),
    }
}

fn parse_rsi(p: &mut ParamReader<'_>) -> StrategyKind {
    let period = p.usize("period", 14, 2);
    let overbought = p.f64("overbought", 70.0);
    let oversold = p.f64("oversold", 30.0);
    if !(0.0..=100.0).contains(&oversold) || !(0.0..=100.0).contains(&overbought) {
        p.error("thresholds must lie within 0..=100");
    } else if oversold >= overbought {
        p.error(format!(
            "oversold ({oversold}) must be below overbought ({overbought})"
        ));
    }
    StrategyKind::Rsi {
        period,
        overbought,
        oversold,
    }
}

fn parse_macd(p: &mut ParamReader<'_>) -> StrategyKind {
    let fast = p.usize("fast", 12, 1);
    let slow = p.usize("slow", 26, 2);
    let signal = p.usize("signal", 9, 1);
    if fast >= slow {
        p.error(format!("fast ({fast}) must be less than slow ({slow})"));
    }
    StrategyKind::Macd { fast, slow, signal }
}

fn parse_ibs(p: &mut ParamReader<'_>) -> StrategyKind {
    let lower = p.f64("lower", 0.2);
    let upper = p.f64("upper", 0.8);
    if !(0.0..=1.0).contains(&lower) || !(0.0..=1.0).contains(&upper) || lower >= upper {
        p.error(format!(
            "need 0 <= lower < upper <= 1, got lower={lower} upper={upper}"
        ));
    }
    StrategyKind::InternalBarStrength { lower, upper }
}

/// Typed access to `[strategy.params]` that records problems instead of
/// stopping at the first one.
struct ParamReader<'a> {
    params: &'a BTreeMap<String, toml::Value>,
    known: &'static [&'static str],
    diagnostics: Vec<Diagnostic>,
}

impl<'a> ParamReader<'a> {
    fn new(params: &'a BTreeMap<String, toml::Value>, known: &'static [&'static str]) -> Self {
        Self {
            params,
            known,
            diagnostics: Vec::new(),
        }
    }

    fn location(key: &str) -> String {
        format!("strategy.params.{key}")
    }

    fn error(&mut self, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::new("strategy.params", message));
    }

    fn usize(&mut self, key: &str, default: usize, min: usize) -> usize {
        let Some(value) = self.params.get(key) else {
            return default;
        };
        match value.as_integer() {
            Some(v) if (min as i64..=MAX_PERIOD as i64).contains(&v) => v as usize,
            Some(v) => {
                self.diagnostics.push(Diagnostic::new(
                    Self::location(key),
                    format!("must be between {min} and {MAX_PERIOD}, got {v}"),
                ));
                default
            }
            None => {
                self.diagnostics.push(Diagnostic::new(
                    Self::location(key),
                    format!("expected an integer, got {}", value.type_str()),
                ));
                default
            }
        }
    }

    fn f64(&mut self, key: &str, default: f64) -> f64 {
        let Some(value) = self.params.get(key) else {
            return default;
        };
        match value {
            toml::Value::Float(v) => *v,
            toml::Value::Integer(v) => *v as f64,
            other => {
                self.diagnostics.push(Diagnostic::new(
                    Self::location(key),
                    format!("expected a number, got {}", other.type_str()),
                ));
                default
            }
        }
    }

    fn finish(mut self) -> Vec<Diagnostic> {
        let known: BTreeSet<&str> = self.known.iter().copied().collect();
        for key in self.params.keys() {
            if !known.contains(key.as_str()) {
                self.diagnostics.push(Diagnostic::new(
                    Self::location(key),
                    format!("unknown parameter; expected one of: {}", self.known.join(", ")),
                ));
            }
        }
        self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(strategy_type: &str, params: &[(&str, toml::Value)]) -> StrategyConfig {
        StrategyConfig {
            strategy_type: strategy_type.into(),
            name: None,
            volume: None,
            conflict: ConflictPolicy::Skip,
            stop_after_bars: None,
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    #[test]
    fn defaults_fill_missing_params() {
        let template = StrategyRegistry::builtin().validate(&cfg("rsi", &[])).unwrap();
        assert_eq!(
            template.kind,
            StrategyKind::Rsi {
                period: 14,
                overbought: 70.0,
                oversold: 30.0
            }
        );
        assert_eq!(template.name, "rsi");
    }

    #[test]
    fn integer_accepted_for_float_param() {
        let template = StrategyRegistry::builtin()
            .validate(&cfg("rsi", &[("overbought", toml::Value::Integer(80))]))
            .unwrap();
        assert!(matches!(template.kind, StrategyKind::Rsi { overbought, .. } if overbought == 80.0));
    }

    #[test]
    fn unknown_type_reported() {
        let diags = StrategyRegistry::builtin()
            .validate(&cfg("martingale", &[]))
            .unwrap_err();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].location, "strategy.type");
        assert!(diags[0].message.contains("sma_close"));
    }

    #[test]
    fn every_problem_is_collected() {
        let mut c = cfg(
            "macd",
            &[
                ("fast", toml::Value::Integer(30)),
                ("slow", toml::Value::Integer(26)),
                ("signal", toml::Value::String("nine".into())),
                ("smoothing", toml::Value::Integer(3)),
            ],
        );
        c.volume = Some(-1.0);
        let diags = StrategyRegistry::builtin().validate(&c).unwrap_err();
        let locations: Vec<&str> = diags.iter().map(|d| d.location.as_str()).collect();
        assert!(locations.contains(&"strategy.volume"));
        assert!(locations.contains(&"strategy.params.signal"));
        assert!(locations.contains(&"strategy.params.smoothing"));
        assert!(locations.contains(&"strategy.params"));
        assert_eq!(diags.len(), 4);
    }

    #[test]
    fn oversized_period_is_a_diagnostic() {
        let huge = toml::Value::Integer(i64::MAX / 2);
        let diags = StrategyRegistry::builtin()
            .validate(&cfg("sma_close", &[("period", huge)]))
            .unwrap_err();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].location, "strategy.params.period");
        assert!(diags[0].message.contains("100000"));

        let longest = toml::Value::Integer(MAX_PERIOD as i64);
        let template = StrategyRegistry::builtin()
            .validate(&cfg("sma_close", &[("period", longest)]))
            .unwrap();
        assert_eq!(template.kind, StrategyKind::CloseVsAverage { period: MAX_PERIOD });
        let _ = template.instantiate(1.0);
    }

    #[test]
    fn instantiate_uses_default_volume_when_unset() {
        use common::{Candle, OrderIntent, Position, Side};
        use chrono::{TimeZone, Utc};

        let template = StrategyRegistry::builtin()
            .validate(&cfg("ibs", &[]))
            .unwrap();
        let mut strategy = template.instantiate(3.0);
        let bar = Candle::finished(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(), 10.0, 12.0, 10.0, 10.1, 1.0);
        let intent = strategy.on_candle(&bar, &Position::default()).unwrap();
        assert_eq!(
            intent,
            Some(OrderIntent::Enter {
                side: Side::Long,
                volume: 3.0
            })
        );
    }
}
