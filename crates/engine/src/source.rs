use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use common::{Config, Diagnostic, Error, Result, Security};
use risk::ProtectionConfig;
use strategy::{StrategyConfig, StrategyRegistry, StrategyTemplate};

use crate::feed::parse_timestamp;

/// The `[backtest]` table as written. Semantic checks happen in
/// [`RunConfig::resolve`].
///
/// Example:
/// ```toml
/// [backtest]
/// security = "SPY"
/// data_dir = "data"
/// from = "2024-01-01"
/// to = "2025-01-01"
/// initial_capital = 25000.0
/// slippage_bps = 2.0
/// price_step = 0.01
/// volume_step = 1.0
/// currency = "USD"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BacktestSection {
    pub security: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    pub from: String,
    pub to: String,
    pub initial_capital: Option<f64>,
    pub slippage_bps: Option<f64>,
    #[serde(default = "default_price_step")]
    pub price_step: f64,
    #[serde(default = "default_volume_step")]
    pub volume_step: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_price_step() -> f64 {
    0.01
}

fn default_volume_step() -> f64 {
    1.0
}

fn default_currency() -> String {
    "USD".into()
}

/// A strategy definition that passed validation.
#[derive(Debug, Clone)]
pub struct CompiledStrategy {
    pub template: StrategyTemplate,
    pub protection: ProtectionConfig,
    pub backtest: BacktestSection,
}

/// Validates strategy definition files against the registered strategy types.
#[derive(Default)]
pub struct StrategyFactory {
    registry: StrategyRegistry,
}

const SECTIONS: [&str; 3] = ["strategy", "protection", "backtest"];

impl StrategyFactory {
    pub fn new(registry: StrategyRegistry) -> Self {
        Self { registry }
    }

    /// Compile a TOML definition, reporting every problem found rather than
    /// the first.
    pub fn compile(&self, source: &str) -> Result<CompiledStrategy, Vec<Diagnostic>> {
        let root: toml::Table = match source.parse() {
            Ok(table) => table,
            Err(e) => {
                return Err(vec![Diagnostic::new(
                    "source",
                    format!("not valid TOML: {}", e.message()),
                )])
            }
        };

        let mut diagnostics: Vec<Diagnostic> = root
            .keys()
            .filter(|k| !SECTIONS.contains(&k.as_str()))
            .map(|k| {
                Diagnostic::new(
                    k.clone(),
                    format!("unknown section; expected one of: {}", SECTIONS.join(", ")),
                )
            })
            .collect();

        let strategy: Option<StrategyConfig> = section(&root, "strategy", true, &mut diagnostics);
        let protection: Option<ProtectionConfig> =
            section(&root, "protection", false, &mut diagnostics);
        let backtest: Option<BacktestSection> = section(&root, "backtest", true, &mut diagnostics);

        let template = strategy.and_then(|cfg| match self.registry.validate(&cfg) {
            Ok(template) => Some(template),
            Err(found) => {
                diagnostics.extend(found);
                None
            }
        });
        let protection = protection.unwrap_or_default();
        diagnostics.extend(protection.validate());

        match (template, backtest) {
            (Some(template), Some(backtest)) if diagnostics.is_empty() => {
                info!(strategy = %template.name, security = %backtest.security, "Strategy compiled");
                Ok(CompiledStrategy {
                    template,
                    protection,
                    backtest,
                })
            }
            _ => {
                warn!(count = diagnostics.len(), "Strategy failed to compile");
                Err(diagnostics)
            }
        }
    }

    /// `compile`, folded into the crate error type.
    pub fn compile_or_error(&self, source: &str) -> Result<CompiledStrategy> {
        self.compile(source).map_err(Error::Compilation)
    }
}

fn section<T>(
    root: &toml::Table,
    name: &str,
    required: bool,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<T>
where
    T: for<'de> Deserialize<'de>,
{
    let Some(value) = root.get(name) else {
        if required {
            diagnostics.push(Diagnostic::new(name, "missing required section"));
        }
        return None;
    };
    match value.clone().try_into::<T>() {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            diagnostics.push(Diagnostic::new(name, e.message().trim().to_string()));
            None
        }
    }
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub security: Security,
    pub data_dir: PathBuf,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub initial_capital: f64,
    pub slippage_bps: f64,
    pub default_volume: f64,
    pub feed_buffer: usize,
}

impl RunConfig {
    /// Merge the `[backtest]` table over process defaults and validate.
    pub fn resolve(section: &BacktestSection, defaults: &Config) -> Result<Self> {
        if section.security.trim().is_empty() {
            return Err(Error::Config("backtest.security must not be empty".into()));
        }
        let from = parse_timestamp(&section.from).ok_or_else(|| {
            Error::Config(format!("backtest.from is not a date: '{}'", section.from))
        })?;
        let to = parse_timestamp(&section.to)
            .ok_or_else(|| Error::Config(format!("backtest.to is not a date: '{}'", section.to)))?;
        if from >= to {
            return Err(Error::Config(format!(
                "backtest range is empty: from {from} is not before to {to}"
            )));
        }

        let initial_capital = section.initial_capital.unwrap_or(defaults.initial_capital);
        if !(initial_capital.is_finite() && initial_capital > 0.0) {
            return Err(Error::Config(format!(
                "backtest.initial_capital must be positive, got {initial_capital}"
            )));
        }
        let slippage_bps = section.slippage_bps.unwrap_or(defaults.slippage_bps);
        if !(slippage_bps.is_finite() && slippage_bps >= 0.0) {
            return Err(Error::Config(format!(
                "backtest.slippage_bps must not be negative, got {slippage_bps}"
            )));
        }
        for (field, step) in [
            ("price_step", section.price_step),
            ("volume_step", section.volume_step),
        ] {
            if !(step.is_finite() && step > 0.0) {
                return Err(Error::Config(format!(
                    "backtest.{field} must be positive, got {step}"
                )));
            }
        }

        Ok(Self {
            security: Security {
                id: section.security.clone(),
                price_step: section.price_step,
                volume_step: section.volume_step,
                currency: section.currency.clone(),
            },
            data_dir: section.data_dir.clone(),
            from,
            to,
            initial_capital,
            slippage_bps,
            default_volume: defaults.default_volume,
            feed_buffer: defaults.feed_buffer,
        })
    }

    /// Anchor a relative `data_dir` at `base`, usually the definition file's
    /// directory.
    pub fn with_base_dir(mut self, base: &Path) -> Self {
        if self.data_dir.is_relative() {
            self.data_dir = base.join(&self.data_dir);
        }
        self
    }
}
