pub mod config;
pub mod indicators;
pub mod registry;
pub mod signal;
pub mod strategies;

pub use config::StrategyConfig;
pub use registry::{StrategyKind, StrategyRegistry, StrategyTemplate, MAX_PERIOD};
pub use signal::{ConflictPolicy, Conditions, SignalEngine, SignalRule};
pub use strategies::IndicatorStrategy;

use common::{Candle, OrderIntent, Position};
use thiserror::Error;

/// Failure inside a strategy callback. The host contains it at the bar
/// boundary and keeps replaying.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("invalid candle: {0}")]
    InvalidCandle(String),

    #[error("{0}")]
    Other(String),
}

/// The capability interface a host drives through a run.
///
/// Implementations hold their own indicator state; the host owns the
/// position and passes it in read-only.
pub trait Strategy: Send {
    /// Human-readable name of this strategy instance.
    fn name(&self) -> &str;

    fn on_start(&mut self) -> Result<(), StrategyError> {
        Ok(())
    }

    /// Evaluate one candle and optionally emit an intent.
    ///
    /// Only candles where `is_finished()` holds may influence decisions.
    fn on_candle(
        &mut self,
        candle: &Candle,
        position: &Position,
    ) -> Result<Option<OrderIntent>, StrategyError>;

    fn on_stop(&mut self) {}

    /// True once the strategy wants the run to end.
    fn is_finished(&self) -> bool {
        false
    }
}
