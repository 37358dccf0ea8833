//! Backtest orchestration: compile a strategy definition, wire it to a
//! simulated broker and replay historical candles through it.

pub mod backtest;
pub mod executor;
pub mod feed;
pub mod lifecycle;
pub mod report;
pub mod run;
pub mod source;

pub use backtest::Backtest;
pub use executor::{netted_volume, Execution, OrderExecutor};
pub use feed::{CandleFeed, CsvFeed, MemoryFeed};
pub use lifecycle::{EndReason, RunPhase};
pub use report::BacktestReport;
pub use run::StrategyRun;
pub use source::{BacktestSection, CompiledStrategy, RunConfig, StrategyFactory};
