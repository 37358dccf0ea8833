//! Simulated fill layer and account used by backtests.

pub mod broker;
pub mod portfolio;

pub use broker::SimulatedBroker;
pub use portfolio::SimulatedPortfolio;
