use thiserror::Error;

use crate::{Diagnostic, OrderId, RejectionReason};

#[derive(Debug, Error)]
pub enum Error {
    /// Bad input from the operator: paths, volumes, date ranges.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The strategy definition failed validation. Every diagnostic is kept.
    #[error("Strategy failed to compile with {} diagnostic(s)", .0.len())]
    Compilation(Vec<Diagnostic>),

    /// The simulated feed, broker or portfolio could not be brought up.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Escaped a per-candle callback. Contained at the bar boundary.
    #[error("Strategy runtime error: {0}")]
    StrategyRuntime(String),

    #[error("Order {order_id} rejected: {reason}")]
    OrderRejected {
        order_id: OrderId,
        reason: RejectionReason,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Process exit status for this error class.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Io(_) | Error::Json(_) => 1,
            Error::Config(_) => 2,
            Error::Compilation(_) => 3,
            Error::Connection(_) => 4,
            Error::StrategyRuntime(_) | Error::OrderRejected { .. } => 5,
        }
    }
}

impl From<&Error> for std::process::ExitCode {
    fn from(err: &Error) -> Self {
        std::process::ExitCode::from(err.exit_code())
    }
}
