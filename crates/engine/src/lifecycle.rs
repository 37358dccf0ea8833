use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use common::Candle;

use crate::run::StrategyRun;

/// Phase of a strategy run. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum RunPhase {
    Created,
    Started,
    Running,
    Stopped,
}

impl RunPhase {
    pub fn can_transition(self, to: RunPhase) -> bool {
        matches!(
            (self, to),
            (RunPhase::Created, RunPhase::Started)
                | (RunPhase::Started, RunPhase::Running)
                | (RunPhase::Created | RunPhase::Started | RunPhase::Running, RunPhase::Stopped)
        )
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPhase::Created => write!(f, "created"),
            RunPhase::Started => write!(f, "started"),
            RunPhase::Running => write!(f, "running"),
            RunPhase::Stopped => write!(f, "stopped"),
        }
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    FeedExhausted,
    StrategyStopped,
    Interrupted,
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndReason::FeedExhausted => write!(f, "feed exhausted"),
            EndReason::StrategyStopped => write!(f, "strategy stopped"),
            EndReason::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Drain the candle channel into `run` until the feed ends, the strategy
/// stops itself, or cancellation is signalled. Cancellation is checked
/// between bars, never inside one.
pub async fn drive(
    run: &mut StrategyRun,
    mut candles: mpsc::Receiver<Candle>,
    mut cancel: watch::Receiver<bool>,
) -> EndReason {
    let mut cancel_open = true;
    loop {
        if *cancel.borrow() {
            info!(run_id = %run.id(), bars = run.bars_processed(), "Run interrupted");
            return EndReason::Interrupted;
        }
        if run.strategy_finished() {
            info!(run_id = %run.id(), bars = run.bars_processed(), "Strategy stopped itself");
            return EndReason::StrategyStopped;
        }

        tokio::select! {
            biased;

            changed = cancel.changed(), if cancel_open => {
                if changed.is_err() {
                    warn!("Cancellation sender dropped; run continues to feed end");
                    cancel_open = false;
                }
            }

            candle = candles.recv() => match candle {
                Some(candle) => run.on_candle(&candle),
                None => {
                    debug!(run_id = %run.id(), "Candle channel closed");
                    return EndReason::FeedExhausted;
                }
            },
        }
    }
}
