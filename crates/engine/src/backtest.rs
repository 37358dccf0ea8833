use std::future::Future;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, info_span, Instrument};

use common::{Candle, Error, Result};
use paper::{SimulatedBroker, SimulatedPortfolio};
use risk::ProtectionManager;

use crate::executor::OrderExecutor;
use crate::feed::CandleFeed;
use crate::lifecycle::{self, EndReason};
use crate::report::BacktestReport;
use crate::run::StrategyRun;
use crate::source::{CompiledStrategy, RunConfig};

/// Wires a compiled strategy to a feed and replays it to completion.
pub struct Backtest {
    compiled: CompiledStrategy,
    config: RunConfig,
}

impl Backtest {
    pub fn new(compiled: CompiledStrategy, config: RunConfig) -> Self {
        Self { compiled, config }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Replay `feed` until it is exhausted, the strategy stops itself, or
    /// `interrupt` resolves.
    pub async fn run<F, I>(self, mut feed: F, interrupt: I) -> Result<BacktestReport>
    where
        F: CandleFeed + 'static,
        I: Future<Output = ()> + Send,
    {
        let Backtest { compiled, config } = self;

        let portfolio = SimulatedPortfolio::new(config.initial_capital)?;
        let broker = SimulatedBroker::new(config.security.clone(), config.slippage_bps)?;
        feed.start().await?;

        let executor = OrderExecutor::new(Box::new(broker), config.security.clone());
        let strategy = compiled.template.instantiate(config.default_volume);
        let mut run = StrategyRun::new(
            strategy,
            executor,
            ProtectionManager::new(compiled.protection),
            portfolio,
        );
        let span = info_span!("backtest", run_id = %run.id(), security = %config.security.id);

        let (candle_tx, candle_rx) = mpsc::channel::<Candle>(config.feed_buffer);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let pump = tokio::spawn(pump(feed, candle_tx).instrument(span.clone()));
        let replay = tokio::spawn(
            async move {
                run.start();
                let reason = lifecycle::drive(&mut run, candle_rx, cancel_rx).await;
                run.stop();
                (run, reason)
            }
            .instrument(span.clone()),
        );

        // `closed` resolves once the replay task has dropped its receiver.
        let interrupted = tokio::select! {
            _ = interrupt => true,
            _ = cancel_tx.closed() => false,
        };
        if interrupted {
            span.in_scope(|| info!("Interrupt received; stopping after the current bar"));
            let _ = cancel_tx.send(true);
        }

        let (run, reason) = replay
            .await
            .map_err(|e| Error::StrategyRuntime(format!("replay task failed: {e}")))?;
        match pump.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if reason != EndReason::FeedExhausted => {
                span.in_scope(|| info!(error = %e, "Feed error after replay ended ignored"));
            }
            Ok(Err(e)) => return Err(e),
            Err(e) => return Err(Error::Connection(format!("feed task failed: {e}"))),
        }

        let report = run.report(reason);
        span.in_scope(|| {
            info!(
                end = %report.end_reason,
                bars = report.bars_processed,
                realized = report.realized_pnl,
                orders = report.orders_submitted,
                "Backtest finished"
            )
        });
        Ok(report)
    }
}

/// Move candles from the feed into the run's channel until either side ends.
async fn pump<F: CandleFeed>(mut feed: F, tx: mpsc::Sender<Candle>) -> Result<()> {
    loop {
        match feed.next_candle().await {
            Ok(Some(candle)) => {
                if tx.send(candle).await.is_err() {
                    // Replay ended early.
                    return Ok(());
                }
            }
            Ok(None) => return Ok(()),
            Err(e) => {
                error!(error = %e, "Feed failed mid-replay");
                return Err(e);
            }
        }
    }
}
