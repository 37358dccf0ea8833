use std::collections::VecDeque;

use async_trait::async_trait;

use common::{Candle, Result};

use super::CandleFeed;

/// Replays candles held in memory, exactly as given.
#[derive(Debug, Clone, Default)]
pub struct MemoryFeed {
    candles: VecDeque<Candle>,
}

impl MemoryFeed {
    pub fn new(candles: Vec<Candle>) -> Self {
        Self {
            candles: candles.into(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.candles.len()
    }
}

#[async_trait]
impl CandleFeed for MemoryFeed {
    async fn start(&mut self) -> Result<()> {
        Ok(())
    }

    async fn next_candle(&mut self) -> Result<Option<Candle>> {
        Ok(self.candles.pop_front())
    }
}
