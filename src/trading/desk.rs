use super::TradeSequencer;
use crate::error::MarketError;
use crate::Result;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Parse a signed trade volume typed by a user
pub fn parse_trade_volume(input: &str) -> Result<i64> {
    let trimmed = input.trim();
    trimmed
        .parse::<i64>()
        .map_err(|_| MarketError::InvalidInput(trimmed.to_string()))
}

/// Trading control surface: gates the sequencer behind "one session at a
/// time" and the post-trade cooldown
#[derive(Clone)]
pub struct TradingDesk {
    sequencer: TradeSequencer,
}

impl TradingDesk {
    pub fn new(sequencer: TradeSequencer) -> Self {
        Self { sequencer }
    }

    pub fn sequencer(&self) -> &TradeSequencer {
        &self.sequencer
    }

    /// Time left before a new trade is accepted
    pub fn cooldown_remaining(&self) -> Duration {
        let Some(completed_at) = self.sequencer.completed_at() else {
            return Duration::ZERO;
        };
        let ready_at = completed_at + self.sequencer.settings().cooldown();
        ready_at.saturating_duration_since(Instant::now())
    }

    pub fn can_trade(&self) -> bool {
        !self.sequencer.is_active() && self.cooldown_remaining().is_zero()
    }

    /// Submit a trade for execution
    pub fn submit(&self, requested_volume_change: i64) -> Result<Uuid> {
        if self.sequencer.is_active() {
            tracing::warn!("Trade rejected - session in progress");
            return Err(MarketError::TradeInProgress);
        }

        let remaining = self.cooldown_remaining();
        if !remaining.is_zero() {
            // Round up so "0s remaining" is never reported while blocked
            let remaining_secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
            tracing::warn!("Trade rejected - cooldown {}s remaining", remaining_secs);
            return Err(MarketError::CooldownActive { remaining_secs });
        }

        self.sequencer.execute(requested_volume_change)
    }

    /// Parse raw user input and submit it
    pub fn submit_input(&self, input: &str) -> Result<Uuid> {
        let volume = parse_trade_volume(input).inspect_err(|e| {
            tracing::warn!("Trade input rejected: {}", e);
        })?;
        self.submit(volume)
    }

    /// Abort the in-flight session, if any
    pub fn abort(&self) -> bool {
        self.sequencer.stop()
    }
}
