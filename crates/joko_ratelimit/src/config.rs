use crate::prelude::*;
use serde::{Deserialize, Serialize};
use std::{num::NonZeroU32, time::Duration};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// how many items the dispatch loop may complete per second. must be positive.
    pub rate_per_second: u32,
    /// how many pushed items can wait in the queue before `push` starts waiting and `try_push` starts rejecting.
    pub queue_capacity: usize,
    /// capacity of the outcome channel. zero means every delivery waits until a consumer takes it.
    pub outcome_capacity: usize,
}

impl RateLimiterConfig {
    /// gw2 api refills 5 requests per second per key
    pub const RATE_PER_SECOND: u32 = 5;
    pub const QUEUE_CAPACITY: usize = 1024;
    pub const OUTCOME_CAPACITY: usize = 0;

    pub fn with_rate(rate_per_second: u32) -> Self {
        Self {
            rate_per_second,
            ..Default::default()
        }
    }

    pub fn rate(&self) -> Result<NonZeroU32> {
        NonZeroU32::new(self.rate_per_second).ok_or(RateLimitError::InvalidRate(self.rate_per_second))
    }

    /// The pause after each item. `1s / rate` in nanoseconds, so any rate above 1 still gets a sub second delay.
    pub fn delay(&self) -> Result<Duration> {
        Ok(Duration::from_secs(1) / self.rate()?.get())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.rate()?;
        if self.queue_capacity == 0 {
            return Err(RateLimitError::InvalidQueueCapacity);
        }
        Ok(())
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            rate_per_second: Self::RATE_PER_SECOND,
            queue_capacity: Self::QUEUE_CAPACITY,
            outcome_capacity: Self::OUTCOME_CAPACITY,
        }
    }
}
