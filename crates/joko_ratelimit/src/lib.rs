//! Joko ratelimit is a small async task runner that throttles calls to a single runner function.
//!
//! The gw2 api allows roughly 300 requests per minute per ip/key before it starts answering with 429.
//! Instead of every caller sleeping on its own, work items are pushed into a [RateLimiter],
//! which runs them one at a time through the runner and waits `1s / rate` after each one.
//! Every processed item produces exactly one [Outcome] on the channel returned by [RateLimiter::outcomes].
//!
//! resources:
//! 1. https://wiki.guildwars2.com/wiki/API:Main#Limits
mod config;
mod error;
mod item;
mod limiter;

pub use config::RateLimiterConfig;
pub use error::{PushError, RateLimitError};
pub use item::{Outcome, WorkItem};
pub use limiter::{RateLimiter, Runner, RunnerFuture};
pub use tokio_util::sync::CancellationToken;

pub(crate) mod prelude {
    pub use crate::error::{PushError, RateLimitError};
    pub use crate::item::{Outcome, WorkItem};
    pub use tokio_util::sync::CancellationToken;
    pub use tracing::{debug, error, trace, warn};
    pub type Result<T, E = RateLimitError> = std::result::Result<T, E>;
}
