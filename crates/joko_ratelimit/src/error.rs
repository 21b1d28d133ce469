use crate::item::WorkItem;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Diagnostic, Debug, Error)]
pub enum RateLimitError {
    #[error("rate per second must be a positive integer. got: {0}")]
    #[diagnostic(code(rate_limit::invalid_rate))]
    InvalidRate(u32),
    #[error("queue capacity must be at least 1")]
    #[diagnostic(
        code(rate_limit::invalid_queue_capacity),
        help("a zero capacity queue can never hold items pushed before start")
    )]
    InvalidQueueCapacity,
    #[error("rate limiter is not running")]
    #[diagnostic(code(rate_limit::not_running))]
    NotRunning,
    #[error("dispatch loop terminated abnormally")]
    #[diagnostic(code(rate_limit::dispatch_loop))]
    DispatchLoop(#[from] tokio::task::JoinError),
}

/// returned by [crate::RateLimiter::try_push]. gives the rejected item back to the caller.
#[derive(Debug)]
pub enum PushError<T> {
    Full(WorkItem<T>),
}

impl<T> std::fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PushError::Full(_) => f.write_str("work queue is full"),
        }
    }
}

impl<T: std::fmt::Debug> std::error::Error for PushError<T> {}

impl<T> PushError<T> {
    pub fn into_inner(self) -> WorkItem<T> {
        match self {
            PushError::Full(item) => item,
        }
    }
}
