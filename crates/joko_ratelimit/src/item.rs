use tokio_util::sync::CancellationToken;

/// A payload queued for the runner, along with the token the runner should watch for cancellation.
/// The limiter itself never checks the token. an already cancelled item is still handed to the runner.
#[derive(Debug, Clone)]
pub struct WorkItem<T> {
    pub token: CancellationToken,
    pub payload: T,
}

impl<T> WorkItem<T> {
    pub fn new(token: CancellationToken, payload: T) -> Self {
        Self { token, payload }
    }
}

/// The single delivery for a processed work item.
/// Both variants hand the item back, so a failed item can be pushed again by the caller.
#[derive(Debug)]
pub enum Outcome<T, R, E> {
    Success { item: WorkItem<T>, value: R },
    Failure { item: WorkItem<T>, error: E },
}

impl<T, R, E> Outcome<T, R, E> {
    pub fn item(&self) -> &WorkItem<T> {
        match self {
            Outcome::Success { item, .. } | Outcome::Failure { item, .. } => item,
        }
    }
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
    /// drops the item and keeps only what the runner returned
    pub fn into_result(self) -> Result<R, E> {
        match self {
            Outcome::Success { value, .. } => Ok(value),
            Outcome::Failure { error, .. } => Err(error),
        }
    }
    pub fn into_parts(self) -> (WorkItem<T>, Result<R, E>) {
        match self {
            Outcome::Success { item, value } => (item, Ok(value)),
            Outcome::Failure { item, error } => (item, Err(error)),
        }
    }
}
