use crate::{config::RateLimiterConfig, prelude::*};
use flume::{Receiver, Sender};
use parking_lot::Mutex;
use std::{future::Future, pin::Pin, sync::Arc, time::Duration};
use tokio::{runtime::Handle, task::JoinHandle};

pub type RunnerFuture<R, E> = Pin<Box<dyn Future<Output = std::result::Result<R, E>> + Send>>;
/// The function the dispatch loop calls once per work item.
/// it gets the item's token and a clone of the payload. The original item goes back in the [Outcome].
pub type Runner<T, R, E> = Arc<dyn Fn(CancellationToken, T) -> RunnerFuture<R, E> + Send + Sync>;

/// Runs pushed work items one at a time through a runner, at most `rate_per_second` items per second.
///
/// Items are queued in a bounded fifo queue. `start` spawns a single dispatch loop on the tokio runtime
/// the limiter was created with, and `stop` shuts it down. Queued items survive a stop and are picked up
/// by the next `start`.
///
/// Every processed item produces exactly one [Outcome] on [RateLimiter::outcomes]. With the default
/// outcome capacity of zero, the loop waits for a consumer on every delivery, so someone must drain it.
pub struct RateLimiter<T, R, E> {
    /// runtime handle to spawn the dispatch loop on
    handle: Handle,
    /// pause after each processed item
    delay: Duration,
    runner: Runner<T, R, E>,
    queue_sender: Sender<WorkItem<T>>,
    queue_receiver: Receiver<WorkItem<T>>,
    outcome_sender: Sender<Outcome<T, R, E>>,
    /// we keep a receiver ourselves, so deliveries never fail just because no consumer asked for one yet
    outcome_receiver: Receiver<Outcome<T, R, E>>,
    /// the last spawned dispatch loop. start and stop both go through this lock
    dispatch: Mutex<Option<DispatchLoop>>,
}

struct DispatchLoop {
    shutdown: CancellationToken,
    /// cancelled once the loop task is gone, however it exited
    finished: CancellationToken,
    /// None once a stop took it. the loop may still be shutting down until `finished` fires
    join_handle: Option<JoinHandle<()>>,
}

impl<T, R, E> RateLimiter<T, R, E>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    pub fn new<F, Fut>(handle: Handle, rate_per_second: u32, runner: F) -> Result<Self>
    where
        F: Fn(CancellationToken, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        Self::with_config(handle, RateLimiterConfig::with_rate(rate_per_second), runner)
    }

    pub fn with_config<F, Fut>(handle: Handle, config: RateLimiterConfig, runner: F) -> Result<Self>
    where
        F: Fn(CancellationToken, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        config.validate()?;
        let delay = config.delay()?;
        let runner: Runner<T, R, E> = Arc::new(
            move |token: CancellationToken, payload: T| -> RunnerFuture<R, E> {
                Box::pin(runner(token, payload))
            },
        );
        let (queue_sender, queue_receiver) = flume::bounded(config.queue_capacity);
        let (outcome_sender, outcome_receiver) = flume::bounded(config.outcome_capacity);
        debug!(?config, ?delay, "created rate limiter");
        Ok(Self {
            handle,
            delay,
            runner,
            queue_sender,
            queue_receiver,
            outcome_sender,
            outcome_receiver,
            dispatch: Mutex::new(None),
        })
    }

    /// Queue an item. waits only while the queue is full.
    pub async fn push(&self, token: CancellationToken, payload: T) {
        if self
            .queue_sender
            .send_async(WorkItem::new(token, payload))
            .await
            .is_err()
        {
            // we own a receiver, so this can't happen while self is alive
            error!("work queue disconnected");
        }
    }

    /// Queue an item without waiting. A full queue gives the item back.
    pub fn try_push(
        &self,
        token: CancellationToken,
        payload: T,
    ) -> std::result::Result<(), PushError<T>> {
        match self.queue_sender.try_send(WorkItem::new(token, payload)) {
            Ok(()) => Ok(()),
            Err(flume::TrySendError::Full(item) | flume::TrySendError::Disconnected(item)) => {
                Err(PushError::Full(item))
            }
        }
    }

    /// Spawns the dispatch loop. returns false without doing anything if a loop is already running
    /// or a stopped one has not exited yet.
    pub fn start(&self) -> bool {
        let mut dispatch = self.dispatch.lock();
        if dispatch
            .as_ref()
            .is_some_and(|previous| !previous.finished.is_cancelled())
        {
            debug!("dispatch loop is still running or stopping");
            return false;
        }
        let shutdown = CancellationToken::new();
        let finished = CancellationToken::new();
        let done = finished.clone().drop_guard();
        let run = dispatch_loop(
            shutdown.clone(),
            self.queue_receiver.clone(),
            self.outcome_sender.clone(),
            self.runner.clone(),
            self.delay,
        );
        let join_handle = self.handle.spawn(async move {
            let _done = done;
            run.await
        });
        *dispatch = Some(DispatchLoop {
            shutdown,
            finished,
            join_handle: Some(join_handle),
        });
        true
    }

    /// Shuts down the dispatch loop and waits until it exits.
    /// An item that is still inside the runner is abandoned, and so is an outcome nobody received yet.
    /// Items still in the queue stay there.
    ///
    /// Until it has exited, `start` keeps refusing to spawn another loop.
    /// A second concurrent stop gets [RateLimitError::NotRunning].
    pub async fn stop(&self) -> Result<()> {
        let join_handle = self
            .dispatch
            .lock()
            .as_mut()
            .and_then(|running| {
                running.shutdown.cancel();
                running.join_handle.take()
            })
            .ok_or(RateLimitError::NotRunning)?;
        join_handle.await?;
        Ok(())
    }

    /// true while a loop is alive and no stop was asked for
    pub fn is_running(&self) -> bool {
        self.dispatch.lock().as_ref().is_some_and(|running| {
            running.join_handle.is_some() && !running.finished.is_cancelled()
        })
    }

    /// number of items waiting in the queue right now
    pub fn queue_size(&self) -> usize {
        self.queue_sender.len()
    }

    pub fn outcomes(&self) -> Receiver<Outcome<T, R, E>> {
        self.outcome_receiver.clone()
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl<T, R, E> Drop for RateLimiter<T, R, E> {
    fn drop(&mut self) {
        if let Some(running) = self.dispatch.get_mut().take() {
            running.shutdown.cancel();
        }
    }
}

#[tracing::instrument(skip_all, fields(delay = ?delay))]
async fn dispatch_loop<T, R, E>(
    shutdown: CancellationToken,
    queue: Receiver<WorkItem<T>>,
    outcomes: Sender<Outcome<T, R, E>>,
    runner: Runner<T, R, E>,
    delay: Duration,
) where
    T: Clone + Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    debug!("dispatch loop started");
    loop {
        let item = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            item = queue.recv_async() => match item {
                Ok(item) => item,
                Err(_) => {
                    warn!("work queue disconnected");
                    break;
                }
            },
        };
        trace!(queued = queue.len(), "dispatching work item");
        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!("abandoning in-flight work item");
                break;
            }
            result = runner(item.token.clone(), item.payload.clone()) => result,
        };
        let outcome = match result {
            Ok(value) => Outcome::Success { item, value },
            Err(error) => {
                debug!("runner returned an error");
                Outcome::Failure { item, error }
            }
        };
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!("abandoning undelivered outcome");
                break;
            }
            sent = outcomes.send_async(outcome) => {
                if sent.is_err() {
                    warn!("outcome channel disconnected");
                    break;
                }
            }
        }
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    debug!("dispatch loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;
    use similar_asserts::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    type Limiter = RateLimiter<&'static str, &'static str, String>;

    fn identity(rate: u32) -> Limiter {
        RateLimiter::new(
            Handle::current(),
            rate,
            |_token: CancellationToken, item: &'static str| async move { Ok::<_, String>(item) },
        )
        .expect("failed to create rate limiter")
    }

    fn counter(rate: u32) -> RateLimiter<u32, u32, String> {
        RateLimiter::new(
            Handle::current(),
            rate,
            |_token: CancellationToken, item: u32| async move { Ok::<_, String>(item) },
        )
        .expect("failed to create rate limiter")
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn identity_runner_delivers_each_item_in_order() {
        let limiter = identity(2);
        let outcomes = limiter.outcomes();
        for item in ["A", "B", "C"] {
            limiter.push(CancellationToken::new(), item).await;
        }
        assert!(limiter.start());

        let mut received = vec![];
        for _ in 0..3 {
            let outcome = outcomes
                .recv_async()
                .await
                .expect("outcome channel closed");
            received.push((Instant::now(), outcome));
        }
        let values: Vec<&str> = received
            .iter()
            .map(|(_, outcome)| match outcome {
                Outcome::Success { item, value } => {
                    assert_eq!(item.payload, *value);
                    *value
                }
                Outcome::Failure { error, .. } => panic!("identity runner failed: {error}"),
            })
            .collect();
        assert_eq!(values, vec!["A", "B", "C"]);
        assert_eq!(limiter.delay(), Duration::from_millis(500));
        assert!(received[1].0 - received[0].0 >= limiter.delay());
        assert!(received[2].0 - received[1].0 >= limiter.delay());

        limiter.stop().await.expect("failed to stop");
        assert!(outcomes.try_recv().is_err());
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(3)]
    #[case(10)]
    #[tokio::test(start_paused = true)]
    async fn rate_ceiling_is_respected(#[case] rate: u32) {
        const ITEMS: u32 = 6;
        let limiter = counter(rate);
        let outcomes = limiter.outcomes();
        for item in 0..ITEMS {
            limiter.push(CancellationToken::new(), item).await;
        }
        let started = Instant::now();
        limiter.start();
        for _ in 0..ITEMS {
            outcomes
                .recv_async()
                .await
                .expect("outcome channel closed");
        }
        let floor = Duration::from_secs(1) * (ITEMS - 1) / rate;
        assert!(
            started.elapsed() >= floor,
            "{ITEMS} items at {rate}/s finished in {:?}, expected at least {floor:?}",
            started.elapsed()
        );
        limiter.stop().await.expect("failed to stop");
    }

    #[tokio::test(start_paused = true)]
    async fn queue_size_tracks_pending_items() {
        let limiter = identity(1);
        let outcomes = limiter.outcomes();
        assert_eq!(limiter.queue_size(), 0);
        for item in ["A", "B", "C"] {
            limiter.push(CancellationToken::new(), item).await;
        }
        assert_eq!(limiter.queue_size(), 3);

        limiter.start();
        let first = outcomes
            .recv_async()
            .await
            .expect("outcome channel closed");
        assert_eq!(first.item().payload, "A");
        assert_eq!(limiter.queue_size(), 2);
        limiter.stop().await.expect("failed to stop");
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_keeps_one_dispatch_loop() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let most_in_flight = Arc::new(AtomicUsize::new(0));
        let limiter = {
            let in_flight = in_flight.clone();
            let most_in_flight = most_in_flight.clone();
            RateLimiter::new(
                Handle::current(),
                100,
                move |_token: CancellationToken, item: u32| {
                    let in_flight = in_flight.clone();
                    let most_in_flight = most_in_flight.clone();
                    async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        most_in_flight.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, String>(item)
                    }
                },
            )
            .expect("failed to create rate limiter")
        };
        let outcomes = limiter.outcomes();
        for item in 0..10 {
            limiter.push(CancellationToken::new(), item).await;
        }
        assert!(limiter.start());
        assert!(!limiter.start());
        assert!(limiter.is_running());

        let mut values = vec![];
        for _ in 0..10 {
            let outcome = outcomes
                .recv_async()
                .await
                .expect("outcome channel closed");
            values.push(outcome.into_result().expect("runner failed"));
        }
        assert_eq!(values, (0..10).collect::<Vec<u32>>());
        assert_eq!(most_in_flight.load(Ordering::SeqCst), 1);
        limiter.stop().await.expect("failed to stop");
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn start_is_refused_until_a_stopped_loop_has_exited() {
        let limiter = identity(10);
        assert!(limiter.start());

        let stopping = limiter.stop();
        tokio::pin!(stopping);
        // poll the stop once: it cancels the loop, then waits for it to exit
        tokio::select! {
            biased;
            stopped = &mut stopping => panic!("stop finished before the loop could exit: {stopped:?}"),
            _ = std::future::ready(()) => {}
        }
        assert!(!limiter.is_running());
        assert!(!limiter.start());
        assert!(matches!(
            limiter.stop().await,
            Err(RateLimitError::NotRunning)
        ));

        stopping.await.expect("failed to stop");
        assert!(limiter.start());
        assert!(limiter.is_running());
        limiter.stop().await.expect("failed to stop");
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn outcome_capacity_buffers_without_a_consumer() {
        let limiter: Limiter = RateLimiter::with_config(
            Handle::current(),
            RateLimiterConfig {
                rate_per_second: 10,
                outcome_capacity: 3,
                ..Default::default()
            },
            |_token: CancellationToken, item: &'static str| async move { Ok::<_, String>(item) },
        )
        .expect("failed to create rate limiter");
        let outcomes = limiter.outcomes();
        for item in ["A", "B", "C"] {
            limiter.push(CancellationToken::new(), item).await;
        }
        limiter.start();
        // nobody receives, the buffer takes all three
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(limiter.queue_size(), 0);
        assert_eq!(outcomes.len(), 3);

        limiter.stop().await.expect("failed to stop");
        let values: Vec<&str> = outcomes
            .drain()
            .map(|outcome| outcome.into_result().expect("runner failed"))
            .collect();
        assert_eq!(values, vec!["A", "B", "C"]);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn runner_error_is_delivered_once_with_its_item() {
        let limiter: Limiter = RateLimiter::new(
            Handle::current(),
            10,
            |_token: CancellationToken, item: &'static str| async move {
                if item == "X" {
                    Err(format!("failed to process {item}"))
                } else {
                    Ok(item)
                }
            },
        )
        .expect("failed to create rate limiter");
        let outcomes = limiter.outcomes();
        let token = CancellationToken::new();
        limiter.push(token.clone(), "X").await;
        limiter.push(CancellationToken::new(), "Y").await;
        limiter.start();

        match outcomes
            .recv_async()
            .await
            .expect("outcome channel closed")
        {
            Outcome::Failure { item, error } => {
                assert_eq!(item.payload, "X");
                assert_eq!(error, "failed to process X");
                // the item carries the same token that was pushed with it
                token.cancel();
                assert!(item.token.is_cancelled());
            }
            Outcome::Success { value, .. } => panic!("X should have failed, got {value}"),
        }
        // the next delivery already belongs to Y
        let next = outcomes
            .recv_async()
            .await
            .expect("outcome channel closed");
        assert!(next.is_success());
        let (item, result) = next.into_parts();
        assert_eq!(item.payload, "Y");
        assert_eq!(result, Ok("Y"));
        limiter.stop().await.expect("failed to stop");
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_items_are_still_dispatched() {
        let limiter = RateLimiter::new(
            Handle::current(),
            10,
            |token: CancellationToken, _item: ()| async move { Ok::<_, String>(token.is_cancelled()) },
        )
        .expect("failed to create rate limiter");
        let outcomes = limiter.outcomes();
        let token = CancellationToken::new();
        token.cancel();
        limiter.push(token, ()).await;
        limiter.start();
        let outcome = outcomes
            .recv_async()
            .await
            .expect("outcome channel closed");
        assert!(outcome.into_result().expect("runner failed"));
        limiter.stop().await.expect("failed to stop");
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn stop_leaves_queued_items_untouched() {
        let limiter = identity(1);
        let outcomes = limiter.outcomes();
        for item in ["A", "B", "C", "D", "E"] {
            limiter.push(CancellationToken::new(), item).await;
        }
        limiter.start();
        let first = outcomes
            .recv_async()
            .await
            .expect("outcome channel closed");
        assert_eq!(first.item().payload, "A");

        limiter.stop().await.expect("failed to stop");
        assert!(!limiter.is_running());
        assert_eq!(limiter.queue_size(), 4);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(matches!(
            outcomes.try_recv(),
            Err(flume::TryRecvError::Empty)
        ));
        assert_eq!(limiter.queue_size(), 4);

        // a later start picks up where the queue left off
        assert!(limiter.start());
        let next = outcomes
            .recv_async()
            .await
            .expect("outcome channel closed");
        assert_eq!(next.item().payload, "B");
        limiter.stop().await.expect("failed to stop");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_does_not_wait_for_a_missing_consumer() {
        let limiter = identity(1);
        let outcomes = limiter.outcomes();
        limiter.push(CancellationToken::new(), "A").await;
        limiter.start();
        // nobody receives, so the loop is stuck delivering A
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(limiter.queue_size(), 0);

        limiter.stop().await.expect("failed to stop");
        assert!(matches!(
            outcomes.try_recv(),
            Err(flume::TryRecvError::Empty)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_not_running_is_an_error() {
        let limiter = identity(1);
        assert!(matches!(
            limiter.stop().await,
            Err(RateLimitError::NotRunning)
        ));
        limiter.start();
        limiter.stop().await.expect("failed to stop");
        assert!(matches!(
            limiter.stop().await,
            Err(RateLimitError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn invalid_construction_is_rejected() {
        let zero_rate = RateLimiter::new(
            Handle::current(),
            0,
            |_token: CancellationToken, item: u32| async move { Ok::<_, String>(item) },
        );
        assert!(matches!(zero_rate, Err(RateLimitError::InvalidRate(0))));

        let zero_queue = RateLimiter::with_config(
            Handle::current(),
            RateLimiterConfig {
                queue_capacity: 0,
                ..Default::default()
            },
            |_token: CancellationToken, item: u32| async move { Ok::<_, String>(item) },
        );
        assert!(matches!(
            zero_queue,
            Err(RateLimitError::InvalidQueueCapacity)
        ));
    }

    #[tokio::test]
    async fn try_push_rejects_when_queue_is_full() {
        let limiter: Limiter = RateLimiter::with_config(
            Handle::current(),
            RateLimiterConfig {
                queue_capacity: 2,
                ..Default::default()
            },
            |_token: CancellationToken, item: &'static str| async move { Ok::<_, String>(item) },
        )
        .expect("failed to create rate limiter");
        assert!(limiter.try_push(CancellationToken::new(), "A").is_ok());
        assert!(limiter.try_push(CancellationToken::new(), "B").is_ok());
        let rejected = limiter
            .try_push(CancellationToken::new(), "C")
            .expect_err("queue should be full");
        assert_eq!(rejected.into_inner().payload, "C");
        assert_eq!(limiter.queue_size(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_pushers_are_all_processed() {
        let limiter = Arc::new(counter(1000));
        let outcomes = limiter.outcomes();
        let pushers: Vec<_> = (0..4u32)
            .map(|pusher| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    for n in 0..5 {
                        limiter.push(CancellationToken::new(), pusher * 5 + n).await;
                    }
                })
            })
            .collect();
        for pusher in pushers {
            pusher.await.expect("pusher panicked");
        }
        assert_eq!(limiter.queue_size(), 20);

        limiter.start();
        let mut values = vec![];
        for _ in 0..20 {
            let outcome = outcomes
                .recv_async()
                .await
                .expect("outcome channel closed");
            values.push(outcome.into_result().expect("runner failed"));
        }
        values.sort_unstable();
        assert_eq!(values, (0..20).collect::<Vec<u32>>());
        limiter.stop().await.expect("failed to stop");
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_limiter_shuts_down_the_loop() {
        let limiter = identity(1);
        let outcomes = limiter.outcomes();
        limiter.start();
        drop(limiter);
        // once the loop exits, every sender is gone
        assert!(outcomes.recv_async().await.is_err());
    }
}
