//! services/api/src/persistence.rs
//!
//! Write-behind persistence for interview transcripts. Chat turns go through a
//! bounded foreground retry first; turns that still fail are parked on a FIFO
//! queue and replayed by a background drain task until they land. A save
//! failure is never surfaced to the caller as fatal.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_retry2::{
    strategy::{jitter, ExponentialBackoff},
    Retry, RetryError,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use storyflow_core::domain::NewFoundationMessage;
use storyflow_core::ports::{DatabaseService, PortError, PortResult};

//=========================================================================================
// The Storage Seam
//=========================================================================================

/// The single write the queue needs from the storage layer. Every
/// `DatabaseService` satisfies it, so production hands the queue the real
/// database adapter.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Returns `Ok(false)` when the message was already stored under the
    /// same `client_key`.
    async fn insert_message(&self, message: &NewFoundationMessage) -> PortResult<bool>;
}

#[async_trait]
impl<T: DatabaseService + ?Sized> MessageSink for T {
    async fn insert_message(&self, message: &NewFoundationMessage) -> PortResult<bool> {
        DatabaseService::insert_message(self, message).await
    }
}

//=========================================================================================
// The Save Queue
//=========================================================================================

/// Pending messages and the drain-task guard live under one lock so that
/// parking a message and observing an exiting drain task cannot interleave.
struct QueueState {
    pending: VecDeque<NewFoundationMessage>,
    is_draining: bool,
}

/// An owned, lifecycle-scoped message writer. Created once alongside the
/// application state and shut down explicitly via [`MessageSaveQueue::shutdown`].
pub struct MessageSaveQueue {
    sink: Arc<dyn MessageSink>,
    state: Mutex<QueueState>,
    base_delay: Duration,
    max_retries: usize,
    drain_interval: Duration,
    shutdown_token: CancellationToken,
}

impl MessageSaveQueue {
    pub fn new(
        sink: Arc<dyn MessageSink>,
        base_delay: Duration,
        max_retries: usize,
        drain_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            sink,
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                is_draining: false,
            }),
            base_delay,
            max_retries,
            drain_interval,
            shutdown_token: CancellationToken::new(),
        })
    }

    /// Persists a chat turn. Returns `true` when the message is stored (or was
    /// already stored under its `client_key`) and `false` when it had to be
    /// parked for the background drain task.
    pub async fn save_message(self: &Arc<Self>, message: NewFoundationMessage) -> bool {
        let retry_strategy = ExponentialBackoff::from_millis(self.base_delay.as_millis() as u64)
            .factor(2)
            .max_delay(Duration::from_secs(5))
            .map(jitter)
            .take(self.max_retries);

        let attempt = Retry::spawn(retry_strategy, || async {
            match self.sink.insert_message(&message).await {
                Ok(_) => Ok(()),
                Err(e @ PortError::Unexpected(_)) => {
                    warn!(
                        client_key = %message.client_key,
                        "Transient message save failure, will retry: {}", e
                    );
                    Err(RetryError::Transient {
                        err: e,
                        retry_after: None,
                    })
                }
                Err(e) => {
                    warn!(
                        client_key = %message.client_key,
                        "Message save failed without a retry path: {}", e
                    );
                    Err(RetryError::Permanent(e))
                }
            }
        })
        .await;

        match attempt {
            Ok(()) => true,
            Err(e) => {
                error!(
                    client_key = %message.client_key,
                    "Message save retries exhausted, parking for background drain: {}", e
                );
                self.park(message).await;
                false
            }
        }
    }

    /// Number of messages still waiting on the background drain task.
    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Stops the drain task. Messages still pending stay in memory and are
    /// lost with the process.
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }

    async fn park(self: &Arc<Self>, message: NewFoundationMessage) {
        let mut state = self.state.lock().await;
        state.pending.push_back(message);
        if !state.is_draining {
            state.is_draining = true;
            tokio::spawn(Arc::clone(self).drain_loop());
        }
    }

    /// Retries the oldest pending message once per tick. Pops on success so
    /// replay keeps transcript order; exits once the queue is empty.
    async fn drain_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    let mut state = self.state.lock().await;
                    state.is_draining = false;
                    if !state.pending.is_empty() {
                        warn!(
                            pending = state.pending.len(),
                            "Drain task stopping with messages still queued"
                        );
                    }
                    return;
                }
                _ = tokio::time::sleep(self.drain_interval) => {}
            }

            // The empty check and the guard reset happen under one lock; a
            // message parked after this point sees `is_draining == false` and
            // spawns a fresh task.
            let next = {
                let mut state = self.state.lock().await;
                match state.pending.front().cloned() {
                    Some(message) => message,
                    None => {
                        state.is_draining = false;
                        return;
                    }
                }
            };

            match self.sink.insert_message(&next).await {
                Ok(_) => {
                    debug!(client_key = %next.client_key, "Drained one pending message");
                    let mut state = self.state.lock().await;
                    state.pending.pop_front();
                }
                Err(e) => {
                    warn!(
                        client_key = %next.client_key,
                        "Pending message still failing, will retry next tick: {}", e
                    );
                }
            }
        }
    }
}

//=========================================================================================
// Tests
//=========================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use storyflow_core::domain::MessageRole;
    use uuid::Uuid;

    /// A sink whose next `fail_next` inserts fail, recording successful
    /// inserts in arrival order and deduplicating on `client_key`.
    struct RecordingSink {
        fail_next: Mutex<usize>,
        attempts: Mutex<usize>,
        inserted: Mutex<Vec<Uuid>>,
    }

    impl RecordingSink {
        fn failing(fail_next: usize) -> Arc<Self> {
            Arc::new(Self {
                fail_next: Mutex::new(fail_next),
                attempts: Mutex::new(0),
                inserted: Mutex::new(Vec::new()),
            })
        }

        async fn heal(&self) {
            *self.fail_next.lock().await = 0;
        }

        async fn attempts(&self) -> usize {
            *self.attempts.lock().await
        }

        async fn inserted(&self) -> Vec<Uuid> {
            self.inserted.lock().await.clone()
        }
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn insert_message(&self, message: &NewFoundationMessage) -> PortResult<bool> {
            *self.attempts.lock().await += 1;
            let mut fail_next = self.fail_next.lock().await;
            if *fail_next > 0 {
                *fail_next -= 1;
                return Err(PortError::Unexpected("connection reset".to_string()));
            }
            let mut inserted = self.inserted.lock().await;
            if inserted.contains(&message.client_key) {
                return Ok(false);
            }
            inserted.push(message.client_key);
            Ok(true)
        }
    }

    fn message(content: &str) -> NewFoundationMessage {
        NewFoundationMessage::new(Uuid::new_v4(), MessageRole::User, content)
    }

    fn queue(sink: Arc<RecordingSink>, max_retries: usize) -> Arc<MessageSaveQueue> {
        MessageSaveQueue::new(
            sink,
            Duration::from_millis(1),
            max_retries,
            Duration::from_millis(20),
        )
    }

    async fn wait_until_drained(queue: &MessageSaveQueue) {
        for _ in 0..100 {
            if queue.pending_len().await == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("queue never drained");
    }

    #[tokio::test]
    async fn transient_failures_recover_within_the_retry_budget() {
        let sink = RecordingSink::failing(2);
        let queue = queue(sink.clone(), 3);

        let saved = queue.save_message(message("hello")).await;

        assert!(saved);
        assert_eq!(queue.pending_len().await, 0);
        assert_eq!(sink.inserted().await.len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_park_the_message_and_the_drain_task_lands_it() {
        // Foreground burns 1 + 2 attempts, the drain task eats the rest.
        let sink = RecordingSink::failing(5);
        let queue = queue(sink.clone(), 2);

        let msg = message("stubborn");
        let key = msg.client_key;
        let saved = queue.save_message(msg).await;

        assert!(!saved);
        assert_eq!(queue.pending_len().await, 1);

        wait_until_drained(&queue).await;
        assert_eq!(sink.inserted().await, vec![key]);
    }

    #[tokio::test]
    async fn drain_replays_parked_messages_in_fifo_order() {
        let sink = RecordingSink::failing(2);
        let queue = queue(sink.clone(), 0);

        let first = message("first");
        let second = message("second");
        let first_key = first.client_key;
        let second_key = second.client_key;

        assert!(!queue.save_message(first).await);
        assert!(!queue.save_message(second).await);
        assert_eq!(queue.pending_len().await, 2);

        sink.heal().await;
        wait_until_drained(&queue).await;
        assert_eq!(sink.inserted().await, vec![first_key, second_key]);
    }

    #[tokio::test]
    async fn redelivery_of_one_client_key_stores_a_single_row() {
        let sink = RecordingSink::failing(0);
        let queue = queue(sink.clone(), 1);

        let msg = message("say it twice");
        assert!(queue.save_message(msg.clone()).await);
        assert!(queue.save_message(msg).await);

        assert_eq!(sink.inserted().await.len(), 1);
    }

    #[tokio::test]
    async fn shutdown_stops_the_drain_task() {
        let sink = RecordingSink::failing(usize::MAX);
        let queue = queue(sink.clone(), 0);

        assert!(!queue.save_message(message("doomed")).await);
        queue.shutdown();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let settled = sink.attempts().await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(sink.attempts().await, settled);
        assert_eq!(queue.pending_len().await, 1);
    }
}
