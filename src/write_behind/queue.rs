//! Write-behind queue and its drain worker.
//!
//! Intents are drained by at most one worker task per queue. The worker is
//! started by `enqueue` when none is running and clears its own active flag
//! under the same lock once the queue is empty, so an intent can never be
//! left behind without a worker.

use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::FutureExt;
use metrics::{counter, gauge, histogram};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::repos::{DurableWriter, RepoError};
use crate::cache::mutex_lock;

use super::config::WriteBehindConfig;
use super::intent::{AttemptOutcome, IntentPayload, WriteIntent};

const SOURCE: &str = "write_behind::queue";

const METRIC_ENQUEUED: &str = "parley_write_behind_enqueued_total";
const METRIC_SUCCEEDED: &str = "parley_write_behind_succeeded_total";
const METRIC_RETRIED: &str = "parley_write_behind_retried_total";
const METRIC_DROPPED: &str = "parley_write_behind_dropped_total";
const METRIC_QUEUE_LEN: &str = "parley_write_behind_queue_len";
const METRIC_DURABLE_WRITE_MS: &str = "parley_durable_write_ms";

#[derive(Default)]
struct QueueState {
    pending: VecDeque<WriteIntent>,
    worker_active: bool,
}

struct QueueInner {
    state: Mutex<QueueState>,
    writer: Arc<dyn DurableWriter>,
    config: WriteBehindConfig,
    idle: Notify,
}

/// In-process queue of durable writes, drained in the background.
///
/// Construct one per process and share it by cloning; clones drive the same
/// queue and worker.
#[derive(Clone)]
pub struct WriteBehindQueue {
    inner: Arc<QueueInner>,
}

impl WriteBehindQueue {
    pub fn new(writer: Arc<dyn DurableWriter>, config: WriteBehindConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                writer,
                config,
                idle: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &WriteBehindConfig {
        &self.inner.config
    }

    /// Accept an intent and make sure a worker will drain it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn enqueue(&self, payload: IntentPayload) -> Uuid {
        let intent = WriteIntent::new(payload);
        let intent_id = intent.id;
        let intent_kind = intent.kind();
        let chat_id = intent.chat_id();

        let (spawn_worker, pending) = {
            let mut state = mutex_lock(&self.inner.state, SOURCE, "enqueue");
            state.pending.push_back(intent);
            let spawn_worker = !state.worker_active;
            state.worker_active = true;
            (spawn_worker, state.pending.len())
        };

        counter!(METRIC_ENQUEUED, "kind" => intent_kind.as_str()).increment(1);
        gauge!(METRIC_QUEUE_LEN).set(pending as f64);
        debug!(
            intent_id = %intent_id,
            intent_kind = %intent_kind,
            chat_id = %chat_id,
            pending,
            "Write intent enqueued"
        );

        if spawn_worker {
            tokio::spawn(Arc::clone(&self.inner).run_worker());
        }

        intent_id
    }

    /// Intents waiting for (or between) attempts.
    pub fn pending_len(&self) -> usize {
        mutex_lock(&self.inner.state, SOURCE, "pending_len")
            .pending
            .len()
    }

    pub fn is_worker_active(&self) -> bool {
        mutex_lock(&self.inner.state, SOURCE, "is_worker_active").worker_active
    }

    pub fn is_idle(&self) -> bool {
        self.inner.is_idle()
    }

    /// Wait until the queue is empty and the worker has stopped.
    ///
    /// Returns `false` if `limit` elapsed first.
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.is_idle() {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.inner.is_idle();
            }
        }
    }
}

impl QueueInner {
    fn is_idle(&self) -> bool {
        let state = mutex_lock(&self.state, SOURCE, "is_idle");
        state.pending.is_empty() && !state.worker_active
    }

    async fn run_worker(self: Arc<Self>) {
        debug!("Write-behind worker started");
        let mut ticks = 0u64;

        loop {
            let batch: Vec<WriteIntent> = {
                let mut state = mutex_lock(&self.state, SOURCE, "tick");
                state.pending.drain(..).collect()
            };
            ticks += 1;

            let carried = self.tick(batch).await;

            let remaining = {
                let mut state = mutex_lock(&self.state, SOURCE, "requeue");
                // Carried intents go ahead of anything enqueued during the tick.
                for intent in carried.into_iter().rev() {
                    state.pending.push_front(intent);
                }
                let remaining = state.pending.len();
                if remaining == 0 {
                    state.worker_active = false;
                }
                remaining
            };
            gauge!(METRIC_QUEUE_LEN).set(remaining as f64);

            if remaining == 0 {
                debug!(ticks, "Write-behind worker idle");
                self.idle.notify_waiters();
                return;
            }

            tokio::time::sleep(self.config.drain_delay()).await;
        }
    }

    /// Attempt every intent in `batch` once, returning the ones to carry over.
    ///
    /// Once an intent for a chat is carried, later intents for that chat in the
    /// same batch are carried behind it without being attempted.
    async fn tick(&self, batch: Vec<WriteIntent>) -> Vec<WriteIntent> {
        let mut carried = Vec::new();
        let mut blocked_chats: HashSet<Uuid> = HashSet::new();

        for mut intent in batch {
            let chat_id = intent.chat_id();
            if blocked_chats.contains(&chat_id) {
                debug!(
                    intent_id = %intent.id,
                    chat_id = %chat_id,
                    "Write intent deferred behind an earlier retry"
                );
                carried.push(intent);
                continue;
            }

            intent.begin_attempt();
            let started_at = Instant::now();
            let result = self.attempt(&intent).await;
            histogram!(METRIC_DURABLE_WRITE_MS, "kind" => intent.kind().as_str())
                .record(started_at.elapsed().as_secs_f64() * 1000.0);

            match intent.settle(&result, self.config.max_retries) {
                AttemptOutcome::Succeeded => {
                    counter!(METRIC_SUCCEEDED, "kind" => intent.kind().as_str()).increment(1);
                    info!(
                        intent_id = %intent.id,
                        intent_kind = %intent.kind(),
                        chat_id = %chat_id,
                        retry_count = intent.retry_count,
                        "Write intent committed"
                    );
                }
                AttemptOutcome::Requeued { retry_count } => {
                    counter!(METRIC_RETRIED, "kind" => intent.kind().as_str()).increment(1);
                    warn!(
                        intent_id = %intent.id,
                        intent_kind = %intent.kind(),
                        chat_id = %chat_id,
                        retry_count,
                        error = %display_error(&result),
                        "Durable write failed; requeued"
                    );
                    blocked_chats.insert(chat_id);
                    carried.push(intent);
                }
                AttemptOutcome::Dropped(reason) => {
                    counter!(METRIC_DROPPED, "reason" => reason.as_str()).increment(1);
                    error!(
                        intent_id = %intent.id,
                        intent_kind = %intent.kind(),
                        chat_id = %chat_id,
                        retry_count = intent.retry_count,
                        reason = reason.as_str(),
                        enqueued_at = %intent.enqueued_at,
                        error = %display_error(&result),
                        "Durable write dropped; cached data will not be persisted"
                    );
                }
            }
        }

        carried
    }

    async fn attempt(&self, intent: &WriteIntent) -> Result<(), RepoError> {
        let writer = &self.writer;
        let write = async {
            match &intent.payload {
                IntentPayload::Message { user_id, message } => {
                    writer.write_message(user_id, message).await
                }
                IntentPayload::Chat { chat } => writer.write_chat(chat).await,
                IntentPayload::ChatWithMessage { chat, message } => {
                    writer.write_chat_with_message(chat, message).await
                }
            }
        };

        // A panicking writer must not take the worker (and its active flag) down.
        match AssertUnwindSafe(write).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(RepoError::Integrity {
                message: "durable writer panicked".to_string(),
            }),
        }
    }
}

fn display_error(result: &Result<(), RepoError>) -> String {
    match result {
        Ok(()) => String::new(),
        Err(err) => err.to_string(),
    }
}
