//! Write intents and their retry state machine.
//!
//! ```text
//! Enqueued -> Attempting -> Succeeded
//!                 |
//!                 +-> Requeued -> Attempting -> ...
//!                 |
//!                 +-> Dropped (terminal error, or retries exhausted)
//! ```

use std::fmt;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::RepoError;
use crate::domain::entities::{ChatRecord, MessageRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntentKind {
    Message,
    Chat,
    ChatWithMessage,
}

impl IntentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IntentKind::Message => "message",
            IntentKind::Chat => "chat",
            IntentKind::ChatWithMessage => "chat_with_message",
        }
    }
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The records a durable write must persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentPayload {
    /// A message under an existing chat; ownership is checked against `user_id`.
    Message {
        user_id: String,
        message: MessageRecord,
    },
    Chat {
        chat: ChatRecord,
    },
    ChatWithMessage {
        chat: ChatRecord,
        message: MessageRecord,
    },
}

impl IntentPayload {
    pub fn kind(&self) -> IntentKind {
        match self {
            IntentPayload::Message { .. } => IntentKind::Message,
            IntentPayload::Chat { .. } => IntentKind::Chat,
            IntentPayload::ChatWithMessage { .. } => IntentKind::ChatWithMessage,
        }
    }

    /// The chat whose writes must be applied in order.
    pub fn chat_id(&self) -> Uuid {
        match self {
            IntentPayload::Message { message, .. } => message.chat_id,
            IntentPayload::Chat { chat } | IntentPayload::ChatWithMessage { chat, .. } => chat.id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentState {
    Enqueued,
    Attempting,
    Requeued,
    Succeeded,
    Dropped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The failure cannot be fixed by retrying.
    Terminal,
    /// Still failing after `max_retries` retries.
    RetriesExhausted,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::Terminal => "terminal",
            DropReason::RetriesExhausted => "retries_exhausted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Requeued { retry_count: u32 },
    Dropped(DropReason),
}

/// A pending durable write owned by the queue until it succeeds or is dropped.
#[derive(Debug, Clone)]
pub struct WriteIntent {
    pub id: Uuid,
    pub payload: IntentPayload,
    pub retry_count: u32,
    pub enqueued_at: OffsetDateTime,
    state: IntentState,
}

impl WriteIntent {
    pub fn new(payload: IntentPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            retry_count: 0,
            enqueued_at: OffsetDateTime::now_utc(),
            state: IntentState::Enqueued,
        }
    }

    pub fn kind(&self) -> IntentKind {
        self.payload.kind()
    }

    pub fn chat_id(&self) -> Uuid {
        self.payload.chat_id()
    }

    pub fn state(&self) -> IntentState {
        self.state
    }

    pub fn begin_attempt(&mut self) {
        debug_assert!(matches!(
            self.state,
            IntentState::Enqueued | IntentState::Requeued
        ));
        self.state = IntentState::Attempting;
    }

    /// Apply the result of an attempt and decide what happens next.
    pub fn settle(&mut self, result: &Result<(), RepoError>, max_retries: u32) -> AttemptOutcome {
        let outcome = match result {
            Ok(()) => AttemptOutcome::Succeeded,
            Err(err) if !err.is_retryable() => AttemptOutcome::Dropped(DropReason::Terminal),
            Err(_) if self.retry_count >= max_retries => {
                AttemptOutcome::Dropped(DropReason::RetriesExhausted)
            }
            Err(_) => {
                self.retry_count += 1;
                AttemptOutcome::Requeued {
                    retry_count: self.retry_count,
                }
            }
        };

        self.state = match outcome {
            AttemptOutcome::Succeeded => IntentState::Succeeded,
            AttemptOutcome::Requeued { .. } => IntentState::Requeued,
            AttemptOutcome::Dropped(_) => IntentState::Dropped,
        };
        outcome
    }
}
