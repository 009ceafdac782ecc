//! Message page types shared by the cache and the read repositories.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::entities::MessageRecord;

/// Keyset window over a chat's messages, ordered by `created_at`.
///
/// `before`/`after` are exclusive bounds. With neither set the newest `limit`
/// messages are selected. An `after`-only window reads forward and selects
/// the oldest `limit` messages past the cursor; every other window reads
/// backward from its upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessagePageQuery {
    pub limit: u32,
    pub before: Option<OffsetDateTime>,
    pub after: Option<OffsetDateTime>,
}

impl MessagePageQuery {
    pub fn latest(limit: u32) -> Self {
        Self {
            limit: limit.max(1),
            before: None,
            after: None,
        }
    }

    pub fn before(limit: u32, before: OffsetDateTime) -> Self {
        Self {
            before: Some(before),
            ..Self::latest(limit)
        }
    }

    pub fn after(limit: u32, after: OffsetDateTime) -> Self {
        Self {
            after: Some(after),
            ..Self::latest(limit)
        }
    }

    /// Whether the window pages toward newer messages.
    pub fn is_forward(&self) -> bool {
        self.after.is_some() && self.before.is_none()
    }
}

/// One page of messages, ascending by `created_at`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<MessageRecord>,
    /// Whether messages exist beyond this page in the direction it was read:
    /// older for backward windows, newer for forward ones.
    pub has_more: bool,
    /// Cursor for the next page in the same direction: the oldest message's
    /// `created_at` for backward windows, the newest one's for forward ones.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub next_cursor: Option<OffsetDateTime>,
}

impl MessagePage {
    pub fn new(messages: Vec<MessageRecord>, has_more: bool) -> Self {
        let next_cursor = if has_more {
            messages.first().map(|message| message.created_at)
        } else {
            None
        };
        Self {
            messages,
            has_more,
            next_cursor,
        }
    }

    /// A page read forward from an `after` cursor.
    pub fn forward(messages: Vec<MessageRecord>, has_more: bool) -> Self {
        let next_cursor = if has_more {
            messages.last().map(|message| message.created_at)
        } else {
            None
        };
        Self {
            messages,
            has_more,
            next_cursor,
        }
    }

    /// Add `message` in `created_at` order and keep only the newest `limit`.
    ///
    /// A message whose id is already present is ignored. Returns whether the
    /// page changed.
    pub fn append_bounded(&mut self, message: MessageRecord, limit: usize) -> bool {
        if self.messages.iter().any(|existing| existing.id == message.id) {
            return false;
        }

        let position = self
            .messages
            .partition_point(|existing| existing.created_at <= message.created_at);
        self.messages.insert(position, message);

        let limit = limit.max(1);
        if self.messages.len() > limit {
            let overflow = self.messages.len() - limit;
            self.messages.drain(..overflow);
            self.has_more = true;
        }
        if self.has_more {
            self.next_cursor = self.messages.first().map(|message| message.created_at);
        }
        true
    }
}
