//! Cache key definitions.
//!
//! Every cached value lives under a namespaced string key. The namespace fixes
//! the TTL class, so callers pick a `CacheKey` variant and never a TTL.
//!
//! | Namespace | Format | TTL |
//! |---|---|---|
//! | chat list | `chat:list:{userId}:{archived}` | 60s |
//! | chat messages | `chat:messages:{chatId}:{limit}:{before\|null}:{after\|null}` | 60s |
//! | chat meta | `chat:meta:{chatId}` | 300s |
//! | chat summary | `chat:summary:{chatId}` | 900s |
//! | user memory | `user:memory:{userId}` | 600s |
//! | stats | `stats:{chat\|user\|model}:{id}:{start\|null}:{end\|null}` | 300s |
//! | message stats | `stats:message:{messageId}` | 300s |

use std::fmt;
use std::time::Duration;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

const NULL_SEGMENT: &str = "null";

/// TTL class of a key, derived from its namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyNamespace {
    ChatList,
    ChatMessages,
    ChatMeta,
    ChatSummary,
    UserMemory,
    Stats,
}

impl KeyNamespace {
    pub fn ttl(self) -> Duration {
        match self {
            KeyNamespace::ChatList | KeyNamespace::ChatMessages => Duration::from_secs(60),
            KeyNamespace::ChatMeta | KeyNamespace::Stats => Duration::from_secs(300),
            KeyNamespace::UserMemory => Duration::from_secs(600),
            KeyNamespace::ChatSummary => Duration::from_secs(900),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KeyNamespace::ChatList => "chat:list",
            KeyNamespace::ChatMessages => "chat:messages",
            KeyNamespace::ChatMeta => "chat:meta",
            KeyNamespace::ChatSummary => "chat:summary",
            KeyNamespace::UserMemory => "user:memory",
            KeyNamespace::Stats => "stats",
        }
    }
}

/// Optional time window used by the usage-statistics keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StatsRange {
    pub start: Option<OffsetDateTime>,
    pub end: Option<OffsetDateTime>,
}

impl StatsRange {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn between(start: OffsetDateTime, end: OffsetDateTime) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }
}

/// A fully-specified cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    ChatList {
        user_id: String,
        archived: bool,
    },
    ChatMessages {
        chat_id: Uuid,
        limit: u32,
        before: Option<OffsetDateTime>,
        after: Option<OffsetDateTime>,
    },
    ChatMeta(Uuid),
    ChatSummary(Uuid),
    UserMemory(String),
    StatsChat {
        chat_id: Uuid,
        range: StatsRange,
    },
    StatsUser {
        user_id: String,
        range: StatsRange,
    },
    StatsModel {
        user_id: String,
        range: StatsRange,
    },
    StatsMessage(Uuid),
}

impl CacheKey {
    pub fn chat_list(user_id: &str, archived: bool) -> Self {
        Self::ChatList {
            user_id: user_id.to_string(),
            archived,
        }
    }

    /// The newest page of a chat, which the write-behind path appends to.
    pub fn latest_messages(chat_id: Uuid, limit: u32) -> Self {
        Self::ChatMessages {
            chat_id,
            limit,
            before: None,
            after: None,
        }
    }

    pub fn namespace(&self) -> KeyNamespace {
        match self {
            CacheKey::ChatList { .. } => KeyNamespace::ChatList,
            CacheKey::ChatMessages { .. } => KeyNamespace::ChatMessages,
            CacheKey::ChatMeta(_) => KeyNamespace::ChatMeta,
            CacheKey::ChatSummary(_) => KeyNamespace::ChatSummary,
            CacheKey::UserMemory(_) => KeyNamespace::UserMemory,
            CacheKey::StatsChat { .. }
            | CacheKey::StatsUser { .. }
            | CacheKey::StatsModel { .. }
            | CacheKey::StatsMessage(_) => KeyNamespace::Stats,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.namespace().ttl()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::ChatList { user_id, archived } => {
                write!(f, "chat:list:{user_id}:{archived}")
            }
            CacheKey::ChatMessages {
                chat_id,
                limit,
                before,
                after,
            } => write!(
                f,
                "chat:messages:{chat_id}:{limit}:{}:{}",
                TimeSegment(*before),
                TimeSegment(*after)
            ),
            CacheKey::ChatMeta(chat_id) => write!(f, "chat:meta:{chat_id}"),
            CacheKey::ChatSummary(chat_id) => write!(f, "chat:summary:{chat_id}"),
            CacheKey::UserMemory(user_id) => write!(f, "user:memory:{user_id}"),
            CacheKey::StatsChat { chat_id, range } => write_stats(f, "chat", chat_id, range),
            CacheKey::StatsUser { user_id, range } => write_stats(f, "user", user_id, range),
            CacheKey::StatsModel { user_id, range } => write_stats(f, "model", user_id, range),
            CacheKey::StatsMessage(message_id) => write!(f, "stats:message:{message_id}"),
        }
    }
}

fn write_stats(
    f: &mut fmt::Formatter<'_>,
    scope: &str,
    id: &dyn fmt::Display,
    range: &StatsRange,
) -> fmt::Result {
    write!(
        f,
        "stats:{scope}:{id}:{}:{}",
        TimeSegment(range.start),
        TimeSegment(range.end)
    )
}

/// Renders an optional timestamp as RFC 3339, or `null`.
struct TimeSegment(Option<OffsetDateTime>);

impl fmt::Display for TimeSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            None => f.write_str(NULL_SEGMENT),
            Some(at) => match at.format(&Rfc3339) {
                Ok(text) => f.write_str(&text),
                // Out-of-range years cannot be expressed in RFC 3339.
                Err(_) => write!(f, "{}", at.unix_timestamp()),
            },
        }
    }
}

/// A glob pattern covering every key of one entity within a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPattern {
    ChatList(String),
    ChatMessages(Uuid),
    StatsChat(Uuid),
    StatsUser(String),
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPattern::ChatList(user_id) => write!(f, "chat:list:{}:*", escape_glob(user_id)),
            KeyPattern::ChatMessages(chat_id) => write!(f, "chat:messages:{chat_id}:*"),
            KeyPattern::StatsChat(chat_id) => write!(f, "stats:chat:{chat_id}:*"),
            KeyPattern::StatsUser(user_id) => write!(f, "stats:user:{}:*", escape_glob(user_id)),
        }
    }
}

/// Escape glob metacharacters so caller-supplied ids match literally.
pub fn escape_glob(segment: &str) -> String {
    let mut escaped = String::with_capacity(segment.len());
    for ch in segment.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
