//! Append-only conversation log and the bounded view sent to the model.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Number of leading entries (system + instance prompt) that are always kept in the model view.
const FRAMING_MESSAGES: usize = 2;

/// Keys serialized from `Message`'s own fields; an `extra` entry with one of these names would be
/// written twice.
const RESERVED_KEYS: [&str; 3] = ["role", "content", "timestamp"];

/// Speaker of a conversation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One entry of the conversation.
///
/// `extra` carries producer-specific fields (e.g. auxiliary fields of a model response) and is
/// flattened next to `role`/`content`/`timestamp` when serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Seconds since the Unix epoch at append time.
    pub timestamp: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Ordered record of a run's conversation. Entries are never edited or removed.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    messages: Vec<Message>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new entry stamped with the current wall-clock time.
    ///
    /// `extra` entries named like a message field (`role`, `content`, `timestamp`) are dropped.
    pub fn append(
        &mut self,
        role: Role,
        content: impl Into<String>,
        mut extra: Map<String, Value>,
    ) {
        extra.retain(|key, _| !RESERVED_KEYS.contains(&key.as_str()));
        self.messages.push(Message {
            role,
            content: content.into(),
            timestamp: now_secs(),
            extra,
        });
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Entries to send to the model.
    ///
    /// With `max_history == 0` this is the whole log. Otherwise the first two entries are kept
    /// and followed by the last `max_history` entries of the remainder.
    pub fn view_for_model(&self, max_history: usize) -> Vec<Message> {
        if max_history == 0 || self.messages.len() <= FRAMING_MESSAGES {
            return self.messages.clone();
        }
        let (head, rest) = self.messages.split_at(FRAMING_MESSAGES);
        let skip = rest.len().saturating_sub(max_history);
        head.iter().chain(&rest[skip..]).cloned().collect()
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default()
}
