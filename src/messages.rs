use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{require, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    #[serde(rename = "userId")]
    pub sender_id: String,
    #[serde(rename = "userName")]
    pub sender_name: String,
    #[serde(rename = "message")]
    pub body: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
}

/// An inbound chat message before the log has assigned it a timestamp.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "userId")]
    pub sender_id: String,
    #[serde(default, rename = "userName")]
    pub sender_name: String,
    #[serde(default, rename = "message")]
    pub body: String,
    #[serde(default = "default_kind", rename = "type")]
    pub kind: String,
}

fn default_kind() -> String {
    "text".to_string()
}

impl NewMessage {
    pub fn new(
        sender_id: impl Into<String>,
        sender_name: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        NewMessage {
            id: None,
            sender_id: sender_id.into(),
            sender_name: sender_name.into(),
            body: body.into(),
            kind: default_kind(),
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

pub fn generate_message_id() -> String {
    format!("msg_{}", Uuid::new_v4().simple())
}

/// Append-only chat history that never holds more than `capacity` messages.
#[derive(Debug)]
pub struct MessageLog {
    entries: VecDeque<ChatMessage>,
    capacity: usize,
    default_limit: usize,
}

impl MessageLog {
    pub fn new(capacity: usize, default_limit: usize) -> Self {
        let capacity = capacity.max(1);
        MessageLog {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            default_limit: default_limit.max(1),
        }
    }

    /// Appends to the tail and trims the head back down to capacity.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] when the sender id or body is empty.
    /// Nothing is stored in that case.
    pub fn append(
        &mut self,
        message: NewMessage,
        now: DateTime<Utc>,
    ) -> Result<(ChatMessage, usize), StoreError> {
        require(&message.sender_id, "userId")?;
        require(&message.body, "message")?;

        let id = match message.id {
            Some(id) if !id.trim().is_empty() => id,
            _ => generate_message_id(),
        };

        // Wall clock may step backwards; insertion order wins.
        let created_at = match self.entries.back() {
            Some(last) if last.created_at > now => last.created_at,
            _ => now,
        };

        let stored = ChatMessage {
            id,
            sender_id: message.sender_id,
            sender_name: message.sender_name,
            body: message.body,
            kind: message.kind,
            created_at,
        };
        self.entries.push_back(stored.clone());
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }

        Ok((stored, self.entries.len()))
    }

    /// The newest `limit` messages, oldest first. Zero selects the default limit.
    pub fn tail(&self, limit: usize) -> Vec<ChatMessage> {
        let limit = if limit == 0 { self.default_limit } else { limit };
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
