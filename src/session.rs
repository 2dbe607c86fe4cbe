//! In-memory conversation log
//!
//! Single-session message history shared by the chat routes. Cleared when a
//! new document is ingested so stale context never leaks across documents.

use crate::prompt::{ConversationTurn, Role};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Default)]
pub struct SessionStore {
    messages: Mutex<Vec<ChatMessage>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&self, text: &str) -> ChatMessage {
        self.push(Role::Human, text)
    }

    pub fn push_assistant(&self, text: &str) -> ChatMessage {
        self.push(Role::Assistant, text)
    }

    fn push(&self, role: Role, text: &str) -> ChatMessage {
        let message = ChatMessage {
            id: Uuid::new_v4(),
            role,
            text: text.to_string(),
            timestamp: Utc::now(),
        };
        self.lock().push(message.clone());
        message
    }

    pub fn all(&self) -> Vec<ChatMessage> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// History in prompt form, oldest first
    pub fn turns(&self) -> Vec<ConversationTurn> {
        self.lock()
            .iter()
            .map(|m| ConversationTurn {
                role: m.role,
                text: m.text.clone(),
            })
            .collect()
    }

    pub fn clear(&self) -> usize {
        let mut messages = self.lock();
        let removed = messages.len();
        messages.clear();
        removed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ChatMessage>> {
        self.messages.lock().expect("session lock poisoned")
    }
}
