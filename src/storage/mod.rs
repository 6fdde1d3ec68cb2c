//! Persistence collaborators.
//!
//! Chats, messages and model records live in an external store; the core only
//! needs small CRUD surfaces, so they are traits here with in-memory
//! implementations backing the gateway and the tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

use crate::chat::Message;
use crate::error::{Error, Result};

/// A locally available model file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// A persisted conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: String,
    pub title: String,
    pub model_name: Option<String>,
    pub created_at_ms: i64,
}

/// Store of known model files.
#[async_trait]
pub trait ModelStore: Send + Sync {
    async fn insert(&self, record: ModelRecord) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<ModelRecord>>;
    async fn delete(&self, id: &str) -> Result<()>;
    async fn list(&self) -> Result<Vec<ModelRecord>>;
}

/// Store of chats and their messages.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn insert_chat(&self, chat: ChatRecord) -> Result<()>;
    async fn get_chat(&self, id: &str) -> Result<Option<ChatRecord>>;
    async fn delete_chat(&self, id: &str) -> Result<()>;
    async fn insert_message(&self, message: Message) -> Result<()>;
    async fn update_message(&self, message: Message) -> Result<()>;
    async fn messages(&self, chat_id: &str) -> Result<Vec<Message>>;
}

/// In-memory [`ModelStore`].
#[derive(Default)]
pub struct MemoryModelStore {
    records: RwLock<HashMap<String, ModelRecord>>,
}

impl MemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ModelStore for MemoryModelStore {
    async fn insert(&self, record: ModelRecord) -> Result<()> {
        self.records.write().await.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ModelRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.records.write().await.remove(id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ModelRecord>> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }
}

/// In-memory [`ChatStore`]. Messages are kept ordered by timestamp.
#[derive(Default)]
pub struct MemoryChatStore {
    chats: RwLock<HashMap<String, ChatRecord>>,
    messages: RwLock<HashMap<String, Vec<Message>>>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn insert_chat(&self, chat: ChatRecord) -> Result<()> {
        self.chats.write().await.insert(chat.id.clone(), chat);
        Ok(())
    }

    async fn get_chat(&self, id: &str) -> Result<Option<ChatRecord>> {
        Ok(self.chats.read().await.get(id).cloned())
    }

    async fn delete_chat(&self, id: &str) -> Result<()> {
        self.chats.write().await.remove(id);
        self.messages.write().await.remove(id);
        Ok(())
    }

    async fn insert_message(&self, message: Message) -> Result<()> {
        let mut messages = self.messages.write().await;
        let chat = messages.entry(message.chat_id.clone()).or_default();
        chat.push(message);
        chat.sort_by_key(|m| m.timestamp_ms);
        Ok(())
    }

    async fn update_message(&self, message: Message) -> Result<()> {
        let mut messages = self.messages.write().await;
        let chat = messages
            .get_mut(&message.chat_id)
            .ok_or_else(|| Error::Storage(format!("no such chat: {}", message.chat_id)))?;
        match chat.iter_mut().find(|m| m.id == message.id) {
            Some(slot) => {
                *slot = message;
                Ok(())
            }
            None => Err(Error::Storage(format!("no such message: {}", message.id))),
        }
    }

    async fn messages(&self, chat_id: &str) -> Result<Vec<Message>> {
        Ok(self
            .messages
            .read()
            .await
            .get(chat_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::MessageRole;

    #[tokio::test]
    async fn messages_are_ordered_by_timestamp() {
        let store = MemoryChatStore::new();
        let mut early = Message::new("c1", MessageRole::User, "first");
        let mut late = Message::new("c1", MessageRole::Assistant, "second");
        early.timestamp_ms = 100;
        late.timestamp_ms = 200;

        store.insert_message(late).await.unwrap();
        store.insert_message(early).await.unwrap();

        let messages = store.messages("c1").await.unwrap();
        assert_eq!(messages[0].content, "first");
        assert_eq!(messages[1].content, "second");
    }

    #[tokio::test]
    async fn update_missing_message_is_an_error() {
        let store = MemoryChatStore::new();
        let message = Message::new("c1", MessageRole::Assistant, "hi");
        assert!(store.update_message(message).await.is_err());
    }
}
