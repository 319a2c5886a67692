//! In-memory session store, for tests and as the platform-mode seam
//! stand-in.

use std::collections::HashMap;

use parking_lot::RwLock;

use ah_domain::error::Result;
use ah_domain::message::ChatMessage;

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Vec<ChatMessage>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl crate::SessionStore for InMemorySessionStore {
    async fn append(&self, message: &ChatMessage) -> Result<()> {
        self.sessions
            .write()
            .entry(message.session_id.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        Ok(self
            .sessions
            .read()
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_sessions(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SessionStore;
    use ah_domain::message::Role;

    #[tokio::test]
    async fn stores_per_session() {
        let store = InMemorySessionStore::new();
        store
            .append(&ChatMessage::new("a", Role::User, "hi"))
            .await
            .unwrap();
        store
            .append(&ChatMessage::new("b", Role::User, "yo"))
            .await
            .unwrap();
        assert_eq!(store.load("a").await.unwrap().len(), 1);
        assert_eq!(store.list_sessions().await.unwrap(), ["a", "b"]);
    }
}
