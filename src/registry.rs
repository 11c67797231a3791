//! Configuration-backed chat registry.

use async_trait::async_trait;

use crate::config::ChatEntry;
use crate::error::ScanError;
use crate::sources::ChatRegistry;

/// Serves the monitored-chat list and expected rosters straight from the
/// `[[chats]]` section of the configuration file.
pub struct ConfigRegistry {
    entries: Vec<ChatEntry>,
}

impl ConfigRegistry {
    pub fn new(entries: Vec<ChatEntry>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl ChatRegistry for ConfigRegistry {
    async fn monitored_chats(&self) -> Result<Vec<(i64, String)>, ScanError> {
        Ok(self
            .entries
            .iter()
            .map(|entry| {
                let name = entry
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("Chat {}", entry.id));
                (entry.id, name)
            })
            .collect())
    }

    async fn expected_roster(&self, chat_id: i64) -> Result<Vec<i64>, ScanError> {
        Ok(self
            .entries
            .iter()
            .find(|entry| entry.id == chat_id)
            .map(|entry| entry.expected.clone())
            .unwrap_or_default())
    }
}
