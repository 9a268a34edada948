//! Memory tools — preference storage and entity recall.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::AgentContext;
use crate::error::ToolError;
use crate::storage::Storage;
use crate::tools::tool::{Tool, ToolParameter, require_str};

/// Persist one user preference.
pub struct SavePreferenceTool {
    storage: Arc<dyn Storage>,
}

impl SavePreferenceTool {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Tool for SavePreferenceTool {
    fn name(&self) -> &str {
        "save_preference"
    }

    fn description(&self) -> &str {
        "Remember a user preference as a key/value pair. Use short snake_case \
         keys, e.g. preferred_greeting, work_hours."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::string("key")
                .describe("Preference key in snake_case")
                .required(),
            ToolParameter::string("value")
                .describe("Preference value")
                .required(),
        ]
    }

    async fn execute(&self, args: Value, ctx: &AgentContext) -> Result<Value, ToolError> {
        let key = require_str(&args, "key")?;
        let value = require_str(&args, "value")?;

        self.storage
            .save_preference(&ctx.user_id, key, value)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                name: "save_preference".into(),
                reason: e.to_string(),
            })?;

        Ok(serde_json::json!({ "saved": key }))
    }
}

/// Look up a remembered entity by name.
pub struct RecallEntityTool {
    storage: Arc<dyn Storage>,
}

impl RecallEntityTool {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Tool for RecallEntityTool {
    fn name(&self) -> &str {
        "recall_entity"
    }

    fn description(&self) -> &str {
        "Look up what is remembered about a person, place, or thing by name."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::string("name")
                .describe("Name to look up")
                .required(),
        ]
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &AgentContext) -> Result<Value, ToolError> {
        let name = require_str(&args, "name")?;

        let entities = self
            .storage
            .find_entities(&ctx.user_id, name)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                name: "recall_entity".into(),
                reason: e.to_string(),
            })?;

        let items: Vec<Value> = entities
            .iter()
            .map(|e| {
                serde_json::json!({
                    "name": e.name,
                    "kind": e.entity_kind,
                    "notes": e.notes,
                })
            })
            .collect();

        Ok(serde_json::json!({ "count": items.len(), "entities": items }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[tokio::test]
    async fn save_then_recall() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .save_entity("u1", "John", "person", "likes espresso")
            .await
            .unwrap();

        let ctx = AgentContext::new("u1", "test");
        let recall = RecallEntityTool::new(storage.clone());
        let result = recall
            .safe_execute(serde_json::json!({"name": "john"}), &ctx)
            .await;
        assert!(result.success());
        assert_eq!(result.data().unwrap()["count"], 1);

        let save = SavePreferenceTool::new(storage.clone());
        let result = save
            .safe_execute(
                serde_json::json!({"key": "coffee", "value": "espresso"}),
                &ctx,
            )
            .await;
        assert!(result.success());
        let prefs = storage.get_preferences("u1").await.unwrap();
        assert_eq!(prefs[0].1, "espresso");
    }
}
