//! Habit tools — due-today listing and completion logging.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::AgentContext;
use crate::error::ToolError;
use crate::storage::Storage;
use crate::tools::tool::{Tool, ToolParameter, require_str};

/// List habits still due today.
pub struct GetHabitsDueTool {
    storage: Arc<dyn Storage>,
}

impl GetHabitsDueTool {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Tool for GetHabitsDueTool {
    fn name(&self) -> &str {
        "get_habits_due"
    }

    fn description(&self) -> &str {
        "List the user's habits that are still due today, with current streaks."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        Vec::new()
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, _args: Value, ctx: &AgentContext) -> Result<Value, ToolError> {
        let habits = self
            .storage
            .get_habits_due_today(&ctx.user_id)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                name: "get_habits_due".into(),
                reason: e.to_string(),
            })?;

        let items: Vec<Value> = habits
            .iter()
            .map(|h| {
                serde_json::json!({
                    "id": h.id.to_string(),
                    "name": h.name,
                    "cadence": h.cadence,
                    "streak": h.streak,
                })
            })
            .collect();

        Ok(serde_json::json!({ "count": items.len(), "habits": items }))
    }
}

/// Log a habit completion, matched by name.
pub struct LogHabitTool {
    storage: Arc<dyn Storage>,
}

impl LogHabitTool {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Tool for LogHabitTool {
    fn name(&self) -> &str {
        "log_habit"
    }

    fn description(&self) -> &str {
        "Log that the user completed a habit today. The name is matched \
         case-insensitively against habits due today."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::string("name")
                .describe("Name (or part of it) of the habit to log")
                .required(),
        ]
    }

    async fn execute(&self, args: Value, ctx: &AgentContext) -> Result<Value, ToolError> {
        let name = require_str(&args, "name")?.to_lowercase();

        let due = self
            .storage
            .get_habits_due_today(&ctx.user_id)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                name: "log_habit".into(),
                reason: e.to_string(),
            })?;

        let target = due
            .iter()
            .find(|h| h.name.to_lowercase().contains(&name))
            .ok_or_else(|| ToolError::ExecutionFailed {
                name: "log_habit".into(),
                reason: format!("no habit due today matching '{name}'"),
            })?;

        let logged = self
            .storage
            .log_habit(&ctx.user_id, target.id)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                name: "log_habit".into(),
                reason: e.to_string(),
            })?;

        Ok(serde_json::json!({
            "name": logged.name,
            "streak": logged.streak,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[tokio::test]
    async fn log_habit_by_partial_name() {
        let storage = Arc::new(MemoryStorage::new());
        storage.seed_habit("u1", "Morning stretch", "daily").await;

        let ctx = AgentContext::new("u1", "test");
        let log = LogHabitTool::new(storage.clone());
        let result = log
            .safe_execute(serde_json::json!({"name": "stretch"}), &ctx)
            .await;
        assert!(result.success());
        assert_eq!(result.data().unwrap()["streak"], 1);

        let due = GetHabitsDueTool::new(storage);
        let result = due.safe_execute(serde_json::json!({}), &ctx).await;
        assert_eq!(result.data().unwrap()["count"], 0);
    }

    #[tokio::test]
    async fn log_unknown_habit_fails_gracefully() {
        let storage = Arc::new(MemoryStorage::new());
        let ctx = AgentContext::new("u1", "test");
        let log = LogHabitTool::new(storage);
        let result = log
            .safe_execute(serde_json::json!({"name": "yoga"}), &ctx)
            .await;
        assert!(!result.success());
    }
}
