//! Task tools — create, list, and complete tasks through the storage
//! collaborator.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::AgentContext;
use crate::error::ToolError;
use crate::storage::{NewTask, Storage, TaskStatus};
use crate::tools::tool::{Tool, ToolParameter, require_str};

fn priority_value(label: &str) -> i32 {
    match label {
        "high" => 2,
        "low" => 0,
        _ => 1,
    }
}

/// Create a new task for the current user.
pub struct CreateTaskTool {
    storage: Arc<dyn Storage>,
}

impl CreateTaskTool {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Tool for CreateTaskTool {
    fn name(&self) -> &str {
        "create_task"
    }

    fn description(&self) -> &str {
        "Create a new task on the user's list. Use this when the user asks to \
         add, create, or remember something that needs doing."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::string("title")
                .describe("Short title for the task")
                .required(),
            ToolParameter::string("notes").describe("Longer description, if any"),
            ToolParameter::string("priority")
                .describe("Task priority")
                .one_of(["low", "normal", "high"])
                .with_default(Value::String("normal".into())),
        ]
    }

    async fn execute(&self, args: Value, ctx: &AgentContext) -> Result<Value, ToolError> {
        let title = require_str(&args, "title")?;
        let notes = args
            .get("notes")
            .and_then(|v| v.as_str())
            .map(String::from);
        let priority = args
            .get("priority")
            .and_then(|v| v.as_str())
            .unwrap_or("normal");

        let task = self
            .storage
            .create_task(
                &ctx.user_id,
                NewTask {
                    title: title.to_string(),
                    notes,
                    priority: priority_value(priority),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                name: "create_task".into(),
                reason: e.to_string(),
            })?;

        Ok(serde_json::json!({
            "id": task.id.to_string(),
            "title": task.title,
            "status": task.status.to_string(),
            "priority": priority,
        }))
    }
}

/// List the user's tasks.
pub struct GetTasksTool {
    storage: Arc<dyn Storage>,
}

impl GetTasksTool {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Tool for GetTasksTool {
    fn name(&self) -> &str {
        "get_tasks"
    }

    fn description(&self) -> &str {
        "List the user's tasks, optionally filtered by status."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::string("status")
                .describe("Filter by status")
                .one_of(["open", "done", "all"])
                .with_default(Value::String("open".into())),
            ToolParameter::integer("limit")
                .describe("Maximum number of tasks to return")
                .with_default(Value::from(20)),
        ]
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &AgentContext) -> Result<Value, ToolError> {
        let status = match args.get("status").and_then(|v| v.as_str()) {
            Some("done") => Some(TaskStatus::Done),
            Some("all") => None,
            _ => Some(TaskStatus::Open),
        };
        let limit = args.get("limit").and_then(|v| v.as_u64()).unwrap_or(20) as usize;

        let tasks = self
            .storage
            .get_tasks(&ctx.user_id, status)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                name: "get_tasks".into(),
                reason: e.to_string(),
            })?;

        let items: Vec<Value> = tasks
            .iter()
            .take(limit)
            .map(|t| {
                serde_json::json!({
                    "id": t.id.to_string(),
                    "title": t.title,
                    "status": t.status.to_string(),
                    "priority": t.priority,
                })
            })
            .collect();

        Ok(serde_json::json!({ "count": items.len(), "tasks": items }))
    }
}

/// Mark a task done, matched by title.
pub struct CompleteTaskTool {
    storage: Arc<dyn Storage>,
}

impl CompleteTaskTool {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Tool for CompleteTaskTool {
    fn name(&self) -> &str {
        "complete_task"
    }

    fn description(&self) -> &str {
        "Mark one of the user's open tasks as done. The title is matched \
         case-insensitively; the first matching open task is completed."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::string("title")
                .describe("Title (or part of it) of the task to complete")
                .required(),
        ]
    }

    async fn execute(&self, args: Value, ctx: &AgentContext) -> Result<Value, ToolError> {
        let title = require_str(&args, "title")?.to_lowercase();

        let open = self
            .storage
            .get_tasks(&ctx.user_id, Some(TaskStatus::Open))
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                name: "complete_task".into(),
                reason: e.to_string(),
            })?;

        let target = open
            .iter()
            .find(|t| t.title.to_lowercase().contains(&title))
            .ok_or_else(|| ToolError::ExecutionFailed {
                name: "complete_task".into(),
                reason: format!("no open task matching '{title}'"),
            })?;

        let done = self
            .storage
            .complete_task(&ctx.user_id, target.id)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                name: "complete_task".into(),
                reason: e.to_string(),
            })?;

        Ok(serde_json::json!({
            "id": done.id.to_string(),
            "title": done.title,
            "status": done.status.to_string(),
        }))
    }
}
