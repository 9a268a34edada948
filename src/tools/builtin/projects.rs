//! Project tool — project listing for the model.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::AgentContext;
use crate::error::ToolError;
use crate::storage::Storage;
use crate::tools::tool::{Tool, ToolParameter};

/// List the user's projects.
pub struct GetProjectsTool {
    storage: Arc<dyn Storage>,
}

impl GetProjectsTool {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Tool for GetProjectsTool {
    fn name(&self) -> &str {
        "get_projects"
    }

    fn description(&self) -> &str {
        "List the user's projects."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::string("filter")
                .describe("Which projects to include")
                .one_of(["active", "all"])
                .with_default(Value::String("active".into())),
        ]
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &AgentContext) -> Result<Value, ToolError> {
        let include_inactive = args.get("filter").and_then(|v| v.as_str()) == Some("all");

        let projects = self
            .storage
            .get_projects(&ctx.user_id)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                name: "get_projects".into(),
                reason: e.to_string(),
            })?;

        let items: Vec<Value> = projects
            .iter()
            .filter(|p| include_inactive || p.active)
            .map(|p| {
                serde_json::json!({
                    "id": p.id.to_string(),
                    "name": p.name,
                    "active": p.active,
                })
            })
            .collect();

        Ok(serde_json::json!({ "count": items.len(), "projects": items }))
    }
}
