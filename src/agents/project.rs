//! Project capability — project overview from storage.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::warn;

use crate::agents::{AgentKind, Capability, CapabilityResult};
use crate::context::AgentContext;
use crate::error::Error;
use crate::storage::{Storage, TaskStatus};

/// Project capability module.
pub struct ProjectAgent {
    storage: Arc<dyn Storage>,
}

impl ProjectAgent {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    async fn run(&self, ctx: &AgentContext) -> Result<CapabilityResult, Error> {
        let start = Instant::now();
        let projects = self.storage.get_projects(&ctx.user_id).await?;
        let open_tasks = self
            .storage
            .get_tasks(&ctx.user_id, Some(TaskStatus::Open))
            .await?;

        let mut result = CapabilityResult::ok(AgentKind::Project);
        let active: Vec<_> = projects.iter().filter(|p| p.active).collect();

        if active.is_empty() {
            result = result
                .with_fragment("You don't have any active projects.")
                .with_suggestion("Say \"start a project\" and a name to begin one.");
        } else {
            let listing = active
                .iter()
                .map(|p| {
                    let open = open_tasks
                        .iter()
                        .filter(|t| t.project_id == Some(p.id))
                        .count();
                    if open > 0 {
                        format!("{} ({} open tasks)", p.name, open)
                    } else {
                        p.name.clone()
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");
            result = result.with_fragment(format!("Active projects: {listing}."));
        }

        Ok(result
            .with_data(serde_json::json!({ "projects": projects }))
            .with_elapsed(start.elapsed()))
    }
}

#[async_trait]
impl Capability for ProjectAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Project
    }

    fn capabilities(&self) -> &[&str] {
        &["list-projects", "project-status"]
    }

    fn can_handle(&self, ctx: &AgentContext) -> f32 {
        match ctx.intent.as_deref() {
            Some("project") => 0.9,
            _ => 0.1,
        }
    }

    async fn execute(&self, ctx: &AgentContext) -> CapabilityResult {
        match self.run(ctx).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Project capability failed");
                CapabilityResult::failure(AgentKind::Project, e.to_string())
            }
        }
    }
}
