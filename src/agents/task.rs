//! Task capability — drives the tool-calling executor over the task tools.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::warn;

use crate::agents::{ActionRecord, AgentKind, Capability, CapabilityResult};
use crate::context::AgentContext;
use crate::executor::{AgentExecutor, ExecutorState};
use crate::llm::LlmProvider;
use crate::notify::Notifier;
use crate::tools::ToolRegistry;

const TASK_SYSTEM_PROMPT: &str =
    "You manage the user's task list. Use the available tools to create, \
     list, and complete tasks as the request demands, then summarize what \
     you did in one or two sentences. Do not invent tasks the user didn't \
     ask for.";

/// Task capability module.
pub struct TaskAgent {
    executor: AgentExecutor,
    notifier: Option<Arc<dyn Notifier>>,
}

impl TaskAgent {
    /// `tools` should carry the task tool set; the executor offers all of
    /// the registry's tools to the model.
    pub fn new(llm: Arc<dyn LlmProvider>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            executor: AgentExecutor::new(llm, tools).with_system_prompt(TASK_SYSTEM_PROMPT),
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Push a heads-up when a high-priority task was just created.
    async fn notify_high_priority(&self, ctx: &AgentContext, actions: &[ActionRecord]) {
        let Some(ref notifier) = self.notifier else {
            return;
        };
        for action in actions {
            if action.action_type == "create_task" && action.success {
                let is_high = action.description.contains("\"priority\":\"high\"")
                    || action.description.contains("\"priority\": \"high\"");
                if is_high {
                    match notifier
                        .send_push(&ctx.user_id, "High-priority task added", &action.description, None)
                        .await
                    {
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "Task notification failed"),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Capability for TaskAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Task
    }

    fn capabilities(&self) -> &[&str] {
        &["create-task", "list-tasks", "complete-task"]
    }

    fn can_handle(&self, ctx: &AgentContext) -> f32 {
        match ctx.intent.as_deref() {
            Some("task") => 0.9,
            _ => 0.2,
        }
    }

    async fn execute(&self, ctx: &AgentContext) -> CapabilityResult {
        let start = Instant::now();
        let run = self.executor.run(&ctx.input, ctx).await;

        let mut result = match run.state {
            ExecutorState::Failed => CapabilityResult::failure(
                AgentKind::Task,
                run.error.clone().unwrap_or_else(|| "executor failed".into()),
            ),
            _ => CapabilityResult::ok(AgentKind::Task),
        };

        for step in &run.steps {
            let Some((ref tool_name, _)) = step.tool_call else {
                continue;
            };
            let action = match step.result.as_ref() {
                Some(r) if r.success() => ActionRecord::succeeded(
                    tool_name.clone(),
                    r.data()
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| tool_name.clone()),
                ),
                Some(r) => ActionRecord::failed(
                    tool_name.clone(),
                    tool_name.clone(),
                    r.error().unwrap_or("unknown failure"),
                ),
                None => ActionRecord::failed(tool_name.clone(), tool_name.clone(), "no result"),
            };
            result = result.with_action(action);
        }

        if !run.response.is_empty() {
            result = result.with_fragment(run.response.clone());
        }

        self.notify_high_priority(ctx, &result.actions).await;

        result
            .with_data(serde_json::json!({
                "state": run.state,
                "tool_calls": run.tool_calls_made,
            }))
            .with_tokens(run.total_tokens)
            .with_elapsed(start.elapsed())
    }
}
