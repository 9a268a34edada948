//! Habit capability — due-today reporting and completion logging.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use regex::Regex;
use tracing::warn;

use crate::agents::{ActionRecord, AgentKind, Capability, CapabilityResult};
use crate::context::AgentContext;
use crate::error::Error;
use crate::storage::Storage;

/// Habit capability module.
pub struct HabitAgent {
    storage: Arc<dyn Storage>,
    log_pattern: Regex,
}

impl HabitAgent {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            log_pattern: Regex::new(
                r"(?:i\s+(?:did|finished|completed)|log)\s+(?:my\s+|the\s+)?(.+?)(?:\s+habit)?$",
            )
            .unwrap(),
        }
    }

    async fn run(&self, ctx: &AgentContext) -> Result<CapabilityResult, Error> {
        let start = Instant::now();
        let due = self.storage.get_habits_due_today(&ctx.user_id).await?;

        // Logging request: "I did my morning stretch".
        if let Some(captures) = self.log_pattern.captures(&ctx.input.to_lowercase()) {
            let name = captures.get(1).map(|m| m.as_str().trim()).unwrap_or("");
            if let Some(habit) = due
                .iter()
                .find(|h| h.name.to_lowercase().contains(name) && !name.is_empty())
            {
                let logged = self.storage.log_habit(&ctx.user_id, habit.id).await?;
                return Ok(CapabilityResult::ok(AgentKind::Habit)
                    .with_action(ActionRecord::succeeded(
                        "log_habit",
                        format!("Logged {}", logged.name),
                    ))
                    .with_fragment(format!(
                        "Logged {} — streak is now {}.",
                        logged.name, logged.streak
                    ))
                    .with_data(serde_json::json!({ "logged": logged }))
                    .with_elapsed(start.elapsed()));
            }
        }

        // Otherwise report what's still due.
        let mut result = CapabilityResult::ok(AgentKind::Habit);
        if due.is_empty() {
            result = result.with_fragment("All habits are done for today.");
        } else {
            let listing = due
                .iter()
                .map(|h| format!("{} (streak {})", h.name, h.streak))
                .collect::<Vec<_>>()
                .join(", ");
            result = result
                .with_fragment(format!("Still due today: {listing}."))
                .with_suggestion("Tell me when you've done one and I'll log it.");
        }

        Ok(result
            .with_data(serde_json::json!({ "due": due }))
            .with_elapsed(start.elapsed()))
    }
}

#[async_trait]
impl Capability for HabitAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Habit
    }

    fn capabilities(&self) -> &[&str] {
        &["habits-due", "log-habit", "streaks"]
    }

    fn can_handle(&self, ctx: &AgentContext) -> f32 {
        match ctx.intent.as_deref() {
            Some("habit") => 0.9,
            _ => 0.1,
        }
    }

    async fn execute(&self, ctx: &AgentContext) -> CapabilityResult {
        match self.run(ctx).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Habit capability failed");
                CapabilityResult::failure(AgentKind::Habit, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[tokio::test]
    async fn reports_due_habits() {
        let storage = Arc::new(MemoryStorage::new());
        storage.seed_habit("u1", "Meditation", "daily").await;

        let agent = HabitAgent::new(storage);
        let mut ctx = AgentContext::new("u1", "how are my habits");
        ctx.intent = Some("habit".into());

        let result = agent.execute(&ctx).await;
        assert!(result.success);
        assert!(result.fragments[0].contains("Meditation"));
        assert_eq!(result.suggestions.len(), 1);
    }

    #[tokio::test]
    async fn logs_habit_from_phrasing() {
        let storage = Arc::new(MemoryStorage::new());
        storage.seed_habit("u1", "Morning stretch", "daily").await;

        let agent = HabitAgent::new(storage.clone());
        let mut ctx = AgentContext::new("u1", "I did my morning stretch");
        ctx.intent = Some("habit".into());

        let result = agent.execute(&ctx).await;
        assert!(result.success);
        assert_eq!(result.actions.len(), 1);
        assert!(result.fragments[0].contains("streak is now 1"));

        let due = storage.get_habits_due_today("u1").await.unwrap();
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn all_done_message_when_nothing_due() {
        let storage = Arc::new(MemoryStorage::new());
        let agent = HabitAgent::new(storage);
        let mut ctx = AgentContext::new("u1", "habits?");
        ctx.intent = Some("habit".into());

        let result = agent.execute(&ctx).await;
        assert!(result.fragments[0].contains("done for today"));
    }
}
