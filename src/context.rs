//! Per-request context threaded through routing, capabilities, and tools.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::storage::{ChatTurn, EntityRecord, ProjectItem, TaskItem, UserProfile};

/// Default tool-loop iteration budget granted to a request.
const DEFAULT_MAX_ITERATIONS: usize = 8;

/// Context for one conversational request.
///
/// Built once by the orchestrator, enriched once by the memory capability,
/// then shared read-only (via `Arc`) with the parallel capability fan-out.
/// Concurrent capabilities must not mutate it; learned updates go through
/// the storage collaborator instead.
#[derive(Debug, Clone, Serialize)]
pub struct AgentContext {
    /// User the request belongs to.
    pub user_id: String,
    /// Raw user input.
    pub input: String,
    /// Intent label assigned by the router.
    pub intent: Option<String>,
    /// Topic extracted by the router.
    pub topic: Option<String>,
    /// Entity mentions extracted from the input.
    pub mentions: Vec<String>,
    /// Profile snapshot, if the user is known.
    pub profile: Option<UserProfile>,
    /// Stored preferences, merged with memory-capability enrichment.
    pub preferences: HashMap<String, String>,
    /// Tasks related to this request.
    pub related_tasks: Vec<TaskItem>,
    /// Projects related to this request.
    pub related_projects: Vec<ProjectItem>,
    /// Remembered entities related to this request.
    pub related_entities: Vec<EntityRecord>,
    /// Recent conversation turns, oldest first.
    pub history: Vec<ChatTurn>,
    /// When the request arrived.
    pub timestamp: DateTime<Utc>,
    /// Source channel ("cli", "api", ...).
    pub channel: String,
    /// Tool-loop iteration budget for this request.
    pub max_iterations: usize,
}

impl AgentContext {
    /// Create a bare context for a request.
    pub fn new(user_id: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            input: input.into(),
            intent: None,
            topic: None,
            mentions: Vec::new(),
            profile: None,
            preferences: HashMap::new(),
            related_tasks: Vec::new(),
            related_projects: Vec::new(),
            related_entities: Vec::new(),
            history: Vec::new(),
            timestamp: Utc::now(),
            channel: "cli".to_string(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// The trailing `window` turns of history, oldest first.
    pub fn recent_history(&self, window: usize) -> &[ChatTurn] {
        let skip = self.history.len().saturating_sub(window);
        &self.history[skip..]
    }

    /// Display name for prompts, falling back to the user ID.
    pub fn display_name(&self) -> &str {
        self.profile
            .as_ref()
            .map(|p| p.display_name.as_str())
            .unwrap_or(&self.user_id)
    }
}
