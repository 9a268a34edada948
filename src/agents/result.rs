//! Capability execution results.

use std::time::Duration;

use serde::Serialize;

use crate::agents::AgentKind;

/// One action a capability took while handling a request.
#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    /// Action type label ("create_task", "log_habit", ...).
    pub action_type: String,
    /// Human-readable description of what happened.
    pub description: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionRecord {
    pub fn succeeded(action_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            description: description.into(),
            success: true,
            error: None,
        }
    }

    pub fn failed(
        action_type: impl Into<String>,
        description: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            action_type: action_type.into(),
            description: description.into(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Result of one capability execution. Never mutated after return.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityResult {
    /// Which capability produced this.
    pub agent: AgentKind,
    pub success: bool,
    /// Structured data for the orchestrator (enrichment, diagnostics).
    pub data: serde_json::Value,
    /// Ordered actions taken.
    pub actions: Vec<ActionRecord>,
    /// Follow-up suggestions for the user.
    pub suggestions: Vec<String>,
    /// Reply fragments for synthesis.
    pub fragments: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock execution time.
    #[serde(skip)]
    pub elapsed: Duration,
    /// LLM tokens consumed by this capability.
    pub tokens_used: u32,
}

impl CapabilityResult {
    /// An empty successful result.
    pub fn ok(agent: AgentKind) -> Self {
        Self {
            agent,
            success: true,
            data: serde_json::Value::Null,
            actions: Vec::new(),
            suggestions: Vec::new(),
            fragments: Vec::new(),
            error: None,
            elapsed: Duration::ZERO,
            tokens_used: 0,
        }
    }

    /// A failure result carrying the error message.
    pub fn failure(agent: AgentKind, error: impl Into<String>) -> Self {
        Self {
            agent,
            success: false,
            data: serde_json::Value::Null,
            actions: Vec::new(),
            suggestions: Vec::new(),
            fragments: Vec::new(),
            error: Some(error.into()),
            elapsed: Duration::ZERO,
            tokens_used: 0,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.fragments.push(fragment.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_action(mut self, action: ActionRecord) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn with_tokens(mut self, tokens: u32) -> Self {
        self.tokens_used = tokens;
        self
    }
}
