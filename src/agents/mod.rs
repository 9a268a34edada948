//! Capability modules ("agents") — pluggable domain handlers behind one
//! uniform contract.
//!
//! The orchestrator runs heterogeneous capabilities interchangeably and
//! concurrently because `execute` is infallible by signature: internal
//! errors come back as `success=false` results, never as `Err`.

pub mod chat;
pub mod habit;
pub mod memory;
pub mod project;
pub mod result;
pub mod task;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::context::AgentContext;
use crate::error::AgentError;

pub use chat::ChatAgent;
pub use habit::HabitAgent;
pub use memory::MemoryAgent;
pub use project::ProjectAgent;
pub use result::{ActionRecord, CapabilityResult};
pub use task::TaskAgent;

/// Identity tags for the capability modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Memory,
    Task,
    Habit,
    Project,
    Chat,
}

impl AgentKind {
    /// All kinds, in the order they are listed to the classifier.
    pub fn all() -> &'static [AgentKind] {
        &[
            AgentKind::Memory,
            AgentKind::Task,
            AgentKind::Habit,
            AgentKind::Project,
            AgentKind::Chat,
        ]
    }

    /// Label used in prompts and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Task => "task",
            Self::Habit => "habit",
            Self::Project => "project",
            Self::Chat => "chat",
        }
    }

    /// Parse a classifier label.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "task" | "tasks" => Some(Self::Task),
            "habit" | "habits" => Some(Self::Habit),
            "project" | "projects" => Some(Self::Project),
            "chat" | "general" => Some(Self::Chat),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A pluggable domain capability.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Fixed identity tag.
    fn kind(&self) -> AgentKind;

    /// Fine-grained capability labels, for diagnostics.
    fn capabilities(&self) -> &[&str];

    /// Auxiliary relevance score in [0,1]. Routing has already been decided
    /// by the IntentRouter; this exists for diagnostics and future tuning.
    fn can_handle(&self, ctx: &AgentContext) -> f32;

    /// Handle the request. Must never fail: internal errors are caught and
    /// returned as `success=false` results.
    async fn execute(&self, ctx: &AgentContext) -> CapabilityResult;
}

/// Registry of capability modules keyed by kind.
///
/// Constructed once at the application root and passed by handle; immutable
/// after startup.
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<AgentKind, Arc<dyn Capability>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability. Duplicate kinds are rejected.
    pub fn register(&mut self, agent: Arc<dyn Capability>) -> Result<(), AgentError> {
        let kind = agent.kind();
        if self.agents.contains_key(&kind) {
            return Err(AgentError::Duplicate {
                kind: kind.to_string(),
            });
        }
        tracing::debug!("Registered capability: {}", kind);
        self.agents.insert(kind, agent);
        Ok(())
    }

    pub fn get(&self, kind: AgentKind) -> Option<Arc<dyn Capability>> {
        self.agents.get(&kind).cloned()
    }

    pub fn has(&self, kind: AgentKind) -> bool {
        self.agents.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubCapability(AgentKind);

    #[async_trait]
    impl Capability for StubCapability {
        fn kind(&self) -> AgentKind {
            self.0
        }
        fn capabilities(&self) -> &[&str] {
            &["stub"]
        }
        fn can_handle(&self, _ctx: &AgentContext) -> f32 {
            0.5
        }
        async fn execute(&self, _ctx: &AgentContext) -> CapabilityResult {
            CapabilityResult::ok(self.0)
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = AgentRegistry::new();
        registry
            .register(Arc::new(StubCapability(AgentKind::Task)))
            .unwrap();
        assert!(registry.has(AgentKind::Task));
        assert!(!registry.has(AgentKind::Habit));
    }

    #[test]
    fn duplicate_kind_rejected() {
        let mut registry = AgentRegistry::new();
        registry
            .register(Arc::new(StubCapability(AgentKind::Task)))
            .unwrap();
        let err = registry
            .register(Arc::new(StubCapability(AgentKind::Task)))
            .unwrap_err();
        assert!(matches!(err, AgentError::Duplicate { .. }));
    }

    #[test]
    fn kind_labels_round_trip() {
        for kind in AgentKind::all() {
            assert_eq!(AgentKind::parse(kind.label()), Some(*kind));
        }
        assert_eq!(AgentKind::parse("general"), Some(AgentKind::Chat));
        assert_eq!(AgentKind::parse("unknown"), None);
    }
}
