//! Configuration types.

use std::time::Duration;

/// Assistant configuration.
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// Assistant name, used in prompts and logs.
    pub name: String,
    /// Maximum tool-loop iterations per executor run.
    pub max_iterations: usize,
    /// Trailing conversation turns included in prompts.
    pub history_window: usize,
    /// Deadline for one full `process` pipeline.
    pub response_timeout: Duration,
    /// Whether to hand completed turns to the memory capability for learning.
    pub learning_enabled: bool,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            name: "aide".to_string(),
            max_iterations: 8,
            history_window: 10,
            response_timeout: Duration::from_secs(60),
            learning_enabled: true,
        }
    }
}
