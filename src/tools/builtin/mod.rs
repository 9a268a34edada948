//! Built-in tools backed by the storage collaborator.

pub mod habits;
pub mod memory;
pub mod projects;
pub mod tasks;

use std::sync::Arc;

use crate::error::ToolError;
use crate::storage::Storage;
use crate::tools::registry::ToolRegistry;

pub use habits::{GetHabitsDueTool, LogHabitTool};
pub use memory::{RecallEntityTool, SavePreferenceTool};
pub use projects::GetProjectsTool;
pub use tasks::{CompleteTaskTool, CreateTaskTool, GetTasksTool};

/// Register the full built-in tool set against one storage backend.
pub fn register_builtin_tools(
    registry: &mut ToolRegistry,
    storage: Arc<dyn Storage>,
) -> Result<(), ToolError> {
    registry.register(Arc::new(CreateTaskTool::new(storage.clone())))?;
    registry.register(Arc::new(GetTasksTool::new(storage.clone())))?;
    registry.register(Arc::new(CompleteTaskTool::new(storage.clone())))?;
    registry.register(Arc::new(GetHabitsDueTool::new(storage.clone())))?;
    registry.register(Arc::new(LogHabitTool::new(storage.clone())))?;
    registry.register(Arc::new(GetProjectsTool::new(storage.clone())))?;
    registry.register(Arc::new(SavePreferenceTool::new(storage.clone())))?;
    registry.register(Arc::new(RecallEntityTool::new(storage)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn registers_all_builtins_once() {
        let mut registry = ToolRegistry::new();
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        register_builtin_tools(&mut registry, storage.clone()).unwrap();
        assert_eq!(registry.len(), 8);

        // Registering again collides on the first name.
        let err = register_builtin_tools(&mut registry, storage).unwrap_err();
        assert!(matches!(err, ToolError::Duplicate { .. }));
    }
}
