//! Backend-agnostic `Storage` trait — single async interface for all
//! persistence the assistant consumes.
//!
//! The schema behind these calls belongs to the storage backend, not the
//! core; capability modules consume the getters opportunistically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageError;

/// A user's profile snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub display_name: String,
    pub timezone: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    Done,
    Dropped,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Done => "done",
            Self::Dropped => "dropped",
        };
        write!(f, "{s}")
    }
}

/// A task belonging to a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskItem {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub notes: Option<String>,
    pub status: TaskStatus,
    pub priority: i32,
    pub due: Option<DateTime<Utc>>,
    pub project_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// A project grouping tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectItem {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// A recurring habit with streak tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HabitItem {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    /// Cadence label ("daily", "weekly", ...).
    pub cadence: String,
    pub streak: u32,
    pub last_logged: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A remembered entity (person, place, thing) with free-form notes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    /// Kind label ("person", "place", ...).
    pub entity_kind: String,
    pub notes: String,
    pub updated_at: DateTime<Utc>,
}

/// One turn of stored conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
    pub at: DateTime<Utc>,
}

impl ChatTurn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            at: Utc::now(),
        }
    }
}

/// Fields for creating a new task.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub notes: Option<String>,
    pub priority: i32,
    pub due: Option<DateTime<Utc>>,
    pub project_id: Option<Uuid>,
}

/// Backend-agnostic storage trait.
#[async_trait]
pub trait Storage: Send + Sync {
    // ── Profile & preferences ───────────────────────────────────────

    /// Get a user's profile, if one exists.
    async fn get_user_profile(&self, user_id: &str)
    -> Result<Option<UserProfile>, StorageError>;

    /// Get all stored (key, value) preferences for a user.
    async fn get_preferences(&self, user_id: &str)
    -> Result<Vec<(String, String)>, StorageError>;

    /// Upsert one preference. Last write wins at the row level.
    async fn save_preference(
        &self,
        user_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), StorageError>;

    // ── Conversation history ────────────────────────────────────────

    /// Get the most recent chat turns, oldest first, up to `limit`.
    async fn get_chat_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatTurn>, StorageError>;

    /// Append one chat turn.
    async fn save_chat(&self, user_id: &str, turn: &ChatTurn) -> Result<(), StorageError>;

    // ── Tasks ───────────────────────────────────────────────────────

    /// Create a task, returning it with its generated ID.
    async fn create_task(&self, user_id: &str, task: NewTask) -> Result<TaskItem, StorageError>;

    /// Get tasks, optionally filtered by status.
    async fn get_tasks(
        &self,
        user_id: &str,
        status: Option<TaskStatus>,
    ) -> Result<Vec<TaskItem>, StorageError>;

    /// Mark a task done by ID.
    async fn complete_task(&self, user_id: &str, task_id: Uuid) -> Result<TaskItem, StorageError>;

    // ── Projects ────────────────────────────────────────────────────

    /// Get a user's projects.
    async fn get_projects(&self, user_id: &str) -> Result<Vec<ProjectItem>, StorageError>;

    // ── Habits ──────────────────────────────────────────────────────

    /// Habits due today (not yet logged within their cadence window).
    async fn get_habits_due_today(&self, user_id: &str)
    -> Result<Vec<HabitItem>, StorageError>;

    /// Log a habit completion, bumping its streak.
    async fn log_habit(&self, user_id: &str, habit_id: Uuid) -> Result<HabitItem, StorageError>;

    // ── Entities ────────────────────────────────────────────────────

    /// Upsert a remembered entity by (user, name).
    async fn save_entity(
        &self,
        user_id: &str,
        name: &str,
        entity_kind: &str,
        notes: &str,
    ) -> Result<EntityRecord, StorageError>;

    /// Find entities whose name matches `query` (case-insensitive substring).
    async fn find_entities(
        &self,
        user_id: &str,
        query: &str,
    ) -> Result<Vec<EntityRecord>, StorageError>;
}
