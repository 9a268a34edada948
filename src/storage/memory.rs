//! In-memory `Storage` backend.
//!
//! Used by tests and as the no-database fallback. All data is lost on
//! process exit.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StorageError;
use crate::storage::traits::{
    ChatTurn, EntityRecord, HabitItem, NewTask, ProjectItem, Storage, TaskItem, TaskStatus,
    UserProfile,
};

#[derive(Default)]
struct UserData {
    profile: Option<UserProfile>,
    preferences: HashMap<String, String>,
    history: Vec<ChatTurn>,
    tasks: Vec<TaskItem>,
    projects: Vec<ProjectItem>,
    habits: Vec<HabitItem>,
    entities: Vec<EntityRecord>,
}

/// In-memory storage backend.
#[derive(Default)]
pub struct MemoryStorage {
    users: RwLock<HashMap<String, UserData>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a profile (test/setup helper).
    pub async fn seed_profile(&self, profile: UserProfile) {
        let mut users = self.users.write().await;
        let user_id = profile.user_id.clone();
        users
            .entry(user_id)
            .or_default()
            .profile = Some(profile);
    }

    /// Seed a habit (test/setup helper).
    pub async fn seed_habit(&self, user_id: &str, name: &str, cadence: &str) -> HabitItem {
        let habit = HabitItem {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            cadence: cadence.to_string(),
            streak: 0,
            last_logged: None,
            created_at: Utc::now(),
        };
        let mut users = self.users.write().await;
        users
            .entry(user_id.to_string())
            .or_default()
            .habits
            .push(habit.clone());
        habit
    }

    /// Seed a project (test/setup helper).
    pub async fn seed_project(&self, user_id: &str, name: &str) -> ProjectItem {
        let project = ProjectItem {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            description: None,
            active: true,
            created_at: Utc::now(),
        };
        let mut users = self.users.write().await;
        users
            .entry(user_id.to_string())
            .or_default()
            .projects
            .push(project.clone());
        project
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get_user_profile(
        &self,
        user_id: &str,
    ) -> Result<Option<UserProfile>, StorageError> {
        let users = self.users.read().await;
        Ok(users.get(user_id).and_then(|u| u.profile.clone()))
    }

    async fn get_preferences(
        &self,
        user_id: &str,
    ) -> Result<Vec<(String, String)>, StorageError> {
        let users = self.users.read().await;
        let mut prefs: Vec<(String, String)> = users
            .get(user_id)
            .map(|u| {
                u.preferences
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        prefs.sort();
        Ok(prefs)
    }

    async fn save_preference(
        &self,
        user_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), StorageError> {
        let mut users = self.users.write().await;
        users
            .entry(user_id.to_string())
            .or_default()
            .preferences
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_chat_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatTurn>, StorageError> {
        let users = self.users.read().await;
        let history = users.get(user_id).map(|u| &u.history);
        Ok(history
            .map(|h| {
                let skip = h.len().saturating_sub(limit);
                h[skip..].to_vec()
            })
            .unwrap_or_default())
    }

    async fn save_chat(&self, user_id: &str, turn: &ChatTurn) -> Result<(), StorageError> {
        let mut users = self.users.write().await;
        users
            .entry(user_id.to_string())
            .or_default()
            .history
            .push(turn.clone());
        Ok(())
    }

    async fn create_task(&self, user_id: &str, task: NewTask) -> Result<TaskItem, StorageError> {
        let item = TaskItem {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            title: task.title,
            notes: task.notes,
            status: TaskStatus::Open,
            priority: task.priority,
            due: task.due,
            project_id: task.project_id,
            created_at: Utc::now(),
        };
        let mut users = self.users.write().await;
        users
            .entry(user_id.to_string())
            .or_default()
            .tasks
            .push(item.clone());
        Ok(item)
    }

    async fn get_tasks(
        &self,
        user_id: &str,
        status: Option<TaskStatus>,
    ) -> Result<Vec<TaskItem>, StorageError> {
        let users = self.users.read().await;
        Ok(users
            .get(user_id)
            .map(|u| {
                u.tasks
                    .iter()
                    .filter(|t| status.is_none_or(|s| t.status == s))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn complete_task(
        &self,
        user_id: &str,
        task_id: Uuid,
    ) -> Result<TaskItem, StorageError> {
        let mut users = self.users.write().await;
        let data = users
            .get_mut(user_id)
            .ok_or_else(|| StorageError::NotFound {
                entity: "task".into(),
                id: task_id.to_string(),
            })?;
        let task = data
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| StorageError::NotFound {
                entity: "task".into(),
                id: task_id.to_string(),
            })?;
        task.status = TaskStatus::Done;
        Ok(task.clone())
    }

    async fn get_projects(&self, user_id: &str) -> Result<Vec<ProjectItem>, StorageError> {
        let users = self.users.read().await;
        Ok(users
            .get(user_id)
            .map(|u| u.projects.clone())
            .unwrap_or_default())
    }

    async fn get_habits_due_today(
        &self,
        user_id: &str,
    ) -> Result<Vec<HabitItem>, StorageError> {
        let users = self.users.read().await;
        let today = Utc::now().date_naive();
        Ok(users
            .get(user_id)
            .map(|u| {
                u.habits
                    .iter()
                    .filter(|h| {
                        h.last_logged
                            .is_none_or(|logged| logged.date_naive() < today)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn log_habit(&self, user_id: &str, habit_id: Uuid) -> Result<HabitItem, StorageError> {
        let mut users = self.users.write().await;
        let data = users
            .get_mut(user_id)
            .ok_or_else(|| StorageError::NotFound {
                entity: "habit".into(),
                id: habit_id.to_string(),
            })?;
        let habit = data
            .habits
            .iter_mut()
            .find(|h| h.id == habit_id)
            .ok_or_else(|| StorageError::NotFound {
                entity: "habit".into(),
                id: habit_id.to_string(),
            })?;

        // A same-day double log keeps the streak; a gap longer than one
        // cadence period resets it.
        let now = Utc::now();
        let continues = habit
            .last_logged
            .is_some_and(|logged| now - logged < Duration::days(2));
        habit.streak = if continues { habit.streak + 1 } else { 1 };
        habit.last_logged = Some(now);
        Ok(habit.clone())
    }

    async fn save_entity(
        &self,
        user_id: &str,
        name: &str,
        entity_kind: &str,
        notes: &str,
    ) -> Result<EntityRecord, StorageError> {
        let mut users = self.users.write().await;
        let data = users.entry(user_id.to_string()).or_default();
        if let Some(existing) = data
            .entities
            .iter_mut()
            .find(|e| e.name.eq_ignore_ascii_case(name))
        {
            existing.entity_kind = entity_kind.to_string();
            existing.notes = notes.to_string();
            existing.updated_at = Utc::now();
            return Ok(existing.clone());
        }
        let record = EntityRecord {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            entity_kind: entity_kind.to_string(),
            notes: notes.to_string(),
            updated_at: Utc::now(),
        };
        data.entities.push(record.clone());
        Ok(record)
    }

    async fn find_entities(
        &self,
        user_id: &str,
        query: &str,
    ) -> Result<Vec<EntityRecord>, StorageError> {
        let users = self.users.read().await;
        let needle = query.to_lowercase();
        Ok(users
            .get(user_id)
            .map(|u| {
                u.entities
                    .iter()
                    .filter(|e| e.name.to_lowercase().contains(&needle))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
