//! libSQL backend — async `Storage` trait implementation.
//!
//! Supports local file and in-memory databases. The schema is created on
//! open; there is no separate migration step.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;
use uuid::Uuid;

use crate::error::StorageError;
use crate::storage::traits::{
    ChatTurn, EntityRecord, HabitItem, NewTask, ProjectItem, Storage, TaskItem, TaskStatus,
    UserProfile,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS profiles (
    user_id      TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    timezone     TEXT,
    created_at   TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS preferences (
    user_id    TEXT NOT NULL,
    key        TEXT NOT NULL,
    value      TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (user_id, key)
);
CREATE TABLE IF NOT EXISTS chat_history (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id    TEXT NOT NULL,
    role       TEXT NOT NULL,
    content    TEXT NOT NULL,
    at         TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS tasks (
    id         TEXT PRIMARY KEY,
    user_id    TEXT NOT NULL,
    title      TEXT NOT NULL,
    notes      TEXT,
    status     TEXT NOT NULL DEFAULT 'open',
    priority   INTEGER NOT NULL DEFAULT 0,
    due        TEXT,
    project_id TEXT,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS projects (
    id          TEXT PRIMARY KEY,
    user_id     TEXT NOT NULL,
    name        TEXT NOT NULL,
    description TEXT,
    active      INTEGER NOT NULL DEFAULT 1,
    created_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS habits (
    id          TEXT PRIMARY KEY,
    user_id     TEXT NOT NULL,
    name        TEXT NOT NULL,
    cadence     TEXT NOT NULL DEFAULT 'daily',
    streak      INTEGER NOT NULL DEFAULT 0,
    last_logged TEXT,
    created_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS entities (
    id          TEXT PRIMARY KEY,
    user_id     TEXT NOT NULL,
    name        TEXT NOT NULL,
    entity_kind TEXT NOT NULL,
    notes       TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    UNIQUE (user_id, name)
);
"#;

/// libSQL storage backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStorage {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStorage {
    /// Open (or create) a local database file and initialize the schema.
    pub async fn new_local(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Open(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StorageError::Open(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StorageError::Open(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StorageError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                StorageError::Open(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| StorageError::Open(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        self.conn
            .execute_batch(SCHEMA)
            .await
            .map(|_| ())
            .map_err(|e| StorageError::Open(format!("Schema init failed: {e}")))
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn query_err(e: impl std::fmt::Display) -> StorageError {
    StorageError::Query(e.to_string())
}

/// Parse an RFC 3339 datetime string written by this backend.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.map(|s| parse_datetime(&s))
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_default()
}

fn status_to_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Open => "open",
        TaskStatus::Done => "done",
        TaskStatus::Dropped => "dropped",
    }
}

fn str_to_status(s: &str) -> TaskStatus {
    match s {
        "done" => TaskStatus::Done,
        "dropped" => TaskStatus::Dropped,
        _ => TaskStatus::Open,
    }
}

/// Column order: 0:id, 1:user_id, 2:title, 3:notes, 4:status, 5:priority,
/// 6:due, 7:project_id, 8:created_at
fn row_to_task(row: &libsql::Row) -> Result<TaskItem, libsql::Error> {
    let id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let title: String = row.get(2)?;
    let notes: Option<String> = row.get(3)?;
    let status: String = row.get(4)?;
    let priority: i64 = row.get(5)?;
    let due: Option<String> = row.get(6)?;
    let project_id: Option<String> = row.get(7)?;
    let created_at: String = row.get(8)?;

    Ok(TaskItem {
        id: parse_uuid(&id),
        user_id,
        title,
        notes,
        status: str_to_status(&status),
        priority: priority as i32,
        due: parse_optional_datetime(due),
        project_id: project_id.map(|p| parse_uuid(&p)),
        created_at: parse_datetime(&created_at),
    })
}

/// Column order: 0:id, 1:user_id, 2:name, 3:cadence, 4:streak,
/// 5:last_logged, 6:created_at
fn row_to_habit(row: &libsql::Row) -> Result<HabitItem, libsql::Error> {
    let id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let name: String = row.get(2)?;
    let cadence: String = row.get(3)?;
    let streak: i64 = row.get(4)?;
    let last_logged: Option<String> = row.get(5)?;
    let created_at: String = row.get(6)?;

    Ok(HabitItem {
        id: parse_uuid(&id),
        user_id,
        name,
        cadence,
        streak: streak.max(0) as u32,
        last_logged: parse_optional_datetime(last_logged),
        created_at: parse_datetime(&created_at),
    })
}

/// Column order: 0:id, 1:user_id, 2:name, 3:entity_kind, 4:notes, 5:updated_at
fn row_to_entity(row: &libsql::Row) -> Result<EntityRecord, libsql::Error> {
    let id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let name: String = row.get(2)?;
    let entity_kind: String = row.get(3)?;
    let notes: String = row.get(4)?;
    let updated_at: String = row.get(5)?;

    Ok(EntityRecord {
        id: parse_uuid(&id),
        user_id,
        name,
        entity_kind,
        notes,
        updated_at: parse_datetime(&updated_at),
    })
}

#[async_trait]
impl Storage for LibSqlStorage {
    async fn get_user_profile(
        &self,
        user_id: &str,
    ) -> Result<Option<UserProfile>, StorageError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT user_id, display_name, timezone, created_at FROM profiles WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => {
                let user_id: String = row.get(0).map_err(query_err)?;
                let display_name: String = row.get(1).map_err(query_err)?;
                let timezone: Option<String> = row.get(2).map_err(query_err)?;
                let created_at: String = row.get(3).map_err(query_err)?;
                Ok(Some(UserProfile {
                    user_id,
                    display_name,
                    timezone,
                    created_at: parse_datetime(&created_at),
                }))
            }
            None => Ok(None),
        }
    }

    async fn get_preferences(
        &self,
        user_id: &str,
    ) -> Result<Vec<(String, String)>, StorageError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT key, value FROM preferences WHERE user_id = ?1 ORDER BY key",
                params![user_id],
            )
            .await
            .map_err(query_err)?;

        let mut prefs = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            let key: String = row.get(0).map_err(query_err)?;
            let value: String = row.get(1).map_err(query_err)?;
            prefs.push((key, value));
        }
        Ok(prefs)
    }

    async fn save_preference(
        &self,
        user_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), StorageError> {
        self.conn()
            .execute(
                "INSERT INTO preferences (user_id, key, value, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (user_id, key) DO UPDATE SET value = ?3, updated_at = ?4",
                params![user_id, key, value, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn get_chat_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatTurn>, StorageError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT role, content, at FROM chat_history
                 WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2",
                params![user_id, limit as i64],
            )
            .await
            .map_err(query_err)?;

        let mut turns = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            let role: String = row.get(0).map_err(query_err)?;
            let content: String = row.get(1).map_err(query_err)?;
            let at: String = row.get(2).map_err(query_err)?;
            turns.push(ChatTurn {
                role,
                content,
                at: parse_datetime(&at),
            });
        }
        // Query is newest-first; callers expect oldest-first.
        turns.reverse();
        Ok(turns)
    }

    async fn save_chat(&self, user_id: &str, turn: &ChatTurn) -> Result<(), StorageError> {
        self.conn()
            .execute(
                "INSERT INTO chat_history (user_id, role, content, at) VALUES (?1, ?2, ?3, ?4)",
                params![user_id, turn.role.as_str(), turn.content.as_str(), turn.at.to_rfc3339()],
            )
            .await
            .map_err(query_err)?;
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
        self.conn()
            .execute(
                "INSERT INTO tasks (id, user_id, title, notes, status, priority, due, project_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    item.id.to_string(),
                    item.user_id.as_str(),
                    item.title.as_str(),
                    item.notes.clone(),
                    status_to_str(item.status),
                    item.priority as i64,
                    item.due.map(|d| d.to_rfc3339()),
                    item.project_id.map(|p| p.to_string()),
                    item.created_at.to_rfc3339()
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(item)
    }

    async fn get_tasks(
        &self,
        user_id: &str,
        status: Option<TaskStatus>,
    ) -> Result<Vec<TaskItem>, StorageError> {
        let mut rows = match status {
            Some(s) => self
                .conn()
                .query(
                    "SELECT id, user_id, title, notes, status, priority, due, project_id, created_at
                     FROM tasks WHERE user_id = ?1 AND status = ?2 ORDER BY priority DESC, created_at",
                    params![user_id, status_to_str(s)],
                )
                .await
                .map_err(query_err)?,
            None => self
                .conn()
                .query(
                    "SELECT id, user_id, title, notes, status, priority, due, project_id, created_at
                     FROM tasks WHERE user_id = ?1 ORDER BY priority DESC, created_at",
                    params![user_id],
                )
                .await
                .map_err(query_err)?,
        };

        let mut tasks = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            tasks.push(row_to_task(&row).map_err(query_err)?);
        }
        Ok(tasks)
    }

    async fn complete_task(
        &self,
        user_id: &str,
        task_id: Uuid,
    ) -> Result<TaskItem, StorageError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE tasks SET status = 'done' WHERE user_id = ?1 AND id = ?2",
                params![user_id, task_id.to_string()],
            )
            .await
            .map_err(query_err)?;
        if changed == 0 {
            return Err(StorageError::NotFound {
                entity: "task".into(),
                id: task_id.to_string(),
            });
        }

        let mut rows = self
            .conn()
            .query(
                "SELECT id, user_id, title, notes, status, priority, due, project_id, created_at
                 FROM tasks WHERE user_id = ?1 AND id = ?2",
                params![user_id, task_id.to_string()],
            )
            .await
            .map_err(query_err)?;
        let row = rows
            .next()
            .await
            .map_err(query_err)?
            .ok_or_else(|| StorageError::NotFound {
                entity: "task".into(),
                id: task_id.to_string(),
            })?;
        row_to_task(&row).map_err(query_err)
    }

    async fn get_projects(&self, user_id: &str) -> Result<Vec<ProjectItem>, StorageError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, user_id, name, description, active, created_at
                 FROM projects WHERE user_id = ?1 ORDER BY created_at",
                params![user_id],
            )
            .await
            .map_err(query_err)?;

        let mut projects = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            let id: String = row.get(0).map_err(query_err)?;
            let user_id: String = row.get(1).map_err(query_err)?;
            let name: String = row.get(2).map_err(query_err)?;
            let description: Option<String> = row.get(3).map_err(query_err)?;
            let active: i64 = row.get(4).map_err(query_err)?;
            let created_at: String = row.get(5).map_err(query_err)?;
            projects.push(ProjectItem {
                id: parse_uuid(&id),
                user_id,
                name,
                description,
                active: active != 0,
                created_at: parse_datetime(&created_at),
            });
        }
        Ok(projects)
    }

    async fn get_habits_due_today(
        &self,
        user_id: &str,
    ) -> Result<Vec<HabitItem>, StorageError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, user_id, name, cadence, streak, last_logged, created_at
                 FROM habits WHERE user_id = ?1 ORDER BY created_at",
                params![user_id],
            )
            .await
            .map_err(query_err)?;

        let today = Utc::now().date_naive();
        let mut habits = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            let habit = row_to_habit(&row).map_err(query_err)?;
            if habit
                .last_logged
                .is_none_or(|logged| logged.date_naive() < today)
            {
                habits.push(habit);
            }
        }
        Ok(habits)
    }

    async fn log_habit(&self, user_id: &str, habit_id: Uuid) -> Result<HabitItem, StorageError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, user_id, name, cadence, streak, last_logged, created_at
                 FROM habits WHERE user_id = ?1 AND id = ?2",
                params![user_id, habit_id.to_string()],
            )
            .await
            .map_err(query_err)?;
        let row = rows
            .next()
            .await
            .map_err(query_err)?
            .ok_or_else(|| StorageError::NotFound {
                entity: "habit".into(),
                id: habit_id.to_string(),
            })?;
        let mut habit = row_to_habit(&row).map_err(query_err)?;

        let now = Utc::now();
        let continues = habit
            .last_logged
            .is_some_and(|logged| now - logged < Duration::days(2));
        habit.streak = if continues { habit.streak + 1 } else { 1 };
        habit.last_logged = Some(now);

        self.conn()
            .execute(
                "UPDATE habits SET streak = ?1, last_logged = ?2 WHERE user_id = ?3 AND id = ?4",
                params![
                    habit.streak as i64,
                    now.to_rfc3339(),
                    user_id,
                    habit_id.to_string()
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(habit)
    }

    async fn save_entity(
        &self,
        user_id: &str,
        name: &str,
        entity_kind: &str,
        notes: &str,
    ) -> Result<EntityRecord, StorageError> {
        let record = EntityRecord {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            entity_kind: entity_kind.to_string(),
            notes: notes.to_string(),
            updated_at: Utc::now(),
        };
        self.conn()
            .execute(
                "INSERT INTO entities (id, user_id, name, entity_kind, notes, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (user_id, name) DO UPDATE SET
                     entity_kind = ?4, notes = ?5, updated_at = ?6",
                params![
                    record.id.to_string(),
                    user_id,
                    name,
                    entity_kind,
                    notes,
                    record.updated_at.to_rfc3339()
                ],
            )
            .await
            .map_err(query_err)?;

        // Re-read so an upsert returns the surviving row's ID.
        let found = self.find_entities(user_id, name).await?;
        Ok(found
            .into_iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
            .unwrap_or(record))
    }

    async fn find_entities(
        &self,
        user_id: &str,
        query: &str,
    ) -> Result<Vec<EntityRecord>, StorageError> {
        let pattern = format!("%{}%", query.to_lowercase());
        let mut rows = self
            .conn()
            .query(
                "SELECT id, user_id, name, entity_kind, notes, updated_at
                 FROM entities WHERE user_id = ?1 AND lower(name) LIKE ?2
                 ORDER BY updated_at DESC",
                params![user_id, pattern],
            )
            .await
            .map_err(query_err)?;

        let mut entities = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            entities.push(row_to_entity(&row).map_err(query_err)?);
        }
        Ok(entities)
    }
}
