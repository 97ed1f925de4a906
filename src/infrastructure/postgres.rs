//! `PostgreSQL` primary store.
//!
//! # Table Schema
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS tasks (
//!     id UUID PRIMARY KEY,
//!     owner_id UUID NOT NULL,
//!     title TEXT NOT NULL,
//!     description TEXT,
//!     completed BOOLEAN NOT NULL DEFAULT FALSE,
//!     due_date DATE,
//!     created_at TIMESTAMPTZ NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL,
//!     version BIGINT NOT NULL DEFAULT 1
//! );
//! CREATE INDEX IF NOT EXISTS idx_tasks_owner_created ON tasks(owner_id, created_at DESC);
//! ```
//!
//! Updates are a single `UPDATE ... RETURNING`, so the row lock serializes
//! concurrent writers of one record.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{NewTask, OwnerId, Task, TaskId, TaskPatch, Timestamp};
use crate::infrastructure::{PaginatedResult, Pagination, RepositoryError, TaskRepository};

const TASK_COLUMNS: &str =
    "id, owner_id, title, description, completed, due_date, created_at, updated_at, version";

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    owner_id: Uuid,
    title: String,
    description: Option<String>,
    completed: bool,
    due_date: Option<NaiveDate>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl TryFrom<TaskRow> for Task {
    type Error = RepositoryError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let version = u64::try_from(row.version).map_err(|_| {
            RepositoryError::SerializationError(format!(
                "negative version {} for task {}",
                row.version, row.id
            ))
        })?;
        Ok(Self {
            task_id: TaskId::from_uuid(row.id),
            title: row.title,
            description: row.description,
            completed: row.completed,
            due_date: row.due_date,
            owner_id: OwnerId::from_uuid(row.owner_id),
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
            version,
        })
    }
}

fn into_tasks(rows: Vec<TaskRow>) -> Result<Vec<Task>, RepositoryError> {
    rows.into_iter().map(Task::try_from).collect()
}

// =============================================================================
// PostgreSQL Task Repository
// =============================================================================

/// `PostgreSQL` implementation of [`TaskRepository`].
#[derive(Debug, Clone)]
pub struct PostgresTaskRepository {
    pool: PgPool,
}

impl PostgresTaskRepository {
    /// Creates a repository over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the `tasks` table and its listing index if they are missing.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::DatabaseError`] if a statement fails.
    pub async fn ensure_schema(&self) -> Result<(), RepositoryError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tasks (
                id UUID PRIMARY KEY,
                owner_id UUID NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                completed BOOLEAN NOT NULL DEFAULT FALSE,
                due_date DATE,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                version BIGINT NOT NULL DEFAULT 1
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_tasks_owner_created ON tasks(owner_id, created_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    async fn create(&self, fields: NewTask, owner_id: OwnerId) -> Result<Task, RepositoryError> {
        let task = Task::create(TaskId::generate(), owner_id, fields, Timestamp::now());

        sqlx::query(
            "INSERT INTO tasks (id, owner_id, title, description, completed, due_date, created_at, updated_at, version)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 1)",
        )
        .bind(task.task_id.as_uuid())
        .bind(task.owner_id.as_uuid())
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.completed)
        .bind(task.due_date)
        .bind(task.created_at.as_datetime())
        .bind(task.updated_at.as_datetime())
        .execute(&self.pool)
        .await?;

        Ok(task)
    }

    async fn update(
        &self,
        id: &TaskId,
        patch: &TaskPatch,
    ) -> Result<Option<Task>, RepositoryError> {
        let statement = format!(
            "UPDATE tasks SET
                title = COALESCE($2, title),
                description = CASE WHEN $3 THEN $4 ELSE description END,
                completed = COALESCE($5, completed),
                due_date = CASE WHEN $6 THEN $7 ELSE due_date END,
                updated_at = GREATEST(NOW(), updated_at + INTERVAL '1 microsecond'),
                version = version + 1
             WHERE id = $1
             RETURNING {TASK_COLUMNS}"
        );

        let row: Option<TaskRow> = sqlx::query_as(&statement)
            .bind(id.as_uuid())
            .bind(&patch.title)
            .bind(patch.description.is_some())
            .bind(patch.description.clone().flatten())
            .bind(patch.completed)
            .bind(patch.due_date.is_some())
            .bind(patch.due_date.flatten())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Task::try_from).transpose()
    }

    async fn delete(&self, id: &TaskId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_by_id(&self, id: &TaskId) -> Result<Option<Task>, RepositoryError> {
        let statement = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1");
        let row: Option<TaskRow> = sqlx::query_as(&statement)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Task::try_from).transpose()
    }

    async fn list(
        &self,
        owner_scope: Option<OwnerId>,
        pagination: Pagination,
    ) -> Result<PaginatedResult<Task>, RepositoryError> {
        let owner = owner_scope.map(|owner| *owner.as_uuid());
        #[allow(clippy::cast_possible_wrap)]
        let offset = pagination.offset() as i64;

        let statement = format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE ($1::uuid IS NULL OR owner_id = $1)
             ORDER BY created_at DESC, id DESC
             LIMIT $2 OFFSET $3"
        );
        let rows: Vec<TaskRow> = sqlx::query_as(&statement)
            .bind(owner)
            .bind(i64::from(pagination.limit()))
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let (total,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM tasks WHERE ($1::uuid IS NULL OR owner_id = $1)")
                .bind(owner)
                .fetch_one(&self.pool)
                .await?;

        #[allow(clippy::cast_sign_loss)]
        Ok(PaginatedResult::new(
            into_tasks(rows)?,
            total as u64,
            pagination,
        ))
    }

    async fn list_after(
        &self,
        cursor: Option<TaskId>,
        limit: usize,
    ) -> Result<Vec<Task>, RepositoryError> {
        let statement = format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE ($1::uuid IS NULL OR id > $1)
             ORDER BY id ASC
             LIMIT $2"
        );
        let rows: Vec<TaskRow> = sqlx::query_as(&statement)
            .bind(cursor.map(|id| *id.as_uuid()))
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        into_tasks(rows)
    }

    async fn find_many(&self, ids: &[TaskId]) -> Result<Vec<Task>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let statement = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ANY($1)");
        let rows: Vec<TaskRow> = sqlx::query_as(&statement)
            .bind(&uuids)
            .fetch_all(&self.pool)
            .await?;
        into_tasks(rows)
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tasks")
            .fetch_one(&self.pool)
            .await?;
        #[allow(clippy::cast_sign_loss)]
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sample_row(version: i64) -> TaskRow {
        TaskRow {
            id: Uuid::now_v7(),
            owner_id: Uuid::new_v4(),
            title: "Row title".to_string(),
            description: None,
            completed: true,
            due_date: NaiveDate::from_ymd_opt(2025, 1, 31),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            version,
        }
    }

    #[rstest]
    fn test_row_maps_to_task() {
        let row = sample_row(3);
        let id = row.id;

        let task = Task::try_from(row).unwrap();

        assert_eq!(task.task_id, TaskId::from_uuid(id));
        assert_eq!(task.version, 3);
        assert!(task.completed);
    }

    #[rstest]
    fn test_negative_version_is_rejected() {
        let result = Task::try_from(sample_row(-1));
        assert!(matches!(
            result,
            Err(RepositoryError::SerializationError(_))
        ));
    }

    #[rstest]
    #[tokio::test]
    #[ignore = "Requires PostgreSQL instance"]
    async fn test_postgres_create_update_delete() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let pool = PgPool::connect(&url).await.unwrap();
        let repository = PostgresTaskRepository::new(pool);
        repository.ensure_schema().await.unwrap();

        let created = repository
            .create(NewTask::titled("Postgres task"), OwnerId::generate())
            .await
            .unwrap();
        let updated = repository
            .update(&created.task_id, &TaskPatch::completed(true))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.version, 2);
        assert!(updated.updated_at > created.updated_at);
        assert!(repository.delete(&created.task_id).await.unwrap());
    }
}
