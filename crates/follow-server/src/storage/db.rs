//! SQLite durable store (system of record for follow edges)

use anyhow::{Context, Result as AnyResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use follow_core::{
    GraphError, PageRequest, Paged, RelationshipRecord, RelationshipRepository, Result,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;

pub struct Database {
    pool: Arc<SqlitePool>,
}

impl Database {
    pub async fn new(database_url: &str, max_connections: u32) -> AnyResult<Self> {
        tracing::info!("Opening SQLite database at: {}", database_url);

        // Create parent directory if needed
        if let Some(path) = file_path(database_url) {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    tracing::info!("Creating parent directory: {}", parent.display());
                    tokio::fs::create_dir_all(parent).await.with_context(|| {
                        format!("Failed to create database directory: {}", parent.display())
                    })?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database url: {}", database_url))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to connect to SQLite database at: {}", database_url))?;

        tracing::info!("SQLite connection established, running migrations...");

        Self::run_migrations(&pool)
            .await
            .context("Failed to run database migrations")?;

        tracing::info!("Database initialization complete");

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Private in-memory database on a single long-lived connection.
    pub async fn in_memory() -> AnyResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        // Every pooled connection to :memory: is a separate database, so
        // the pool must never grow past or recycle its one connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory SQLite database")?;

        Self::run_migrations(&pool)
            .await
            .context("Failed to run database migrations")?;

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    async fn run_migrations(pool: &SqlitePool) -> AnyResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_follows (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                follower_id TEXT NOT NULL,
                following_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (follower_id, following_id),
                CHECK (follower_id <> following_id)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_user_follows_follower
            ON user_follows (follower_id, created_at)
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_user_follows_following
            ON user_follows (following_id, created_at)
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn get_edge(
        &self,
        follower_id: &str,
        following_id: &str,
    ) -> Result<Option<RelationshipRecord>> {
        let row: Option<EdgeRow> = sqlx::query_as(
            r#"
            SELECT follower_id, following_id, created_at
            FROM user_follows WHERE follower_id = ?1 AND following_id = ?2
            "#,
        )
        .bind(follower_id)
        .bind(following_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| GraphError::durable("get_edge", e))?;

        Ok(row.map(|r| r.into()))
    }

    /// Every edge `user_id` follows, newest first. Used to rebuild the cache index.
    pub async fn following_edges(&self, user_id: &str) -> Result<Vec<RelationshipRecord>> {
        let rows: Vec<EdgeRow> = sqlx::query_as(
            r#"
            SELECT follower_id, following_id, created_at
            FROM user_follows WHERE follower_id = ?1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| GraphError::durable("following_edges", e))?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    /// Every edge pointing at `user_id`, newest first.
    pub async fn follower_edges(&self, user_id: &str) -> Result<Vec<RelationshipRecord>> {
        let rows: Vec<EdgeRow> = sqlx::query_as(
            r#"
            SELECT follower_id, following_id, created_at
            FROM user_follows WHERE following_id = ?1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| GraphError::durable("follower_edges", e))?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }
}

#[async_trait]
impl RelationshipRepository for Database {
    async fn follow(&self, follower_id: &str, following_id: &str) -> Result<RelationshipRecord> {
        let record = RelationshipRecord::new(follower_id, following_id);
        if record.is_self_follow() {
            return Err(GraphError::SelfFollow(record.follower_id));
        }

        // The unique constraint decides duplicates, not a prior lookup.
        let result = sqlx::query(
            r#"
            INSERT INTO user_follows (follower_id, following_id, created_at)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(&record.follower_id)
        .bind(&record.following_id)
        .bind(record.created_at)
        .execute(&*self.pool)
        .await;

        match result {
            Ok(_) => Ok(record),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(GraphError::AlreadyFollowing {
                    follower_id: follower_id.to_string(),
                    following_id: following_id.to_string(),
                })
            }
            Err(e) => Err(GraphError::durable("follow", e)),
        }
    }

    async fn unfollow(&self, follower_id: &str, following_id: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM user_follows WHERE follower_id = ?1 AND following_id = ?2
            "#,
        )
        .bind(follower_id)
        .bind(following_id)
        .execute(&*self.pool)
        .await
        .map_err(|e| GraphError::durable("unfollow", e))?;

        if result.rows_affected() == 0 {
            tracing::debug!("Unfollow of absent edge {} -> {}", follower_id, following_id);
        }

        Ok(())
    }

    async fn is_following(&self, follower_id: &str, following_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM user_follows WHERE follower_id = ?1 AND following_id = ?2
            "#,
        )
        .bind(follower_id)
        .bind(following_id)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| GraphError::durable("is_following", e))?;

        Ok(count > 0)
    }

    async fn get_follow_list(
        &self,
        user_id: &str,
        page: PageRequest,
    ) -> Result<Paged<RelationshipRecord>> {
        let rows: Vec<EdgeRow> = sqlx::query_as(
            r#"
            SELECT follower_id, following_id, created_at
            FROM user_follows WHERE follower_id = ?1
            ORDER BY created_at DESC, id DESC
            LIMIT ?2 OFFSET ?3
            "#,
        )
        .bind(user_id)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| GraphError::durable("get_follow_list", e))?;

        let total = self.get_follow_count(user_id).await?;

        Ok(Paged {
            items: rows.into_iter().map(|r| r.into()).collect(),
            total,
        })
    }

    async fn get_follower_list(
        &self,
        user_id: &str,
        page: PageRequest,
    ) -> Result<Paged<RelationshipRecord>> {
        let rows: Vec<EdgeRow> = sqlx::query_as(
            r#"
            SELECT follower_id, following_id, created_at
            FROM user_follows WHERE following_id = ?1
            ORDER BY created_at DESC, id DESC
            LIMIT ?2 OFFSET ?3
            "#,
        )
        .bind(user_id)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| GraphError::durable("get_follower_list", e))?;

        let total = self.get_follower_count(user_id).await?;

        Ok(Paged {
            items: rows.into_iter().map(|r| r.into()).collect(),
            total,
        })
    }

    async fn get_follow_count(&self, user_id: &str) -> Result<i64> {
        sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM user_follows WHERE follower_id = ?1
            "#,
        )
        .bind(user_id)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| GraphError::durable("get_follow_count", e))
    }

    async fn get_follower_count(&self, user_id: &str) -> Result<i64> {
        sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM user_follows WHERE following_id = ?1
            "#,
        )
        .bind(user_id)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| GraphError::durable("get_follower_count", e))
    }

    async fn get_mutual_follows(
        &self,
        user_a: &str,
        user_b: &str,
        page: PageRequest,
    ) -> Result<Paged<RelationshipRecord>> {
        // One join against both follow sets; LIMIT applies to the intersection.
        let rows: Vec<EdgeRow> = sqlx::query_as(
            r#"
            SELECT a.follower_id, a.following_id, a.created_at
            FROM user_follows a
            INNER JOIN user_follows b
                ON b.following_id = a.following_id AND b.follower_id = ?2
            WHERE a.follower_id = ?1
            ORDER BY a.created_at DESC, a.id DESC
            LIMIT ?3 OFFSET ?4
            "#,
        )
        .bind(user_a)
        .bind(user_b)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| GraphError::durable("get_mutual_follows", e))?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM user_follows a
            INNER JOIN user_follows b
                ON b.following_id = a.following_id AND b.follower_id = ?2
            WHERE a.follower_id = ?1
            "#,
        )
        .bind(user_a)
        .bind(user_b)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| GraphError::durable("get_mutual_follows", e))?;

        Ok(Paged {
            items: rows.into_iter().map(|r| r.into()).collect(),
            total,
        })
    }
}

/// Filesystem path of a file-backed SQLite url, `None` for in-memory urls.
fn file_path(database_url: &str) -> Option<&str> {
    if database_url.contains(":memory:") || database_url.contains("mode=memory") {
        return None;
    }
    let rest = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or(rest);
    (!path.is_empty()).then_some(path)
}

// Helper struct for sqlx query_as
#[derive(sqlx::FromRow)]
struct EdgeRow {
    follower_id: String,
    following_id: String,
    created_at: DateTime<Utc>,
}

impl From<EdgeRow> for RelationshipRecord {
    fn from(r: EdgeRow) -> Self {
        RelationshipRecord {
            follower_id: r.follower_id,
            following_id: r.following_id,
            created_at: r.created_at,
        }
    }
}
