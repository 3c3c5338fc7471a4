use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::info;

use crate::cache::Cache;
use crate::error::{AppError, AppResult};
use crate::models::{Group, GroupId};

// Group graph storage handle over a SQLx SQLite pool.
// Entity, graph and membership operations live in their own modules as
// `impl GroupDatabase` blocks.
pub struct GroupDatabase {
    pub pool: SqlitePool,
    group_cache: Mutex<GroupCache>,
}

// Every invalidation bumps `generation`; a fill is dropped when the generation
// moved while its row was being read.
struct GroupCache {
    entries: Cache<GroupId, Group>,
    generation: u64,
}

impl GroupDatabase {
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        cache_capacity: usize,
    ) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| {
                AppError::ConfigurationError(format!("Invalid database url {}: {}", database_url, e))
            })?
            .foreign_keys(true);

        // Every connection to `:memory:` opens a separate database, so an
        // in-memory store is pinned to one connection that never expires.
        let in_memory = database_url.contains(":memory:");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect to {}: {}", database_url, e)))?;

        Ok(GroupDatabase {
            pool,
            group_cache: Mutex::new(GroupCache {
                entries: Cache::new(cache_capacity),
                generation: 0,
            }),
        })
    }

    /// Fresh, initialized in-memory store.
    pub async fn in_memory() -> AppResult<Self> {
        let db = Self::new("sqlite::memory:", 1, 128).await?;
        db.init().await?;
        Ok(db)
    }

    pub async fn init(&self) -> AppResult<()> {
        // Platform users; read-only from the service's point of view
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL,
                first_name TEXT NOT NULL DEFAULT '',
                last_name TEXT NOT NULL DEFAULT '',
                is_active INTEGER NOT NULL DEFAULT 1
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS group_entities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                record_active INTEGER NOT NULL DEFAULT 1,
                created TEXT NOT NULL,
                modified TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS group_profiles (
                group_id INTEGER PRIMARY KEY REFERENCES group_entities(id) ON DELETE CASCADE,
                group_type TEXT,
                name TEXT,
                data TEXT,
                created TEXT NOT NULL,
                modified TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        // Relationship roots; one per group, at most one parent each
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS group_relationships (
                group_id INTEGER PRIMARY KEY REFERENCES group_entities(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                parent_group_id INTEGER REFERENCES group_relationships(group_id) ON DELETE SET NULL,
                record_active INTEGER NOT NULL DEFAULT 1,
                created TEXT NOT NULL,
                modified TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        // Each symmetric link is stored as two directed rows
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS linked_group_relationships (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                from_group_id INTEGER NOT NULL REFERENCES group_relationships(group_id) ON DELETE CASCADE,
                to_group_id INTEGER NOT NULL REFERENCES group_relationships(group_id) ON DELETE CASCADE,
                record_active INTEGER NOT NULL DEFAULT 1,
                created TEXT NOT NULL,
                modified TEXT NOT NULL,
                UNIQUE(from_group_id, to_group_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        // No uniqueness here; duplicates are rejected when the edge is added
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS course_group_relationships (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                course_id TEXT NOT NULL,
                group_id INTEGER NOT NULL REFERENCES group_entities(id) ON DELETE CASCADE,
                record_active INTEGER NOT NULL DEFAULT 1,
                created TEXT NOT NULL,
                modified TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS group_users (
                group_id INTEGER NOT NULL REFERENCES group_entities(id) ON DELETE CASCADE,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                PRIMARY KEY(group_id, user_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS courses (
                course_id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS organizations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                display_name TEXT,
                contact_name TEXT,
                contact_email TEXT,
                contact_phone TEXT,
                created TEXT NOT NULL,
                modified TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS organization_groups (
                organization_id INTEGER NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
                group_id INTEGER NOT NULL REFERENCES group_entities(id) ON DELETE CASCADE,
                PRIMARY KEY(organization_id, group_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS workgroups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                course_id TEXT NOT NULL,
                created TEXT NOT NULL,
                modified TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS workgroup_groups (
                workgroup_id INTEGER NOT NULL REFERENCES workgroups(id) ON DELETE CASCADE,
                group_id INTEGER NOT NULL REFERENCES group_entities(id) ON DELETE CASCADE,
                PRIMARY KEY(workgroup_id, group_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_profiles_type ON group_profiles(group_type)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_relationships_parent ON group_relationships(parent_group_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_links_to ON linked_group_relationships(to_group_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_course_edges_group ON course_group_relationships(group_id, course_id)")
            .execute(&self.pool)
            .await?;

        info!("Group graph schema ready");
        Ok(())
    }

    // Begin a transaction - caller is responsible for commit; dropping it rolls back
    pub async fn begin_transaction(&self) -> AppResult<Transaction<'_, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Close every pooled connection. The handle is unusable afterwards.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Group graph store closed");
    }

    /// Cached group, or on a miss the generation to pass to `fill_group`
    /// once the row has been read.
    pub(crate) async fn cached_group(&self, id: GroupId) -> Result<Group, u64> {
        let mut cache = self.group_cache.lock().await;
        let generation = cache.generation;
        cache.entries.get(&id).cloned().ok_or(generation)
    }

    pub(crate) async fn fill_group(&self, group: Group, generation: u64) -> bool {
        let mut cache = self.group_cache.lock().await;
        if cache.generation != generation {
            return false;
        }
        cache.entries.insert(group.id, group);
        true
    }

    /// Call after the write has committed.
    pub(crate) async fn invalidate_group(&self, id: GroupId) {
        let mut cache = self.group_cache.lock().await;
        cache.entries.remove(&id);
        cache.generation = cache.generation.wrapping_add(1);
    }
}
