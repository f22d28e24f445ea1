mod leads;
mod properties;

use std::{borrow::Cow, future::Future, str::FromStr, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    SqlitePool,
};
use thiserror::Error;
use uuid::Uuid;

use estate_desk_core::{Category, Code, CodeRegistry};

pub use leads::{LeadError, LeadFilter, LeadRepository};
pub use properties::{PropertyError, PropertyFilter, PropertyRepository};

/// SQLite extended result code for a violated UNIQUE constraint.
const SQLITE_CONSTRAINT_UNIQUE: &str = "2067";
/// SQLite extended result code for a violated FOREIGN KEY constraint.
const SQLITE_CONSTRAINT_FOREIGNKEY: &str = "787";

pub const DEFAULT_LIST_LIMIT: u32 = 50;
pub const MAX_LIST_LIMIT: u32 = 200;

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    ///
    /// Pragmas are set on the connect options so every pooled connection gets them.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(StorageError::Connect)?
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_millis(5000));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StorageError::Connect)?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Returns the existence check used by the code allocator.
    pub fn codes(&self) -> CodeIndexRepository {
        CodeIndexRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for interacting with property listings.
    pub fn properties(&self) -> PropertyRepository {
        PropertyRepository::new(self.pool.clone())
    }

    /// Returns a handle for interacting with sales leads.
    pub fn leads(&self) -> LeadRepository {
        LeadRepository::new(self.pool.clone())
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Answers "does an entity of this category already hold this code".
#[derive(Clone)]
pub struct CodeIndexRepository {
    pool: SqlitePool,
}

impl CodeIndexRepository {
    fn lookup_sql(category: Category) -> &'static str {
        match category {
            Category::Property => "SELECT 1 FROM properties WHERE code = ? LIMIT 1",
            Category::Lead => "SELECT 1 FROM leads WHERE code = ? LIMIT 1",
        }
    }
}

impl CodeRegistry for CodeIndexRepository {
    type Error = sqlx::Error;

    fn code_exists(
        &self,
        category: Category,
        code: &Code,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        let pool = self.pool.clone();
        let code = code.as_str().to_owned();
        async move {
            let row = sqlx::query(Self::lookup_sql(category))
                .bind(code)
                .fetch_optional(&pool)
                .await?;
            Ok(row.is_some())
        }
    }
}

/// Result of inserting a coded entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Another entity claimed the same code between the check and the insert.
    CodeTaken,
}

impl InsertOutcome {
    pub fn is_code_taken(self) -> bool {
        matches!(self, Self::CodeTaken)
    }
}

/// Generates a store-assigned primary key.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub(crate) fn clamp_limit(limit: Option<u32>) -> i64 {
    i64::from(limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT))
}

pub(crate) fn constraint_code(err: &sqlx::Error) -> Option<Cow<'_, str>> {
    match err {
        sqlx::Error::Database(db_err) => db_err.code(),
        _ => None,
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    constraint_code(err).as_deref() == Some(SQLITE_CONSTRAINT_UNIQUE)
}

pub(crate) fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    constraint_code(err).as_deref() == Some(SQLITE_CONSTRAINT_FOREIGNKEY)
}

pub(crate) fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn migrations_apply() {
        let db = setup_db().await;

        let tables: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('properties', 'leads')",
        )
        .fetch_one(db.pool())
        .await
        .expect("fetch tables");
        assert_eq!(tables.0, 2, "expected core tables to be created");
    }

    #[tokio::test]
    async fn code_index_sees_only_live_entities_of_the_category() {
        let db = setup_db().await;
        let codes = db.codes();
        let property = property(4821);
        let code = property.code.clone();

        assert!(!codes.code_exists(Category::Property, &code).await.unwrap());
        db.properties().insert(&property).await.expect("insert");
        assert!(codes.code_exists(Category::Property, &code).await.unwrap());

        let lead_code = Code::format(Category::Lead, 4821, 5);
        assert!(!codes.code_exists(Category::Lead, &lead_code).await.unwrap());

        db.properties().delete(&property.id).await.expect("delete");
        assert!(
            !codes.code_exists(Category::Property, &code).await.unwrap(),
            "deleted entities free their code"
        );
    }

    #[test]
    fn limits_are_clamped() {
        assert_eq!(clamp_limit(None), 50);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(10_000)), 200);
    }
}
