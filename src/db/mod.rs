mod account;
mod organisation;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

pub use account::{
    ACCOUNT_SECRET_LEN, Account, AccountQuery, AccountRole, AccountStore, AccountSummary,
    AccountUpdate, NewAccount, generate_secret,
};
pub use organisation::{Organisation, OrganisationQuery, OrganisationStore};

/// Errors returned by the stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// A stored role outside the known set. Treated as corrupt data.
    #[error("account {id} has unknown role '{role}'")]
    UnknownRole { id: String, role: String },
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open or create a database at the given path.
    /// Use ":memory:" for an in-memory database.
    pub async fn open(path: &str) -> Result<Self, sqlx::Error> {
        // Every connection to `sqlite::memory:` is a separate database, so the
        // in-memory pool is pinned to one connection.
        let (url, max_connections) = if path == ":memory:" {
            ("sqlite::memory:".to_string(), 1)
        } else {
            (format!("sqlite:{}?mode=rwc", path), 5)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&url)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Get the current schema version.
    async fn get_version(&self) -> Result<i32, sqlx::Error> {
        let result: Option<(i32,)> = sqlx::query_as("SELECT version FROM schema_version LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(result.map(|r| r.0).unwrap_or(0))
    }

    /// Set the schema version within a transaction.
    async fn set_version(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        version: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM schema_version")
            .execute(&mut **tx)
            .await?;
        sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
            .bind(version)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Run database migrations.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
            .execute(&self.pool)
            .await?;

        let version = self.get_version().await?;

        if version < 1 {
            self.migrate_v1().await?;
        }

        Ok(())
    }

    /// Execute a list of queries in a transaction, then set the version.
    async fn run_migration(
        &self,
        version: i32,
        queries: &[&'static str],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for query in queries {
            sqlx::query(*query).execute(&mut *tx).await?;
        }
        Self::set_version(&mut tx, version).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn migrate_v1(&self) -> Result<(), sqlx::Error> {
        self.run_migration(
            1,
            &[
                "CREATE TABLE organisations (
                    id TEXT PRIMARY KEY NOT NULL,
                    name TEXT UNIQUE NOT NULL COLLATE NOCASE,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )",
                // role is checked when read, see StoreError::UnknownRole
                "CREATE TABLE accounts (
                    id TEXT PRIMARY KEY NOT NULL,
                    email TEXT UNIQUE NOT NULL COLLATE NOCASE,
                    name TEXT NOT NULL,
                    password_hash TEXT NOT NULL,
                    role TEXT NOT NULL,
                    organisation_id TEXT REFERENCES organisations(id) ON DELETE CASCADE,
                    secret BLOB NOT NULL,
                    last_login_at INTEGER,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )",
                "CREATE INDEX idx_accounts_organisation_id ON accounts(organisation_id)",
                "CREATE INDEX idx_accounts_email ON accounts(email)",
            ],
        )
        .await
    }

    /// Get the account store.
    pub fn accounts(&self) -> AccountStore {
        AccountStore::new(self.pool.clone())
    }

    /// Get the organisation store.
    pub fn organisations(&self) -> OrganisationStore {
        OrganisationStore::new(self.pool.clone())
    }

    /// Get the underlying connection pool (for tests that need raw SQL access).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
