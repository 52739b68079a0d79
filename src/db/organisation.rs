use sqlx::sqlite::SqlitePool;

use super::StoreError;

#[derive(Clone)]
pub struct OrganisationStore {
    pool: SqlitePool,
}

#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Organisation {
    pub id: String,
    pub name: String,
    pub created_at: String,
}

/// Filter for listing organisations. Non-global callers get `id` pinned to
/// their own organisation before the query runs.
#[derive(Debug, Clone, Default)]
pub struct OrganisationQuery {
    pub id: Option<String>,
}

impl OrganisationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create an organisation. Returns the new organisation ID.
    pub async fn create(&self, name: &str) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO organisations (id, name) VALUES (?, ?)")
            .bind(&id)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<Organisation>, StoreError> {
        let org = sqlx::query_as("SELECT id, name, created_at FROM organisations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(org)
    }

    pub async fn is_name_taken(&self, name: &str) -> Result<bool, StoreError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM organisations WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0 > 0)
    }

    pub async fn rename(&self, id: &str, name: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE organisations SET name = ? WHERE id = ?")
            .bind(name)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete an organisation and, by cascade, its accounts.
    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM organisations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list(&self, query: &OrganisationQuery) -> Result<Vec<Organisation>, StoreError> {
        let orgs = sqlx::query_as(
            "SELECT id, name, created_at FROM organisations WHERE (?1 IS NULL OR id = ?1) ORDER BY name",
        )
        .bind(query.id.as_deref())
        .fetch_all(&self.pool)
        .await?;
        Ok(orgs)
    }
}
