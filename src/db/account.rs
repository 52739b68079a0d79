use rand::RngCore;
use sqlx::sqlite::SqlitePool;

use super::StoreError;

/// Length in bytes of a freshly generated account secret.
pub const ACCOUNT_SECRET_LEN: usize = 32;

/// Generate a new random account secret.
///
/// The secret is the HMAC key for every token issued to the account, so
/// replacing it revokes all of them at once.
pub fn generate_secret() -> Vec<u8> {
    let mut bytes = vec![0u8; ACCOUNT_SECRET_LEN];
    rand::rng().fill_bytes(&mut bytes);
    bytes
}

#[derive(Clone)]
pub struct AccountStore {
    pool: SqlitePool,
}

/// Account role for authorization. The set is closed: any other stored value
/// is rejected rather than mapped to a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccountRole {
    SystemAdministrator,
    OrganisationAdministrator,
    /// Non-interactive application or device account.
    Device,
}

impl AccountRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountRole::SystemAdministrator => "systemAdministrator",
            AccountRole::OrganisationAdministrator => "organisationAdministrator",
            AccountRole::Device => "device",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "systemAdministrator" => Some(AccountRole::SystemAdministrator),
            "organisationAdministrator" => Some(AccountRole::OrganisationAdministrator),
            "device" => Some(AccountRole::Device),
            _ => None,
        }
    }

    /// Device accounts always get extended sessions.
    pub fn is_non_interactive(&self) -> bool {
        matches!(self, AccountRole::Device)
    }
}

impl std::fmt::Display for AccountRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub role: AccountRole,
    pub organisation_id: Option<String>,
    pub secret: Vec<u8>,
    pub last_login_at: Option<u64>,
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: String,
    email: String,
    name: String,
    password_hash: String,
    role: String,
    organisation_id: Option<String>,
    secret: Vec<u8>,
    last_login_at: Option<i64>,
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        let role = AccountRole::parse(&row.role).ok_or_else(|| StoreError::UnknownRole {
            id: row.id.clone(),
            role: row.role.clone(),
        })?;
        Ok(Self {
            id: row.id,
            email: row.email,
            name: row.name,
            password_hash: row.password_hash,
            role,
            organisation_id: row.organisation_id,
            secret: row.secret,
            last_login_at: row.last_login_at.map(|t| t as u64),
        })
    }
}

/// Account listing without secrets or password hashes.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: String,
    pub organisation_id: Option<String>,
    pub last_login_at: Option<i64>,
    pub created_at: String,
}

#[derive(sqlx::FromRow)]
struct AccountSummaryRow {
    id: String,
    email: String,
    name: String,
    role: String,
    organisation_id: Option<String>,
    last_login_at: Option<i64>,
    created_at: String,
}

impl From<AccountSummaryRow> for AccountSummary {
    fn from(row: AccountSummaryRow) -> Self {
        Self {
            id: row.id,
            email: row.email,
            name: row.name,
            role: row.role,
            organisation_id: row.organisation_id,
            last_login_at: row.last_login_at,
            created_at: row.created_at,
        }
    }
}

/// Filter for listing accounts. Authorization scopes it by setting
/// `organisation_id` before the query runs.
#[derive(Debug, Clone, Default)]
pub struct AccountQuery {
    pub organisation_id: Option<String>,
    pub role: Option<AccountRole>,
}

/// A new account to insert.
#[derive(Debug, Clone)]
pub struct NewAccount<'a> {
    pub email: &'a str,
    pub name: &'a str,
    pub password_hash: &'a str,
    pub role: AccountRole,
    pub organisation_id: Option<&'a str>,
}

/// Changes to an existing account. `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct AccountUpdate {
    pub name: Option<String>,
    pub role: Option<AccountRole>,
    pub password_hash: Option<String>,
    pub secret: Option<Vec<u8>>,
}

impl AccountStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create an account with a fresh secret. Returns the new account ID.
    pub async fn create(&self, account: &NewAccount<'_>) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO accounts (id, email, name, password_hash, role, organisation_id, secret) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(account.email)
        .bind(account.name)
        .bind(account.password_hash)
        .bind(account.role.as_str())
        .bind(account.organisation_id)
        .bind(generate_secret())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    /// Find an account by ID.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Account>, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(
            "SELECT id, email, name, password_hash, role, organisation_id, secret, last_login_at FROM accounts WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Account::try_from).transpose()
    }

    /// Find an account by email (case-insensitive).
    pub async fn get_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(
            "SELECT id, email, name, password_hash, role, organisation_id, secret, last_login_at FROM accounts WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Account::try_from).transpose()
    }

    /// Check whether an email address is already registered.
    pub async fn is_email_taken(&self, email: &str) -> Result<bool, StoreError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM accounts WHERE email = ?")
            .bind(email)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0 > 0)
    }

    /// Apply an update. Returns false if the account does not exist.
    pub async fn update(&self, id: &str, update: &AccountUpdate) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE accounts SET
                name = COALESCE(?, name),
                role = COALESCE(?, role),
                password_hash = COALESCE(?, password_hash),
                secret = COALESCE(?, secret)
             WHERE id = ?",
        )
        .bind(update.name.as_deref())
        .bind(update.role.map(|r| r.as_str()))
        .bind(update.password_hash.as_deref())
        .bind(update.secret.as_deref())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace the account secret, invalidating every outstanding token.
    pub async fn rotate_secret(&self, id: &str) -> Result<bool, StoreError> {
        self.update(
            id,
            &AccountUpdate {
                secret: Some(generate_secret()),
                ..Default::default()
            },
        )
        .await
    }

    /// Record a successful login.
    pub async fn set_last_login(&self, id: &str, at: u64) -> Result<(), StoreError> {
        sqlx::query("UPDATE accounts SET last_login_at = ? WHERE id = ?")
            .bind(at as i64)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete an account by ID.
    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List accounts matching the query, ordered by creation.
    pub async fn list(&self, query: &AccountQuery) -> Result<Vec<AccountSummary>, StoreError> {
        let rows: Vec<AccountSummaryRow> = sqlx::query_as(
            "SELECT id, email, name, role, organisation_id, last_login_at, created_at FROM accounts
             WHERE (?1 IS NULL OR organisation_id = ?1)
               AND (?2 IS NULL OR role = ?2)
             ORDER BY created_at, email",
        )
        .bind(query.organisation_id.as_deref())
        .bind(query.role.map(|r| r.as_str()))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AccountSummary::from).collect())
    }

    /// Count system administrators (used by the admin bootstrap).
    pub async fn count_system_administrators(&self) -> Result<i64, StoreError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM accounts WHERE role = ?")
            .bind(AccountRole::SystemAdministrator.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }
}
