use crate::db::models::{Credential, NewCredential};
use crate::error::{AppError, AppResult};
use chrono::Utc;
use sqlx::{Pool, Sqlite};
use tracing::info;

pub type DbPool = Pool<Sqlite>;

/// Escape LIKE wildcards so user queries match literally.
fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Database operations for credentials.
///
/// Every operation is scoped by owner; a valid id under the wrong owner is
/// indistinguishable from a missing row (`NotFound`).
pub struct CredentialRepo;

impl CredentialRepo {
    /// Insert a new credential row. Duplicate service names are allowed;
    /// they are disambiguated at retrieval time.
    pub async fn create(pool: &DbPool, new: NewCredential) -> AppResult<Credential> {
        if new.service_name.trim().is_empty() {
            return Err(AppError::Validation(
                "service name must not be empty".to_string(),
            ));
        }

        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO credentials (owner_id, service_name, username, encrypted_payload, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.owner_id)
        .bind(&new.service_name)
        .bind(&new.username)
        .bind(&new.encrypted_payload)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;

        Self::get_by_id(pool, &new.owner_id, result.last_insert_rowid())
            .await?
            .ok_or_else(|| AppError::internal("Failed to retrieve created credential"))
    }

    /// Get one credential by id, scoped to its owner.
    pub async fn get_by_id(pool: &DbPool, owner: &str, id: i64) -> AppResult<Option<Credential>> {
        let cred =
            sqlx::query_as::<_, Credential>("SELECT * FROM credentials WHERE id = ? AND owner_id = ?")
                .bind(id)
                .bind(owner)
                .fetch_optional(pool)
                .await?;

        Ok(cred)
    }

    /// Smart search: exact case-insensitive matches take priority, so a single
    /// exact hit short-circuits to one result and multiple exact hits become
    /// the disambiguation candidates. Without an exact hit, case-insensitive
    /// substring matches are returned, newest first.
    pub async fn find(pool: &DbPool, owner: &str, query: &str) -> AppResult<Vec<Credential>> {
        let exact = Self::find_exact(pool, owner, query).await?;
        if !exact.is_empty() {
            return Ok(exact);
        }

        let matches = sqlx::query_as::<_, Credential>(
            "SELECT * FROM credentials WHERE owner_id = ? AND service_name LIKE ? ESCAPE '\\' ORDER BY updated_at DESC, id DESC",
        )
        .bind(owner)
        .bind(like_pattern(query))
        .fetch_all(pool)
        .await?;

        Ok(matches)
    }

    /// Exact case-insensitive name matches, newest first.
    pub async fn find_exact(pool: &DbPool, owner: &str, name: &str) -> AppResult<Vec<Credential>> {
        let matches = sqlx::query_as::<_, Credential>(
            "SELECT * FROM credentials WHERE owner_id = ? AND LOWER(service_name) = LOWER(?) ORDER BY updated_at DESC, id DESC",
        )
        .bind(owner)
        .bind(name)
        .fetch_all(pool)
        .await?;

        Ok(matches)
    }

    /// Replace the payload (and optionally the username) of an owned row,
    /// bumping `updated_at`. `username = None` keeps the current value.
    pub async fn update(
        pool: &DbPool,
        owner: &str,
        id: i64,
        encrypted_payload: &[u8],
        username: Option<&str>,
    ) -> AppResult<Credential> {
        let now = Utc::now();
        let result = match username {
            Some(username) => {
                sqlx::query(
                    "UPDATE credentials SET encrypted_payload = ?, username = ?, updated_at = ? WHERE id = ? AND owner_id = ?",
                )
                .bind(encrypted_payload)
                .bind(username)
                .bind(now)
                .bind(id)
                .bind(owner)
                .execute(pool)
                .await?
            }
            None => {
                sqlx::query(
                    "UPDATE credentials SET encrypted_payload = ?, updated_at = ? WHERE id = ? AND owner_id = ?",
                )
                .bind(encrypted_payload)
                .bind(now)
                .bind(id)
                .bind(owner)
                .execute(pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }

        Self::get_by_id(pool, owner, id).await?.ok_or(AppError::NotFound)
    }

    /// Delete an owned row. Irreversible.
    pub async fn delete(pool: &DbPool, owner: &str, id: i64) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM credentials WHERE id = ? AND owner_id = ?")
            .bind(id)
            .bind(owner)
            .execute(pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }

        Ok(())
    }

    /// Metadata inventory for one owner, alphabetical by service name.
    pub async fn list_all(pool: &DbPool, owner: &str) -> AppResult<Vec<Credential>> {
        let creds = sqlx::query_as::<_, Credential>(
            "SELECT * FROM credentials WHERE owner_id = ? ORDER BY service_name COLLATE NOCASE ASC, updated_at DESC",
        )
        .bind(owner)
        .fetch_all(pool)
        .await?;

        Ok(creds)
    }
}

#[cfg(test)]
pub async fn setup_test_db() -> DbPool {
    use sqlx::sqlite::SqlitePoolOptions;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    init_db(&pool).await.expect("Failed to init database");
    pool
}

/// Initialize database with migrations
pub async fn init_db(pool: &DbPool) -> AppResult<()> {
    info!("Running database migrations");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS credentials (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id TEXT NOT NULL,
            service_name TEXT NOT NULL,
            username TEXT,
            encrypted_payload BLOB NOT NULL,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_credentials_owner_service ON credentials(owner_id, service_name)",
    )
    .execute(pool)
    .await?;

    info!("Database migrations complete");
    Ok(())
}
