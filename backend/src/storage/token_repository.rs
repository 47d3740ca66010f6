use anyhow::{anyhow, Result};
use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::Principal;
use crate::storage::connection::DbConnection;

/// Repository for API tokens. Each profile has at most one token; it lives
/// until the profile is deleted.
#[derive(Clone)]
pub struct TokenRepository {
    db: DbConnection,
}

impl TokenRepository {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }

    /// Return the profile's token, creating it on first use
    pub async fn get_or_create(&self, user_id: i64) -> Result<String> {
        let key = Uuid::new_v4().simple().to_string();
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO auth_tokens (key, user_id, created_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(&key)
        .bind(user_id)
        .bind(Utc::now().to_rfc3339())
        .execute(self.db.pool())
        .await?;

        let row = sqlx::query("SELECT key FROM auth_tokens WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(self.db.pool())
            .await?;
        Ok(row.try_get("key")?)
    }

    /// Resolve a token to the principal it was issued to
    pub async fn principal_for(&self, key: &str) -> Result<Option<Principal>> {
        let row = sqlx::query(
            r#"
            SELECT p.id, p.username, p.role
            FROM auth_tokens t
            JOIN user_profiles p ON p.id = t.user_id
            WHERE t.key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(self.db.pool())
        .await?;

        match row {
            Some(r) => {
                let role: String = r.try_get("role")?;
                Ok(Some(Principal {
                    id: r.try_get("id")?,
                    username: r.try_get("username")?,
                    role: role.parse().map_err(|e| anyhow!("Corrupt role column: {}", e))?,
                }))
            }
            None => Ok(None),
        }
    }
}
