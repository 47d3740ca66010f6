use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use shared::{CreateUserProfileRequest, Role, UpdateUserProfileRequest, UserProfile};
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite};
use tracing::info;

use crate::domain::password::hash_password;
use crate::domain::validation::{self, FieldErrors, NAME_MAX_LEN};
use crate::domain::{may_assign_role, EntityKind, Ownership, Principal};
use crate::error::AppError;
use crate::storage::connection::DbConnection;
use crate::storage::traits::{push_list_filters, ListQuery, Repository};

const COLUMNS: &str = "id, username, email, role, owner_id, created_at, updated_at";
const PASSWORD_MIN_LEN: usize = 8;

/// Repository for user profiles (the principals of the API)
#[derive(Clone)]
pub struct UserRepository {
    db: DbConnection,
}

/// Login data for one profile
#[derive(Debug, Clone)]
pub struct Credentials {
    pub principal: Principal,
    pub password_hash: Option<String>,
}

impl UserRepository {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }

    pub async fn find_credentials(&self, username: &str) -> Result<Option<Credentials>> {
        let row = sqlx::query(
            r#"
            SELECT id, username, role, password_hash
            FROM user_profiles
            WHERE username = ?
            "#,
        )
        .bind(username)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(|r| -> Result<Credentials> {
            Ok(Credentials {
                principal: Principal {
                    id: r.try_get("id")?,
                    username: r.try_get("username")?,
                    role: parse_role(&r.try_get::<String, _>("role")?)?,
                },
                password_hash: r.try_get("password_hash")?,
            })
        })
        .transpose()
    }

    /// Create the bootstrap admin unless a profile with that username exists.
    /// Returns true if a profile was created.
    pub async fn ensure_admin(&self, username: &str, email: &str, password: &str) -> Result<bool> {
        if self.find_credentials(username).await?.is_some() {
            return Ok(false);
        }

        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO user_profiles (username, email, role, owner_id, password_hash, created_at, updated_at)
            VALUES (?, ?, 'admin', NULL, ?, ?, ?)
            "#,
        )
        .bind(username)
        .bind(email)
        .bind(hash_password(password)?)
        .bind(&now)
        .bind(&now)
        .execute(self.db.pool())
        .await?;

        info!("Created bootstrap admin profile: {}", username);
        Ok(true)
    }

    /// Adds a field error for every unique column already taken by another profile
    async fn check_unique(
        &self,
        errors: &mut FieldErrors,
        username: &str,
        email: &str,
        exclude_id: Option<i64>,
    ) -> Result<()> {
        for (field, column, value) in [("username", "username", username), ("email", "email", email)] {
            let sql = format!(
                "SELECT 1 FROM user_profiles WHERE {} = ? AND id != ?",
                column
            );
            let taken = sqlx::query(&sql)
                .bind(value)
                .bind(exclude_id.unwrap_or(-1))
                .fetch_optional(self.db.pool())
                .await?
                .is_some();
            if taken {
                errors.add(field, format!("user profile with this {} already exists.", field));
            }
        }
        Ok(())
    }

    fn validate(
        errors: &mut FieldErrors,
        actor: &Principal,
        username: &str,
        email: &str,
        role_change: Option<Role>,
        password: Option<&str>,
    ) {
        validation::text(errors, "username", username, NAME_MAX_LEN);
        validation::email(errors, "email", email);
        if let Some(role) = role_change {
            if !may_assign_role(actor, role) {
                errors.add("role", "Only administrators may assign the admin role.");
            }
        }
        if let Some(password) = password {
            if password.chars().count() < PASSWORD_MIN_LEN {
                errors.add(
                    "password",
                    format!(
                        "Ensure this field has at least {} characters.",
                        PASSWORD_MIN_LEN
                    ),
                );
            }
        }
    }
}

#[async_trait]
impl Repository for UserRepository {
    type Record = UserProfile;
    type Create = CreateUserProfileRequest;
    type Patch = UpdateUserProfileRequest;

    const KIND: EntityKind = EntityKind::UserProfile;

    /// Admin profiles always own themselves, so whoever created a profile
    /// loses control of it once it is promoted.
    fn ownership(record: &UserProfile) -> Option<Ownership> {
        let owner = match record.owner {
            Some(creator) if !record.role.is_admin() => creator,
            _ => record.id,
        };
        Some(Ownership {
            owner,
            subject: Some(record.id),
        })
    }

    async fn list(&self, query: &ListQuery) -> Result<(i64, Vec<UserProfile>)> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM user_profiles");
        push_list_filters(&mut count, query, &["owner_id", "id"], "username");
        let total = count.build_query_scalar::<i64>().fetch_one(self.db.pool()).await?;

        let mut select = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM user_profiles", COLUMNS));
        push_list_filters(&mut select, query, &["owner_id", "id"], "username");
        select
            .push(" ORDER BY id LIMIT ")
            .push_bind(query.limit)
            .push(" OFFSET ")
            .push_bind(query.offset);
        let rows = select.build().fetch_all(self.db.pool()).await?;

        let profiles = rows.iter().map(profile_from_row).collect::<Result<Vec<_>>>()?;
        Ok((total, profiles))
    }

    async fn get(&self, id: i64) -> Result<Option<UserProfile>> {
        let sql = format!("SELECT {} FROM user_profiles WHERE id = ?", COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        row.as_ref().map(profile_from_row).transpose()
    }

    async fn create(
        &self,
        actor: &Principal,
        input: CreateUserProfileRequest,
    ) -> Result<UserProfile, AppError> {
        info!("Creating user profile: username={}, role={}", input.username, input.role);

        let username = input.username.trim().to_string();
        let email = input.email.trim().to_string();

        let mut errors = FieldErrors::new();
        Self::validate(
            &mut errors,
            actor,
            &username,
            &email,
            Some(input.role),
            input.password.as_deref(),
        );
        self.check_unique(&mut errors, &username, &email, None).await?;
        errors.into_result()?;

        let password_hash = input.password.as_deref().map(hash_password).transpose()?;
        let owner = (!input.role.is_admin()).then_some(actor.id);
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO user_profiles (username, email, role, owner_id, password_hash, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&username)
        .bind(&email)
        .bind(input.role.as_str())
        .bind(owner)
        .bind(password_hash)
        .bind(&now)
        .bind(&now)
        .execute(self.db.pool())
        .await
        .map_err(unique_violation)?;

        let id = result.last_insert_rowid();
        info!("Created user profile: {} with ID: {}", username, id);

        Ok(UserProfile {
            id,
            username,
            email,
            role: input.role,
            owner,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    async fn update(
        &self,
        actor: &Principal,
        current: UserProfile,
        patch: UpdateUserProfileRequest,
    ) -> Result<UserProfile, AppError> {
        info!("Updating user profile: {}", current.id);

        let mut profile = current;
        let role_change = patch.role.filter(|role| *role != profile.role);
        if let Some(username) = patch.username {
            profile.username = username.trim().to_string();
        }
        if let Some(email) = patch.email {
            profile.email = email.trim().to_string();
        }
        if let Some(role) = patch.role {
            profile.role = role;
        }
        if profile.role.is_admin() {
            profile.owner = None;
        }

        let mut errors = FieldErrors::new();
        Self::validate(
            &mut errors,
            actor,
            &profile.username,
            &profile.email,
            role_change,
            patch.password.as_deref(),
        );
        self.check_unique(&mut errors, &profile.username, &profile.email, Some(profile.id))
            .await?;
        errors.into_result()?;

        let password_hash = patch.password.as_deref().map(hash_password).transpose()?;
        profile.updated_at = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            UPDATE user_profiles
            SET username = ?, email = ?, role = ?, owner_id = ?,
                password_hash = COALESCE(?, password_hash), updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&profile.username)
        .bind(&profile.email)
        .bind(profile.role.as_str())
        .bind(profile.owner)
        .bind(password_hash)
        .bind(&profile.updated_at)
        .bind(profile.id)
        .execute(self.db.pool())
        .await
        .map_err(unique_violation)?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }

        Ok(profile)
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        info!("Deleting user profile: {}", id);
        let result = sqlx::query("DELETE FROM user_profiles WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn profile_from_row(row: &SqliteRow) -> Result<UserProfile> {
    Ok(UserProfile {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        role: parse_role(&row.try_get::<String, _>("role")?)?,
        owner: row.try_get("owner_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn parse_role(value: &str) -> Result<Role> {
    value
        .parse::<Role>()
        .map_err(|e| anyhow!("Corrupt role column: {}", e))
}

/// A unique constraint can still fire if another request inserted the same
/// username or email after the pre-check; report it the same way.
fn unique_violation(err: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            let field = if db_err.message().contains("user_profiles.email") {
                "email"
            } else {
                "username"
            };
            return FieldErrors::single(
                field,
                format!("user profile with this {} already exists.", field),
            )
            .into();
        }
    }
    err.into()
}
