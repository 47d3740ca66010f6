use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use shared::{ChildProfile, CreateChildProfileRequest, UpdateChildProfileRequest};
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite};
use tracing::info;

use crate::domain::validation::{self, FieldErrors, AGE_RANGE, NAME_MAX_LEN};
use crate::domain::{EntityKind, Ownership, Principal};
use crate::error::AppError;
use crate::storage::connection::DbConnection;
use crate::storage::traits::{push_list_filters, ListQuery, Repository};

const COLUMNS: &str = "id, owner_id, name, age, created_at, updated_at";

/// Repository for child profiles
#[derive(Clone)]
pub struct ChildRepository {
    db: DbConnection,
}

impl ChildRepository {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }

    fn validate(name: &str, age: i64) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        validation::text(&mut errors, "name", name, NAME_MAX_LEN);
        validation::range(&mut errors, "age", age, AGE_RANGE);
        errors.into_result()
    }
}

#[async_trait]
impl Repository for ChildRepository {
    type Record = ChildProfile;
    type Create = CreateChildProfileRequest;
    type Patch = UpdateChildProfileRequest;

    const KIND: EntityKind = EntityKind::ChildProfile;

    fn ownership(record: &ChildProfile) -> Option<Ownership> {
        Some(Ownership::owned_by(record.owner))
    }

    async fn list(&self, query: &ListQuery) -> Result<(i64, Vec<ChildProfile>)> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM child_profiles");
        push_list_filters(&mut count, query, &["owner_id"], "name");
        let total = count.build_query_scalar::<i64>().fetch_one(self.db.pool()).await?;

        let mut select = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM child_profiles", COLUMNS));
        push_list_filters(&mut select, query, &["owner_id"], "name");
        select
            .push(" ORDER BY id LIMIT ")
            .push_bind(query.limit)
            .push(" OFFSET ")
            .push_bind(query.offset);
        let rows = select.build().fetch_all(self.db.pool()).await?;

        let children = rows.iter().map(child_from_row).collect::<Result<Vec<_>>>()?;
        Ok((total, children))
    }

    async fn get(&self, id: i64) -> Result<Option<ChildProfile>> {
        let sql = format!("SELECT {} FROM child_profiles WHERE id = ?", COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        row.as_ref().map(child_from_row).transpose()
    }

    async fn create(
        &self,
        actor: &Principal,
        input: CreateChildProfileRequest,
    ) -> Result<ChildProfile, AppError> {
        info!("Creating child profile: name={}, owner={}", input.name, actor.id);

        let name = input.name.trim().to_string();
        Self::validate(&name, input.age)?;

        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO child_profiles (owner_id, name, age, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(actor.id)
        .bind(&name)
        .bind(input.age)
        .bind(&now)
        .bind(&now)
        .execute(self.db.pool())
        .await?;

        let child = ChildProfile {
            id: result.last_insert_rowid(),
            owner: actor.id,
            name,
            age: input.age,
            created_at: now.clone(),
            updated_at: now,
        };
        info!("Created child profile: {} with ID: {}", child.name, child.id);
        Ok(child)
    }

    async fn update(
        &self,
        _actor: &Principal,
        current: ChildProfile,
        patch: UpdateChildProfileRequest,
    ) -> Result<ChildProfile, AppError> {
        info!("Updating child profile: {}", current.id);

        let mut child = current;
        if let Some(name) = patch.name {
            child.name = name.trim().to_string();
        }
        if let Some(age) = patch.age {
            child.age = age;
        }
        Self::validate(&child.name, child.age)?;

        child.updated_at = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            UPDATE child_profiles
            SET name = ?, age = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&child.name)
        .bind(child.age)
        .bind(&child.updated_at)
        .bind(child.id)
        .execute(self.db.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }

        Ok(child)
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        info!("Deleting child profile: {}", id);
        let result = sqlx::query("DELETE FROM child_profiles WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn child_from_row(row: &SqliteRow) -> Result<ChildProfile> {
    Ok(ChildProfile {
        id: row.try_get("id")?,
        owner: row.try_get("owner_id")?,
        name: row.try_get("name")?,
        age: row.try_get("age")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ListScope;
    use crate::storage::user_repository::UserRepository;
    use shared::{CreateUserProfileRequest, Role};

    struct Fixture {
        children: ChildRepository,
        users: UserRepository,
        parent: Principal,
    }

    async fn setup_test() -> Fixture {
        let db = DbConnection::init_test().await.expect("Failed to create test database");
        let users = UserRepository::new(db.clone());
        users
            .ensure_admin("root", "root@example.com", "password123")
            .await
            .unwrap();
        let admin = users.find_credentials("root").await.unwrap().unwrap().principal;
        let profile = users
            .create(
                &admin,
                CreateUserProfileRequest {
                    username: "parent_a".to_string(),
                    email: "a@example.com".to_string(),
                    role: Role::Parent,
                    password: None,
                },
            )
            .await
            .unwrap();

        Fixture {
            children: ChildRepository::new(db),
            users,
            parent: Principal {
                id: profile.id,
                username: profile.username,
                role: Role::Parent,
            },
        }
    }

    fn child(name: &str, age: i64) -> CreateChildProfileRequest {
        CreateChildProfileRequest {
            name: name.to_string(),
            age,
        }
    }

    #[tokio::test]
    async fn test_create_and_get_child() {
        let f = setup_test().await;

        let created = f
            .children
            .create(&f.parent, child("Child 1", 5))
            .await
            .expect("Failed to create child");
        assert_eq!(created.owner, f.parent.id);

        let fetched = f.children.get(created.id).await.unwrap();
        assert_eq!(fetched, Some(created));
    }

    #[tokio::test]
    async fn test_age_bounds() {
        let f = setup_test().await;

        for age in [0, 18] {
            f.children
                .create(&f.parent, child("Edge", age))
                .await
                .expect("Boundary age should be accepted");
        }
        for age in [-1, 19] {
            let err = f.children.create(&f.parent, child("Edge", age)).await.unwrap_err();
            assert!(matches!(err, AppError::Validation(ref e) if e.contains("age")));
        }
    }

    #[tokio::test]
    async fn test_patch_validates_merged_record() {
        let f = setup_test().await;
        let created = f.children.create(&f.parent, child("Child 1", 5)).await.unwrap();

        let err = f
            .children
            .update(
                &f.parent,
                created.clone(),
                UpdateChildProfileRequest {
                    name: Some("  ".to_string()),
                    age: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(ref e) if e.contains("name")));

        let updated = f
            .children
            .update(
                &f.parent,
                created,
                UpdateChildProfileRequest {
                    name: None,
                    age: Some(6),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Child 1");
        assert_eq!(updated.age, 6);
    }

    #[tokio::test]
    async fn test_update_after_concurrent_delete() {
        let f = setup_test().await;
        let created = f.children.create(&f.parent, child("Child 1", 5)).await.unwrap();

        assert!(f.children.delete(created.id).await.unwrap());
        assert!(!f.children.delete(created.id).await.unwrap());

        let err = f
            .children
            .update(
                &f.parent,
                created,
                UpdateChildProfileRequest {
                    name: None,
                    age: Some(6),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound));
    }

    #[tokio::test]
    async fn test_children_deleted_with_owner() {
        let f = setup_test().await;
        let created = f.children.create(&f.parent, child("Child 1", 5)).await.unwrap();

        assert!(f.users.delete(f.parent.id).await.unwrap());
        assert_eq!(f.children.get(created.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_scoped_to_owner() {
        let f = setup_test().await;
        f.children.create(&f.parent, child("Mine", 4)).await.unwrap();

        let query = ListQuery {
            scope: ListScope::OwnedBy(f.parent.id + 100),
            search: None,
            limit: 10,
            offset: 0,
        };
        let (count, children) = f.children.list(&query).await.unwrap();
        assert_eq!(count, 0);
        assert!(children.is_empty());

        let query = ListQuery {
            scope: ListScope::OwnedBy(f.parent.id),
            ..query
        };
        let (count, _) = f.children.list(&query).await.unwrap();
        assert_eq!(count, 1);
    }
}
