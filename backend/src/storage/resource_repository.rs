use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use shared::{CreateResourceRequest, Resource, UpdateResourceRequest};
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite};
use tracing::info;

use crate::domain::validation::{self, FieldErrors, TITLE_MAX_LEN};
use crate::domain::{EntityKind, Ownership, Principal};
use crate::error::AppError;
use crate::storage::connection::DbConnection;
use crate::storage::traits::{push_list_filters, ListQuery, Repository};

const COLUMNS: &str = "id, title, description, content_url, created_at, updated_at";

/// Repository for educational resources
#[derive(Clone)]
pub struct ResourceRepository {
    db: DbConnection,
}

impl ResourceRepository {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }

    fn validate(resource: &Resource) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        validation::text(&mut errors, "title", &resource.title, TITLE_MAX_LEN);
        validation::required(&mut errors, "description", &resource.description);
        validation::http_url(&mut errors, "content_url", &resource.content_url);
        errors.into_result()
    }
}

#[async_trait]
impl Repository for ResourceRepository {
    type Record = Resource;
    type Create = CreateResourceRequest;
    type Patch = UpdateResourceRequest;

    const KIND: EntityKind = EntityKind::Resource;

    fn ownership(_record: &Resource) -> Option<Ownership> {
        None
    }

    async fn list(&self, query: &ListQuery) -> Result<(i64, Vec<Resource>)> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM resources");
        push_list_filters(&mut count, query, &[], "title");
        let total = count.build_query_scalar::<i64>().fetch_one(self.db.pool()).await?;

        let mut select = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM resources", COLUMNS));
        push_list_filters(&mut select, query, &[], "title");
        select
            .push(" ORDER BY id LIMIT ")
            .push_bind(query.limit)
            .push(" OFFSET ")
            .push_bind(query.offset);
        let rows = select.build().fetch_all(self.db.pool()).await?;

        let resources = rows.iter().map(resource_from_row).collect::<Result<Vec<_>>>()?;
        Ok((total, resources))
    }

    async fn get(&self, id: i64) -> Result<Option<Resource>> {
        let sql = format!("SELECT {} FROM resources WHERE id = ?", COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        row.as_ref().map(resource_from_row).transpose()
    }

    async fn create(
        &self,
        _actor: &Principal,
        input: CreateResourceRequest,
    ) -> Result<Resource, AppError> {
        info!("Creating resource: title={}", input.title);

        let now = Utc::now().to_rfc3339();
        let mut resource = Resource {
            id: 0,
            title: input.title.trim().to_string(),
            description: input.description,
            content_url: input.content_url.trim().to_string(),
            created_at: now.clone(),
            updated_at: now,
        };
        Self::validate(&resource)?;

        let result = sqlx::query(
            r#"
            INSERT INTO resources (title, description, content_url, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&resource.title)
        .bind(&resource.description)
        .bind(&resource.content_url)
        .bind(&resource.created_at)
        .bind(&resource.updated_at)
        .execute(self.db.pool())
        .await?;

        resource.id = result.last_insert_rowid();
        info!("Created resource: {} with ID: {}", resource.title, resource.id);
        Ok(resource)
    }

    async fn update(
        &self,
        _actor: &Principal,
        current: Resource,
        patch: UpdateResourceRequest,
    ) -> Result<Resource, AppError> {
        info!("Updating resource: {}", current.id);

        let mut resource = current;
        if let Some(title) = patch.title {
            resource.title = title.trim().to_string();
        }
        if let Some(description) = patch.description {
            resource.description = description;
        }
        if let Some(content_url) = patch.content_url {
            resource.content_url = content_url.trim().to_string();
        }
        Self::validate(&resource)?;

        resource.updated_at = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            UPDATE resources
            SET title = ?, description = ?, content_url = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&resource.title)
        .bind(&resource.description)
        .bind(&resource.content_url)
        .bind(&resource.updated_at)
        .bind(resource.id)
        .execute(self.db.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }

        Ok(resource)
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        info!("Deleting resource: {}", id);
        let result = sqlx::query("DELETE FROM resources WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn resource_from_row(row: &SqliteRow) -> Result<Resource> {
    Ok(Resource {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        content_url: row.try_get("content_url")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
