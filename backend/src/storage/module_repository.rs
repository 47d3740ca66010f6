//! Learning modules. The three variants share one table layout (title,
//! description, one variant column, a resource link table), so a single
//! generic repository serves all of them; [`ModuleDetail`] supplies the
//! variant-specific parts.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    CreateModuleRequest, LearningModule, MathDetail, MathDetailPatch, PhoneticsDetail,
    PhoneticsDetailPatch, StemDetail, StemDetailPatch, UpdateModuleRequest,
};
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqliteConnection};
use std::collections::{BTreeSet, HashMap};
use std::marker::PhantomData;
use tracing::info;

use crate::domain::validation::{self, FieldErrors, DIFFICULTY_RANGE, TITLE_MAX_LEN};
use crate::domain::{EntityKind, Ownership, Principal};
use crate::error::AppError;
use crate::storage::connection::DbConnection;
use crate::storage::traits::{push_list_filters, ListQuery, Repository};

/// Value stored in a variant's extra column
#[derive(Debug, Clone, PartialEq)]
pub enum DetailValue {
    Text(Option<String>),
    Integer(Option<i64>),
}

/// Variant-specific half of a learning module
pub trait ModuleDetail:
    Serialize + DeserializeOwned + Clone + Send + Sync + 'static
{
    type Patch: DeserializeOwned + From<Self> + Send + 'static;

    const KIND: EntityKind;
    const TABLE: &'static str;
    const LINK_TABLE: &'static str;
    const COLUMN: &'static str;

    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error>;
    fn column_value(&self) -> DetailValue;
    fn apply(&mut self, patch: Self::Patch);
    fn validate(&self, errors: &mut FieldErrors);
}

impl ModuleDetail for PhoneticsDetail {
    type Patch = PhoneticsDetailPatch;

    const KIND: EntityKind = EntityKind::PhoneticsModule;
    const TABLE: &'static str = "phonetics_modules";
    const LINK_TABLE: &'static str = "phonetics_module_resources";
    const COLUMN: &'static str = "audio_file";

    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            audio_file: row.try_get(Self::COLUMN)?,
        })
    }

    fn column_value(&self) -> DetailValue {
        DetailValue::Text(self.audio_file.clone())
    }

    fn apply(&mut self, patch: PhoneticsDetailPatch) {
        if let Some(audio_file) = patch.audio_file {
            self.audio_file = audio_file.map(|a| a.trim().to_string()).filter(|a| !a.is_empty());
        }
    }

    fn validate(&self, errors: &mut FieldErrors) {
        validation::optional_text(errors, Self::COLUMN, self.audio_file.as_deref(), TITLE_MAX_LEN);
    }
}

impl ModuleDetail for MathDetail {
    type Patch = MathDetailPatch;

    const KIND: EntityKind = EntityKind::MathModule;
    const TABLE: &'static str = "math_modules";
    const LINK_TABLE: &'static str = "math_module_resources";
    const COLUMN: &'static str = "difficulty_level";

    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            difficulty_level: row.try_get(Self::COLUMN)?,
        })
    }

    fn column_value(&self) -> DetailValue {
        DetailValue::Integer(self.difficulty_level)
    }

    fn apply(&mut self, patch: MathDetailPatch) {
        if let Some(difficulty_level) = patch.difficulty_level {
            self.difficulty_level = difficulty_level;
        }
    }

    fn validate(&self, errors: &mut FieldErrors) {
        if let Some(level) = self.difficulty_level {
            validation::range(errors, Self::COLUMN, level, DIFFICULTY_RANGE);
        }
    }
}

impl ModuleDetail for StemDetail {
    type Patch = StemDetailPatch;

    const KIND: EntityKind = EntityKind::StemModule;
    const TABLE: &'static str = "stem_modules";
    const LINK_TABLE: &'static str = "stem_module_resources";
    const COLUMN: &'static str = "video_url";

    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            video_url: row.try_get(Self::COLUMN)?,
        })
    }

    fn column_value(&self) -> DetailValue {
        DetailValue::Text(self.video_url.clone())
    }

    fn apply(&mut self, patch: StemDetailPatch) {
        if let Some(video_url) = patch.video_url {
            self.video_url = video_url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty());
        }
    }

    fn validate(&self, errors: &mut FieldErrors) {
        if let Some(url) = &self.video_url {
            validation::http_url(errors, Self::COLUMN, url);
        }
    }
}

pub type PhoneticsRepository = ModuleRepository<PhoneticsDetail>;
pub type MathRepository = ModuleRepository<MathDetail>;
pub type StemRepository = ModuleRepository<StemDetail>;

/// Repository for one learning-module variant
pub struct ModuleRepository<D> {
    db: DbConnection,
    _detail: PhantomData<fn() -> D>,
}

// Manual impl: deriving would require `D: Clone` on the marker
impl<D> Clone for ModuleRepository<D> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            _detail: PhantomData,
        }
    }
}

impl<D: ModuleDetail> ModuleRepository<D> {
    pub fn new(db: DbConnection) -> Self {
        Self {
            db,
            _detail: PhantomData,
        }
    }

    fn columns() -> String {
        format!("id, title, description, {}, created_at, updated_at", D::COLUMN)
    }

    fn validate(module: &LearningModule<D>) -> FieldErrors {
        let mut errors = FieldErrors::new();
        validation::text(&mut errors, "title", &module.title, TITLE_MAX_LEN);
        validation::required(&mut errors, "description", &module.description);
        module.detail.validate(&mut errors);
        errors
    }

    /// Sorted, de-duplicated ids; unknown ids are reported on `resources`
    async fn check_resources(&self, errors: &mut FieldErrors, ids: &[i64]) -> Result<Vec<i64>> {
        let wanted: BTreeSet<i64> = ids.iter().copied().collect();
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new("SELECT id FROM resources WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in &wanted {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
        let found: BTreeSet<i64> = builder
            .build_query_scalar::<i64>()
            .fetch_all(self.db.pool())
            .await?
            .into_iter()
            .collect();

        for missing in wanted.difference(&found) {
            errors.add(
                "resources",
                format!("Invalid pk \"{}\" - object does not exist.", missing),
            );
        }
        Ok(wanted.into_iter().collect())
    }

    async fn replace_links(conn: &mut SqliteConnection, module_id: i64, resources: &[i64]) -> Result<()> {
        let delete = format!("DELETE FROM {} WHERE module_id = ?", D::LINK_TABLE);
        sqlx::query(&delete).bind(module_id).execute(&mut *conn).await?;

        let insert = format!(
            "INSERT INTO {} (module_id, resource_id) VALUES (?, ?)",
            D::LINK_TABLE
        );
        for resource_id in resources {
            sqlx::query(&insert)
                .bind(module_id)
                .bind(resource_id)
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }

    /// Resource ids per module for the given modules
    async fn load_links(&self, module_ids: &[i64]) -> Result<HashMap<i64, Vec<i64>>> {
        let mut links: HashMap<i64, Vec<i64>> = HashMap::new();
        if module_ids.is_empty() {
            return Ok(links);
        }

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT module_id, resource_id FROM {} WHERE module_id IN (",
            D::LINK_TABLE
        ));
        let mut separated = builder.separated(", ");
        for id in module_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") ORDER BY resource_id");

        for row in builder.build().fetch_all(self.db.pool()).await? {
            let module_id: i64 = row.try_get("module_id")?;
            links.entry(module_id).or_default().push(row.try_get("resource_id")?);
        }
        Ok(links)
    }

    /// Insert or update the module row and its links in one transaction.
    /// `None` when the row to update no longer exists.
    async fn write(&self, module: &LearningModule<D>, insert: bool) -> Result<Option<i64>> {
        let mut tx = self.db.pool().begin().await?;

        let sql = if insert {
            format!(
                "INSERT INTO {} (title, description, {}, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
                D::TABLE,
                D::COLUMN
            )
        } else {
            format!(
                "UPDATE {} SET title = ?, description = ?, {} = ?, created_at = ?, updated_at = ? WHERE id = ?",
                D::TABLE,
                D::COLUMN
            )
        };

        let query = sqlx::query(&sql)
            .bind(&module.title)
            .bind(&module.description);
        let query = match module.detail.column_value() {
            DetailValue::Text(value) => query.bind(value),
            DetailValue::Integer(value) => query.bind(value),
        };
        let query = query.bind(&module.created_at).bind(&module.updated_at);
        let query = if insert { query } else { query.bind(module.id) };

        let result = query.execute(&mut *tx).await?;
        let id = if insert {
            result.last_insert_rowid()
        } else if result.rows_affected() == 0 {
            return Ok(None);
        } else {
            module.id
        };

        Self::replace_links(&mut tx, id, &module.resources).await?;
        tx.commit().await?;
        Ok(Some(id))
    }
}

fn module_from_row<D: ModuleDetail>(row: &SqliteRow) -> Result<LearningModule<D>> {
    Ok(LearningModule {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        detail: D::from_row(row)?,
        resources: Vec::new(),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl<D: ModuleDetail> Repository for ModuleRepository<D> {
    type Record = LearningModule<D>;
    type Create = CreateModuleRequest<D>;
    type Patch = UpdateModuleRequest<D::Patch>;

    const KIND: EntityKind = D::KIND;

    fn ownership(_record: &LearningModule<D>) -> Option<Ownership> {
        None
    }

    async fn list(&self, query: &ListQuery) -> Result<(i64, Vec<LearningModule<D>>)> {
        let mut count = QueryBuilder::<Sqlite>::new(format!("SELECT COUNT(*) FROM {}", D::TABLE));
        push_list_filters(&mut count, query, &[], "title");
        let total = count.build_query_scalar::<i64>().fetch_one(self.db.pool()).await?;

        let mut select =
            QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM {}", Self::columns(), D::TABLE));
        push_list_filters(&mut select, query, &[], "title");
        select
            .push(" ORDER BY id LIMIT ")
            .push_bind(query.limit)
            .push(" OFFSET ")
            .push_bind(query.offset);
        let rows = select.build().fetch_all(self.db.pool()).await?;

        let mut modules = rows
            .iter()
            .map(module_from_row::<D>)
            .collect::<Result<Vec<_>>>()?;
        let ids: Vec<i64> = modules.iter().map(|m| m.id).collect();
        let mut links = self.load_links(&ids).await?;
        for module in &mut modules {
            module.resources = links.remove(&module.id).unwrap_or_default();
        }

        Ok((total, modules))
    }

    async fn get(&self, id: i64) -> Result<Option<LearningModule<D>>> {
        let sql = format!("SELECT {} FROM {} WHERE id = ?", Self::columns(), D::TABLE);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut module = module_from_row::<D>(&row)?;
        module.resources = self.load_links(&[id]).await?.remove(&id).unwrap_or_default();
        Ok(Some(module))
    }

    async fn create(
        &self,
        _actor: &Principal,
        input: CreateModuleRequest<D>,
    ) -> Result<LearningModule<D>, AppError> {
        info!("Creating {}: title={}", D::KIND, input.title);

        let now = Utc::now().to_rfc3339();
        let mut module = LearningModule {
            id: 0,
            title: input.title.trim().to_string(),
            description: input.description,
            detail: input.detail.clone(),
            resources: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
        };
        // Route the detail through `apply` so create and update normalise alike
        module.detail.apply(D::Patch::from(input.detail));

        let mut errors = Self::validate(&module);
        module.resources = self.check_resources(&mut errors, &input.resources).await?;
        errors.into_result()?;

        module.id = self
            .write(&module, true)
            .await?
            .ok_or_else(|| anyhow!("insert into {} returned no row", D::TABLE))?;
        info!("Created {}: {} with ID: {}", D::KIND, module.title, module.id);
        Ok(module)
    }

    async fn update(
        &self,
        _actor: &Principal,
        current: LearningModule<D>,
        patch: UpdateModuleRequest<D::Patch>,
    ) -> Result<LearningModule<D>, AppError> {
        info!("Updating {}: {}", D::KIND, current.id);

        let mut module = current;
        if let Some(title) = patch.title {
            module.title = title.trim().to_string();
        }
        if let Some(description) = patch.description {
            module.description = description;
        }
        module.detail.apply(patch.detail);

        let mut errors = Self::validate(&module);
        if let Some(resources) = patch.resources {
            module.resources = self.check_resources(&mut errors, &resources).await?;
        }
        errors.into_result()?;

        module.updated_at = Utc::now().to_rfc3339();
        self.write(&module, false).await?.ok_or(AppError::NotFound)?;
        Ok(module)
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        info!("Deleting {}: {}", D::KIND, id);
        let sql = format!("DELETE FROM {} WHERE id = ?", D::TABLE);
        let result = sqlx::query(&sql).bind(id).execute(self.db.pool()).await?;
        Ok(result.rows_affected() > 0)
    }
}
