//! # Storage Traits
//!
//! The abstraction the generic REST handlers are written against. Each
//! entity type has one [`Repository`] implementation; the handlers never
//! know which table they are talking to.

use anyhow::Result;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{QueryBuilder, Sqlite};

use crate::domain::{EntityKind, ListScope, Ownership, Principal};
use crate::error::AppError;

/// One page worth of filtering, already narrowed by the access policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub scope: ListScope,
    /// Case-insensitive substring matched against the entity's search column
    pub search: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

/// Key-based CRUD over one entity type
#[async_trait]
pub trait Repository: Clone + Send + Sync + 'static {
    /// JSON representation returned to clients
    type Record: Serialize + Send + Sync + 'static;
    /// Full writable representation (POST and PUT bodies)
    type Create: DeserializeOwned + Send + 'static;
    /// Partial update (PATCH bodies); a PUT body converts into one
    type Patch: DeserializeOwned + From<Self::Create> + Send + 'static;

    const KIND: EntityKind;

    /// Owner relationship of a record, `None` for ownerless kinds
    fn ownership(record: &Self::Record) -> Option<Ownership>;

    /// Total matching count plus the requested window, ordered by id
    async fn list(&self, query: &ListQuery) -> Result<(i64, Vec<Self::Record>)>;

    async fn get(&self, id: i64) -> Result<Option<Self::Record>>;

    /// Validate and insert. `actor` becomes the owner of owned kinds.
    async fn create(&self, actor: &Principal, input: Self::Create)
        -> Result<Self::Record, AppError>;

    /// Merge `patch` into `current`, validate the result and store it
    async fn update(
        &self,
        actor: &Principal,
        current: Self::Record,
        patch: Self::Patch,
    ) -> Result<Self::Record, AppError>;

    /// Returns true if a record was deleted
    async fn delete(&self, id: i64) -> Result<bool>;
}

/// Appends the WHERE clause shared by every list query.
///
/// `owner_columns` are OR-ed together when the scope is narrowed to one
/// owner; `search_column` is matched case-insensitively.
pub(crate) fn push_list_filters(
    builder: &mut QueryBuilder<'_, Sqlite>,
    query: &ListQuery,
    owner_columns: &[&str],
    search_column: &str,
) {
    builder.push(" WHERE 1 = 1");

    if let (ListScope::OwnedBy(owner), false) = (query.scope, owner_columns.is_empty()) {
        builder.push(" AND (");
        for (i, column) in owner_columns.iter().enumerate() {
            if i > 0 {
                builder.push(" OR ");
            }
            builder.push(*column).push(" = ").push_bind(owner);
        }
        builder.push(")");
    }

    if let Some(search) = query.search.as_ref().filter(|s| !s.trim().is_empty()) {
        builder
            .push(" AND instr(lower(")
            .push(search_column)
            .push("), lower(")
            .push_bind(search.trim().to_string())
            .push(")) > 0");
    }
}
