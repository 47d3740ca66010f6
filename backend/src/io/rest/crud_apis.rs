//! # Generic CRUD Endpoints
//!
//! One handler set serves every entity collection. Each handler
//! authenticates the caller, asks the [`AccessPolicy`] for a decision and
//! only then touches the repository.
//!
//! ```text
//! GET    /{collection}/       list (paged, scoped)
//! POST   /{collection}/       create
//! GET    /{collection}/{id}/  retrieve
//! PUT    /{collection}/{id}/  full update
//! PATCH  /{collection}/{id}/  partial update
//! DELETE /{collection}/{id}/  delete
//! ```

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRef, OriginalUri, Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tracing::{info, warn};

use super::auth::{Authenticator, Caller};
use super::pagination::{ListParams, Paging};
use crate::domain::{AccessPolicy, Decision, ListScope, Operation, Principal, Target};
use crate::error::AppError;
use crate::storage::{ListQuery, Repository};

/// Request-independent collaborators every collection shares
#[derive(Clone)]
pub struct ApiContext {
    pub authenticator: Authenticator,
    pub policy: AccessPolicy,
    pub paging: Paging,
}

#[derive(Clone)]
pub struct CrudState<R> {
    repo: R,
    context: ApiContext,
}

impl<R> FromRef<CrudState<R>> for Authenticator {
    fn from_ref(state: &CrudState<R>) -> Self {
        state.context.authenticator.clone()
    }
}

/// Routes for one collection, e.g. `crud_routes("/resources", repo, ctx)`
pub fn crud_routes<R: Repository>(base: &str, repo: R, context: ApiContext) -> Router {
    Router::new()
        .route(
            &format!("{}/", base),
            get(list_records::<R>).post(create_record::<R>),
        )
        .route(
            &format!("{}/:id/", base),
            get(retrieve_record::<R>)
                .put(replace_record::<R>)
                .patch(update_record::<R>)
                .delete(delete_record::<R>),
        )
        .with_state(CrudState { repo, context })
}

fn check<R: Repository>(
    context: &ApiContext,
    caller: Option<&Principal>,
    operation: Operation,
    target: Target,
) -> Result<(), AppError> {
    match context.policy.authorize(caller, operation, &target) {
        Decision::Allow => Ok(()),
        Decision::Deny(reason) => {
            warn!(
                "Denied {:?} on {} for {}: {}",
                operation,
                R::KIND,
                caller.map_or("anonymous", |p| p.username.as_str()),
                reason.as_str()
            );
            Err(reason.into())
        }
    }
}

/// The caller is authenticated before the record is looked up, so anonymous
/// requests never learn whether an id exists.
async fn authorized_record<R: Repository>(
    state: &CrudState<R>,
    caller: Option<&Principal>,
    operation: Operation,
    raw_id: &str,
) -> Result<R::Record, AppError> {
    check::<R>(&state.context, caller, operation, Target::Collection(R::KIND))?;

    let id: i64 = raw_id.parse().map_err(|_| AppError::NotFound)?;
    let record = state.repo.get(id).await?.ok_or(AppError::NotFound)?;

    let target = Target::Record {
        kind: R::KIND,
        ownership: R::ownership(&record),
    };
    check::<R>(&state.context, caller, operation, target)?;
    Ok(record)
}

fn authenticated(caller: Option<Principal>) -> Result<Principal, AppError> {
    caller.ok_or(AppError::Unauthenticated)
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

pub async fn list_records<R: Repository>(
    State(state): State<CrudState<R>>,
    Caller(caller): Caller,
    OriginalUri(uri): OriginalUri,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Query(params) = params.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    info!("GET {} - {:?}", uri.path(), params);

    check::<R>(&state.context, caller.as_ref(), Operation::List, Target::Collection(R::KIND))?;

    let scope = match &caller {
        Some(principal) => state.context.policy.list_scope(principal, R::KIND),
        None => ListScope::All,
    };
    let paging = state.context.paging;
    let window = paging.window(&params)?;
    let query = ListQuery {
        scope,
        search: params.search.clone().filter(|s| !s.is_empty()),
        limit: window.size,
        offset: window.offset,
    };

    let (count, results) = state.repo.list(&query).await?;
    let page = paging.page(uri.path(), &params, window, count, results)?;
    Ok((StatusCode::OK, Json(page)))
}

pub async fn create_record<R: Repository>(
    State(state): State<CrudState<R>>,
    Caller(caller): Caller,
    payload: Result<Json<R::Create>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    info!("POST {} collection", R::KIND);

    check::<R>(&state.context, caller.as_ref(), Operation::Create, Target::Collection(R::KIND))?;
    let actor = authenticated(caller)?;
    let input = json_body(payload)?;

    let record = state.repo.create(&actor, input).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn retrieve_record<R: Repository>(
    State(state): State<CrudState<R>>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    info!("GET {} {}", R::KIND, id);

    let record = authorized_record(&state, caller.as_ref(), Operation::Retrieve, &id).await?;
    Ok((StatusCode::OK, Json(record)))
}

async fn apply_update<R: Repository>(
    state: CrudState<R>,
    caller: Option<Principal>,
    id: &str,
    patch: Result<R::Patch, AppError>,
) -> Result<impl IntoResponse, AppError> {
    let current = authorized_record(&state, caller.as_ref(), Operation::Update, id).await?;
    let actor = authenticated(caller)?;
    let patch = patch?;

    let record = state.repo.update(&actor, current, patch).await?;
    Ok((StatusCode::OK, Json(record)))
}

pub async fn replace_record<R: Repository>(
    State(state): State<CrudState<R>>,
    Caller(caller): Caller,
    Path(id): Path<String>,
    payload: Result<Json<R::Create>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    info!("PUT {} {}", R::KIND, id);

    let patch = json_body(payload).map(R::Patch::from);
    apply_update(state, caller, &id, patch).await
}

pub async fn update_record<R: Repository>(
    State(state): State<CrudState<R>>,
    Caller(caller): Caller,
    Path(id): Path<String>,
    payload: Result<Json<R::Patch>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    info!("PATCH {} {}", R::KIND, id);

    apply_update(state, caller, &id, json_body(payload)).await
}

pub async fn delete_record<R: Repository>(
    State(state): State<CrudState<R>>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    info!("DELETE {} {}", R::KIND, id);

    let record = authorized_record(&state, caller.as_ref(), Operation::Delete, &id).await?;
    let key: i64 = id.parse().map_err(|_| AppError::NotFound)?;
    if !state.repo.delete(key).await? {
        return Err(AppError::NotFound);
    }
    Ok((StatusCode::OK, Json(record)))
}
