//! # Early Child API Backend
//!
//! REST backend for an early childhood education platform: user and child
//! profiles plus phonetics, math and STEM learning modules built from shared
//! resources.
//!
//! ## Architecture
//!
//! ```text
//! IO Layer (REST handlers, token authentication)
//!     ↓
//! Domain Layer (access policy, validation, passwords)
//!     ↓
//! Storage Layer (SQLite repositories)
//! ```
//!
//! Every request is authenticated, then checked by the
//! [`AccessPolicy`](domain::AccessPolicy), then handed to a repository.

pub mod config;
pub mod domain;
pub mod error;
pub mod io;
pub mod storage;

use anyhow::{Context, Result};
use axum::{
    http::{HeaderValue, Method},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use shared::WelcomeResponse;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::domain::AccessPolicy;
use crate::io::{crud_routes, obtain_auth_token, ApiContext, Authenticator, Paging};
use crate::storage::{
    ChildRepository, DbConnection, MathRepository, PhoneticsRepository, ResourceRepository,
    StemRepository, TokenRepository, UserRepository,
};

/// Main application state that holds every repository and request collaborator
#[derive(Clone)]
pub struct AppState {
    pub users: UserRepository,
    pub children: ChildRepository,
    pub resources: ResourceRepository,
    pub phonetics: PhoneticsRepository,
    pub maths: MathRepository,
    pub stems: StemRepository,
    pub authenticator: Authenticator,
    pub policy: AccessPolicy,
    pub paging: Paging,
}

impl AppState {
    pub fn new(db: DbConnection, config: &Config) -> Self {
        let users = UserRepository::new(db.clone());
        Self {
            authenticator: Authenticator::new(TokenRepository::new(db.clone()), users.clone()),
            users,
            children: ChildRepository::new(db.clone()),
            resources: ResourceRepository::new(db.clone()),
            phonetics: PhoneticsRepository::new(db.clone()),
            maths: MathRepository::new(db.clone()),
            stems: StemRepository::new(db),
            policy: AccessPolicy::new(config.existence),
            paging: Paging {
                page_size: config.page_size,
                max_page_size: config.max_page_size,
            },
        }
    }

    fn context(&self) -> ApiContext {
        ApiContext {
            authenticator: self.authenticator.clone(),
            policy: self.policy,
            paging: self.paging,
        }
    }
}

/// Initialize the backend: open the database, build the state and seed the
/// bootstrap admin if one is configured
pub async fn initialize_backend(config: &Config) -> Result<AppState> {
    info!("Setting up database at {}", config.database_url);
    let db = DbConnection::new(&config.database_url, config.database_max_connections).await?;

    info!("Setting up application state");
    let app_state = AppState::new(db, config);

    if let Some(admin) = &config.admin {
        let created = app_state
            .users
            .ensure_admin(&admin.username, &admin.email, &admin.password)
            .await
            .context("failed to create bootstrap admin")?;
        if !created {
            info!("Bootstrap admin '{}' already exists", admin.username);
        }
    }

    Ok(app_state)
}

/// Create the Axum router with all routes configured
pub fn create_router(app_state: AppState, config: &Config) -> Result<Router> {
    let origin = config
        .cors_origin
        .parse::<HeaderValue>()
        .with_context(|| format!("invalid CORS origin {:?}", config.cors_origin))?;

    // CORS setup to allow the frontend to make requests
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers(Any);

    let context = app_state.context();
    let api_routes = Router::new()
        .route("/auth-token/", post(obtain_auth_token))
        .with_state(app_state.authenticator.clone())
        .merge(crud_routes("/user-profiles", app_state.users, context.clone()))
        .merge(crud_routes("/child-profiles", app_state.children, context.clone()))
        .merge(crud_routes("/resources", app_state.resources, context.clone()))
        .merge(crud_routes("/phonetics-modules", app_state.phonetics, context.clone()))
        .merge(crud_routes("/math-modules", app_state.maths, context.clone()))
        .merge(crud_routes("/stem-modules", app_state.stems, context));

    Ok(Router::new()
        .route("/", get(homepage))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors))
}

async fn homepage() -> impl IntoResponse {
    Json(WelcomeResponse {
        message: "Welcome to the Early Child API. Go to /api/resources/ to interact with the API."
            .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExistencePolicy;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const ADMIN_PASSWORD: &str = "admin-pass-1";

    async fn test_app(existence: ExistencePolicy) -> Router {
        let db = DbConnection::init_test().await.expect("test db");
        let config = Config {
            existence,
            page_size: 2,
            max_page_size: 3,
            ..Config::default()
        };
        let state = AppState::new(db, &config);
        state
            .users
            .ensure_admin("admin", "admin@example.com", ADMIN_PASSWORD)
            .await
            .expect("seed admin");
        create_router(state, &config).expect("router")
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .expect("request");

        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn login(app: &Router, username: &str, password: &str) -> String {
        let (status, body) = send(
            app,
            Method::POST,
            "/api/auth-token/",
            None,
            Some(json!({ "username": username, "password": password })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        body["token"].as_str().expect("token").to_string()
    }

    /// Creates a parent as admin and returns (id, token)
    async fn parent(app: &Router, admin: &str, username: &str) -> (i64, String) {
        let (status, body) = send(
            app,
            Method::POST,
            "/api/user-profiles/",
            Some(admin),
            Some(json!({
                "username": username,
                "email": format!("{}@example.com", username),
                "role": "parent",
                "password": "parent-pass-1",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        let id = body["id"].as_i64().expect("id");
        (id, login(app, username, "parent-pass-1").await)
    }

    #[tokio::test]
    async fn test_homepage() {
        let app = test_app(ExistencePolicy::Conceal).await;
        let (status, body) = send(&app, Method::GET, "/", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["message"].as_str().expect("message").contains("/api/resources/"));
    }

    #[tokio::test]
    async fn test_child_delete_by_other_parent_and_admin() {
        let app = test_app(ExistencePolicy::Conceal).await;
        let admin = login(&app, "admin", ADMIN_PASSWORD).await;
        let (a_id, a) = parent(&app, &admin, "parent_a").await;
        let (_, b) = parent(&app, &admin, "parent_b").await;

        let (status, child) = send(
            &app,
            Method::POST,
            "/api/child-profiles/",
            Some(&a),
            Some(json!({ "name": "Child 1", "age": 5 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(child["owner"].as_i64(), Some(a_id));
        let uri = format!("/api/child-profiles/{}/", child["id"]);

        let (status, _) = send(&app, Method::DELETE, &uri, Some(&b), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, Method::DELETE, &uri, Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&app, Method::GET, &uri, Some(&a), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_disclose_mode_answers_forbidden() {
        let app = test_app(ExistencePolicy::Disclose).await;
        let admin = login(&app, "admin", ADMIN_PASSWORD).await;
        let (_, a) = parent(&app, &admin, "parent_a").await;
        let (_, b) = parent(&app, &admin, "parent_b").await;

        let (_, child) = send(
            &app,
            Method::POST,
            "/api/child-profiles/",
            Some(&a),
            Some(json!({ "name": "Child 1", "age": 5 })),
        )
        .await;
        let uri = format!("/api/child-profiles/{}/", child["id"]);

        let (status, _) = send(&app, Method::DELETE, &uri, Some(&b), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = send(
            &app,
            Method::PATCH,
            &uri,
            Some(&b),
            Some(json!({ "name": "Renamed" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_child_owner_binding_and_list_scope() {
        let app = test_app(ExistencePolicy::Conceal).await;
        let admin = login(&app, "admin", ADMIN_PASSWORD).await;
        let (a_id, a) = parent(&app, &admin, "parent_a").await;
        let (b_id, b) = parent(&app, &admin, "parent_b").await;

        let (status, child) = send(
            &app,
            Method::POST,
            "/api/child-profiles/",
            Some(&a),
            Some(json!({ "name": "Child 1", "age": 4, "owner": b_id })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(child["owner"].as_i64(), Some(a_id));

        let (_, mine) = send(&app, Method::GET, "/api/child-profiles/", Some(&a), None).await;
        assert_eq!(mine["count"], 1);
        let (_, theirs) = send(&app, Method::GET, "/api/child-profiles/", Some(&b), None).await;
        assert_eq!(theirs["count"], 0);
        let (_, all) = send(&app, Method::GET, "/api/child-profiles/", Some(&admin), None).await;
        assert_eq!(all["count"], 1);

        let (status, _) = send(&app, Method::GET, "/api/child-profiles/", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_anonymous_access_to_resources() {
        let app = test_app(ExistencePolicy::Conceal).await;

        let (status, body) = send(&app, Method::GET, "/api/resources/", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 0);

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/resources/",
            None,
            Some(json!({
                "title": "Alphabet song",
                "description": "Sing along",
                "content_url": "https://example.com/abc",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, Method::GET, "/api/resources/", Some("bogus"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let app = test_app(ExistencePolicy::Conceal).await;
        let admin = login(&app, "admin", ADMIN_PASSWORD).await;
        parent(&app, &admin, "parent_a").await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/user-profiles/",
            Some(&admin),
            Some(json!({
                "username": "someone_else",
                "email": "parent_a@example.com",
                "role": "teacher",
                "password": "teacher-pass-1",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.get("email").is_some(), "{}", body);

        let (_, list) = send(&app, Method::GET, "/api/user-profiles/", Some(&admin), None).await;
        assert_eq!(list["count"], 2);
    }

    #[tokio::test]
    async fn test_math_difficulty_bounds() {
        let app = test_app(ExistencePolicy::Conceal).await;
        let admin = login(&app, "admin", ADMIN_PASSWORD).await;
        let (_, a) = parent(&app, &admin, "parent_a").await;

        let module = |level: i64| {
            json!({
                "title": "Counting",
                "description": "Numbers to ten",
                "difficulty_level": level,
            })
        };

        for level in [0, 6] {
            let (status, body) =
                send(&app, Method::POST, "/api/math-modules/", Some(&a), Some(module(level))).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(body.get("difficulty_level").is_some());
        }
        let mut created = Vec::new();
        for level in [1, 5] {
            let (status, body) =
                send(&app, Method::POST, "/api/math-modules/", Some(&a), Some(module(level))).await;
            assert_eq!(status, StatusCode::CREATED);
            assert_eq!(body["difficulty_level"], level);
            created.push(body["id"].as_i64().expect("id"));
        }

        let uri = format!("/api/math-modules/{}/", created[0]);
        let (status, _) = send(
            &app,
            Method::PATCH,
            &uri,
            Some(&a),
            Some(json!({ "difficulty_level": 6 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, body) = send(
            &app,
            Method::PATCH,
            &uri,
            Some(&a),
            Some(json!({ "difficulty_level": null })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["difficulty_level"].is_null());
    }

    #[tokio::test]
    async fn test_module_links_and_put() {
        let app = test_app(ExistencePolicy::Conceal).await;
        let admin = login(&app, "admin", ADMIN_PASSWORD).await;

        let (_, resource) = send(
            &app,
            Method::POST,
            "/api/resources/",
            Some(&admin),
            Some(json!({
                "title": "Rocket video",
                "description": "Liftoff",
                "content_url": "https://example.com/rocket",
            })),
        )
        .await;
        let resource_id = resource["id"].as_i64().expect("id");

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/stem-modules/",
            Some(&admin),
            Some(json!({
                "title": "Space",
                "description": "Planets",
                "video_url": "ftp://example.com/space",
                "resources": [resource_id],
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.get("video_url").is_some());

        let (status, module) = send(
            &app,
            Method::POST,
            "/api/stem-modules/",
            Some(&admin),
            Some(json!({
                "title": "Space",
                "description": "Planets",
                "video_url": "https://example.com/space",
                "resources": [resource_id],
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(module["resources"], json!([resource_id]));

        let uri = format!("/api/stem-modules/{}/", module["id"]);
        let (status, body) = send(
            &app,
            Method::PUT,
            &uri,
            Some(&admin),
            Some(json!({ "title": "Space 2", "description": "Stars" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "Space 2");
        assert!(body["video_url"].is_null());
        assert_eq!(body["resources"], json!([]));

        let (status, _) = send(&app, Method::PUT, &uri, Some(&admin), Some(json!({ "title": "x" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, Method::GET, &uri, None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "Space 2");
    }

    #[tokio::test]
    async fn test_pagination() {
        let app = test_app(ExistencePolicy::Conceal).await;
        let admin = login(&app, "admin", ADMIN_PASSWORD).await;

        for title in ["Apples", "Bananas", "Cherries"] {
            let (status, _) = send(
                &app,
                Method::POST,
                "/api/resources/",
                Some(&admin),
                Some(json!({
                    "title": title,
                    "description": "Fruit",
                    "content_url": "http://example.com/fruit",
                })),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (status, page) = send(&app, Method::GET, "/api/resources/", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["count"], 3);
        assert_eq!(page["results"].as_array().expect("results").len(), 2);
        assert_eq!(page["next"], "/api/resources/?page=2");
        assert!(page["previous"].is_null());

        let (_, page) = send(&app, Method::GET, "/api/resources/?page=2", None, None).await;
        assert_eq!(page["results"].as_array().expect("results").len(), 1);
        assert!(page["next"].is_null());

        let (status, body) = send(&app, Method::GET, "/api/resources/?page=3", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Invalid page.");

        let (_, page) = send(&app, Method::GET, "/api/resources/?search=BAN", None, None).await;
        assert_eq!(page["count"], 1);
        assert_eq!(page["results"][0]["title"], "Bananas");
    }

    #[tokio::test]
    async fn test_page_parameter_edges() {
        let app = test_app(ExistencePolicy::Conceal).await;
        let admin = login(&app, "admin", ADMIN_PASSWORD).await;

        for n in 1..=4 {
            let (status, _) = send(
                &app,
                Method::POST,
                "/api/resources/",
                Some(&admin),
                Some(json!({
                    "title": format!("Story {}", n),
                    "description": "Bedtime",
                    "content_url": "https://example.com/story",
                })),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (status, page) =
            send(&app, Method::GET, "/api/resources/?page_size=500", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["results"].as_array().expect("results").len(), 3);
        assert_eq!(page["next"], "/api/resources/?page=2&page_size=3");

        let (status, body) = send(
            &app,
            Method::GET,
            "/api/resources/?page=9223372036854775807",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Invalid page.");

        let (status, _) = send(
            &app,
            Method::GET,
            "/api/resources/?page=9223372036854775807&page_size=1",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, Method::GET, "/api/resources/?page=0", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, Method::GET, "/api/resources/?page=two", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_passwordless_profile_cannot_log_in() {
        let app = test_app(ExistencePolicy::Conceal).await;
        let admin = login(&app, "admin", ADMIN_PASSWORD).await;

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/user-profiles/",
            Some(&admin),
            Some(json!({
                "username": "no_password",
                "email": "np@example.com",
                "role": "parent",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        for password in ["", "anything-1"] {
            let (status, body) = send(
                &app,
                Method::POST,
                "/api/auth-token/",
                None,
                Some(json!({ "username": "no_password", "password": password })),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(body.get("non_field_errors").is_some(), "{}", body);
        }
    }

    #[tokio::test]
    async fn test_creator_loses_control_of_promoted_profile() {
        let app = test_app(ExistencePolicy::Conceal).await;
        let admin = login(&app, "admin", ADMIN_PASSWORD).await;
        let (_, a) = parent(&app, &admin, "parent_a").await;

        let (status, helper) = send(
            &app,
            Method::POST,
            "/api/user-profiles/",
            Some(&a),
            Some(json!({
                "username": "helper",
                "email": "helper@example.com",
                "role": "teacher",
                "password": "helper-pass-1",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let uri = format!("/api/user-profiles/{}/", helper["id"]);

        let (status, promoted) =
            send(&app, Method::PATCH, &uri, Some(&admin), Some(json!({ "role": "admin" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(promoted["owner"].is_null());

        let (status, _) = send(
            &app,
            Method::PATCH,
            &uri,
            Some(&a),
            Some(json!({ "password": "stolen-pass-1" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/auth-token/",
            None,
            Some(json!({ "username": "helper", "password": "stolen-pass-1" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, mine) = send(&app, Method::GET, "/api/user-profiles/", Some(&a), None).await;
        assert_eq!(mine["count"], 1);
    }

    #[tokio::test]
    async fn test_routing_errors() {
        let app = test_app(ExistencePolicy::Conceal).await;
        let admin = login(&app, "admin", ADMIN_PASSWORD).await;

        let (status, _) = send(&app, Method::POST, "/api/resources/1/", Some(&admin), None).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

        let (status, _) = send(&app, Method::GET, "/api/resources/abc/", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, Method::GET, "/api/resources/99/", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_token_exchange_errors() {
        let app = test_app(ExistencePolicy::Conceal).await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/auth-token/",
            None,
            Some(json!({ "username": "admin", "password": "wrong" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.get("non_field_errors").is_some());

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/auth-token/",
            None,
            Some(json!({ "username": "admin" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_parent_cannot_grant_admin() {
        let app = test_app(ExistencePolicy::Conceal).await;
        let admin = login(&app, "admin", ADMIN_PASSWORD).await;
        let (a_id, a) = parent(&app, &admin, "parent_a").await;

        let uri = format!("/api/user-profiles/{}/", a_id);
        let (status, body) = send(&app, Method::PATCH, &uri, Some(&a), Some(json!({ "role": "admin" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.get("role").is_some());

        let (status, body) = send(&app, Method::PATCH, &uri, Some(&admin), Some(json!({ "role": "teacher" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["role"], "teacher");
    }
}
