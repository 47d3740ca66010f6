//! # REST API Interface Layer
//!
//! HTTP endpoints for the early childhood content platform.
//!
//! ## Key Responsibilities
//!
//! - **Authentication**: resolving `Authorization` tokens to principals
//! - **Authorization**: consulting the access policy before any store access
//! - **Serialization**: JSON request/response handling via the `shared` DTOs
//! - **Paging**: `page`/`page_size`/`search` query handling for list endpoints
//!
//! Every entity collection is served by the same generic handler set in
//! [`crud_apis`], instantiated once per repository type.

pub mod auth;
pub mod auth_apis;
pub mod crud_apis;
pub mod pagination;

pub use auth::{Authenticator, Caller};
pub use auth_apis::obtain_auth_token;
pub use crud_apis::{crud_routes, ApiContext};
pub use pagination::{ListParams, Paging};
