//! # Storage Module
//!
//! SQLite persistence through SQLx. One repository per entity type, all
//! sharing a single [`DbConnection`] pool. Repositories own validation of
//! the records they write and report field errors before touching a row;
//! the schema's UNIQUE, CHECK and foreign-key constraints back them up.
//!
//! Deleting a user profile cascades to its children and token. Deleting a
//! resource or module removes its link rows.

pub mod child_repository;
pub mod connection;
pub mod module_repository;
pub mod resource_repository;
pub mod token_repository;
pub mod traits;
pub mod user_repository;

pub use child_repository::ChildRepository;
pub use connection::DbConnection;
pub use module_repository::{
    MathRepository, ModuleDetail, ModuleRepository, PhoneticsRepository, StemRepository,
};
pub use resource_repository::ResourceRepository;
pub use token_repository::TokenRepository;
pub use traits::{ListQuery, Repository};
pub use user_repository::{Credentials, UserRepository};
