//! # IO Module
//!
//! The interface layer between HTTP clients and the domain logic.
//!
//! Requests are authenticated, checked against the
//! [`AccessPolicy`](crate::domain::AccessPolicy) and only then handed to a
//! storage repository. Domain errors are translated into status codes by
//! [`AppError`](crate::error::AppError).

pub mod rest;

pub use rest::*;
