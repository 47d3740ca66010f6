//! # Domain Module
//!
//! Business rules that do not depend on HTTP or SQL:
//!
//! - **policy**: the access policy deciding who may touch which record
//! - **validation**: field-level constraints shared by every entity
//! - **password**: credential hashing for the token exchange

pub mod password;
pub mod policy;
pub mod validation;

pub use policy::{
    may_assign_role, AccessPolicy, Decision, DenyReason, EntityKind, ExistencePolicy, ListScope,
    Operation, Ownership, Principal, Target,
};
pub use validation::FieldErrors;
