//! # Access Policy
//!
//! Decides whether a caller may perform an operation on a collection or a
//! record, before the store is touched. Decisions are a pure function of
//! `(caller, operation, target)` and the policy's existence setting; the
//! policy holds no state and performs no I/O, so one copy is shared by every
//! request.
//!
//! Rules, first match wins:
//!
//! 1. Anonymous callers may only `list`/`retrieve` public kinds
//!    (resources and modules); anything else is `Unauthenticated`.
//! 2. `create` of an owned kind is allowed; the store binds the owner to
//!    the caller.
//! 3. `retrieve`/`update`/`delete` of an owned record requires admin or
//!    ownership. A refusal is `NotFound` when existence is concealed and
//!    `NotOwner` when it is disclosed.
//! 4. Everything else is allowed for authenticated callers.

use shared::Role;
use std::fmt;

use crate::error::AppError;

/// The authenticated actor behind a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: i64,
    pub username: String,
    pub role: Role,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    List,
    Create,
    Retrieve,
    Update,
    Delete,
}

/// The six record types served by the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    UserProfile,
    ChildProfile,
    Resource,
    PhoneticsModule,
    MathModule,
    StemModule,
}

impl EntityKind {
    /// Owned kinds carry an owner relationship and are never public
    pub fn is_owned(&self) -> bool {
        matches!(self, EntityKind::UserProfile | EntityKind::ChildProfile)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::UserProfile => "user profile",
            EntityKind::ChildProfile => "child profile",
            EntityKind::Resource => "resource",
            EntityKind::PhoneticsModule => "phonetics module",
            EntityKind::MathModule => "math module",
            EntityKind::StemModule => "STEM module",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who a record belongs to. `subject` is set for user profiles: the
/// principal the profile describes always counts as an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ownership {
    pub owner: i64,
    pub subject: Option<i64>,
}

impl Ownership {
    pub fn owned_by(owner: i64) -> Self {
        Self { owner, subject: None }
    }

    pub fn includes(&self, principal: &Principal) -> bool {
        self.owner == principal.id || self.subject == Some(principal.id)
    }
}

/// What an operation is aimed at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Collection(EntityKind),
    Record {
        kind: EntityKind,
        ownership: Option<Ownership>,
    },
}

impl Target {
    pub fn kind(&self) -> EntityKind {
        match self {
            Target::Collection(kind) => *kind,
            Target::Record { kind, .. } => *kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    Unauthenticated,
    NotOwner,
    NotFound,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::Unauthenticated => "unauthenticated",
            DenyReason::NotOwner => "not_owner",
            DenyReason::NotFound => "not_found",
        }
    }
}

impl From<DenyReason> for AppError {
    fn from(reason: DenyReason) -> Self {
        match reason {
            DenyReason::Unauthenticated => AppError::Unauthenticated,
            DenyReason::NotOwner => AppError::Forbidden,
            DenyReason::NotFound => AppError::NotFound,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Whether a non-owner learns that an owned record exists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExistencePolicy {
    /// Answer 404, as if the record were absent
    #[default]
    Conceal,
    /// Answer 403
    Disclose,
}

/// Records a list request may return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListScope {
    All,
    OwnedBy(i64),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    existence: ExistencePolicy,
}

impl AccessPolicy {
    pub fn new(existence: ExistencePolicy) -> Self {
        Self { existence }
    }

    pub fn authorize(
        &self,
        caller: Option<&Principal>,
        operation: Operation,
        target: &Target,
    ) -> Decision {
        let kind = target.kind();

        let principal = match caller {
            Some(principal) => principal,
            None => {
                let public_read = !kind.is_owned()
                    && matches!(operation, Operation::List | Operation::Retrieve);
                return if public_read {
                    Decision::Allow
                } else {
                    Decision::Deny(DenyReason::Unauthenticated)
                };
            }
        };

        if operation == Operation::Create && kind.is_owned() {
            return Decision::Allow;
        }

        if let Target::Record {
            ownership: Some(ownership),
            ..
        } = target
        {
            if matches!(
                operation,
                Operation::Retrieve | Operation::Update | Operation::Delete
            ) {
                if principal.is_admin() || ownership.includes(principal) {
                    return Decision::Allow;
                }
                return Decision::Deny(match self.existence {
                    ExistencePolicy::Conceal => DenyReason::NotFound,
                    ExistencePolicy::Disclose => DenyReason::NotOwner,
                });
            }
        }

        Decision::Allow
    }

    /// Narrows a list of an owned kind to the caller's own records
    pub fn list_scope(&self, principal: &Principal, kind: EntityKind) -> ListScope {
        if principal.is_admin() || !kind.is_owned() {
            ListScope::All
        } else {
            ListScope::OwnedBy(principal.id)
        }
    }
}

/// Only admins may hand out the admin role
pub fn may_assign_role(principal: &Principal, role: Role) -> bool {
    !role.is_admin() || principal.is_admin()
}
