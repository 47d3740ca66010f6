use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Role a user profile plays on the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Parent,
    Teacher,
    Admin,
}

/// A user profile (parent, teacher or admin account)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    /// Unique login name (max 100 characters)
    pub username: String,
    /// Unique email address
    pub email: String,
    pub role: Role,
    /// Profile that created this one, `None` when the profile owns itself
    pub owner: Option<i64>,
    /// RFC 3339 creation timestamp
    pub created_at: String,
    /// RFC 3339 timestamp of the last write
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateUserProfileRequest {
    pub username: String,
    pub email: String,
    pub role: Role,
    /// Write-only; profiles created without a password cannot obtain a token
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateUserProfileRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub password: Option<String>,
}

/// A child profile used to track learning progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildProfile {
    pub id: i64,
    /// User profile the child belongs to
    pub owner: i64,
    /// Child's name (max 100 characters)
    pub name: String,
    /// Age in years, 0 to 18
    pub age: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Payload for creating a child. There is no owner field:
/// the owner is always the authenticated caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateChildProfileRequest {
    pub name: String,
    pub age: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateChildProfileRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub age: Option<i64>,
}

/// An educational resource (video, document, ...) reachable by URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: i64,
    pub title: String,
    pub description: String,
    /// Absolute http(s) URL of the content
    pub content_url: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateResourceRequest {
    pub title: String,
    pub description: String,
    pub content_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateResourceRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub content_url: Option<String>,
}

/// A learning module. `D` carries the variant-specific field and is
/// flattened into the JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningModule<D> {
    pub id: i64,
    pub title: String,
    pub description: String,
    #[serde(flatten)]
    pub detail: D,
    /// Ids of the related resources, ascending
    pub resources: Vec<i64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhoneticsDetail {
    /// Reference to the pronunciation audio
    #[serde(default)]
    pub audio_file: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MathDetail {
    /// 1 (easiest) to 5
    #[serde(default)]
    pub difficulty_level: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StemDetail {
    #[serde(default)]
    pub video_url: Option<String>,
}

pub type PhoneticsModule = LearningModule<PhoneticsDetail>;
pub type MathModule = LearningModule<MathDetail>;
pub type StemModule = LearningModule<StemDetail>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateModuleRequest<D> {
    pub title: String,
    pub description: String,
    #[serde(flatten)]
    pub detail: D,
    #[serde(default)]
    pub resources: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateModuleRequest<P> {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub detail: P,
    #[serde(default)]
    pub resources: Option<Vec<i64>>,
}

// Variant patches use a double option: absent leaves the field alone,
// `null` clears it.

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhoneticsDetailPatch {
    #[serde(default, deserialize_with = "nullable")]
    pub audio_file: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MathDetailPatch {
    #[serde(default, deserialize_with = "nullable")]
    pub difficulty_level: Option<Option<i64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StemDetailPatch {
    #[serde(default, deserialize_with = "nullable")]
    pub video_url: Option<Option<String>>,
}

fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Page wrapper returned by every list endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Total number of records matching the query
    pub count: i64,
    /// Relative URL of the next page
    pub next: Option<String>,
    /// Relative URL of the previous page
    pub previous: Option<String>,
    pub results: Vec<T>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

/// Body of every non-validation error response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Body of a validation error response: field name to messages
pub type FieldErrorResponse = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WelcomeResponse {
    pub message: String,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Parent => "parent",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parent" => Ok(Role::Parent),
            "teacher" => Ok(Role::Teacher),
            "admin" => Ok(Role::Admin),
            other => Err(RoleParseError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoleParseError(pub String);

impl fmt::Display for RoleParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\" is not a valid role", self.0)
    }
}

impl std::error::Error for RoleParseError {}

impl From<CreateUserProfileRequest> for UpdateUserProfileRequest {
    fn from(request: CreateUserProfileRequest) -> Self {
        Self {
            username: Some(request.username),
            email: Some(request.email),
            role: Some(request.role),
            password: request.password,
        }
    }
}

impl From<CreateChildProfileRequest> for UpdateChildProfileRequest {
    fn from(request: CreateChildProfileRequest) -> Self {
        Self {
            name: Some(request.name),
            age: Some(request.age),
        }
    }
}

impl From<CreateResourceRequest> for UpdateResourceRequest {
    fn from(request: CreateResourceRequest) -> Self {
        Self {
            title: Some(request.title),
            description: Some(request.description),
            content_url: Some(request.content_url),
        }
    }
}

impl<D, P: From<D>> From<CreateModuleRequest<D>> for UpdateModuleRequest<P> {
    fn from(request: CreateModuleRequest<D>) -> Self {
        Self {
            title: Some(request.title),
            description: Some(request.description),
            detail: P::from(request.detail),
            resources: Some(request.resources),
        }
    }
}

impl From<PhoneticsDetail> for PhoneticsDetailPatch {
    fn from(detail: PhoneticsDetail) -> Self {
        Self { audio_file: Some(detail.audio_file) }
    }
}

impl From<MathDetail> for MathDetailPatch {
    fn from(detail: MathDetail) -> Self {
        Self { difficulty_level: Some(detail.difficulty_level) }
    }
}

impl From<StemDetail> for StemDetailPatch {
    fn from(detail: StemDetail) -> Self {
        Self { video_url: Some(detail.video_url) }
    }
}
