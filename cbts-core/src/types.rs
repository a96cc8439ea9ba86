//! Core data type definitions

use crate::error::CbtsResult;
use serde::{Deserialize, Serialize};

/// Permission class of a user; decides the dashboard and the permitted mutations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    ProductManager,
    EngineeringManager,
    TeamLead,
    Developer,
    Tester,
    Customer,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::ProductManager,
        Role::EngineeringManager,
        Role::TeamLead,
        Role::Developer,
        Role::Tester,
        Role::Customer,
    ];

    /// Wire name used by the backend
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::ProductManager => "product_manager",
            Role::EngineeringManager => "engineering_manager",
            Role::TeamLead => "team_lead",
            Role::Developer => "developer",
            Role::Tester => "tester",
            Role::Customer => "customer",
        }
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            Role::ProductManager => "Product Manager",
            Role::EngineeringManager => "Engineering Manager",
            Role::TeamLead => "Team Lead",
            Role::Developer => "Developer",
            Role::Tester => "Tester",
            Role::Customer => "Customer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == normalized)
            .ok_or_else(|| format!("Unknown role: {}", s))
    }
}

/// Current-user record as reported by `GET auth/user/`
///
/// `role` is kept verbatim so that roles this client does not know about
/// survive a persist/restore cycle unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: i64,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub team: Option<i64>,
}

impl CurrentUser {
    /// The role, if it is one of the enumerated roles
    pub fn known_role(&self) -> Option<Role> {
        self.role.parse().ok()
    }
}

/// Login credentials
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new<U: Into<String>, P: Into<String>>(username: U, password: P) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn validate(&self) -> CbtsResult<()> {
        if self.username.trim().is_empty() {
            return Err(crate::validation_error!(
                "Username must not be empty",
                "username",
                "credentials"
            ));
        }
        if self.password.is_empty() {
            return Err(crate::validation_error!(
                "Password must not be empty",
                "password",
                "credentials"
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Access/refresh credential pair held by an active session
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access: String,
    pub refresh: Option<String>,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access", &"<redacted>")
            .field("has_refresh", &self.refresh.is_some())
            .finish()
    }
}

/// Account registration form (`POST auth/registration/`)
#[derive(Clone, Serialize, Deserialize)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password1: String,
    pub password2: String,
}

impl Registration {
    pub fn validate(&self) -> CbtsResult<()> {
        if self.username.trim().is_empty() {
            return Err(crate::validation_error!(
                "Username must not be empty",
                "username",
                "registration"
            ));
        }
        if !self.email.contains('@') {
            return Err(crate::validation_error!(
                "Email address is not valid",
                "email",
                "registration"
            ));
        }
        if self.password1.is_empty() {
            return Err(crate::validation_error!(
                "Password must not be empty",
                "password1",
                "registration"
            ));
        }
        if self.password1 != self.password2 {
            return Err(crate::validation_error!(
                "Passwords do not match",
                "password2",
                "registration"
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BugStatus {
    #[default]
    Open,
    InProgress,
    Resolved,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BugPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Bug record from `bugs/`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bug {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: BugStatus,
    #[serde(default)]
    pub priority: BugPriority,
    pub project: i64,
    #[serde(default)]
    pub team: Option<i64>,
    #[serde(default)]
    pub reported_by: Option<i64>,
    #[serde(default)]
    pub assigned_to: Option<i64>,
    #[serde(default)]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Payload for creating a bug; the backend fills in the reporter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBug {
    pub title: String,
    pub description: String,
    pub project: i64,
    #[serde(default)]
    pub priority: BugPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<i64>,
}

impl NewBug {
    pub fn validate(&self) -> CbtsResult<()> {
        if self.title.trim().is_empty() {
            return Err(crate::validation_error!(
                "Bug title must not be empty",
                "title",
                "bug"
            ));
        }
        Ok(())
    }
}

/// Partial update for a bug (`PATCH bugs/{id}/`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BugUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<BugStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<BugPriority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<i64>,
}

impl BugUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.assigned_to.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub manager: Option<i64>,
    #[serde(default)]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub lead: Option<i64>,
    #[serde(default)]
    pub project: Option<i64>,
}

/// User record from `users/` and `teams/members/`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub team: Option<i64>,
}
