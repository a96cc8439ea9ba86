//! Session data types

use cbts_core::{CurrentUser, Role, Route};
use serde::Deserialize;

/// Authentication state of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    Unauthenticated,
    /// A persisted access token is being checked against the backend
    Hydrating,
    Authenticated,
    /// Authenticated, with a refresh-token exchange in flight
    Refreshing,
}

/// Progress of startup reconciliation with persisted storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HydrationStatus {
    #[default]
    Idle,
    Hydrating,
    Ready,
}

/// Read-only view of the session published to guards and subscribers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub state: AuthState,
    pub hydration: HydrationStatus,
    pub user: Option<CurrentUser>,
}

impl SessionSnapshot {
    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, AuthState::Authenticated | AuthState::Refreshing) && self.user.is_some()
    }

    pub fn is_ready(&self) -> bool {
        self.hydration == HydrationStatus::Ready
    }

    /// Role name exactly as reported by the backend
    pub fn role_name(&self) -> Option<&str> {
        self.user.as_ref().map(|user| user.role.as_str())
    }

    pub fn role(&self) -> Option<Role> {
        self.user.as_ref().and_then(CurrentUser::known_role)
    }
}

/// Result of a successful login
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: CurrentUser,
    pub destination: Route,
}

/// Result of startup hydration
#[derive(Debug, Clone, PartialEq)]
pub enum HydrationOutcome {
    /// Nothing was persisted
    Anonymous,
    /// The persisted session is valid
    Restored {
        user: CurrentUser,
        destination: Route,
    },
    /// The persisted session was rejected and has been cleared
    Expired,
}

/// `POST token/` response: JWT pair, or a single opaque key
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum LoginResponse {
    Jwt {
        access: String,
        #[serde(default)]
        refresh: Option<String>,
    },
    Key {
        key: String,
    },
}

/// `POST token/refresh/` response; `refresh` is present when the server rotates it
#[derive(Debug, Deserialize)]
pub(crate) struct RefreshResponse {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}
