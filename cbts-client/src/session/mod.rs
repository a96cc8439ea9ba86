//! Session management
//!
//! [`SessionManager`] is the single owner of the token pair and current-user
//! record; [`TokenStore`] persists them across process restarts.

pub mod manager;
pub mod storage;
pub mod types;

pub use manager::{SessionManager, CURRENT_USER_PATH, LOGIN_PATH, LOGOUT_PATH, REFRESH_PATH};
pub use storage::{FileTokenStore, MemoryTokenStore, PersistedSession, StorageKey, TokenStore};
pub use types::{AuthState, HydrationOutcome, HydrationStatus, LoginOutcome, SessionSnapshot};
