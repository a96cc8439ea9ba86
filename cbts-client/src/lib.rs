//! CBTS Client - Session handling for the bug tracker client
//!
//! This crate owns everything between the user and the REST backend:
//!
//! - Token acquisition, persistence and silent refresh ([`session`])
//! - Route guarding against the current session ([`guard`])
//! - Typed resource calls that share the refresh-once path ([`api`])
//!
//! ## Architecture
//!
//! - **Transport** ([`transport`]): sends requests, reports statuses as data
//! - **Session** ([`SessionManager`]): the only writer of session state
//! - **Consumers** (guard, api, cli): read snapshots or subscribe

pub mod api;
pub mod guard;
pub mod session;
pub mod transport;

pub use api::CbtsApi;
pub use guard::{evaluate, evaluate_with, GuardDecision, RouteGuard};
pub use session::{
    AuthState, FileTokenStore, HydrationOutcome, HydrationStatus, LoginOutcome, MemoryTokenStore,
    PersistedSession, SessionManager, SessionSnapshot, StorageKey, TokenStore,
};
pub use transport::{ApiRequest, ApiResponse, ApiTransport, Method, ReqwestTransport};
