//! Shared test fixtures: an in-memory backend speaking the bug tracker's REST dialect
//!
//! `FakeBackend` implements [`ApiTransport`] directly, so session behavior can
//! be driven without sockets. Knobs on the backend reproduce the situations the
//! session manager has to survive: expired access tokens, revoked refresh
//! tokens, rotation, slow refreshes, failing logout and dropped connections.

#![allow(dead_code)]

use async_trait::async_trait;
use cbts_client::{
    ApiRequest, ApiResponse, ApiTransport, MemoryTokenStore, Method, SessionManager, TokenStore,
};
use cbts_core::{CbtsError, CbtsResult, CurrentUser};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

// Initialize tracing once per test binary
static TRACING: LazyLock<()> = LazyLock::new(|| {
    if std::env::var("TEST_LOG").is_ok() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .finish();
        tracing::subscriber::set_global_default(subscriber).ok();
    } else {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_writer(std::io::sink)
            .finish();
        tracing::subscriber::set_global_default(subscriber).ok();
    }
});

pub fn init_tracing() {
    LazyLock::force(&TRACING);
}

struct Account {
    password: String,
    user: CurrentUser,
}

#[derive(Default)]
struct BackendState {
    accounts: HashMap<String, Account>,
    access_tokens: HashMap<String, String>,
    refresh_tokens: HashMap<String, String>,
    next_token: u64,
    next_bug_id: i64,
    bugs: Vec<Value>,
    calls: Vec<String>,
    refresh_calls: usize,

    rotate_refresh: bool,
    key_login: bool,
    paginate: bool,
    fail_logout: bool,
    offline: bool,
    refresh_unreachable: bool,
    reject_all_bearers: bool,
    refresh_delay: Duration,
    login_delay: Duration,
}

impl BackendState {
    fn issue(&mut self, prefix: &str) -> String {
        self.next_token += 1;
        format!("{}-{}", prefix, self.next_token)
    }

    fn bearer_user(&self, request: &ApiRequest) -> Option<CurrentUser> {
        if self.reject_all_bearers {
            return None;
        }
        let username = self.access_tokens.get(request.bearer.as_deref()?)?;
        self.accounts.get(username).map(|account| account.user.clone())
    }
}

/// Scripted in-memory backend
pub struct FakeBackend {
    state: Mutex<BackendState>,
}

fn respond(status: u16, body: Value) -> ApiResponse {
    ApiResponse::new(status, body)
}

fn unauthorized() -> ApiResponse {
    respond(
        401,
        json!({"detail": "Given token not valid for any token type", "code": "token_not_valid"}),
    )
}

impl FakeBackend {
    /// Backend with one account per role plus a legacy `team_manager` account
    pub fn new() -> Arc<Self> {
        init_tracing();

        let mut state = BackendState {
            next_bug_id: 100,
            ..BackendState::default()
        };
        let accounts = [
            (1, "pam", "product_manager"),
            (2, "emma", "engineering_manager"),
            (3, "lee", "team_lead"),
            (4, "dev", "developer"),
            (5, "tess", "tester"),
            (6, "cass", "customer"),
            (7, "legacy", "team_manager"),
        ];
        for (id, username, role) in accounts {
            state.accounts.insert(
                username.to_string(),
                Account {
                    password: format!("{}-pass", username),
                    user: CurrentUser {
                        id,
                        username: username.to_string(),
                        email: Some(format!("{}@example.com", username)),
                        role: role.to_string(),
                        team: Some(1),
                    },
                },
            );
        }
        state.bugs.push(json!({
            "id": 1,
            "title": "Crash on save",
            "description": "Saving a draft crashes the editor",
            "status": "open",
            "priority": "high",
            "project": 1,
            "team": 1,
            "reported_by": 5
        }));

        Arc::new(Self {
            state: Mutex::new(state),
        })
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut BackendState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn set_rotate_refresh(&self, on: bool) {
        self.with_state(|s| s.rotate_refresh = on);
    }

    pub fn set_key_login(&self, on: bool) {
        self.with_state(|s| s.key_login = on);
    }

    pub fn set_paginate(&self, on: bool) {
        self.with_state(|s| s.paginate = on);
    }

    pub fn set_fail_logout(&self, on: bool) {
        self.with_state(|s| s.fail_logout = on);
    }

    pub fn set_offline(&self, on: bool) {
        self.with_state(|s| s.offline = on);
    }

    pub fn set_refresh_unreachable(&self, on: bool) {
        self.with_state(|s| s.refresh_unreachable = on);
    }

    pub fn set_reject_all_bearers(&self, on: bool) {
        self.with_state(|s| s.reject_all_bearers = on);
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        self.with_state(|s| s.refresh_delay = delay);
    }

    pub fn set_login_delay(&self, delay: Duration) {
        self.with_state(|s| s.login_delay = delay);
    }

    /// Invalidate every issued access token, as if they all timed out
    pub fn expire_access_tokens(&self) {
        self.with_state(|s| s.access_tokens.clear());
    }

    pub fn revoke_refresh_tokens(&self) {
        self.with_state(|s| s.refresh_tokens.clear());
    }

    pub fn refresh_calls(&self) -> usize {
        self.with_state(|s| s.refresh_calls)
    }

    pub fn calls(&self) -> Vec<String> {
        self.with_state(|s| s.calls.clone())
    }

    /// Number of requests made to `path` with `method`
    pub fn call_count(&self, method: &str, path: &str) -> usize {
        let needle = format!("{} {}", method, path);
        self.with_state(|s| s.calls.iter().filter(|call| **call == needle).count())
    }

    pub fn is_refresh_token_valid(&self, token: &str) -> bool {
        self.with_state(|s| s.refresh_tokens.contains_key(token))
    }

    fn handle(&self, request: &ApiRequest) -> CbtsResult<ApiResponse> {
        let mut state = self.state.lock().unwrap();
        if state.offline {
            return Err(CbtsError::network(
                "Connection refused",
                None,
                "fake_backend",
            ));
        }
        state
            .calls
            .push(format!("{} {}", request.method, request.path));

        let body = request.body.clone().unwrap_or(Value::Null);
        let path = request.path.as_str();

        let response = match (request.method.clone(), path) {
            (Method::POST, "token/") => {
                let username = body["username"].as_str().unwrap_or_default().to_string();
                let password = body["password"].as_str().unwrap_or_default();
                let valid = state
                    .accounts
                    .get(&username)
                    .is_some_and(|account| account.password == password);
                if !valid {
                    return Ok(respond(
                        400,
                        json!({"non_field_errors": ["Unable to log in with provided credentials."]}),
                    ));
                }

                let access = state.issue("access");
                state.access_tokens.insert(access.clone(), username.clone());
                if state.key_login {
                    respond(200, json!({ "key": access }))
                } else {
                    let refresh = state.issue("refresh");
                    state.refresh_tokens.insert(refresh.clone(), username);
                    respond(200, json!({ "access": access, "refresh": refresh }))
                }
            }
            (Method::POST, "token/refresh/") => {
                state.refresh_calls += 1;
                let presented = body["refresh"].as_str().unwrap_or_default().to_string();
                let Some(username) = state.refresh_tokens.get(&presented).cloned() else {
                    return Ok(unauthorized());
                };

                let access = state.issue("access");
                state.access_tokens.insert(access.clone(), username.clone());
                if state.rotate_refresh {
                    state.refresh_tokens.remove(&presented);
                    let refresh = state.issue("refresh");
                    state.refresh_tokens.insert(refresh.clone(), username);
                    respond(200, json!({ "access": access, "refresh": refresh }))
                } else {
                    respond(200, json!({ "access": access }))
                }
            }
            (Method::POST, "auth/registration/") => {
                let username = body["username"].as_str().unwrap_or_default();
                if state.accounts.contains_key(username) {
                    respond(
                        400,
                        json!({"username": ["A user with that username already exists."]}),
                    )
                } else {
                    respond(201, json!({"detail": "Verification e-mail sent."}))
                }
            }
            (Method::POST, "password-reset/") => {
                respond(200, json!({"detail": "Password reset e-mail has been sent."}))
            }
            (Method::POST, "auth/logout/") => {
                if state.fail_logout {
                    respond(500, Value::String("Internal Server Error".to_string()))
                } else {
                    if let Some(token) = &request.bearer {
                        state.access_tokens.remove(token);
                    }
                    if let Some(refresh) = body["refresh"].as_str() {
                        state.refresh_tokens.remove(refresh);
                    }
                    respond(200, json!({"detail": "Successfully logged out."}))
                }
            }
            (method, path) => {
                let Some(user) = state.bearer_user(request) else {
                    return Ok(unauthorized());
                };
                match (method, path) {
                    (Method::GET, "auth/user/") => respond(200, json!(user)),
                    (Method::GET, "bugs/") => {
                        let bugs = Value::Array(state.bugs.clone());
                        if state.paginate {
                            respond(200, json!({"count": state.bugs.len(), "results": bugs}))
                        } else {
                            respond(200, bugs)
                        }
                    }
                    (Method::POST, "bugs/") => {
                        state.next_bug_id += 1;
                        let mut bug = body;
                        bug["id"] = json!(state.next_bug_id);
                        bug["status"] = json!("open");
                        bug["reported_by"] = json!(user.id);
                        state.bugs.push(bug.clone());
                        respond(201, bug)
                    }
                    (Method::GET, "projects/") => respond(
                        200,
                        json!([{"id": 1, "name": "Editor", "description": "Desktop editor"}]),
                    ),
                    (Method::GET, "teams/") => {
                        respond(200, json!([{"id": 1, "name": "Core", "lead": 3, "project": 1}]))
                    }
                    (Method::GET, "teams/members/") | (Method::GET, "users/") => {
                        let members: Vec<Value> = state
                            .accounts
                            .values()
                            .map(|account| json!(account.user))
                            .collect();
                        respond(200, Value::Array(members))
                    }
                    (method, path) => match bug_id(path) {
                        Some(id) => {
                            let position = state.bugs.iter().position(|bug| bug["id"] == json!(id));
                            match (method, position) {
                                (_, None) => respond(404, json!({"detail": "Not found."})),
                                (Method::GET, Some(index)) => respond(200, state.bugs[index].clone()),
                                (Method::PATCH, Some(index)) => {
                                    if let (Some(bug), Some(changes)) =
                                        (state.bugs[index].as_object_mut(), body.as_object())
                                    {
                                        for (key, value) in changes {
                                            bug.insert(key.clone(), value.clone());
                                        }
                                    }
                                    respond(200, state.bugs[index].clone())
                                }
                                (Method::DELETE, Some(index)) => {
                                    state.bugs.remove(index);
                                    respond(204, Value::Null)
                                }
                                _ => respond(405, json!({"detail": "Method not allowed."})),
                            }
                        }
                        None => respond(404, json!({"detail": "Not found."})),
                    },
                }
            }
        };

        Ok(response)
    }
}

fn bug_id(path: &str) -> Option<i64> {
    path.strip_prefix("bugs/")?.strip_suffix('/')?.parse().ok()
}

#[async_trait]
impl ApiTransport for FakeBackend {
    async fn send(&self, request: &ApiRequest) -> CbtsResult<ApiResponse> {
        // Delays and transport failures are decided before taking the lock
        let (delay, unreachable) = self.with_state(|s| match request.path.as_str() {
            "token/refresh/" => (s.refresh_delay, s.refresh_unreachable),
            "token/" => (s.login_delay, false),
            _ => (Duration::ZERO, false),
        });

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if unreachable {
            self.with_state(|s| s.calls.push(format!("{} {}", request.method, request.path)));
            return Err(CbtsError::network(
                "Connection reset by peer",
                None,
                "fake_backend",
            ));
        }

        self.handle(request)
    }
}

/// Session wired to a fake backend and an in-memory store
pub struct Harness {
    pub backend: Arc<FakeBackend>,
    pub store: Arc<MemoryTokenStore>,
    pub session: Arc<SessionManager>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(FakeBackend::new(), Arc::new(MemoryTokenStore::new()))
    }

    pub fn with_store(backend: Arc<FakeBackend>, store: Arc<MemoryTokenStore>) -> Self {
        let session = Arc::new(SessionManager::new(
            backend.clone() as Arc<dyn ApiTransport>,
            store.clone() as Arc<dyn TokenStore>,
        ));
        Self {
            backend,
            store,
            session,
        }
    }

    /// A second process sharing this backend and persisted storage
    pub fn restart(&self) -> Self {
        Self::with_store(self.backend.clone(), self.store.clone())
    }
}

pub fn credentials(username: &str) -> cbts_core::Credentials {
    cbts_core::Credentials::new(username, format!("{}-pass", username))
}
