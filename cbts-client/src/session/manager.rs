//! Session Manager - token lifecycle and authentication state
//!
//! One `SessionManager` owns the token pair and the current-user record for
//! the whole process. Everything else reads it through [`SessionManager::state`]
//! or a [`watch`] subscription; only the manager writes.
//!
//! Every explicit logout (and every login) bumps an epoch counter. Network
//! round trips remember the epoch they started under and drop their result if
//! it has moved on, so a slow refresh can never resurrect a session the user
//! already ended.

use super::storage::{PersistedSession, StorageKey, TokenStore};
use super::types::{
    AuthState, HydrationOutcome, HydrationStatus, LoginOutcome, LoginResponse, RefreshResponse,
    SessionSnapshot,
};
use crate::transport::{ApiRequest, ApiResponse, ApiTransport};
use cbts_core::{
    destination_for_role, log_operation_error, log_operation_start, log_operation_success,
    CbtsError, CbtsResult, Credentials, CurrentUser, Role, Route, TokenPair,
};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tracing::{debug, info, warn};

pub const LOGIN_PATH: &str = "token/";
pub const REFRESH_PATH: &str = "token/refresh/";
pub const CURRENT_USER_PATH: &str = "auth/user/";
pub const LOGOUT_PATH: &str = "auth/logout/";

const COMPONENT: &str = "session_manager";

#[derive(Default)]
struct SessionInner {
    tokens: Option<TokenPair>,
    user: Option<CurrentUser>,
    epoch: u64,
}

/// Last refresh exchange that failed without touching the token pair
struct FailedRefresh {
    access: String,
    message: String,
}

#[derive(Default)]
struct RefreshState {
    failed: Option<FailedRefresh>,
}

/// Owner of the client session
pub struct SessionManager {
    transport: Arc<dyn ApiTransport>,
    store: Arc<dyn TokenStore>,
    inner: RwLock<SessionInner>,
    /// Held for the duration of a refresh exchange
    refresh_lock: Mutex<RefreshState>,
    /// Completed refresh attempts; only advanced under `refresh_lock`
    refresh_attempts: AtomicU64,
    state_tx: watch::Sender<SessionSnapshot>,
    navigation_tx: broadcast::Sender<Route>,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn ApiTransport>, store: Arc<dyn TokenStore>) -> Self {
        let (state_tx, _) = watch::channel(SessionSnapshot::default());
        let (navigation_tx, _) = broadcast::channel(16);

        Self {
            transport,
            store,
            inner: RwLock::new(SessionInner::default()),
            refresh_lock: Mutex::new(RefreshState::default()),
            refresh_attempts: AtomicU64::new(0),
            state_tx,
            navigation_tx,
        }
    }

    /// Current snapshot, without waiting
    pub fn state(&self) -> SessionSnapshot {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state_tx.subscribe()
    }

    /// Navigation requests issued by the session (login, logout, expiry)
    pub fn subscribe_navigation(&self) -> broadcast::Receiver<Route> {
        self.navigation_tx.subscribe()
    }

    /// Resolve once hydration has completed
    pub async fn wait_until_ready(&self) -> SessionSnapshot {
        let mut rx = self.state_tx.subscribe();
        let snapshot = match rx.wait_for(SessionSnapshot::is_ready).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.state(),
        };
        snapshot
    }

    pub fn is_authenticated(&self) -> bool {
        self.state_tx.borrow().is_authenticated()
    }

    pub async fn current_user(&self) -> Option<CurrentUser> {
        self.inner.read().await.user.clone()
    }

    pub async fn access_token(&self) -> Option<String> {
        self.inner
            .read()
            .await
            .tokens
            .as_ref()
            .map(|tokens| tokens.access.clone())
    }

    pub fn transport(&self) -> &Arc<dyn ApiTransport> {
        &self.transport
    }

    /// Reconcile in-memory state with persisted storage
    ///
    /// Always leaves the hydration status at `Ready`, whatever the outcome.
    pub async fn hydrate(&self) -> CbtsResult<HydrationOutcome> {
        log_operation_start!("hydrate");
        self.state_tx
            .send_modify(|snapshot| snapshot.hydration = HydrationStatus::Hydrating);

        let result = self.hydrate_inner().await;
        self.state_tx
            .send_modify(|snapshot| snapshot.hydration = HydrationStatus::Ready);

        match &result {
            Ok(outcome) => log_operation_success!("hydrate", outcome = ?outcome),
            Err(e) => log_operation_error!("hydrate", e),
        }
        result
    }

    async fn hydrate_inner(&self) -> CbtsResult<HydrationOutcome> {
        let persisted = match PersistedSession::load(self.store.as_ref()) {
            Ok(persisted) => persisted,
            Err(e) => {
                self.publish(AuthState::Unauthenticated, None);
                return Err(e);
            }
        };

        if persisted.has_orphans() {
            info!("Clearing session entries persisted without an access token");
            self.clear_store();
        }

        let Some(access) = persisted.access_token else {
            self.publish(AuthState::Unauthenticated, None);
            return Ok(HydrationOutcome::Anonymous);
        };

        let epoch = {
            let mut inner = self.inner.write().await;
            inner.epoch += 1;
            inner.tokens = Some(TokenPair {
                access,
                refresh: persisted.refresh_token,
            });
            inner.user = None;
            inner.epoch
        };
        self.publish(AuthState::Hydrating, None);

        let fetched = match self.send_authorized(ApiRequest::get(CURRENT_USER_PATH)).await {
            Ok(response) => response
                .into_result("fetch_current_user")
                .and_then(ApiResponse::json::<CurrentUser>),
            Err(e) => Err(e),
        };

        let user = match fetched {
            Ok(user) => user,
            Err(e) if e.requires_login() => {
                info!("Persisted session was rejected, clearing it");
                self.reset_memory(epoch).await;
                self.clear_store();
                self.publish(AuthState::Unauthenticated, None);
                return Ok(HydrationOutcome::Expired);
            }
            Err(e) => {
                // Keep persisted entries so a later start can retry
                self.reset_memory(epoch).await;
                self.publish(AuthState::Unauthenticated, None);
                return Err(e);
            }
        };

        {
            let mut inner = self.inner.write().await;
            if inner.epoch != epoch {
                return Err(CbtsError::superseded("hydrate", COMPONENT));
            }
            inner.user = Some(user.clone());
        }

        if let Ok(raw) = serde_json::to_string(&user) {
            if let Err(e) = self.store.save(StorageKey::CurrentUser, &raw) {
                warn!("Failed to persist refreshed user record: {}", e);
            }
        }

        self.publish(AuthState::Authenticated, Some(user.clone()));
        let destination = destination_for_role(&user.role);

        Ok(HydrationOutcome::Restored { user, destination })
    }

    /// Log in and compute the post-login destination
    ///
    /// With `intended_role`, a user whose role differs is logged straight back
    /// out and `RoleMismatch` is returned.
    pub async fn login(
        &self,
        credentials: &Credentials,
        intended_role: Option<Role>,
    ) -> CbtsResult<LoginOutcome> {
        credentials.validate()?;
        log_operation_start!("login", username = %credentials.username);

        let result = self.login_inner(credentials, intended_role).await;
        match &result {
            Ok(outcome) => log_operation_success!(
                "login",
                username = %outcome.user.username,
                role = %outcome.user.role
            ),
            Err(e) => log_operation_error!("login", e, username = %credentials.username),
        }
        result
    }

    async fn login_inner(
        &self,
        credentials: &Credentials,
        intended_role: Option<Role>,
    ) -> CbtsResult<LoginOutcome> {
        let epoch = self.inner.read().await.epoch;

        let request = ApiRequest::post(
            LOGIN_PATH,
            json!({
                "username": credentials.username,
                "password": credentials.password,
            }),
        );
        let response = self.transport.send(&request).await?;
        if matches!(response.status, 400 | 401) {
            let message = response
                .detail()
                .unwrap_or_else(|| "Invalid username or password".to_string());
            return Err(CbtsError::invalid_credentials(message, COMPONENT));
        }

        let tokens = match response.into_result("login")?.json::<LoginResponse>()? {
            LoginResponse::Jwt { access, refresh } => TokenPair { access, refresh },
            LoginResponse::Key { key } => TokenPair {
                access: key,
                refresh: None,
            },
        };

        let user_request = ApiRequest::get(CURRENT_USER_PATH).with_bearer(&tokens.access);
        let user_response = self.transport.send(&user_request).await?;
        if user_response.is_unauthorized() {
            return Err(CbtsError::invalid_credentials(
                "The issued token was rejected by the server",
                COMPONENT,
            ));
        }
        let user: CurrentUser = user_response.into_result("fetch_current_user")?.json()?;

        if let Some(expected) = intended_role {
            if user.known_role() != Some(expected) {
                self.invalidate_remotely(&tokens).await;
                if let Err(e) = self.logout().await {
                    warn!("Failed to clear session after role mismatch: {}", e);
                }
                return Err(CbtsError::role_mismatch(
                    expected.as_str(),
                    user.role,
                    COMPONENT,
                ));
            }
        }

        {
            let mut inner = self.inner.write().await;
            if inner.epoch != epoch {
                return Err(CbtsError::superseded("login", COMPONENT));
            }

            if let Err(e) = self.persist(&tokens, &user) {
                self.clear_store();
                return Err(e);
            }

            inner.epoch += 1;
            inner.tokens = Some(tokens);
            inner.user = Some(user.clone());
        }

        self.publish(AuthState::Authenticated, Some(user.clone()));
        self.state_tx
            .send_modify(|snapshot| snapshot.hydration = HydrationStatus::Ready);

        let destination = destination_for_role(&user.role);
        self.navigate(destination.clone());

        Ok(LoginOutcome { user, destination })
    }

    /// End the session
    ///
    /// Server-side invalidation is best effort; local state is always cleared.
    /// Returns the route navigated to.
    pub async fn logout(&self) -> CbtsResult<Route> {
        log_operation_start!("logout");

        let tokens = {
            let mut inner = self.inner.write().await;
            inner.epoch += 1;
            inner.user = None;
            inner.tokens.take()
        };

        if let Some(tokens) = &tokens {
            self.invalidate_remotely(tokens).await;
        }

        let cleared = self.store.clear();

        self.publish(AuthState::Unauthenticated, None);
        self.state_tx
            .send_modify(|snapshot| snapshot.hydration = HydrationStatus::Ready);

        let destination = Route::login();
        self.navigate(destination.clone());

        match cleared {
            Ok(()) => {
                log_operation_success!("logout");
                Ok(destination)
            }
            Err(e) => {
                log_operation_error!("logout", e);
                Err(e)
            }
        }
    }

    /// Send a request with the current access token
    ///
    /// A 401 on a first attempt triggers one refresh and one replay; the
    /// replay's response is returned whatever its status.
    pub async fn send_authorized(&self, request: ApiRequest) -> CbtsResult<ApiResponse> {
        let token = self
            .access_token()
            .await
            .ok_or_else(|| CbtsError::session_expired("Not logged in", COMPONENT))?;

        let mut attempt = request;
        attempt.bearer = Some(token.clone());
        let attempts_seen = self.refresh_attempts.load(Ordering::Acquire);
        let response = self.transport.send(&attempt).await?;

        if !response.is_unauthorized() || attempt.is_retry {
            return Ok(response);
        }

        debug!(path = %attempt.path, "Request rejected with 401, refreshing");
        let fresh = self
            .refresh_after_unauthorized(&token, attempts_seen)
            .await?;

        let retry = attempt.into_retry().with_bearer(&fresh);
        self.transport.send(&retry).await
    }

    /// Exchange the refresh token after `stale` was rejected
    ///
    /// Callers queue on the refresh lock. Whoever gets it after a successful
    /// exchange finds the access token already replaced and reuses it. An
    /// exchange that failed in transport is not repeated for callers whose
    /// request was sent before it completed; they get the same error.
    async fn refresh_after_unauthorized(
        &self,
        stale: &str,
        attempts_seen: u64,
    ) -> CbtsResult<String> {
        let mut refresh_state = self.refresh_lock.lock().await;

        let (refresh_token, epoch) = {
            let inner = self.inner.read().await;
            match &inner.tokens {
                Some(tokens) if tokens.access != stale => {
                    debug!("Access token was refreshed by a concurrent request");
                    return Ok(tokens.access.clone());
                }
                Some(tokens) => (tokens.refresh.clone(), inner.epoch),
                None => {
                    return Err(CbtsError::session_expired(
                        "Session ended while waiting for refresh",
                        COMPONENT,
                    ))
                }
            }
        };

        if self.refresh_attempts.load(Ordering::Acquire) != attempts_seen {
            if let Some(failed) = refresh_state.failed.as_ref().filter(|f| f.access == stale) {
                debug!("Concurrent refresh failed, sharing its error");
                return Err(CbtsError::network(failed.message.clone(), None, COMPONENT));
            }
        }

        let Some(refresh_token) = refresh_token else {
            if !self.expire_session(epoch).await {
                return Err(CbtsError::superseded("refresh", COMPONENT));
            }
            return Err(CbtsError::session_expired(
                "Access token expired and no refresh token is available",
                COMPONENT,
            ));
        };

        log_operation_start!("refresh");
        self.state_tx.send_if_modified(|snapshot| {
            if snapshot.state == AuthState::Authenticated {
                snapshot.state = AuthState::Refreshing;
                true
            } else {
                false
            }
        });

        let result = self.exchange_refresh_token(&refresh_token, epoch).await;

        refresh_state.failed = match &result {
            Err(CbtsError::Network { message, .. }) => Some(FailedRefresh {
                access: stale.to_string(),
                message: message.clone(),
            }),
            _ => None,
        };
        self.refresh_attempts.fetch_add(1, Ordering::Release);

        self.state_tx.send_if_modified(|snapshot| {
            if snapshot.state == AuthState::Refreshing {
                snapshot.state = AuthState::Authenticated;
                true
            } else {
                false
            }
        });

        match &result {
            Ok(_) => log_operation_success!("refresh"),
            Err(e) => log_operation_error!("refresh", e),
        }
        result
    }

    async fn exchange_refresh_token(&self, refresh_token: &str, epoch: u64) -> CbtsResult<String> {
        let request = ApiRequest::post(REFRESH_PATH, json!({ "refresh": refresh_token }));

        // A transport failure says nothing about the token; keep the session
        let response = self.transport.send(&request).await?;

        let status = response.status;
        let refreshed = if response.is_success() {
            response.json::<RefreshResponse>().ok()
        } else {
            None
        };

        let Some(refreshed) = refreshed else {
            if !self.expire_session(epoch).await {
                return Err(CbtsError::superseded("refresh", COMPONENT));
            }
            warn!(status, "Refresh token rejected, session ended");
            return Err(CbtsError::session_expired(
                "Session expired, please log in again",
                COMPONENT,
            ));
        };

        let mut inner = self.inner.write().await;
        if inner.epoch != epoch {
            debug!("Discarding refresh result for an ended session");
            return Err(CbtsError::superseded("refresh", COMPONENT));
        }

        let rotated = refreshed.refresh.is_some();
        let tokens = TokenPair {
            access: refreshed.access,
            refresh: refreshed.refresh.or_else(|| Some(refresh_token.to_string())),
        };

        if let Err(e) = self.store.save(StorageKey::AccessToken, &tokens.access) {
            warn!("Failed to persist refreshed access token: {}", e);
        }
        if rotated {
            if let Some(refresh) = &tokens.refresh {
                if let Err(e) = self.store.save(StorageKey::RefreshToken, refresh) {
                    warn!("Failed to persist rotated refresh token: {}", e);
                }
            }
        }

        let access = tokens.access.clone();
        inner.tokens = Some(tokens);
        debug!(rotated, "Access token refreshed");

        Ok(access)
    }

    /// Drop the session after an irrecoverable refresh failure
    ///
    /// Returns false when the session from `epoch` had already ended.
    async fn expire_session(&self, epoch: u64) -> bool {
        {
            let mut inner = self.inner.write().await;
            if inner.epoch != epoch {
                return false;
            }
            inner.epoch += 1;
            inner.tokens = None;
            inner.user = None;
        }

        self.clear_store();
        self.publish(AuthState::Unauthenticated, None);
        self.navigate(Route::login());
        true
    }

    async fn invalidate_remotely(&self, tokens: &TokenPair) {
        let body = match &tokens.refresh {
            Some(refresh) => json!({ "refresh": refresh }),
            None => json!({}),
        };
        let request = ApiRequest::post(LOGOUT_PATH, body).with_bearer(&tokens.access);

        match self.transport.send(&request).await {
            Ok(response) if response.is_success() => debug!("Server-side session invalidated"),
            Ok(response) => warn!(
                status = response.status,
                "Server-side logout was rejected, clearing local session anyway"
            ),
            Err(e) => warn!("Server-side logout failed, clearing local session anyway: {}", e),
        }
    }

    fn persist(&self, tokens: &TokenPair, user: &CurrentUser) -> CbtsResult<()> {
        let raw_user = serde_json::to_string(user)?;

        self.store.save(StorageKey::AccessToken, &tokens.access)?;
        match &tokens.refresh {
            Some(refresh) => self.store.save(StorageKey::RefreshToken, refresh)?,
            None => self.store.remove(StorageKey::RefreshToken)?,
        }
        self.store.save(StorageKey::CurrentUser, &raw_user)
    }

    async fn reset_memory(&self, epoch: u64) {
        let mut inner = self.inner.write().await;
        if inner.epoch == epoch {
            inner.tokens = None;
            inner.user = None;
        }
    }

    fn clear_store(&self) {
        if let Err(e) = self.store.clear() {
            warn!("Failed to clear persisted session: {}", e);
        }
    }

    fn publish(&self, state: AuthState, user: Option<CurrentUser>) {
        self.state_tx.send_modify(|snapshot| {
            snapshot.state = state;
            snapshot.user = user;
        });
    }

    fn navigate(&self, route: Route) {
        debug!(route = %route, "Navigation requested");
        // Fails only when nobody is subscribed
        let _ = self.navigation_tx.send(route);
    }
}
