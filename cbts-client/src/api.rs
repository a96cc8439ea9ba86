//! Typed calls against the bug-tracker REST endpoints
//!
//! Resource calls go through [`SessionManager::send_authorized`] and so share
//! its refresh-once behavior. Registration and password reset are anonymous
//! and talk to the transport directly.

use crate::session::SessionManager;
use crate::transport::{ApiRequest, ApiResponse};
use cbts_core::{
    log_operation_error, log_operation_start, log_operation_success, validation_error, Bug,
    BugUpdate, CbtsError, CbtsResult, NewBug, Project, Registration, Team, UserRecord,
    BUG_REPORTERS,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

pub const REGISTRATION_PATH: &str = "auth/registration/";
pub const PASSWORD_RESET_PATH: &str = "password-reset/";

const COMPONENT: &str = "cbts_api";

/// List endpoints answer with a bare array or a paginated envelope
#[derive(Deserialize)]
#[serde(untagged)]
enum ListPayload<T> {
    Page { results: Vec<T> },
    Plain(Vec<T>),
}

impl<T> ListPayload<T> {
    fn into_items(self) -> Vec<T> {
        match self {
            ListPayload::Page { results } => results,
            ListPayload::Plain(items) => items,
        }
    }
}

/// API client bound to a session
#[derive(Clone)]
pub struct CbtsApi {
    session: Arc<SessionManager>,
}

impl CbtsApi {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    async fn call(&self, request: ApiRequest, operation: &str) -> CbtsResult<ApiResponse> {
        self.session
            .send_authorized(request)
            .await?
            .into_result(operation)
    }

    async fn list<T: DeserializeOwned>(&self, path: &str, operation: &str) -> CbtsResult<Vec<T>> {
        let response = self.call(ApiRequest::get(path), operation).await?;
        Ok(response.json::<ListPayload<T>>()?.into_items())
    }

    pub async fn list_bugs(&self) -> CbtsResult<Vec<Bug>> {
        self.list("bugs/", "list_bugs").await
    }

    pub async fn get_bug(&self, id: i64) -> CbtsResult<Bug> {
        self.call(ApiRequest::get(format!("bugs/{}/", id)), "get_bug")
            .await?
            .json()
    }

    /// Report a new bug; only bug-reporting roles may call this
    pub async fn create_bug(&self, bug: &NewBug) -> CbtsResult<Bug> {
        bug.validate()?;

        let snapshot = self.session.state();
        let role = snapshot.role();
        if !role.is_some_and(|role| BUG_REPORTERS.contains(&role)) {
            let expected = BUG_REPORTERS
                .iter()
                .map(|role| role.as_str())
                .collect::<Vec<_>>()
                .join(" | ");
            return Err(CbtsError::role_mismatch(
                expected,
                snapshot.role_name().unwrap_or("anonymous"),
                COMPONENT,
            ));
        }

        log_operation_start!("create_bug", title = %bug.title, project = bug.project);
        let result = match self
            .call(ApiRequest::post("bugs/", serde_json::to_value(bug)?), "create_bug")
            .await
        {
            Ok(response) => response.json::<Bug>(),
            Err(e) => Err(e),
        };
        match &result {
            Ok(created) => log_operation_success!("create_bug", bug_id = created.id),
            Err(e) => log_operation_error!("create_bug", e),
        }
        result
    }

    pub async fn update_bug(&self, id: i64, update: &BugUpdate) -> CbtsResult<Bug> {
        if update.is_empty() {
            return Err(validation_error!(
                "Nothing to update",
                "update",
                COMPONENT
            ));
        }
        self.call(
            ApiRequest::patch(format!("bugs/{}/", id), serde_json::to_value(update)?),
            "update_bug",
        )
        .await?
        .json()
    }

    pub async fn delete_bug(&self, id: i64) -> CbtsResult<()> {
        self.call(ApiRequest::delete(format!("bugs/{}/", id)), "delete_bug")
            .await?;
        log_operation_success!("delete_bug", bug_id = id);
        Ok(())
    }

    pub async fn list_projects(&self) -> CbtsResult<Vec<Project>> {
        self.list("projects/", "list_projects").await
    }

    pub async fn list_teams(&self) -> CbtsResult<Vec<Team>> {
        self.list("teams/", "list_teams").await
    }

    /// Members of the caller's team
    pub async fn list_team_members(&self) -> CbtsResult<Vec<UserRecord>> {
        self.list("teams/members/", "list_team_members").await
    }

    pub async fn list_users(&self) -> CbtsResult<Vec<UserRecord>> {
        self.list("users/", "list_users").await
    }

    /// Create an account; does not log in
    pub async fn register(&self, registration: &Registration) -> CbtsResult<()> {
        registration.validate()?;
        log_operation_start!("register", username = %registration.username);

        let request = ApiRequest::post(REGISTRATION_PATH, serde_json::to_value(registration)?);
        let result = match self.session.transport().send(&request).await {
            Ok(response) => response.into_result("register").map(|_| ()),
            Err(e) => Err(e),
        };

        match &result {
            Ok(()) => log_operation_success!("register", username = %registration.username),
            Err(e) => log_operation_error!("register", e),
        }
        result
    }

    pub async fn request_password_reset(&self, email: &str) -> CbtsResult<()> {
        let email = email.trim();
        if email.is_empty() {
            return Err(validation_error!(
                "Email must not be empty",
                "email",
                COMPONENT
            ));
        }

        let request = ApiRequest::post(PASSWORD_RESET_PATH, json!({ "email": email }));
        self.session
            .transport()
            .send(&request)
            .await?
            .into_result("request_password_reset")?;
        log_operation_success!("request_password_reset");
        Ok(())
    }
}
