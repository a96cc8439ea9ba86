//! Unified error handling
//!
//! Structured error types with context, recovery suggestions and error chaining.
//! The session-facing variants (`InvalidCredentials`, `SessionExpired`, `Network`,
//! `RoleMismatch`) are the ones user interfaces are expected to branch on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{error, warn};

pub type CbtsResult<T> = Result<T, CbtsError>;

/// Error context providing additional information for debugging and recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Unique error ID for tracking
    pub error_id: String,
    /// Timestamp when error occurred
    pub timestamp: DateTime<Utc>,
    /// Component where error originated
    pub component: String,
    /// Operation being performed when error occurred
    pub operation: Option<String>,
    /// Additional metadata
    pub metadata: HashMap<String, String>,
    /// Recovery suggestions
    pub recovery_suggestions: Vec<String>,
}

impl ErrorContext {
    pub fn new(component: &str) -> Self {
        Self {
            error_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            component: component.to_string(),
            operation: None,
            metadata: HashMap::new(),
            recovery_suggestions: Vec::new(),
        }
    }

    pub fn with_operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.recovery_suggestions.push(suggestion.to_string());
        self
    }
}

/// Main error type for the CBTS client
#[derive(Error, Debug)]
pub enum CbtsError {
    /// The backend rejected the supplied login credentials
    #[error("Invalid credentials: {message}")]
    InvalidCredentials {
        message: String,
        context: ErrorContext,
    },

    /// The session could not be kept alive (refresh rejected or no session at all)
    #[error("Session expired: {message}")]
    SessionExpired {
        message: String,
        context: ErrorContext,
    },

    /// Transport-level failure; distinct from an authentication failure
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    /// Authenticated, but with a role that may not perform the action
    #[error("Role mismatch: expected {expected}, got {actual}")]
    RoleMismatch {
        expected: String,
        actual: String,
        context: ErrorContext,
    },

    /// Non-success HTTP status that is not handled by the session layer
    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        message: String,
        context: ErrorContext,
    },

    /// A result was discarded because the session was cleared while it was in flight
    #[error("Operation superseded: {operation}")]
    Superseded {
        operation: String,
        context: ErrorContext,
    },

    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
        context: ErrorContext,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CbtsError {
    pub fn invalid_credentials<S: Into<String>>(message: S, component: &str) -> Self {
        Self::InvalidCredentials {
            message: message.into(),
            context: ErrorContext::new(component)
                .with_operation("login")
                .with_suggestion("Check the username and password"),
        }
    }

    pub fn session_expired<S: Into<String>>(message: S, component: &str) -> Self {
        Self::SessionExpired {
            message: message.into(),
            context: ErrorContext::new(component).with_suggestion("Log in again"),
        }
    }

    pub fn network<S: Into<String>>(
        message: S,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        component: &str,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source,
            context: ErrorContext::new(component)
                .with_suggestion("Check network connectivity")
                .with_suggestion("Verify the API base URL in the configuration"),
        }
    }

    pub fn role_mismatch<E: Into<String>, A: Into<String>>(
        expected: E,
        actual: A,
        component: &str,
    ) -> Self {
        Self::RoleMismatch {
            expected: expected.into(),
            actual: actual.into(),
            context: ErrorContext::new(component),
        }
    }

    pub fn api<S: Into<String>>(status: u16, message: S, component: &str) -> Self {
        Self::Api {
            status,
            message: message.into(),
            context: ErrorContext::new(component).with_metadata("status", &status.to_string()),
        }
    }

    pub fn superseded(operation: &str, component: &str) -> Self {
        Self::Superseded {
            operation: operation.to_string(),
            context: ErrorContext::new(component).with_operation(operation),
        }
    }

    /// Get the error context
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            CbtsError::InvalidCredentials { context, .. } => Some(context),
            CbtsError::SessionExpired { context, .. } => Some(context),
            CbtsError::Network { context, .. } => Some(context),
            CbtsError::RoleMismatch { context, .. } => Some(context),
            CbtsError::Api { context, .. } => Some(context),
            CbtsError::Superseded { context, .. } => Some(context),
            CbtsError::Storage { context, .. } => Some(context),
            CbtsError::Config { context, .. } => Some(context),
            CbtsError::Validation { context, .. } => Some(context),
            CbtsError::Io(_) | CbtsError::Serialization(_) => None,
        }
    }

    /// Check if error is recoverable by retrying the same call
    pub fn is_recoverable(&self) -> bool {
        match self {
            CbtsError::Network { .. } => true,
            CbtsError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// True for failures that require the user to log in again
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            CbtsError::InvalidCredentials { .. } | CbtsError::SessionExpired { .. }
        )
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            CbtsError::Api { status, .. } => Some(*status),
            CbtsError::InvalidCredentials { .. } | CbtsError::SessionExpired { .. } => Some(401),
            _ => None,
        }
    }

    /// Log the error with appropriate level
    pub fn log(&self) {
        let error_id = self.context().map(|c| c.error_id.as_str());
        match self {
            CbtsError::Config { .. } | CbtsError::Storage { .. } | CbtsError::Io(_) => {
                error!(error_id = ?error_id, error = %self, "Local client error");
            }
            CbtsError::Network { .. } => {
                warn!(error_id = ?error_id, error = %self, "Network error (may be recoverable)");
            }
            CbtsError::InvalidCredentials { .. }
            | CbtsError::SessionExpired { .. }
            | CbtsError::RoleMismatch { .. }
            | CbtsError::Superseded { .. } => {
                warn!(error_id = ?error_id, error = %self, "Authentication flow error");
            }
            _ => {
                error!(error_id = ?error_id, error = %self, "Error occurred");
            }
        }
    }
}

/// Convenience macros for creating errors with context
#[macro_export]
macro_rules! config_error {
    ($msg:expr, $component:expr) => {
        $crate::CbtsError::Config {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check your configuration file")
                .with_suggestion("Run 'cbts config --init' to create a default config"),
        }
    };
    ($msg:expr, $component:expr, $source:expr) => {
        $crate::CbtsError::Config {
            message: $msg.to_string(),
            source: Some(Box::new($source)),
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check your configuration file"),
        }
    };
}

#[macro_export]
macro_rules! validation_error {
    ($msg:expr, $field:expr, $component:expr) => {
        $crate::CbtsError::Validation {
            message: $msg.to_string(),
            field: Some($field.to_string()),
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check the field value and format"),
        }
    };
}

#[macro_export]
macro_rules! storage_error {
    ($msg:expr, $component:expr) => {
        $crate::CbtsError::Storage {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component),
        }
    };
    ($msg:expr, $component:expr, $source:expr) => {
        $crate::CbtsError::Storage {
            message: $msg.to_string(),
            source: Some(Box::new($source)),
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check that the session directory exists and is writable"),
        }
    };
}
