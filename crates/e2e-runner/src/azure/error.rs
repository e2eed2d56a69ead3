//! Azure CLI error classification
//!
//! The `az` CLI reports failures as text on stderr, usually in the form
//! `(ErrorCode) message` or `Code: ErrorCode`. This module extracts the code
//! and maps it onto the categories the retry and cleanup logic care about.

use thiserror::Error;

/// Azure error categories for retry and cleanup logic
#[derive(Debug, Error)]
pub enum AzError {
    /// Resource was not found (safe to skip in cleanup)
    #[error("Resource not found: {message}")]
    NotFound { message: String },

    /// Resource already exists (safe to ignore in create operations)
    #[error("Resource already exists: {message}")]
    AlreadyExists { message: String },

    /// Rate limit exceeded (retryable)
    #[error("Rate limit exceeded")]
    Throttled,

    /// Resource is mid-transition, e.g. a group that is still being deleted
    #[error("Resource is busy: {message}")]
    Conflict { message: String },

    /// Credentials missing, expired or lacking permission
    #[error("Not authorized: {message}")]
    Unauthorized { message: String },

    /// Any other CLI failure
    #[error("az {command} failed: {message}")]
    Cli {
        command: String,
        code: Option<String>,
        message: String,
    },
}

impl AzError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AzError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, AzError::AlreadyExists { .. })
    }
}

/// Known error codes for "not found" conditions
const NOT_FOUND_CODES: &[&str] = &[
    "ResourceGroupNotFound",
    "ResourceNotFound",
    "StorageAccountNotFound",
    "ShareNotFound",
    "ParentResourceNotFound",
    "DeploymentNotFound",
];

/// Known error codes for "already exists" conditions
const ALREADY_EXISTS_CODES: &[&str] = &[
    "StorageAccountAlreadyTaken",
    "StorageAccountAlreadyExists",
    "ShareAlreadyExists",
    "ResourceGroupAlreadyExists",
];

/// Known error codes for throttling
const THROTTLING_CODES: &[&str] = &["TooManyRequests", "RetryableError", "ServerBusy"];

/// Known error codes for in-flight state transitions
const CONFLICT_CODES: &[&str] = &[
    "ResourceGroupBeingDeleted",
    "Conflict",
    "AnotherOperationInProgress",
    "OperationNotAllowed",
];

/// Known error codes for authentication and authorization
const AUTH_CODES: &[&str] = &[
    "AuthorizationFailed",
    "AuthenticationFailed",
    "InvalidAuthenticationTokenTenant",
    "ExpiredAuthenticationToken",
];

/// Classify a failed `az` invocation from its subcommand and stderr.
pub fn classify_az_error(command: &str, stderr: &str) -> AzError {
    let message = first_meaningful_line(stderr);
    let code = extract_error_code(stderr);

    match code.as_deref() {
        Some(c) if NOT_FOUND_CODES.contains(&c) => AzError::NotFound { message },
        Some(c) if ALREADY_EXISTS_CODES.contains(&c) => AzError::AlreadyExists { message },
        Some(c) if THROTTLING_CODES.contains(&c) => AzError::Throttled,
        Some(c) if CONFLICT_CODES.contains(&c) => AzError::Conflict { message },
        Some(c) if AUTH_CODES.contains(&c) => AzError::Unauthorized { message },
        _ if stderr.contains("could not be found") => AzError::NotFound { message },
        _ if stderr.contains("az login") => AzError::Unauthorized { message },
        _ => AzError::Cli {
            command: command.to_string(),
            code,
            message,
        },
    }
}

/// Classify an `anyhow::Error` by looking for an [`AzError`] in its chain.
pub fn classify_anyhow_error(error: &anyhow::Error) -> Option<&AzError> {
    error.chain().find_map(|cause| cause.downcast_ref::<AzError>())
}

/// True if `error` (or any cause) is a not-found error
pub fn is_not_found(error: &anyhow::Error) -> bool {
    classify_anyhow_error(error).is_some_and(AzError::is_not_found)
}

/// Treat a not-found error as success
///
/// Cleanup operations use this so that deleting something already gone is a no-op.
pub fn ignore_not_found(result: anyhow::Result<()>) -> anyhow::Result<()> {
    match result {
        Err(e) if is_not_found(&e) => Ok(()),
        other => other,
    }
}

/// Extract an error code from `(Code) message` or `Code: Code` forms.
fn extract_error_code(stderr: &str) -> Option<String> {
    for line in stderr.lines() {
        let line = line.trim();
        let line = line.strip_prefix("ERROR:").map(str::trim).unwrap_or(line);

        if let Some(rest) = line.strip_prefix('(') {
            if let Some(end) = rest.find(')') {
                let code = &rest[..end];
                if is_code_like(code) {
                    return Some(code.to_string());
                }
            }
        }
        if let Some(rest) = line.strip_prefix("Code:") {
            let code = rest.trim();
            if is_code_like(code) {
                return Some(code.to_string());
            }
        }
    }
    None
}

fn is_code_like(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '.')
}

fn first_meaningful_line(stderr: &str) -> String {
    stderr
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with("WARNING"))
        .unwrap_or("unknown error")
        .to_string()
}
