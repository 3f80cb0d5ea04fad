use thiserror::Error;

/// Failures while signing in or signing up. These never change the current screen.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing required field: {field}")]
    Validation { field: &'static str },
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
    #[error("network failure: {0}")]
    Network(String),
    #[error("identity provider rejected request: {0}")]
    Rejected(String),
}

impl AuthError {
    /// Message shown on the auth surface.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Validation { field } => format!("Please fill in your {field}."),
            AuthError::InvalidCredentials(message) | AuthError::Rejected(message)
                if !message.trim().is_empty() =>
            {
                message.clone()
            }
            AuthError::Network(_) => {
                "Mission control is unreachable; check your connection and try again.".to_string()
            }
            _ => "Something went wrong. Please try again.".to_string(),
        }
    }

    pub fn from_transport(err: impl std::fmt::Display) -> Self {
        let message = err.to_string();
        let lower = message.to_ascii_lowercase();
        if lower.contains("invalid login credentials")
            || lower.contains("invalid_grant")
            || lower.contains("invalid credential")
        {
            AuthError::InvalidCredentials(message)
        } else {
            AuthError::Network(message)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreferenceError {
    #[error("preference backend transport failure: {0}")]
    Transport(String),
    #[error("preference backend returned status {status}")]
    Status { status: u16 },
    #[error("preference backend response could not be decoded: {0}")]
    Decode(String),
    #[error("preference backend is unavailable")]
    MissingBackend,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    #[error("identity subscription lagged and dropped {skipped} notifications")]
    Lagged { skipped: u64 },
    #[error("identity subscription closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuestionnaireError {
    #[error("select at least one subject before continuing")]
    NoSubjectsSelected,
    #[error("unknown subject: {0}")]
    UnknownSubject(String),
    #[error("questionnaire step {expected} expected, currently at {actual}")]
    WrongStep {
        expected: &'static str,
        actual: &'static str,
    },
}
