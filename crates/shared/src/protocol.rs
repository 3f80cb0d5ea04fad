use serde::{Deserialize, Serialize};

use crate::domain::{GradeLevel, Identity, Preferences, Session, SkillLevel};

/// Session notifications pushed by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SessionChange {
    SignedIn(Session),
    TokenRefreshed(Session),
    SignedOut,
}

impl SessionChange {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionChange::SignedIn(_) => "signed_in",
            SessionChange::TokenRefreshed(_) => "token_refreshed",
            SessionChange::SignedOut => "signed_out",
        }
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionChange::SignedIn(session) | SessionChange::TokenRefreshed(session) => {
                Some(session)
            }
            SessionChange::SignedOut => None,
        }
    }

    pub fn into_session(self) -> Option<Session> {
        match self {
            SessionChange::SignedIn(session) | SessionChange::TokenRefreshed(session) => {
                Some(session)
            }
            SessionChange::SignedOut => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignUpMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpOutcome {
    Session(Session),
    /// Account created; the provider is waiting for email verification.
    VerificationPending(Identity),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub token: String,
    pub grade_level: GradeLevel,
    pub subjects: Vec<String>,
    pub skill_level: SkillLevel,
    pub name: String,
}

impl CreateUserRequest {
    pub fn new(token: impl Into<String>, name: impl Into<String>, preferences: &Preferences) -> Self {
        Self {
            token: token.into(),
            grade_level: preferences.grade_level,
            subjects: preferences.subjects.iter().cloned().collect(),
            skill_level: preferences.skill_level,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferencesLookupResponse {
    #[serde(default)]
    pub ans: Option<Preferences>,
}
