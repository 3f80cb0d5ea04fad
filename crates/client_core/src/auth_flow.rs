//! Sign-in / sign-up round-trip performed on behalf of the auth surface.

use shared::{
    domain::{Identity, Session},
    error::AuthError,
    protocol::{SignUpMetadata, SignUpOutcome},
};
use tracing::info;

use crate::IdentityProvider;

/// Name used for returning learners whose profile has no name.
pub const RETURNING_EXPLORER_NAME: &str = "Space Explorer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    #[default]
    SignIn,
    SignUp,
}

impl AuthMode {
    pub fn is_signup(self) -> bool {
        self == AuthMode::SignUp
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuthForm {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub password: String,
}

impl AuthForm {
    fn validate(&self, mode: AuthMode) -> Result<(), AuthError> {
        if mode.is_signup() && self.name.trim().is_empty() {
            return Err(AuthError::Validation { field: "name" });
        }
        if self.email.trim().is_empty() {
            return Err(AuthError::Validation { field: "email" });
        }
        if self.password.is_empty() {
            return Err(AuthError::Validation { field: "password" });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Completed { identity: Identity, is_signup: bool },
    /// Account exists but the provider wants the email confirmed first.
    VerificationPending { email: String },
}

impl AuthOutcome {
    /// Message the mascot shows after the round-trip.
    pub fn message(&self) -> &'static str {
        match self {
            AuthOutcome::Completed {
                is_signup: true, ..
            } => "Welcome to the galaxy, new Explorer!",
            AuthOutcome::Completed { .. } => "Welcome back, Space Explorer!",
            AuthOutcome::VerificationPending { .. } => {
                "Check your email for verification link, Explorer!"
            }
        }
    }
}

pub async fn authenticate(
    provider: &dyn IdentityProvider,
    mode: AuthMode,
    form: &AuthForm,
) -> Result<AuthOutcome, AuthError> {
    form.validate(mode)?;
    let email = form.email.trim();

    match mode {
        AuthMode::SignIn => {
            let session = provider.sign_in(email, &form.password).await?;
            info!(user_id = %session.identity.user_id.0, "auth: signed in");
            Ok(AuthOutcome::Completed {
                identity: returning_identity(&session),
                is_signup: false,
            })
        }
        AuthMode::SignUp => {
            let metadata = SignUpMetadata {
                name: non_empty(&form.name),
                phone: non_empty(&form.phone),
            };
            match provider.sign_up(email, &form.password, metadata).await? {
                SignUpOutcome::Session(session) => {
                    info!(user_id = %session.identity.user_id.0, "auth: signed up");
                    let mut identity = session.identity;
                    identity.name = non_empty(&form.name).or(identity.name);
                    identity.email = Some(email.to_string());
                    identity.phone = non_empty(&form.phone).or(identity.phone);
                    Ok(AuthOutcome::Completed {
                        identity,
                        is_signup: true,
                    })
                }
                SignUpOutcome::VerificationPending(identity) => {
                    info!(user_id = %identity.user_id.0, "auth: sign-up awaiting email verification");
                    Ok(AuthOutcome::VerificationPending {
                        email: email.to_string(),
                    })
                }
            }
        }
    }
}

fn returning_identity(session: &Session) -> Identity {
    let mut identity = session.identity.clone();
    if identity
        .name
        .as_deref()
        .map_or(true, |name| name.trim().is_empty())
    {
        identity.name = Some(RETURNING_EXPLORER_NAME.to_string());
    }
    identity
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}
