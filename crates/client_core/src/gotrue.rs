//! Identity provider backed by a GoTrue-compatible REST auth service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::{
    domain::{Identity, Session, UserId},
    error::AuthError,
    protocol::{SessionChange, SignUpMetadata, SignUpOutcome},
};
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::IdentityProvider;

const SESSION_CHANGE_CAPACITY: usize = 64;

pub struct GoTrueIdentityProvider {
    http: Client,
    auth_url: Url,
    anon_key: String,
    session: RwLock<Option<Session>>,
    changes: broadcast::Sender<SessionChange>,
}

#[derive(Debug, Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshGrant<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Serialize)]
struct SignUpRequest<'a> {
    email: &'a str,
    password: &'a str,
    data: &'a SignUpMetadata,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: UserPayload,
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    user_metadata: UserMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct UserMetadata {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    phone: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl ErrorBody {
    fn into_message(self) -> Option<String> {
        self.error_description
            .or(self.msg)
            .or(self.message)
            .or(self.error)
    }
}

impl UserPayload {
    fn into_identity(self) -> Identity {
        Identity {
            user_id: UserId(self.id),
            name: filled(self.user_metadata.name),
            email: filled(self.email),
            phone: filled(self.user_metadata.phone).or(filled(self.phone)),
        }
    }
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .or_else(|| {
                self.expires_in
                    .map(|secs| Utc::now() + chrono::Duration::seconds(secs))
            });
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            identity: self.user.into_identity(),
        }
    }
}

fn filled(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl GoTrueIdentityProvider {
    /// `project_url` is the service root; requests go to `{project_url}/auth/v1/...`.
    pub fn new(project_url: &str, anon_key: impl Into<String>) -> Result<Self, url::ParseError> {
        let mut auth_url = Url::parse(project_url)?;
        let path = format!("{}/auth/v1/", auth_url.path().trim_end_matches('/'));
        auth_url.set_path(&path);
        let (changes, _) = broadcast::channel(SESSION_CHANGE_CAPACITY);
        Ok(Self {
            http: Client::new(),
            auth_url,
            anon_key: anon_key.into(),
            session: RwLock::new(None),
            changes,
        })
    }

    /// Exchanges the stored refresh token for a fresh session.
    pub async fn refresh_session(&self) -> Result<Session, AuthError> {
        let refresh_token = self
            .session
            .read()
            .await
            .as_ref()
            .and_then(|session| session.refresh_token.clone())
            .ok_or(AuthError::Validation {
                field: "refresh_token",
            })?;
        let response = self
            .send(self.request("token?grant_type=refresh_token")?.json(&RefreshGrant {
                refresh_token: &refresh_token,
            }))
            .await?;
        let session = decode_token(response).await?.into_session();
        self.store(SessionChange::TokenRefreshed(session.clone())).await;
        Ok(session)
    }

    fn request(&self, path: &str) -> Result<RequestBuilder, AuthError> {
        let url = self
            .auth_url
            .join(path)
            .map_err(|err| AuthError::Network(err.to_string()))?;
        Ok(self.http.post(url).header("apikey", &self.anon_key))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, AuthError> {
        let response = request.send().await.map_err(AuthError::from_transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body: ErrorBody = response.json().await.unwrap_or_default();
        let message = body
            .into_message()
            .unwrap_or_else(|| format!("request failed with status {status}"));
        warn!(status = status.as_u16(), %message, "auth: provider rejected request");
        let bad_credentials = status.as_u16() == 401
            || (status.as_u16() == 400 && message.to_ascii_lowercase().contains("credentials"));
        if bad_credentials {
            Err(AuthError::InvalidCredentials(message))
        } else {
            Err(AuthError::Rejected(message))
        }
    }

    async fn store(&self, change: SessionChange) {
        *self.session.write().await = change.session().cloned();
        info!(change = change.kind(), "auth: session changed");
        let _ = self.changes.send(change);
    }
}

async fn decode_token(response: Response) -> Result<TokenResponse, AuthError> {
    response
        .json()
        .await
        .map_err(|err| AuthError::Rejected(format!("malformed token response: {err}")))
}

#[async_trait]
impl IdentityProvider for GoTrueIdentityProvider {
    fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.changes.subscribe()
    }

    async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        Ok(self.session.read().await.clone())
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let response = self
            .send(
                self.request("token?grant_type=password")?
                    .json(&PasswordGrant { email, password }),
            )
            .await?;
        let session = decode_token(response).await?.into_session();
        self.store(SessionChange::SignedIn(session.clone())).await;
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: SignUpMetadata,
    ) -> Result<SignUpOutcome, AuthError> {
        let response = self
            .send(self.request("signup")?.json(&SignUpRequest {
                email,
                password,
                data: &metadata,
            }))
            .await?;
        let body: Value = response
            .json()
            .await
            .map_err(|err| AuthError::Rejected(format!("malformed sign-up response: {err}")))?;

        if body.get("access_token").is_some() {
            let token: TokenResponse = serde_json::from_value(body)
                .map_err(|err| AuthError::Rejected(format!("malformed sign-up session: {err}")))?;
            let session = token.into_session();
            self.store(SessionChange::SignedIn(session.clone())).await;
            return Ok(SignUpOutcome::Session(session));
        }

        // Without a session the service returns the bare user (or a `user` wrapper).
        let user = body.get("user").cloned().unwrap_or(body);
        let user: UserPayload = serde_json::from_value(user)
            .map_err(|err| AuthError::Rejected(format!("malformed sign-up user: {err}")))?;
        Ok(SignUpOutcome::VerificationPending(user.into_identity()))
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let token = self
            .session
            .read()
            .await
            .as_ref()
            .map(|session| session.access_token.clone());
        if let Some(token) = token {
            let logout = self.request("logout")?.bearer_auth(token);
            if let Err(err) = self.send(logout).await {
                // The local session is dropped regardless.
                warn!(%err, "auth: remote sign-out failed");
            }
        }
        self.store(SessionChange::SignedOut).await;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/gotrue_tests.rs"]
mod tests;
