use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::Value;
use shared::{
    domain::Preferences,
    error::PreferenceError,
    protocol::{CreateUserRequest, PreferencesLookupResponse},
};
use tracing::debug;
use url::Url;

use crate::PreferenceBackend;

/// Learner-profile service reached over plain JSON-over-HTTP.
pub struct HttpPreferenceBackend {
    http: Client,
    base_url: Url,
}

impl HttpPreferenceBackend {
    pub fn new(base_url: &str) -> Result<Self, url::ParseError> {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: &str) -> Result<Self, url::ParseError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { http, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url, PreferenceError> {
        self.base_url
            .join(path)
            .map_err(|err| PreferenceError::Transport(err.to_string()))
    }
}

fn check_status(response: Response) -> Result<Response, PreferenceError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(PreferenceError::Status {
            status: status.as_u16(),
        })
    }
}

fn transport(err: reqwest::Error) -> PreferenceError {
    PreferenceError::Transport(err.to_string())
}

#[async_trait]
impl PreferenceBackend for HttpPreferenceBackend {
    async fn fetch_preferences(&self, token: &str) -> Result<Option<Preferences>, PreferenceError> {
        let mut url = self.endpoint("test")?;
        url.query_pairs_mut().append_pair("token", token);
        let response = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(transport)?;
        let body: PreferencesLookupResponse = check_status(response)?
            .json()
            .await
            .map_err(|err| PreferenceError::Decode(err.to_string()))?;
        debug!(found = body.ans.is_some(), "preferences: lookup finished");
        Ok(body.ans)
    }

    async fn store_preferences(
        &self,
        token: &str,
        name: &str,
        preferences: &Preferences,
    ) -> Result<(), PreferenceError> {
        let url = self.endpoint("create_user")?;
        let response = self
            .http
            .post(url)
            .json(&CreateUserRequest::new(token, name, preferences))
            .send()
            .await
            .map_err(transport)?;
        // The acknowledgement body carries nothing the client needs.
        let ack: Value = check_status(response)?
            .json()
            .await
            .unwrap_or(Value::Null);
        debug!(%ack, "preferences: stored");
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/preference_backend_tests.rs"]
mod tests;
