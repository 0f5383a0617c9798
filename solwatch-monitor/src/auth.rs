//! Thin client for the backend authentication endpoint.
//!
//! Solwatch owns no accounts or tokens: credentials are forwarded to the
//! platform's sign-in endpoint and the monitor only reacts to the resulting
//! signed-in / signed-out events. With no endpoint configured (bench setups
//! against gateway-sim) credentials are accepted unchecked.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::AuthConf;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid login")]
    Rejected,
    #[error("email and password must not be empty")]
    MissingCredentials,
    #[error("auth backend unreachable: {0}")]
    Unreachable(String),
}

#[derive(Debug, Serialize)]
struct SignInRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct SignInResponse {
    user_id: String,
}

pub struct AuthClient {
    http: reqwest::Client,
    conf: AuthConf,
}

impl AuthClient {
    pub fn new(conf: AuthConf) -> Self {
        Self { http: reqwest::Client::new(), conf }
    }

    /// Returns the backend user id on success.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<String, AuthError> {
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        let Some(endpoint) = self.conf.endpoint.as_deref() else {
            warn!("no auth endpoint configured, accepting {} unchecked (dev mode)", email);
            return Ok(email.to_string());
        };

        let response = self
            .http
            .post(endpoint)
            .json(&SignInRequest { email, password })
            .send()
            .await
            .map_err(|e| AuthError::Unreachable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AuthError::Rejected);
        }
        if !response.status().is_success() {
            return Err(AuthError::Unreachable(format!(
                "auth backend returned {}",
                response.status()
            )));
        }

        let body: SignInResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Unreachable(e.to_string()))?;
        Ok(body.user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_credentials_are_rejected_locally() {
        let client = AuthClient::new(AuthConf::default());
        assert!(matches!(
            client.sign_in("", "secret").await.unwrap_err(),
            AuthError::MissingCredentials
        ));
        assert!(matches!(
            client.sign_in("a@b.c", "").await.unwrap_err(),
            AuthError::MissingCredentials
        ));
    }

    #[tokio::test]
    async fn dev_mode_accepts_any_non_empty_credentials() {
        let client = AuthClient::new(AuthConf { endpoint: None });
        let user = client.sign_in("ops@example.com", "hunter2").await.unwrap();
        assert_eq!(user, "ops@example.com");
    }
}
