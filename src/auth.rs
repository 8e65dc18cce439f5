//! Caller identity.
//!
//! Requests carry a session token, either as `Authorization: Bearer <token>`
//! or in the `sb-access-token` cookie set by the OAuth callback. An
//! [`IdentityProvider`] turns that token into a [`Session`]; the production
//! implementation talks to a Supabase (GoTrue-compatible) auth server.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub user_id: String,
    pub email: Option<String>,
    #[serde(skip)]
    pub access_token: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    /// The identity server could not be reached or answered garbage.
    #[error("Identity provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The identity server rejected the request.
    #[error("Identity provider rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Resolves session tokens and completes OAuth logins.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The session for `access_token`, or `None` when the token is unknown
    /// or expired.
    async fn current_session(&self, access_token: &str) -> Result<Option<Session>, AuthError>;

    /// Exchange an OAuth authorization code for a session.
    async fn exchange_code(&self, code: &str, code_verifier: Option<&str>) -> Result<Session, AuthError>;
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    user: UserResponse,
}

#[derive(Debug, Serialize)]
struct PkceGrant<'a> {
    auth_code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code_verifier: Option<&'a str>,
}

/// [`IdentityProvider`] for a Supabase project's auth REST API.
#[derive(Debug, Clone)]
pub struct SupabaseAuth {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseAuth {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, anon_key)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.base_url)
    }
}

#[async_trait]
impl IdentityProvider for SupabaseAuth {
    async fn current_session(&self, access_token: &str) -> Result<Option<Session>, AuthError> {
        let resp = self
            .http
            .get(self.url("user"))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        match resp.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                debug!("Session token rejected by identity provider");
                Ok(None)
            }
            status if status.is_success() => {
                let user: UserResponse = resp.json().await?;
                Ok(Some(Session {
                    user_id: user.id,
                    email: user.email,
                    access_token: access_token.to_string(),
                }))
            }
            status => Err(AuthError::Rejected {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn exchange_code(&self, code: &str, code_verifier: Option<&str>) -> Result<Session, AuthError> {
        let resp = self
            .http
            .post(self.url("token"))
            .query(&[("grant_type", "pkce")])
            .header("apikey", &self.anon_key)
            .json(&PkceGrant {
                auth_code: code,
                code_verifier,
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        let token: TokenResponse = resp.json().await?;
        Ok(Session {
            user_id: token.user.id,
            email: token.user.email,
            access_token: token.access_token,
        })
    }
}
