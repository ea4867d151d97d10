//! GoTrue-style auth API client.
//!
//! All calls send the project's anon key as `apikey`. Calls made on behalf of
//! a signed-in user send their access token as the bearer; everything else
//! sends the anon key there too.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, instrument};
use url::Url;

use cloud_kitchen_core::Email;

use super::{AuthUser, BackendError, IdentityProvider, SignUpResponse, UserMetadata};
use crate::config::BackendConfig;
use crate::session::Session;

// ─────────────────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    #[serde(default)]
    expires_at: Option<i64>,
    user: AuthUser,
}

impl TokenResponse {
    fn into_session(self) -> Result<Session, BackendError> {
        let expires_at = match self.expires_at.and_then(|ts| DateTime::from_timestamp(ts, 0)) {
            Some(at) => at,
            None => TimeDelta::try_seconds(self.expires_in)
                .and_then(|ttl| Utc::now().checked_add_signed(ttl))
                .ok_or_else(|| BackendError::Api {
                    status: 200,
                    code: None,
                    message: format!("token lifetime out of range: {}", self.expires_in),
                })?,
        };

        Ok(Session::new(
            SecretString::from(self.access_token),
            SecretString::from(self.refresh_token),
            expires_at,
            self.user,
        ))
    }
}

/// Error body. Older servers send `error`/`error_description`, newer ones
/// `error_code`/`msg`.
#[derive(Debug, Default, Deserialize)]
struct AuthErrorBody {
    error: Option<String>,
    error_code: Option<String>,
    error_description: Option<String>,
    msg: Option<String>,
    message: Option<String>,
}

impl AuthErrorBody {
    fn into_error(self, status: StatusCode, raw: &str) -> BackendError {
        let code = self.error_code.or_else(|| self.error.clone());
        let message = self
            .msg
            .or(self.message)
            .or(self.error_description)
            .or(self.error)
            .unwrap_or_else(|| super::snippet(raw));

        BackendError::Api {
            status: status.as_u16(),
            code,
            message,
        }
    }
}

#[derive(Serialize)]
struct PasswordCredentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct SignUpBody<'a> {
    email: &'a str,
    password: &'a str,
    data: &'a UserMetadata,
}

#[derive(Serialize)]
struct RefreshBody<'a> {
    refresh_token: &'a str,
}

#[derive(Serialize)]
struct ResendBody<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    email: &'a str,
}

#[derive(Serialize)]
struct EmailBody<'a> {
    email: &'a str,
}

// ─────────────────────────────────────────────────────────────────────────────
// Auth Client
// ─────────────────────────────────────────────────────────────────────────────

/// Client for the hosted auth API.
#[derive(Clone)]
pub struct AuthClient {
    inner: Arc<AuthClientInner>,
}

struct AuthClientInner {
    client: reqwest::Client,
    base: Url,
    anon_key: SecretString,
}

impl AuthClient {
    /// Create a new auth API client.
    ///
    /// # Errors
    ///
    /// Returns an error if the auth endpoint URL cannot be derived from the
    /// project URL.
    pub fn new(config: &BackendConfig, client: reqwest::Client) -> Result<Self, BackendError> {
        Ok(Self {
            inner: Arc::new(AuthClientInner {
                client,
                base: config.url.join("auth/v1/")?,
                anon_key: config.anon_key.clone(),
            }),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        Ok(self.inner.base.join(path)?)
    }

    fn request(&self, method: Method, url: Url, bearer: Option<&SecretString>) -> RequestBuilder {
        let bearer = bearer.unwrap_or(&self.inner.anon_key);
        self.inner
            .client
            .request(method, url)
            .header("apikey", self.inner.anon_key.expose_secret())
            .bearer_auth(bearer.expose_secret())
    }

    /// Send a request and return the body of a successful response.
    async fn send(&self, request: RequestBuilder) -> Result<String, BackendError> {
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(BackendError::RateLimited(super::retry_after(&response)));
        }

        let body = response.text().await?;

        if !status.is_success() {
            debug!(
                status = %status,
                body = %super::snippet(&body),
                "Auth API returned non-success status"
            );
            let parsed: AuthErrorBody = serde_json::from_str(&body).unwrap_or_default();
            return Err(parsed.into_error(status, &body));
        }

        Ok(body)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, BackendError> {
        let body = self.send(request).await?;
        Ok(serde_json::from_str(&body)?)
    }

    fn token_url(&self, grant_type: &str) -> Result<Url, BackendError> {
        let mut url = self.endpoint("token")?;
        url.query_pairs_mut().append_pair("grant_type", grant_type);
        Ok(url)
    }
}

#[async_trait]
impl IdentityProvider for AuthClient {
    #[instrument(skip_all, fields(email_domain = %email.domain()))]
    async fn sign_in_with_password(
        &self,
        email: &Email,
        password: &SecretString,
    ) -> Result<Session, BackendError> {
        let url = self.token_url("password")?;
        let request = self.request(Method::POST, url, None).json(&PasswordCredentials {
            email: email.as_str(),
            password: password.expose_secret(),
        });

        let token: TokenResponse = self.send_json(request).await?;
        token.into_session()
    }

    #[instrument(skip_all, fields(email_domain = %email.domain()))]
    async fn sign_up(
        &self,
        email: &Email,
        password: &SecretString,
        metadata: &UserMetadata,
    ) -> Result<SignUpResponse, BackendError> {
        let url = self.endpoint("signup")?;
        let request = self.request(Method::POST, url, None).json(&SignUpBody {
            email: email.as_str(),
            password: password.expose_secret(),
            data: metadata,
        });

        let body: serde_json::Value = self.send_json(request).await?;

        // With auto-confirm the body is a token response; otherwise it is the
        // bare user (or `{ "user": ..., "session": null }` on newer servers).
        if body.get("access_token").is_some() {
            let token: TokenResponse = serde_json::from_value(body)?;
            return token.into_session().map(SignUpResponse::Session);
        }

        let user_value = match body.get("user") {
            Some(user) if user.is_object() => user.clone(),
            _ => body,
        };
        let user: AuthUser = serde_json::from_value(user_value)?;
        Ok(SignUpResponse::ConfirmationRequired(user))
    }

    #[instrument(skip_all)]
    async fn refresh_session(
        &self,
        refresh_token: &SecretString,
    ) -> Result<Session, BackendError> {
        let url = self.token_url("refresh_token")?;
        let request = self.request(Method::POST, url, None).json(&RefreshBody {
            refresh_token: refresh_token.expose_secret(),
        });

        let token: TokenResponse = self.send_json(request).await?;
        token.into_session()
    }

    #[instrument(skip_all)]
    async fn sign_out(&self, access_token: &SecretString) -> Result<(), BackendError> {
        let url = self.endpoint("logout")?;
        self.send(self.request(Method::POST, url, Some(access_token)))
            .await
            .map(|_| ())
    }

    #[instrument(skip_all, fields(email_domain = %email.domain()))]
    async fn resend_verification(&self, email: &Email) -> Result<(), BackendError> {
        let url = self.endpoint("resend")?;
        let request = self.request(Method::POST, url, None).json(&ResendBody {
            kind: "signup",
            email: email.as_str(),
        });
        self.send(request).await.map(|_| ())
    }

    #[instrument(skip_all, fields(email_domain = %email.domain()))]
    async fn reset_password(
        &self,
        email: &Email,
        redirect_to: Option<&Url>,
    ) -> Result<(), BackendError> {
        let mut url = self.endpoint("recover")?;
        if let Some(redirect) = redirect_to {
            url.query_pairs_mut()
                .append_pair("redirect_to", redirect.as_str());
        }
        let request = self.request(Method::POST, url, None).json(&EmailBody {
            email: email.as_str(),
        });
        self.send(request).await.map(|_| ())
    }
}
