//! PostgREST-style table client for profiles and orders.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, de::DeserializeOwned};
use tracing::{debug, instrument};
use url::Url;

use cloud_kitchen_core::UserId;

use super::{BackendError, OrderStore, PG_INSUFFICIENT_PRIVILEGE, ProfileStore};
use crate::config::BackendConfig;
use crate::models::{NewOrder, NewOrderItem, OrderRecord, Profile};

/// PostgREST error body.
#[derive(Debug, Default, Deserialize)]
struct RestErrorBody {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
}

impl RestErrorBody {
    fn into_error(self, status: StatusCode, raw: &str) -> BackendError {
        let message = self
            .message
            .or(self.details)
            .unwrap_or_else(|| super::snippet(raw));

        let denied = matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
            || self.code.as_deref() == Some(PG_INSUFFICIENT_PRIVILEGE);

        if denied {
            return BackendError::PermissionDenied(message);
        }
        if status == StatusCode::NOT_FOUND {
            return BackendError::NotFound(message);
        }

        BackendError::Api {
            status: status.as_u16(),
            code: self.code,
            message,
        }
    }
}

/// Client for the hosted relational store.
#[derive(Clone)]
pub struct RestClient {
    inner: Arc<RestClientInner>,
}

struct RestClientInner {
    client: reqwest::Client,
    base: Url,
    anon_key: SecretString,
}

impl RestClient {
    /// Create a new table API client.
    ///
    /// # Errors
    ///
    /// Returns an error if the REST endpoint URL cannot be derived from the
    /// project URL.
    pub fn new(config: &BackendConfig, client: reqwest::Client) -> Result<Self, BackendError> {
        Ok(Self {
            inner: Arc::new(RestClientInner {
                client,
                base: config.url.join("rest/v1/")?,
                anon_key: config.anon_key.clone(),
            }),
        })
    }

    fn table(&self, name: &str) -> Result<Url, BackendError> {
        Ok(self.inner.base.join(name)?)
    }

    fn request(&self, method: Method, url: Url, bearer: Option<&SecretString>) -> RequestBuilder {
        let bearer = bearer.unwrap_or(&self.inner.anon_key);
        self.inner
            .client
            .request(method, url)
            .header("apikey", self.inner.anon_key.expose_secret())
            .bearer_auth(bearer.expose_secret())
    }

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
                "REST API returned non-success status"
            );
            let parsed: RestErrorBody = serde_json::from_str(&body).unwrap_or_default();
            return Err(parsed.into_error(status, &body));
        }

        Ok(body)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, BackendError> {
        let body = self.send(request).await?;
        Ok(serde_json::from_str(&body)?)
    }

    fn profile_url(&self, id: UserId) -> Result<Url, BackendError> {
        let mut url = self.table("profiles")?;
        url.query_pairs_mut()
            .append_pair("id", &format!("eq.{id}"))
            .append_pair("select", "*");
        Ok(url)
    }
}

#[async_trait]
impl ProfileStore for RestClient {
    #[instrument(skip(self, access_token), fields(user_id = %id))]
    async fn fetch_profile(
        &self,
        id: UserId,
        access_token: Option<&SecretString>,
    ) -> Result<Option<Profile>, BackendError> {
        let url = self.profile_url(id)?;
        let rows: Vec<Profile> = self
            .send_json(self.request(Method::GET, url, access_token))
            .await?;
        Ok(rows.into_iter().next())
    }

    #[instrument(skip_all, fields(user_id = %profile.id))]
    async fn insert_profile(
        &self,
        profile: &Profile,
        access_token: Option<&SecretString>,
    ) -> Result<(), BackendError> {
        let url = self.table("profiles")?;
        let request = self
            .request(Method::POST, url, access_token)
            .header("Prefer", "return=minimal")
            .json(profile);
        self.send(request).await.map(|_| ())
    }
}

#[async_trait]
impl OrderStore for RestClient {
    #[instrument(skip_all, fields(restaurant_id = %order.restaurant_id))]
    async fn insert_order(
        &self,
        order: &NewOrder,
        access_token: Option<&SecretString>,
    ) -> Result<OrderRecord, BackendError> {
        let url = self.table("orders")?;
        let request = self
            .request(Method::POST, url, access_token)
            .header("Prefer", "return=representation")
            .json(order);

        let rows: Vec<OrderRecord> = self.send_json(request).await?;
        rows.into_iter().next().ok_or_else(|| BackendError::Api {
            status: 201,
            code: None,
            message: "order insert returned no row".to_string(),
        })
    }

    #[instrument(skip_all, fields(count = items.len()))]
    async fn insert_order_items(
        &self,
        items: &[NewOrderItem],
        access_token: Option<&SecretString>,
    ) -> Result<(), BackendError> {
        let url = self.table("order_items")?;
        let request = self
            .request(Method::POST, url, access_token)
            .header("Prefer", "return=minimal")
            .json(items);
        self.send(request).await.map(|_| ())
    }
}
