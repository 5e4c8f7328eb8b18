//! REST notification collaborator
//!
//! Fetches the historical snapshot and persists read state in bulk. The
//! session binding talks to it through the [`NotificationApi`] trait.

use futures_util::future::BoxFuture;
use serde::Deserialize;

use crate::error::{NotifyError, Result};
use crate::schema::{Credential, Notification, NotificationId};

/// Backend notification endpoints
pub trait NotificationApi: Send + Sync {
    /// Historical snapshot for a user, most recent first
    fn fetch_for_user<'a>(
        &'a self,
        user_id: &'a str,
        credential: &'a Credential,
    ) -> BoxFuture<'a, Result<Vec<Notification>>>;

    /// Mark every notification of a user read; returns the server's unread count afterwards
    fn mark_all_read<'a>(&'a self, user_id: &'a str, credential: &'a Credential) -> BoxFuture<'a, Result<u64>>;

    fn mark_one_read<'a>(
        &'a self,
        user_id: &'a str,
        id: &'a NotificationId,
        credential: &'a Credential,
    ) -> BoxFuture<'a, Result<()>>;
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

/// Map a non-2xx status to [`NotifyError::ApiStatus`]
fn check_status(status: reqwest::StatusCode, url: &str) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    Err(NotifyError::ApiStatus {
        status: status.as_u16(),
        url: url.to_string(),
    })
}

/// reqwest-backed implementation
#[derive(Debug, Clone)]
pub struct RestNotificationApi {
    base_url: String,
    client: reqwest::Client,
}

impl RestNotificationApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn checked(response: reqwest::Response) -> Result<reqwest::Response> {
        check_status(response.status(), response.url().as_str())?;
        Ok(response)
    }

    async fn fetch(&self, user_id: &str, credential: &Credential) -> Result<Vec<Notification>> {
        let url = self.url(&format!("/notifications/user/{}", user_id));
        tracing::debug!("GET {}", url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(credential.token())
            .send()
            .await?;
        Ok(Self::checked(response)?.json().await?)
    }

    async fn put_all_read(&self, user_id: &str, credential: &Credential) -> Result<u64> {
        let url = self.url(&format!("/notifications/user/{}/read-all", user_id));
        tracing::debug!("PUT {}", url);
        let response = self
            .client
            .put(&url)
            .bearer_auth(credential.token())
            .send()
            .await?;
        let body: CountResponse = Self::checked(response)?.json().await?;
        Ok(body.count)
    }

    async fn put_one_read(&self, id: &NotificationId, credential: &Credential) -> Result<()> {
        let url = self.url(&format!("/notifications/{}/read", id));
        tracing::debug!("PUT {}", url);
        let response = self
            .client
            .put(&url)
            .bearer_auth(credential.token())
            .send()
            .await?;
        Self::checked(response)?;
        Ok(())
    }
}

impl NotificationApi for RestNotificationApi {
    fn fetch_for_user<'a>(
        &'a self,
        user_id: &'a str,
        credential: &'a Credential,
    ) -> BoxFuture<'a, Result<Vec<Notification>>> {
        Box::pin(self.fetch(user_id, credential))
    }

    fn mark_all_read<'a>(&'a self, user_id: &'a str, credential: &'a Credential) -> BoxFuture<'a, Result<u64>> {
        Box::pin(self.put_all_read(user_id, credential))
    }

    fn mark_one_read<'a>(
        &'a self,
        _user_id: &'a str,
        id: &'a NotificationId,
        credential: &'a Credential,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.put_one_read(id, credential))
    }
}
