//! HTTP control plane.
//!
//! Session inspection and message delivery go over plain HTTP, separate from
//! the event channel. All routes live under a configurable prefix
//! (`/api/whatsapp` by default):
//!
//! | Route         | Purpose                           |
//! |---------------|-----------------------------------|
//! | `GET status`  | session snapshot                  |
//! | `POST send`   | deliver `{to, message}`           |
//! | `POST logout` | end the gateway-side session      |
//! | `GET ping`    | keep-alive probe                  |

use std::time::Duration;

use coachlink_proto::{SendRequest, SessionSnapshot};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::GatewayConfig;
use crate::error::{ControlPlaneError, GatewayError};

const MAX_ERROR_BODY: usize = 256;

/// Operations offered by the gateway's HTTP control plane.
pub trait ControlPlane: Send + Sync + 'static {
    /// Fetch the gateway's view of the session.
    fn status(&self) -> BoxFuture<'_, Result<SessionSnapshot, ControlPlaneError>>;

    /// Deliver a message.
    fn send(&self, request: SendRequest) -> BoxFuture<'_, Result<(), ControlPlaneError>>;

    /// End the gateway-side session.
    fn logout(&self) -> BoxFuture<'_, Result<(), ControlPlaneError>>;

    /// Keep-alive probe.
    fn ping(&self) -> BoxFuture<'_, Result<(), ControlPlaneError>>;
}

/// [`ControlPlane`] over reqwest.
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    client: reqwest::Client,
    base: String,
}

impl HttpControlPlane {
    /// Create a control-plane client for `base_url` + `api_prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str, api_prefix: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url, api_prefix))
    }

    /// Use an existing reqwest client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: &str, api_prefix: &str) -> Self {
        let base = format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            api_prefix.trim_matches('/')
        );
        Self {
            client,
            base: base.trim_end_matches('/').to_string(),
        }
    }

    /// Build from the gateway configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        Self::new(
            &config.control_plane_url,
            &config.api_prefix,
            config.request_timeout(),
        )
    }

    /// Full URL for a route.
    #[must_use]
    pub fn url(&self, route: &str) -> String {
        format!("{}/{}", self.base, route)
    }

    async fn execute(
        &self,
        route: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ControlPlaneError> {
        debug!(route, "control plane request");
        let response = request.send().await.map_err(|e| ControlPlaneError::Request {
            path: route.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            truncate_chars(&mut body, MAX_ERROR_BODY);
            return Err(ControlPlaneError::Status {
                path: route.to_string(),
                code: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, route: &str) -> Result<T, ControlPlaneError> {
        let response = self
            .execute(route, self.client.get(self.url(route)))
            .await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ControlPlaneError::Decode {
                path: route.to_string(),
                reason: e.to_string(),
            })
    }
}

impl ControlPlane for HttpControlPlane {
    fn status(&self) -> BoxFuture<'_, Result<SessionSnapshot, ControlPlaneError>> {
        Box::pin(self.get_json("status"))
    }

    fn send(&self, request: SendRequest) -> BoxFuture<'_, Result<(), ControlPlaneError>> {
        Box::pin(async move {
            let builder = self.client.post(self.url("send")).json(&request);
            self.execute("send", builder).await.map(drop)
        })
    }

    fn logout(&self) -> BoxFuture<'_, Result<(), ControlPlaneError>> {
        Box::pin(async move {
            let builder = self.client.post(self.url("logout"));
            self.execute("logout", builder).await.map(drop)
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), ControlPlaneError>> {
        Box::pin(async move {
            let builder = self.client.get(self.url("ping"));
            self.execute("ping", builder).await.map(drop)
        })
    }
}

fn truncate_chars(text: &mut String, max: usize) {
    if let Some((idx, _)) = text.char_indices().nth(max) {
        text.truncate(idx);
    }
}
