//! REST client for the map server

use crate::config::SyncConfig;
use crate::model::envelope::{decode_ack, decode_field};
use crate::model::{Connection, Pin, PinId, RawSnapshot, Snapshot};
use crate::retry::{with_retry, RetryConfig};
use crate::sync::SnapshotSource;
use crate::{PinSyncError, Result};
use async_trait::async_trait;
use serde::Serialize;

/// Body of `POST /pins`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPin {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl NewPin {
    pub fn new(name: impl Into<String>, lat: f64, lng: f64) -> Self {
        Self {
            name: name.into(),
            lat,
            lng,
            image_url: None,
        }
    }

    pub fn with_image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    /// Same bounds the server's pins are held to
    pub fn validate(&self) -> Result<()> {
        Pin::new("new", self.name.clone(), self.lat, self.lng)
            .validate()
            .map_err(|e| PinSyncError::Config(format!("invalid pin: {}", e)))
    }
}

/// Body of `POST /connections`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewConnection<'a> {
    source_id: &'a str,
    target_id: &'a str,
}

/// REST client for the map server
///
/// Reads are single attempts (the poller retries on its next tick); writes go
/// through [`with_retry`].
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
    retry: RetryConfig,
}

impl ApiClient {
    /// Create a client from config
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            base_url: config.server_url.trim_end_matches('/').to_string(),
            client,
            retry: RetryConfig::default(),
        })
    }

    /// Override the retry policy for writes
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Raw body of `GET /pins`
    pub async fn get_pins_raw(&self) -> Result<String> {
        self.get_text("/pins").await
    }

    /// Raw body of `GET /connections`
    pub async fn get_connections_raw(&self) -> Result<String> {
        self.get_text("/connections").await
    }

    /// Fetch and decode a full snapshot
    pub async fn fetch_snapshot(&self) -> Result<Snapshot> {
        self.fetch_raw().await?.decode()
    }

    /// Create a pin; the server assigns its ID, location and timestamp
    pub async fn create_pin(&self, pin: &NewPin) -> Result<Pin> {
        pin.validate()?;
        let url = self.url("/pins");
        let body = with_retry(&self.retry, "create_pin", || {
            let request = self.client.post(&url).json(pin);
            async move { read_body(request.send().await?).await }
        })
        .await?;

        let created: Pin = decode_field(&body, "pin")?;
        tracing::info!(pin = %created.id, name = %created.name, "Created pin");
        Ok(created)
    }

    pub async fn delete_pin(&self, id: &PinId) -> Result<()> {
        let url = self.url(&format!("/pins/{}", urlencoding::encode(id.as_str())));
        let body = with_retry(&self.retry, "delete_pin", || {
            let request = self.client.delete(&url);
            async move { read_body(request.send().await?).await }
        })
        .await?;

        decode_ack(&body)?;
        tracing::info!(pin = %id, "Deleted pin");
        Ok(())
    }

    /// Connect two existing pins
    pub async fn create_connection(&self, source: &PinId, target: &PinId) -> Result<Connection> {
        let url = self.url("/connections");
        let payload = NewConnection {
            source_id: source.as_str(),
            target_id: target.as_str(),
        };
        let body = with_retry(&self.retry, "create_connection", || {
            let request = self.client.post(&url).json(&payload);
            async move { read_body(request.send().await?).await }
        })
        .await?;

        let created: Connection = decode_field(&body, "connection")?;
        tracing::info!(
            connection = %created.id,
            source = %source,
            target = %target,
            "Created connection"
        );
        Ok(created)
    }

    /// Remove the connection between two pins
    pub async fn delete_connection(&self, source: &PinId, target: &PinId) -> Result<()> {
        let url = self.url(&format!(
            "/connections/{}/{}",
            urlencoding::encode(source.as_str()),
            urlencoding::encode(target.as_str())
        ));
        let body = with_retry(&self.retry, "delete_connection", || {
            let request = self.client.delete(&url);
            async move { read_body(request.send().await?).await }
        })
        .await?;

        decode_ack(&body)?;
        tracing::info!(source = %source, target = %target, "Deleted connection");
        Ok(())
    }

    async fn get_text(&self, path: &str) -> Result<String> {
        let response = self.client.get(self.url(path)).send().await?;
        read_body(response).await
    }
}

#[async_trait]
impl SnapshotSource for ApiClient {
    fn endpoint(&self) -> String {
        self.base_url.clone()
    }

    async fn fetch_raw(&self) -> Result<RawSnapshot> {
        let (pins, connections) =
            tokio::try_join!(self.get_pins_raw(), self.get_connections_raw())?;
        Ok(RawSnapshot { pins, connections })
    }
}

async fn read_body(response: reqwest::Response) -> Result<String> {
    let status = response.status().as_u16();
    let url = response.url().to_string();
    let body = response.text().await?;
    check_status(status, &url, body)
}

/// Map an HTTP status and body to the body or an error
///
/// 5xx is always an HTTP error so it stays retryable. Other failures prefer
/// the server's own error envelope message when there is one.
fn check_status(status: u16, url: &str, body: String) -> Result<String> {
    if (200..300).contains(&status) {
        return Ok(body);
    }
    if status == 429 {
        return Err(PinSyncError::RateLimited(60));
    }
    if status < 500 {
        if let Err(e @ PinSyncError::Server(_)) = decode_ack(&body) {
            return Err(e);
        }
    }
    Err(PinSyncError::HttpStatus {
        status,
        url: url.to_string(),
    })
}
