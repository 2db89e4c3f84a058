//! HTTP publisher that forwards posts to the web application
//!
//! The web application owns the platform tokens. We call
//! `POST {app_url}/api/twitter/post` with the shared API key and read back
//! `{success, tweetId}`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::config::PublisherConfig;
use crate::error::{ConfigError, PublishError, Result};
use crate::publisher::{MediaInfo, PublishReceipt, PublishRequest, Publisher};
use crate::types::Credentials;

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PostBody<'a> {
    content: &'a str,
    media_ids: &'a [String],
    account_id: &'a str,
}

pub struct HttpPublisher {
    http: Client,
    app_url: String,
    api_key: Option<SecretString>,
}

impl HttpPublisher {
    pub fn new(config: &PublisherConfig) -> Result<Self> {
        let app_url = config.app_url.trim_end_matches('/').to_string();
        if app_url.is_empty() {
            return Err(ConfigError::MissingField("publisher.app_url".to_string()).into());
        }

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "publisher".to_string(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            http,
            app_url,
            api_key: config.api_key.clone().map(SecretString::from),
        })
    }

    pub fn app_url(&self) -> &str {
        &self.app_url
    }

    fn with_api_key(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key.expose_secret()),
            None => builder,
        }
    }
}

/// Map a non-2xx status to a publish error
fn status_error(status: StatusCode, body: &str) -> PublishError {
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body)
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PublishError::Authentication(detail),
        StatusCode::TOO_MANY_REQUESTS => PublishError::RateLimit(detail),
        s if s.is_server_error() => PublishError::Network(detail),
        _ => PublishError::Rejected(detail),
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(status, &body).into());
    }

    let body = response
        .text()
        .await
        .map_err(|e| PublishError::Network(format!("failed to read response: {}", e)))?;

    serde_json::from_str(&body).map_err(|e| {
        PublishError::NonSuccess(format!("unreadable response ({}): {}", e, body)).into()
    })
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn publish(&self, request: &PublishRequest, creds: &Credentials) -> Result<PublishReceipt> {
        let url = format!("{}/api/twitter/post", self.app_url);
        debug!(post_id = %request.post_id, url = %url, "Sending publish request");

        let body = PostBody {
            content: &request.content,
            media_ids: &request.media_ids,
            account_id: &creds.account_id,
        };

        let response = self
            .with_api_key(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| PublishError::Network(e.to_string()))?;

        read_json(response).await
    }

    async fn resolve_media(&self, tweet_id: &str, _creds: &Credentials) -> Result<MediaInfo> {
        let url = format!("{}/api/twitter/media/{}", self.app_url, tweet_id);

        let response = self
            .with_api_key(self.http.get(&url))
            .send()
            .await
            .map_err(|e| PublishError::Network(e.to_string()))?;

        read_json(response).await
    }

    fn name(&self) -> &str {
        "http"
    }
}
