//! Authenticated client for the SparkPost REST API.
//!
//! Every call is a single request against the configured base URL with the
//! API key in the `Authorization` header. Only HTTP 200 counts as success;
//! anything else comes back as [`ApiError::Status`] carrying the status code
//! and raw body. Write calls accept any 200 body, even an empty one; only
//! listing needs the payload to parse. Nothing here retries.

use std::time::Duration;

use anyhow::{Context, Result as AnyResult};
use reqwest::{header::AUTHORIZATION, Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use super::types::{
    ApiResults, NewInboundDomain, NewRelayWebhook, NewWebhookMatch, RelayWebhook,
    Transmission, TransmissionResults, WEBHOOK_NAME, WEBHOOK_PROTOCOL,
};

const TRANSMISSIONS: &str = "transmissions";
const INBOUND_DOMAINS: &str = "inbound-domains";
const RELAY_WEBHOOKS: &str = "relay-webhooks";

/// Failure of a SparkPost call.
#[derive(Debug, Error)]
pub enum ApiError {
    /// SparkPost answered with something other than 200.
    #[error("{status} {body}")]
    Status { status: u16, body: String },

    /// The request never produced a response.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// 200 with a body that is not the expected JSON. Only reads report this.
    #[error("invalid response body: {source}: {body}")]
    Decode {
        body: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid resource path {path}: {source}")]
    Path {
        path: String,
        #[source]
        source: url::ParseError,
    },
}

impl ApiError {
    /// HTTP status returned by SparkPost, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Transport(e) => e.status().map(|s| s.as_u16()),
            ApiError::Decode { .. } => Some(StatusCode::OK.as_u16()),
            ApiError::Path { .. } => None,
        }
    }
}

/// SparkPost API client.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct SparkPostClient {
    http: Client,
    base_url: Url,
    api_key: String,
    webhook_auth_token: Option<String>,
}

impl SparkPostClient {
    /// Create a client for the given API base URL and key.
    pub fn new(api_url: &str, api_key: &str, timeout: Option<Duration>) -> AnyResult<Self> {
        // A base without a trailing slash would make `join` drop its last segment.
        let normalized = if api_url.ends_with('/') {
            api_url.to_string()
        } else {
            format!("{}/", api_url)
        };
        let base_url = Url::parse(&normalized).context("Invalid SparkPost API URL")?;

        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url,
            api_key: api_key.to_string(),
            webhook_auth_token: None,
        })
    }

    /// Token registered with relay webhooks created by this client.
    pub fn with_webhook_auth_token(mut self, token: Option<String>) -> Self {
        self.webhook_auth_token = token;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Perform one call against `path` and parse the 200 body as `T`.
    pub async fn request<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let text = self.call(method, path, body).await?;
        serde_json::from_str(&text).map_err(|source| ApiError::Decode { body: text, source })
    }

    /// Perform one call against `path`, relative to the base URL, and return
    /// the raw body of a 200 response.
    async fn call<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<String, ApiError>
    where
        B: Serialize + ?Sized,
    {
        let url = self.base_url.join(path).map_err(|source| ApiError::Path {
            path: path.to_string(),
            source,
        })?;

        debug!(method = %method, url = %url, has_body = body.is_some(), "sparkpost_request");

        let mut request = self
            .http
            .request(method, url)
            .header(AUTHORIZATION, &self.api_key);
        if let Some(body) = body {
            // Also sets Content-Type: application/json.
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        debug!(status = status.as_u16(), body_length = text.len(), "sparkpost_response");

        if status != StatusCode::OK {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(text)
    }

    /// List the relay webhooks registered on the account.
    pub async fn list_inbound_webhooks(&self) -> Result<Vec<RelayWebhook>, ApiError> {
        let response: ApiResults<Vec<RelayWebhook>> =
            self.request::<(), _>(Method::GET, RELAY_WEBHOOKS, None).await?;
        Ok(response.results)
    }

    /// Register `target_url` to receive SMTP mail for `domain`.
    pub async fn create_inbound_webhook(
        &self,
        target_url: &str,
        domain: &str,
    ) -> Result<serde_json::Value, ApiError> {
        let body = NewRelayWebhook {
            name: WEBHOOK_NAME,
            target: target_url,
            auth_token: self.webhook_auth_token.as_deref(),
            match_: NewWebhookMatch {
                protocol: WEBHOOK_PROTOCOL,
                domain,
            },
        };

        let text = self.call(Method::POST, RELAY_WEBHOOKS, Some(&body)).await?;
        info!(webhook_target = %target_url, domain = %domain, "inbound_webhook_created");
        Ok(lenient_json(&text))
    }

    /// Register `domain` as an inbound domain.
    pub async fn create_inbound_domain(&self, domain: &str) -> Result<serde_json::Value, ApiError> {
        let body = NewInboundDomain { domain };

        let text = self.call(Method::POST, INBOUND_DOMAINS, Some(&body)).await?;
        info!(domain = %domain, "inbound_domain_created");
        Ok(lenient_json(&text))
    }

    /// Send `raw_email` unchanged to `recipient`.
    pub async fn send_transmission(
        &self,
        recipient: &str,
        raw_email: &str,
    ) -> Result<TransmissionResults, ApiError> {
        let body = Transmission::rfc822(recipient, raw_email);

        let text = self.call(Method::POST, TRANSMISSIONS, Some(&body)).await?;

        // The 200 already means accepted; the result block is informational.
        match serde_json::from_str::<ApiResults<TransmissionResults>>(&text) {
            Ok(response) => Ok(response.results),
            Err(e) => {
                debug!(error = %e, body_length = text.len(), "transmission_results_unreadable");
                Ok(TransmissionResults::default())
            }
        }
    }
}

/// Body of a 200 that is only passed along; `Null` when it is not JSON.
fn lenient_json(text: &str) -> serde_json::Value {
    serde_json::from_str(text).unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const API_KEY: &str = "test-api-key";

    async fn client_for(server: &MockServer) -> SparkPostClient {
        SparkPostClient::new(&format!("{}/api/v1", server.uri()), API_KEY, None).unwrap()
    }

    #[test]
    fn test_base_url_normalized() {
        let a = SparkPostClient::new("https://api.sparkpost.com/api/v1", API_KEY, None).unwrap();
        let b = SparkPostClient::new("https://api.sparkpost.com/api/v1/", API_KEY, None).unwrap();
        assert_eq!(a.base_url(), b.base_url());
        assert_eq!(
            a.base_url().join(TRANSMISSIONS).unwrap().as_str(),
            "https://api.sparkpost.com/api/v1/transmissions"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(SparkPostClient::new("not a url", API_KEY, None).is_err());
    }

    #[tokio::test]
    async fn test_send_transmission() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/transmissions"))
            .and(header("authorization", API_KEY))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({
                "recipients": [{"address": {"email": "me@example.com"}}],
                "content": {"email_rfc822": "From: svc@relay.test\n\nhi"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": {"id": "11668787484950529", "total_accepted_recipients": 1, "total_rejected_recipients": 0}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let results = client
            .send_transmission("me@example.com", "From: svc@relay.test\n\nhi")
            .await
            .unwrap();

        assert_eq!(results.id.as_deref(), Some("11668787484950529"));
        assert_eq!(results.total_accepted_recipients, Some(1));
    }

    #[tokio::test]
    async fn test_non_200_is_failure_with_status_and_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/transmissions"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_string(r#"{"errors":[{"message":"invalid data format/type"}]}"#),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.send_transmission("me@example.com", "x").await.unwrap_err();

        assert_eq!(err.status(), Some(400));
        assert_eq!(
            err.to_string(),
            r#"400 {"errors":[{"message":"invalid data format/type"}]}"#
        );
    }

    #[tokio::test]
    async fn test_other_2xx_is_failure() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/inbound-domains"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"results": {}})))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.create_inbound_domain("inbox.relay.test").await.unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 201, .. }));
    }

    #[tokio::test]
    async fn test_list_inbound_webhooks() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/relay-webhooks"))
            .and(header("authorization", API_KEY))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": [
                {"id": "1", "name": "Forwarding Service", "target": "https://relay.test/message",
                 "match": {"protocol": "SMTP", "domain": "inbox.relay.test"}}
            ]})))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let webhooks = client.list_inbound_webhooks().await.unwrap();

        assert_eq!(webhooks.len(), 1);
        assert_eq!(webhooks[0].target, "https://relay.test/message");
        assert_eq!(webhooks[0].match_.domain, "inbox.relay.test");
    }

    #[tokio::test]
    async fn test_create_inbound_webhook_payload() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/relay-webhooks"))
            .and(body_json(json!({
                "name": "Forwarding Service",
                "target": "https://relay.test/message",
                "auth_token": "hook-secret",
                "match": {"protocol": "SMTP", "domain": "inbox.relay.test"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": {"id": "12013026328707075"}})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server)
            .await
            .with_webhook_auth_token(Some("hook-secret".to_string()));
        let created = client
            .create_inbound_webhook("https://relay.test/message", "inbox.relay.test")
            .await
            .unwrap();

        assert_eq!(created["results"]["id"], "12013026328707075");
    }

    #[tokio::test]
    async fn test_create_inbound_domain_payload() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/inbound-domains"))
            .and(body_json(json!({"domain": "example.com"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": {}})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        client.create_inbound_domain("example.com").await.unwrap();
    }

    #[tokio::test]
    async fn test_unparseable_success_body() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/relay-webhooks"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.list_inbound_webhooks().await.unwrap_err();
        assert!(matches!(err, ApiError::Decode { ref body, .. } if body == "<html>oops</html>"));
    }

    #[tokio::test]
    async fn test_200_with_empty_body_is_success() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/transmissions"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/api/v1/inbound-domains"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/api/v1/relay-webhooks"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = client_for(&server).await;

        let results = client.send_transmission("me@example.com", "x").await.unwrap();
        assert_eq!(results, TransmissionResults::default());

        let created = client.create_inbound_domain("example.com").await.unwrap();
        assert_eq!(created, serde_json::Value::Null);

        let created = client
            .create_inbound_webhook("https://relay.test/message", "example.com")
            .await
            .unwrap();
        assert_eq!(created, serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_200_without_results_is_success() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/transmissions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "unexpected"})))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let results = client.send_transmission("me@example.com", "x").await.unwrap();
        assert!(results.id.is_none());
    }

    #[tokio::test]
    async fn test_transport_failure() {
        // Nothing listens on the reserved port 9 of localhost.
        let client = SparkPostClient::new("http://127.0.0.1:9/api/v1", API_KEY, None).unwrap();
        let err = client.list_inbound_webhooks().await.unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)));
        assert_eq!(err.status(), None);
    }
}
