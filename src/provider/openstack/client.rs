//! HTTP client shared by the OpenStack sub-service bindings.

use reqwest::{Client, Method, header};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{LifecycleError, ProviderError, Result};
use crate::provider::classify::{RequestTarget, translate};

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum number of attempts for requests that fail at the network level.
const MAX_RETRIES: u32 = 3;

/// Delay between retries in milliseconds.
const RETRY_DELAY_MS: u64 = 1000;

/// Header carrying the Keystone token.
const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Header selecting a compute API microversion.
const COMPUTE_MICROVERSION_HEADER: &str = "X-OpenStack-Nova-API-Version";

/// A request to one of the sub-service endpoints.
#[derive(Debug)]
pub struct ApiRequest<'a> {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// JSON body.
    pub body: Option<&'a Value>,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// Compute microversion, when the call needs one.
    pub microversion: Option<&'static str>,
    /// What the request addresses, for not-found translation.
    pub target: Option<RequestTarget<'a>>,
}

impl<'a> ApiRequest<'a> {
    /// Creates a request without body or query.
    #[must_use]
    pub const fn new(method: Method, url: String) -> Self {
        Self {
            method,
            url,
            body: None,
            query: Vec::new(),
            microversion: None,
            target: None,
        }
    }

    /// Sets the JSON body.
    #[must_use]
    pub const fn with_body(mut self, body: &'a Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets the query parameters.
    #[must_use]
    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    /// Requests a compute microversion.
    #[must_use]
    pub const fn with_microversion(mut self, version: &'static str) -> Self {
        self.microversion = Some(version);
        self
    }

    /// Records the addressed resource.
    #[must_use]
    pub const fn with_target(mut self, target: RequestTarget<'a>) -> Self {
        self.target = Some(target);
        self
    }
}

/// Authenticated HTTP client.
#[derive(Debug, Clone)]
pub struct RestClient {
    /// HTTP client.
    client: Client,
    /// Keystone token.
    token: String,
}

impl RestClient {
    /// Creates a client that authenticates every request with `token`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(token: impl Into<String>, timeout_secs: u64, insecure: bool) -> Result<Self> {
        let client = build_http_client(timeout_secs, insecure)?;
        Ok(Self {
            client,
            token: token.into(),
        })
    }

    /// Executes a request, retrying network-level failures.
    ///
    /// Returns `None` for empty (e.g. `202`/`204`) responses.
    ///
    /// # Errors
    ///
    /// Returns a translated [`ProviderError`] for non-success responses.
    pub async fn execute(&self, request: &ApiRequest<'_>) -> Result<Option<Value>> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                debug!("Retry attempt {attempt} of {MAX_RETRIES}");
                tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS * u64::from(attempt)))
                    .await;
            }

            match self.execute_once(request).await {
                Ok(result) => return Ok(result),
                Err(e @ LifecycleError::Provider(ProviderError::NetworkError { .. })) => {
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderError::network("Max retries exceeded").into()))
    }

    /// Executes a single request.
    async fn execute_once(&self, request: &ApiRequest<'_>) -> Result<Option<Value>> {
        trace!("{} {}", request.method, request.url);

        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .header(AUTH_TOKEN_HEADER, &self.token)
            .header(header::ACCEPT, "application/json");

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(version) = request.microversion {
            builder = builder.header(COMPUTE_MICROVERSION_HEADER, version);
        }
        if let Some(body) = request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::network(format!("Request failed: {e}")))?;

        let status = response.status();

        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(translate(request.target, status.as_u16(), &body, retry_after).into());
        }

        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::network(format!("Failed to read response: {e}")))?;

        if text.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| ProviderError::invalid_response(format!("Failed to parse response: {e}")).into())
    }
}

/// Builds the underlying HTTP client.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialised.
pub fn build_http_client(timeout_secs: u64, insecure: bool) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .danger_accept_invalid_certs(insecure)
        .build()
        .map_err(|e| ProviderError::network(format!("Failed to create HTTP client: {e}")).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ResourceKind;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> RestClient {
        RestClient::new("token-123", 5, false).expect("client")
    }

    #[tokio::test]
    async fn test_sends_token_and_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2.0/networks"))
            .and(header("X-Auth-Token", "token-123"))
            .and(query_param("name", "private"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"networks": []})))
            .expect(1)
            .mount(&server)
            .await;

        let request = ApiRequest::new(Method::GET, format!("{}/v2.0/networks", server.uri()))
            .with_query(vec![(String::from("name"), String::from("private"))]);
        let body = client().execute(&request).await.expect("request");
        assert_eq!(body, Some(json!({"networks": []})));
    }

    #[tokio::test]
    async fn test_empty_body_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/servers/s1/action"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let body = json!({"os-start": null});
        let request = ApiRequest::new(Method::POST, format!("{}/servers/s1/action", server.uri()))
            .with_body(&body);
        assert_eq!(client().execute(&request).await.expect("request"), None);
    }

    #[tokio::test]
    async fn test_not_found_is_translated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/servers/gone"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(json!({"itemNotFound": {"message": "missing", "code": 404}})),
            )
            .mount(&server)
            .await;

        let request = ApiRequest::new(Method::GET, format!("{}/servers/gone", server.uri()))
            .with_target(RequestTarget {
                kind: ResourceKind::Server,
                id: Some("gone"),
            });
        let err = client().execute(&request).await.expect_err("404");
        assert!(err.is_not_found());
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/volumes/detail"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "17"))
            .mount(&server)
            .await;

        let request = ApiRequest::new(Method::GET, format!("{}/volumes/detail", server.uri()));
        let err = client().execute(&request).await.expect_err("429");
        assert!(err.is_recoverable());
        assert_eq!(err.retry_delay_secs(), Some(17));
    }

    #[tokio::test]
    async fn test_bad_request_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/servers"))
            .respond_with(ResponseTemplate::new(400).set_body_json(
                json!({"badRequest": {"message": "Block Device Mapping is Invalid", "code": 400}}),
            ))
            .mount(&server)
            .await;

        let body = json!({"server": {}});
        let request =
            ApiRequest::new(Method::POST, format!("{}/servers", server.uri())).with_body(&body);
        let err = client().execute(&request).await.expect_err("400");
        assert!(!err.is_recoverable());
        assert_eq!(
            err.to_string(),
            "Block Device Mapping is Invalid [status_code=400]"
        );
    }

    #[tokio::test]
    async fn test_unparseable_body_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/servers/s1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy error</html>"))
            .mount(&server)
            .await;

        let request = ApiRequest::new(Method::GET, format!("{}/servers/s1", server.uri()));
        let err = client().execute(&request).await.expect_err("html body");
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("Failed to parse response"));
    }
}
