//! Keystone v3 password authentication and service-catalog discovery.

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::config::ProviderConfig;
use crate::error::{ConfigError, ProviderError, Result};

use super::client::build_http_client;

/// Catalog service types, in preference order, per sub-service.
const COMPUTE_TYPES: &[&str] = &["compute"];
const NETWORK_TYPES: &[&str] = &["network"];
const BLOCK_STORAGE_TYPES: &[&str] = &["block-storage", "volumev3", "volumev2", "volume"];
const IMAGE_TYPES: &[&str] = &["image"];

/// Endpoints of the four sub-services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Compute endpoint.
    pub compute: String,
    /// Networking endpoint (without the `/v2.0` suffix).
    pub network: String,
    /// Block storage endpoint, including the project segment.
    pub block_storage: String,
    /// Image endpoint (without the `/v2` suffix).
    pub image: String,
}

/// An authenticated session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Keystone token.
    pub token: String,
    /// Project the token is scoped to.
    pub project_id: String,
    /// Sub-service endpoints.
    pub endpoints: Endpoints,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: TokenBody,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    #[serde(default)]
    project: Option<ProjectRef>,
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct ProjectRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Deserialize)]
struct CatalogEndpoint {
    interface: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    region_id: Option<String>,
    url: String,
}

/// Opens a session from the provider configuration.
///
/// A pre-issued token with explicit endpoints skips Keystone entirely.
///
/// # Errors
///
/// Returns an error if credentials are missing or Keystone rejects them.
pub async fn authenticate(config: &ProviderConfig) -> Result<Session> {
    if let Some(session) = static_session(config) {
        debug!("Using pre-issued token with explicit endpoints");
        return Ok(session);
    }

    let auth_url = config
        .auth_url
        .as_deref()
        .ok_or_else(|| ConfigError::missing("auth_url"))?;
    let username = config
        .username
        .as_deref()
        .ok_or_else(|| ConfigError::missing("username"))?;
    let password = config
        .password
        .as_deref()
        .ok_or_else(|| ConfigError::missing("password"))?;

    let project_scope = match (&config.project_id, &config.project_name) {
        (Some(id), _) => json!({ "id": id }),
        (None, Some(name)) => json!({
            "name": name,
            "domain": { "name": config.project_domain_name() },
        }),
        (None, None) => return Err(ConfigError::missing("project_id or project_name").into()),
    };

    let body = json!({
        "auth": {
            "identity": {
                "methods": ["password"],
                "password": {
                    "user": {
                        "name": username,
                        "domain": { "name": config.user_domain_name() },
                        "password": password,
                    }
                }
            },
            "scope": { "project": project_scope }
        }
    });

    let url = format!("{}/auth/tokens", auth_url.trim_end_matches('/'));
    info!("Authenticating against {url}");

    let client = build_http_client(config.timeout_secs, config.insecure)?;
    let response = client
        .post(&url)
        .json(&body)
        .send()
        .await
        .map_err(|e| ProviderError::network(format!("Authentication request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(ProviderError::AuthenticationFailed {
            message: format!("Keystone returned {status}: {message}"),
        }
        .into());
    }

    let token = response
        .headers()
        .get("X-Subject-Token")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| ProviderError::invalid_response("Keystone response has no X-Subject-Token"))?;

    let parsed: TokenResponse = response
        .json()
        .await
        .map_err(|e| ProviderError::invalid_response(format!("Failed to parse token: {e}")))?;

    let project_id = parsed
        .token
        .project
        .map(|p| p.id)
        .or_else(|| config.project_id.clone())
        .ok_or_else(|| ProviderError::invalid_response("Token is not project scoped"))?;

    let endpoints = resolve_endpoints(config, &parsed.token.catalog)?;
    debug!("Resolved endpoints: {endpoints:?}");

    Ok(Session {
        token,
        project_id,
        endpoints,
    })
}

/// Builds a session from explicitly configured token and endpoints.
fn static_session(config: &ProviderConfig) -> Option<Session> {
    Some(Session {
        token: config.auth_token.clone()?,
        project_id: config.project_id.clone()?,
        endpoints: Endpoints {
            compute: config.compute_url.clone()?,
            network: config.network_url.clone()?,
            block_storage: config.volume_url.clone()?,
            image: config.image_url.clone()?,
        },
    })
}

/// Picks endpoint URLs from the catalog, honouring explicit overrides.
fn resolve_endpoints(config: &ProviderConfig, catalog: &[CatalogEntry]) -> Result<Endpoints> {
    let pick = |explicit: &Option<String>, types: &[&str]| -> Result<String> {
        if let Some(url) = explicit {
            return Ok(url.clone());
        }
        catalog_url(catalog, types, &config.interface, config.region_name.as_deref())
            .ok_or_else(|| {
                ProviderError::invalid_response(format!(
                    "No {} endpoint for interface {} in service catalog",
                    types.join("/"),
                    config.interface
                ))
                .into()
            })
    };

    Ok(Endpoints {
        compute: pick(&config.compute_url, COMPUTE_TYPES)?,
        network: pick(&config.network_url, NETWORK_TYPES)?,
        block_storage: pick(&config.volume_url, BLOCK_STORAGE_TYPES)?,
        image: pick(&config.image_url, IMAGE_TYPES)?,
    })
}

fn catalog_url(
    catalog: &[CatalogEntry],
    types: &[&str],
    interface: &str,
    region: Option<&str>,
) -> Option<String> {
    types.iter().find_map(|service_type| {
        catalog
            .iter()
            .filter(|entry| entry.service_type == *service_type)
            .flat_map(|entry| entry.endpoints.iter())
            .find(|endpoint| {
                endpoint.interface == interface
                    && region.is_none_or(|r| {
                        endpoint.region.as_deref() == Some(r)
                            || endpoint.region_id.as_deref() == Some(r)
                    })
            })
            .map(|endpoint| endpoint.url.trim_end_matches('/').to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn catalog_json(base: &str) -> serde_json::Value {
        json!({
            "token": {
                "project": {"id": "proj-1"},
                "catalog": [
                    {"type": "compute", "endpoints": [
                        {"interface": "internal", "region": "RegionOne", "url": "http://internal/compute"},
                        {"interface": "public", "region": "RegionOne", "url": format!("{base}/compute/")}
                    ]},
                    {"type": "network", "endpoints": [
                        {"interface": "public", "region": "RegionOne", "url": format!("{base}/network")}
                    ]},
                    {"type": "volumev3", "endpoints": [
                        {"interface": "public", "region": "RegionOne", "url": format!("{base}/volume/v3/proj-1")}
                    ]},
                    {"type": "image", "endpoints": [
                        {"interface": "public", "region": "RegionOne", "url": format!("{base}/image")}
                    ]}
                ]
            }
        })
    }

    #[tokio::test]
    async fn test_password_auth_discovers_endpoints() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/auth/tokens"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("X-Subject-Token", "tok")
                    .set_body_json(catalog_json(&server.uri())),
            )
            .mount(&server)
            .await;

        let config = ProviderConfig {
            auth_url: Some(format!("{}/v3", server.uri())),
            username: Some(String::from("demo")),
            password: Some(String::from("secret")),
            project_name: Some(String::from("demo")),
            region_name: Some(String::from("RegionOne")),
            ..ProviderConfig::default()
        };

        let session = authenticate(&config).await.expect("auth");
        assert_eq!(session.token, "tok");
        assert_eq!(session.project_id, "proj-1");
        assert_eq!(session.endpoints.compute, format!("{}/compute", server.uri()));
        assert_eq!(
            session.endpoints.block_storage,
            format!("{}/volume/v3/proj-1", server.uri())
        );
    }

    #[tokio::test]
    async fn test_rejected_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/auth/tokens"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let config = ProviderConfig {
            auth_url: Some(format!("{}/v3", server.uri())),
            username: Some(String::from("demo")),
            password: Some(String::from("wrong")),
            project_id: Some(String::from("proj-1")),
            ..ProviderConfig::default()
        };

        let err = authenticate(&config).await.expect_err("401");
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn test_static_session_skips_keystone() {
        let config = ProviderConfig {
            auth_token: Some(String::from("tok")),
            project_id: Some(String::from("p")),
            compute_url: Some(String::from("http://c")),
            network_url: Some(String::from("http://n")),
            volume_url: Some(String::from("http://v")),
            image_url: Some(String::from("http://i")),
            ..ProviderConfig::default()
        };

        let session = authenticate(&config).await.expect("static session");
        assert_eq!(session.endpoints.image, "http://i");
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let err = authenticate(&ProviderConfig::default())
            .await
            .expect_err("no auth_url");
        assert!(err.to_string().contains("auth_url"));
    }
}
