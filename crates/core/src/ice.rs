//! ICE server discovery.

use crate::error::IceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

/// One STUN/TURN server descriptor as served by the PBX.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct IceServer {
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub credential: String,
}

/// Supplies the ICE servers for a new call.
#[async_trait]
pub trait IceDiscovery: Send + Sync {
    async fn fetch(&self) -> Result<Vec<IceServer>, IceError>;
}

/// Fetches the server list with a GET request to a configured URL.
pub struct HttpIceDiscovery {
    client: reqwest::Client,
    url: String,
}

impl HttpIceDiscovery {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl IceDiscovery for HttpIceDiscovery {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> Result<Vec<IceServer>, IceError> {
        let servers: Vec<IceServer> = self
            .client
            .get(&self.url)
            .timeout(Self::DEFAULT_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(count = servers.len(), "Fetched ICE servers");
        Ok(servers)
    }
}

/// A fixed server list, for deployments without a discovery endpoint.
pub struct StaticIceServers(pub Vec<IceServer>);

#[async_trait]
impl IceDiscovery for StaticIceServers {
    async fn fetch(&self) -> Result<Vec<IceServer>, IceError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_decodes_server_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/iceservers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"urls": ["stun:stun.l.google.com:19302"]},
                {"urls": ["turn:turn.example.com:3478"], "username": "u", "credential": "p"}
            ])))
            .mount(&server)
            .await;

        let discovery = HttpIceDiscovery::new(
            reqwest::Client::new(),
            format!("{}/iceservers", server.uri()),
        );
        let servers = discovery.fetch().await.unwrap();

        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].urls, vec!["stun:stun.l.google.com:19302"]);
        assert_eq!(servers[0].username, "");
        assert_eq!(servers[1].username, "u");
        assert_eq!(servers[1].credential, "p");
    }

    #[tokio::test]
    async fn test_fetch_fails_on_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let discovery = HttpIceDiscovery::new(reqwest::Client::new(), server.uri());
        assert!(matches!(discovery.fetch().await, Err(IceError::Request(_))));
    }

    #[tokio::test]
    async fn test_fetch_fails_on_invalid_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let discovery = HttpIceDiscovery::new(reqwest::Client::new(), server.uri());
        assert!(discovery.fetch().await.is_err());
    }
}
