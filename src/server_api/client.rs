//! reqwest implementation of [`ServerApi`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};

use crate::server_api::types::{Player, ServerSettings};
use crate::server_api::{Result, ServerApi, ServerApiConnector, ServerApiError};

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Delay between failed liveness probes.
const ONLINE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Basic-auth credentials of the server API.
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub user: String,
    pub password: SecretString,
}

impl Default for ApiCredentials {
    fn default() -> Self {
        Self {
            user: "admin".to_string(),
            password: SecretString::from("admin".to_string()),
        }
    }
}

/// HTTP client bound to one server's API root.
#[derive(Debug, Clone)]
pub struct ServerApiClient {
    base_url: String,
    credentials: ApiCredentials,
    http: reqwest::Client,
}

impl ServerApiClient {
    /// Client for the server whose API listens on `127.0.0.1:<port>`.
    pub fn new(port: u16, credentials: ApiCredentials, http: reqwest::Client) -> Self {
        Self::with_base_url(format!("http://127.0.0.1:{port}/api/1/"), credentials, http)
    }

    /// Client for an arbitrary API root. `base_url` must end with `/`.
    pub fn with_base_url(
        base_url: impl Into<String>,
        credentials: ApiCredentials,
        http: reqwest::Client,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            credentials,
            http,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: reqwest::Method, endpoint: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, endpoint))
            .basic_auth(
                &self.credentials.user,
                Some(self.credentials.password.expose_secret()),
            )
    }

    async fn send(&self, endpoint: &str, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ServerApiError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn probe(&self) -> Result<()> {
        self.send("auth", self.request(reqwest::Method::GET, "auth"))
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl ServerApi for ServerApiClient {
    async fn wait_for_online(&self, timeout: Duration) -> Result<()> {
        let poll = async {
            loop {
                match self.probe().await {
                    Ok(()) => return,
                    Err(e) => {
                        tracing::debug!(url = %self.base_url, "Server API not ready: {}", e);
                        tokio::time::sleep(ONLINE_POLL_INTERVAL).await;
                    }
                }
            }
        };

        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| ServerApiError::NotReady(timeout))
    }

    async fn set_server_name(&self, name: &str) -> Result<()> {
        let req = self
            .request(reqwest::Method::PUT, "server")
            .json(&ServerSettings::rename(name));
        self.send("server", req).await?;
        Ok(())
    }

    async fn get_players(&self) -> Result<Vec<Player>> {
        let response = self
            .send("player", self.request(reqwest::Method::GET, "player"))
            .await?;
        Ok(response.json().await?)
    }
}

/// Hands out [`ServerApiClient`]s sharing one connection pool.
#[derive(Debug, Clone)]
pub struct HttpApiConnector {
    credentials: ApiCredentials,
    http: reqwest::Client,
}

impl HttpApiConnector {
    /// Build the shared HTTP client. Fails if the TLS backend cannot be set up.
    pub fn new(credentials: ApiCredentials) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        headers.insert(ACCEPT, HeaderValue::from_static(JSON_CONTENT_TYPE));

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .default_headers(headers)
            .build()?;

        Ok(Self { credentials, http })
    }
}

impl ServerApiConnector for HttpApiConnector {
    fn connect(&self, api_port: u16) -> Arc<dyn ServerApi> {
        Arc::new(ServerApiClient::new(
            api_port,
            self.credentials.clone(),
            self.http.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{basic_auth, body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn client(server: &MockServer) -> ServerApiClient {
        ServerApiClient::with_base_url(
            format!("{}/api/1/", server.uri()),
            ApiCredentials::default(),
            reqwest::Client::new(),
        )
    }

    #[test]
    fn test_default_base_url() {
        let client =
            ServerApiClient::new(8082, ApiCredentials::default(), reqwest::Client::new());
        assert_eq!(client.base_url(), "http://127.0.0.1:8082/api/1/");
    }

    #[tokio::test]
    async fn test_wait_for_online_succeeds_on_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/1/auth"))
            .and(basic_auth("admin", "admin"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        client(&server)
            .await
            .wait_for_online(Duration::from_secs(2))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_online_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/1/auth"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .wait_for_online(Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerApiError::NotReady(_)));
    }

    #[tokio::test]
    async fn test_set_server_name_sends_framecap() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/1/server"))
            .and(body_json(serde_json::json!({
                "name": "CommNode server alpha",
                "framecap": "0"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .await
            .set_server_name("CommNode server alpha")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_set_server_name_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/1/server"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .set_server_name("x")
            .await
            .unwrap_err();
        match err {
            ServerApiError::Status { endpoint, status } => {
                assert_eq!(endpoint, "server");
                assert_eq!(status, 401);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_get_players() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/1/player"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "id": 1,
                    "address": "10.0.0.5:7808",
                    "ping": 42,
                    "host": false,
                    "observer": false,
                    "callsign": "Alpha 1",
                    "ship": "GTF Myrmidon"
                }
            ])))
            .mount(&server)
            .await;

        let players = client(&server).await.get_players().await.unwrap();
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].callsign, "Alpha 1");
        assert_eq!(players[0].ping, 42);
    }

    #[tokio::test]
    async fn test_get_players_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/1/player"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        assert!(client(&server).await.get_players().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connector_targets_loopback_port() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/1/player"))
            .and(basic_auth("admin", "admin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let connector = HttpApiConnector::new(ApiCredentials::default()).unwrap();
        let api = connector.connect(server.address().port());
        assert!(api.get_players().await.unwrap().is_empty());
    }
}
