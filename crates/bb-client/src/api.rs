use crate::error::ClientError;
use bb_core::plugin_api::{PluginCommand, SnapshotResponse, DEFAULT_PLUGIN_ID};
use bb_core::{PluginApi, TransportError};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::debug;
use url::Url;

const API_KEY_HEADER: &str = "X-Api-Key";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub base_url: Url,
    pub api_key: Option<String>,
    pub plugin_id: String,
}

impl ApiConfig {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            api_key: None,
            plugin_id: DEFAULT_PLUGIN_ID.to_string(),
        })
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|key| !key.trim().is_empty());
        self
    }

    pub fn with_plugin_id(mut self, plugin_id: impl Into<String>) -> Self {
        self.plugin_id = plugin_id.into();
        self
    }
}

/// Parses the OctoPrint base URL and makes sure relative joins keep any
/// path prefix (OctoPrint behind a reverse proxy at `/octoprint`).
pub fn normalize_base_url(raw: &str) -> Result<Url, ClientError> {
    let mut url = Url::parse(raw.trim())?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(ClientError::Scheme(other.to_string())),
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

#[derive(Debug, Clone, Serialize)]
struct LoginRequest {
    passive: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LoginSession {
    pub name: String,
    #[serde(default)]
    pub session: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OctoPrintApi {
    http: Client,
    config: ApiConfig,
}

impl OctoPrintApi {
    pub fn new(config: ApiConfig) -> Result<Self, ClientError> {
        let http = Client::builder()
            .user_agent(concat!("bb-monitor/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn plugin_url(&self) -> Result<Url, ClientError> {
        Ok(self
            .config
            .base_url
            .join(&format!("api/plugin/{}", self.config.plugin_id))?)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match self.config.api_key.as_deref() {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }

    pub async fn get_snapshot(&self) -> Result<SnapshotResponse, ClientError> {
        let url = self.plugin_url()?;
        debug!("snapshot_request: {url}");
        let response = self.request(Method::GET, url).send().await?;
        let body = success_body(response).await?;
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn send_clear(&self) -> Result<(), ClientError> {
        let url = self.plugin_url()?;
        debug!("clear_request: {url}");
        let response = self
            .request(Method::POST, url)
            .json(&PluginCommand::clear())
            .send()
            .await?;
        success_body(response).await?;
        Ok(())
    }

    /// Exchanges the API key for a session usable on the push socket.
    pub async fn passive_login(&self) -> Result<LoginSession, ClientError> {
        let url = self.config.base_url.join("api/login")?;
        let response = self
            .request(Method::POST, url)
            .json(&LoginRequest { passive: true })
            .send()
            .await?;
        let body = success_body(response).await?;
        let session: LoginSession = serde_json::from_str(&body)?;
        if session.session.is_none() {
            return Err(ClientError::Login(format!(
                "no session returned for user {}",
                session.name
            )));
        }
        Ok(session)
    }
}

async fn success_body(response: Response) -> Result<String, ClientError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ClientError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

impl PluginApi for OctoPrintApi {
    fn fetch_snapshot(
        &self,
    ) -> impl Future<Output = Result<SnapshotResponse, TransportError>> + Send {
        async move { self.get_snapshot().await.map_err(TransportError::from) }
    }

    fn clear(&self) -> impl Future<Output = Result<(), TransportError>> + Send {
        async move { self.send_clear().await.map_err(TransportError::from) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_keeps_proxy_prefix() {
        let config = ApiConfig::new("https://printer.local/octoprint").expect("config");
        let api = OctoPrintApi::new(config).expect("client");
        assert_eq!(
            api.plugin_url().expect("plugin url").as_str(),
            "https://printer.local/octoprint/api/plugin/buffer_buddy"
        );
    }

    #[test]
    fn plugin_id_is_configurable() {
        let config = ApiConfig::new("http://localhost:5000")
            .expect("config")
            .with_plugin_id("buffer_buddy_dev");
        let api = OctoPrintApi::new(config).expect("client");
        assert_eq!(
            api.plugin_url().expect("plugin url").as_str(),
            "http://localhost:5000/api/plugin/buffer_buddy_dev"
        );
    }

    #[test]
    fn blank_api_key_is_dropped() {
        let config = ApiConfig::new("http://localhost:5000")
            .expect("config")
            .with_api_key(Some("  ".to_string()));
        assert_eq!(config.api_key, None);
    }

    #[test]
    fn non_http_base_is_rejected() {
        assert!(matches!(
            normalize_base_url("ftp://printer.local"),
            Err(ClientError::Scheme(_))
        ));
        assert!(matches!(
            normalize_base_url("not a url"),
            Err(ClientError::Url(_))
        ));
    }
}
