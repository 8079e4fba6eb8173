use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode, header};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::types::{Page, Repository, Tag};

pub const DEFAULT_HUB_URL: &str = "https://hub.docker.com/v2";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PAGE_SIZE: u32 = 100;

pub type Result<T, E = RegistryError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Failed to build the HTTP client")]
    Setup(#[source] reqwest::Error),
    #[error("Failed to send {method} request to {url}")]
    Transport {
        method: Method,
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{method} {url} returned {status}: {body}")]
    Status {
        method: Method,
        url: String,
        status: StatusCode,
        body: String,
    },
    #[error("Failed to parse JSON from {url:?}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to log into the registry: {0}")]
    Auth(String),
}

/// Connection settings for the registry client
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub org: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
}

impl Config {
    pub fn new(org: impl Into<String>) -> Self {
        Config {
            base_url: DEFAULT_HUB_URL.to_string(),
            org: org.into(),
            username: None,
            password: None,
            timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(default)]
    token: String,
}

/// The registry operations the batch jobs depend on
#[async_trait]
pub trait Registry: Send + Sync {
    async fn list_repositories(&self) -> Result<Vec<Repository>>;
    async fn list_tags(&self, image: &str) -> Result<Vec<Tag>>;
    async fn delete_tag(&self, image: &str, tag: &str) -> Result<()>;
}

/// Docker Hub API client bound to one organization
///
/// The bearer token is fetched on the first request and shared by every
/// caller of the same client, including concurrent workers.
#[derive(Debug)]
pub struct Client {
    http: reqwest::Client,
    config: Config,
    token: OnceCell<String>,
}

impl Client {
    pub fn new(config: Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(RegistryError::Setup)?;

        Ok(Client {
            http,
            config,
            token: OnceCell::new(),
        })
    }

    pub fn org(&self) -> &str {
        &self.config.org
    }

    fn repositories_url(&self) -> String {
        format!(
            "{}/repositories/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.org
        )
    }

    async fn login(&self) -> Result<String> {
        let (Some(username), Some(password)) = (&self.config.username, &self.config.password)
        else {
            return Err(RegistryError::Auth(
                "DOCKERHUB_USERNAME and DOCKERHUB_PASSWORD must be set".to_string(),
            ));
        };

        let url = format!("{}/users/login", self.config.base_url.trim_end_matches('/'));
        info!(%url, %username, "logging into the registry");
        let resp = self
            .http
            .post(&url)
            .json(&LoginRequest { username, password })
            .send()
            .await
            .map_err(|source| RegistryError::Transport {
                method: Method::POST,
                url: url.clone(),
                source,
            })?;
        let body = read_body(Method::POST, &url, resp).await?;
        let data: LoginResponse = serde_json::from_str(&body)
            .map_err(|source| RegistryError::Decode { url: url.clone(), source })?;
        if data.token.is_empty() {
            return Err(RegistryError::Auth(format!("no token returned by {url}")));
        }

        Ok(data.token)
    }

    async fn token(&self) -> Result<&str> {
        self.token
            .get_or_try_init(|| self.login())
            .await
            .map(String::as_str)
    }

    async fn request(&self, method: Method, url: &str) -> Result<String> {
        let token = self.token().await?;
        debug!(%method, %url, "sending request");
        let resp = self
            .http
            .request(method.clone(), url)
            .header(header::CONTENT_TYPE, "application/json")
            .bearer_auth(token)
            .send()
            .await
            .map_err(|source| RegistryError::Transport {
                method: method.clone(),
                url: url.to_string(),
                source,
            })?;

        read_body(method, url, resp).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let body = self.request(Method::GET, url).await?;
        serde_json::from_str(&body).map_err(|source| RegistryError::Decode {
            url: url.to_string(),
            source,
        })
    }

    /// Follows `next` links starting from `url` and concatenates every page.
    async fn paginate<T: DeserializeOwned>(&self, url: String) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next_url = Some(url);
        while let Some(url) = next_url {
            let page: Page<T> = self.get_json(&url).await?;
            debug!(%url, results = page.results.len(), total = page.count, "fetched page");
            items.extend(page.results);
            next_url = page.next.filter(|next| !next.is_empty());
        }

        Ok(items)
    }

    fn tags_url(&self, image: &str) -> String {
        format!("{}/{image}/tags/?page_size={PAGE_SIZE}", self.repositories_url())
    }

    pub async fn list_repositories(&self) -> Result<Vec<Repository>> {
        self.paginate(format!(
            "{}/?page=1&page_size={PAGE_SIZE}",
            self.repositories_url()
        ))
        .await
    }

    pub async fn list_tags(&self, image: &str) -> Result<Vec<Tag>> {
        self.paginate(self.tags_url(image)).await
    }

    /// Total number of tags, as reported by the first page.
    pub async fn tag_count(&self, image: &str) -> Result<u64> {
        let page: Page<Tag> = self.get_json(&self.tags_url(image)).await?;
        Ok(page.count)
    }

    /// Mean tag size in MiB, 0 for a repository without tags.
    pub async fn average_tag_size(&self, image: &str) -> Result<f64> {
        let tags = self.list_tags(image).await?;
        Ok(average_size_mib(&tags))
    }

    pub async fn latest_tag(&self, image: &str) -> Result<Option<String>> {
        let tags = self.list_tags(image).await?;
        Ok(tags.into_iter().next().map(|tag| tag.name))
    }

    pub async fn describe_repository(&self, image: &str) -> Result<Repository> {
        self.get_json(&format!("{}/{image}", self.repositories_url()))
            .await
    }

    pub async fn delete_repository(&self, image: &str) -> Result<()> {
        self.request(Method::DELETE, &format!("{}/{image}/", self.repositories_url()))
            .await?;
        Ok(())
    }

    pub async fn delete_tag(&self, image: &str, tag: &str) -> Result<()> {
        self.request(
            Method::DELETE,
            &format!("{}/{image}/tags/{tag}/", self.repositories_url()),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Registry for Client {
    async fn list_repositories(&self) -> Result<Vec<Repository>> {
        Client::list_repositories(self).await
    }

    async fn list_tags(&self, image: &str) -> Result<Vec<Tag>> {
        Client::list_tags(self, image).await
    }

    async fn delete_tag(&self, image: &str, tag: &str) -> Result<()> {
        Client::delete_tag(self, image, tag).await
    }
}

async fn read_body(method: Method, url: &str, resp: reqwest::Response) -> Result<String> {
    let status = resp.status();
    let body = resp.text().await.map_err(|source| RegistryError::Transport {
        method: method.clone(),
        url: url.to_string(),
        source,
    })?;
    if !status.is_success() {
        return Err(RegistryError::Status {
            method,
            url: url.to_string(),
            status,
            body,
        });
    }

    Ok(body)
}

pub fn average_size_mib(tags: &[Tag]) -> f64 {
    if tags.is_empty() {
        return 0.0;
    }
    let total: u64 = tags.iter().map(|tag| tag.full_size).sum();
    total as f64 / tags.len() as f64 / (1024.0 * 1024.0)
}
