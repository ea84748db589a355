//! Wikipedia reference source backed by the MediaWiki action API.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::instrument;

use conceptcheck_core::error::FetchError;
use conceptcheck_core::traits::{ExternalPage, PageLookup, ReferenceSource};

pub const DEFAULT_API_URL: &str = "https://en.wikipedia.org/w/api.php";
pub const DEFAULT_USER_AGENT: &str =
    "conceptcheck/0.1 (https://github.com/MysterionRise/conceptcheck)";
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DISAMBIGUATION_LINKS: &str = "20";
/// Fallback when a 429 carries no usable Retry-After header.
const DEFAULT_RETRY_AFTER_MS: u64 = 1000;

/// Wikipedia (or any MediaWiki) reference source.
pub struct WikipediaSource {
    api_url: String,
    access_token: Option<String>,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl WikipediaSource {
    pub fn new(api_url: &str, user_agent: &str) -> anyhow::Result<Self> {
        Self::with_timeout(api_url, user_agent, DEFAULT_TIMEOUT_SECS)
    }

    pub fn with_timeout(api_url: &str, user_agent: &str, timeout_secs: u64) -> anyhow::Result<Self> {
        let api_url = if api_url.is_empty() {
            DEFAULT_API_URL
        } else {
            api_url
        };
        Url::parse(api_url).with_context(|| format!("invalid MediaWiki API URL: {api_url}"))?;

        let user_agent = if user_agent.is_empty() {
            DEFAULT_USER_AGENT
        } else {
            user_agent
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(user_agent)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            api_url: api_url.to_string(),
            access_token: None,
            timeout_secs,
            client,
        })
    }

    /// Bearer token sent with every request (raises API rate limits).
    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token.filter(|t| !t.is_empty());
        self
    }

    async fn get<T: DeserializeOwned>(&self, params: &[(&str, &str)]) -> Result<T, FetchError> {
        let mut all = vec![("action", "query"), ("format", "json"), ("formatversion", "2")];
        all.extend_from_slice(params);
        let url = Url::parse_with_params(&self.api_url, &all)
            .map_err(|e| FetchError::Network(format!("invalid request URL: {e}")))?;

        let mut request = self.client.get(url);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(self.timeout_secs)
            } else if e.is_connect() {
                FetchError::Network(format!("MediaWiki API not reachable at {}", self.api_url))
            } else {
                FetchError::Network(e.to_string())
            }
        })?;

        let response = check_status(response).await?;
        let envelope: ApiEnvelope<T> = response
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))?;
        if let Some(error) = envelope.error {
            return Err(FetchError::Api {
                status: 200,
                message: format!("{}: {}", error.code, error.info),
            });
        }
        envelope
            .query
            .ok_or_else(|| FetchError::Decode("response has no query section".into()))
    }

    async fn disambiguation_options(&self, title: &str) -> Result<Vec<String>, FetchError> {
        let query: LinksQuery = self
            .get(&[
                ("prop", "links"),
                ("plnamespace", "0"),
                ("pllimit", DISAMBIGUATION_LINKS),
                ("titles", title),
            ])
            .await?;
        Ok(query
            .pages
            .into_iter()
            .flat_map(|p| p.links)
            .map(|l| l.title)
            .collect())
    }
}

async fn check_status(response: Response) -> Result<Response, FetchError> {
    let status = response.status().as_u16();
    if status == 429 {
        let retry_after_ms = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(|secs| secs * 1000)
            .unwrap_or(DEFAULT_RETRY_AFTER_MS);
        return Err(FetchError::RateLimited { retry_after_ms });
    }
    if status == 404 {
        return Err(FetchError::NotFound(response.url().to_string()));
    }
    if status >= 400 {
        let body = response.text().await.unwrap_or_default();
        return Err(FetchError::Api {
            status,
            message: body,
        });
    }
    Ok(response)
}

#[derive(Deserialize)]
struct ApiEnvelope<T> {
    query: Option<T>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ApiError {
    code: String,
    #[serde(default)]
    info: String,
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    title: String,
}

#[derive(Deserialize)]
struct PagesQuery {
    #[serde(default)]
    pages: Vec<WikiPage>,
}

#[derive(Deserialize)]
struct WikiPage {
    title: String,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    extract: String,
    #[serde(default)]
    fullurl: Option<String>,
    #[serde(default)]
    pageprops: Option<PageProps>,
}

#[derive(Deserialize)]
struct PageProps {
    #[serde(default)]
    disambiguation: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct LinksQuery {
    #[serde(default)]
    pages: Vec<LinksPage>,
}

#[derive(Deserialize)]
struct LinksPage {
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Deserialize)]
struct Link {
    title: String,
}

/// Text before the first section heading.
fn intro(extract: &str) -> String {
    let end = extract.find("\n==").unwrap_or(extract.len());
    extract[..end].trim().to_string()
}

#[async_trait]
impl ReferenceSource for WikipediaSource {
    fn name(&self) -> &str {
        "wikipedia"
    }

    #[instrument(skip(self))]
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<String>, FetchError> {
        let limit = limit.max(1).to_string();
        let result: SearchQuery = self
            .get(&[
                ("list", "search"),
                ("srsearch", query),
                ("srlimit", limit.as_str()),
                ("srprop", ""),
            ])
            .await?;
        Ok(result.search.into_iter().map(|h| h.title).collect())
    }

    #[instrument(skip(self))]
    async fn fetch_page(&self, title: &str) -> Result<PageLookup, FetchError> {
        let result: PagesQuery = self
            .get(&[
                ("prop", "extracts|info|pageprops"),
                ("explaintext", "1"),
                ("exsectionformat", "wiki"),
                ("inprop", "url"),
                ("redirects", "1"),
                ("titles", title),
            ])
            .await?;
        let page = result
            .pages
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::NotFound(title.to_string()))?;
        if page.missing {
            return Err(FetchError::NotFound(title.to_string()));
        }

        let is_disambiguation = page
            .pageprops
            .as_ref()
            .is_some_and(|p| p.disambiguation.is_some());
        if is_disambiguation {
            let options = self.disambiguation_options(&page.title).await?;
            tracing::debug!(title = %page.title, options = options.len(), "disambiguation page");
            return Ok(PageLookup::Disambiguation(options));
        }

        Ok(PageLookup::Page(ExternalPage {
            summary: intro(&page.extract),
            title: page.title,
            text: page.extract,
            url: page.fullurl,
        }))
    }
}
