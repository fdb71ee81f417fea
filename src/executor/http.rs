//! HTTP executor implementation
//!
//! This module fetches a task's `url` parameter and extracts records from it:
//! - Building HTTP clients with the configured user agent and egress proxy
//! - Retrying retryable failures with exponential backoff
//! - Mapping transport failures to messages the classifier understands
//! - Extracting item texts with a CSS selector

use crate::classify::{retry_delay, ErrorClassifier};
use crate::config::HttpConfig;
use crate::executor::{CrawlExecutor, CrawlOutput, ExecutionContext, TaskParams};
use crate::proxy::ProxyEndpoint;
use crate::throttle::RateLimiter;
use crate::FetchError;
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// A successfully fetched page
#[derive(Debug, Clone)]
struct FetchedPage {
    final_url: String,
    status_code: u16,
    body: String,
}

/// Title and item texts pulled from an HTML document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedPage {
    pub title: Option<String>,
    pub items: Vec<String>,
}

/// Builds an HTTP client with the configured user agent and timeout
///
/// # Arguments
///
/// * `config` - The HTTP configuration
/// * `proxy` - Egress proxy for every request made by this client
pub fn build_http_client(
    config: &HttpConfig,
    proxy: Option<&ProxyEndpoint>,
) -> Result<Client, FetchError> {
    let mut builder = Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(Duration::from_secs(config.timeout_secs))
        .gzip(true)
        .brotli(true);

    if let Some(endpoint) = proxy {
        builder = builder.proxy(endpoint.to_reqwest_proxy()?);
    }

    builder.build().map_err(FetchError::Client)
}

/// Extracts the page title and, if a selector is given, the trimmed text of
/// every matching element (empty texts are skipped)
pub fn extract_items(html: &str, selector: Option<&str>) -> Result<ExtractedPage, FetchError> {
    let document = Html::parse_document(html);

    let title = Selector::parse("title").ok().and_then(|title_selector| {
        document
            .select(&title_selector)
            .next()
            .map(|element| element.text().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty())
    });

    let items = match selector {
        Some(raw) => {
            let item_selector = Selector::parse(raw).map_err(|e| FetchError::Selector {
                selector: raw.to_string(),
                message: format!("{:?}", e),
            })?;

            document
                .select(&item_selector)
                .map(|element| {
                    element
                        .text()
                        .collect::<Vec<_>>()
                        .join(" ")
                        .split_whitespace()
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .filter(|text| !text.is_empty())
                .collect()
        }
        None => Vec::new(),
    };

    Ok(ExtractedPage { title, items })
}

/// Executor that fetches a page over HTTP and extracts items from it
///
/// Task parameters:
/// - `url` (required): page to fetch
/// - `selector` (optional): CSS selector whose matches become items
///
/// Any other parameters (platform, keyword, ...) are echoed in the result.
pub struct HttpExecutor {
    config: HttpConfig,
    client: Client,
    classifier: Arc<ErrorClassifier>,
}

impl HttpExecutor {
    /// Creates a new executor
    ///
    /// The classifier decides which fetch failures are worth retrying inside
    /// a single task attempt.
    pub fn new(config: HttpConfig, classifier: Arc<ErrorClassifier>) -> Result<Self, FetchError> {
        let client = build_http_client(&config, None)?;
        Ok(Self {
            config,
            client,
            classifier,
        })
    }

    /// Fetches a URL once
    async fn fetch_page(&self, client: &Client, url: &str) -> Result<FetchedPage, FetchError> {
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let final_url = response.url().to_string();
        let body = response.text().await.map_err(|e| transport_error(url, e))?;

        Ok(FetchedPage {
            final_url,
            status_code: status.as_u16(),
            body,
        })
    }

    /// Fetches a URL, retrying retryable failures with exponential backoff
    ///
    /// The first request is assumed to be admitted already; every retry waits
    /// for its own slot on `limiter`.
    async fn fetch_with_retry(
        &self,
        client: &Client,
        url: &str,
        limiter: Option<&RateLimiter>,
    ) -> Result<FetchedPage, FetchError> {
        let base_delay = Duration::from_millis(self.config.retry_base_delay_ms);
        let mut attempts = 0;

        loop {
            match self.fetch_page(client, url).await {
                Ok(page) => return Ok(page),
                Err(e) => {
                    attempts += 1;
                    let kind = self.classifier.kind_of(&e.to_string());

                    if !kind.is_retryable() || attempts >= self.config.max_fetch_attempts {
                        return Err(e);
                    }

                    let delay = retry_delay(attempts - 1, base_delay);
                    tracing::debug!(
                        "Fetch of {} failed ({}), retrying in {:?} (attempt {}/{})",
                        url,
                        kind,
                        delay,
                        attempts + 1,
                        self.config.max_fetch_attempts
                    );
                    tokio::time::sleep(delay).await;

                    if let Some(limiter) = limiter {
                        limiter.wait_for_slot().await;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl CrawlExecutor for HttpExecutor {
    async fn execute(
        &self,
        params: &TaskParams,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<CrawlOutput> {
        let url = params
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or(FetchError::MissingParameter("url"))?;
        Url::parse(url).map_err(|source| FetchError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        let selector = params.get("selector").and_then(|v| v.as_str());

        let limiter = ctx.rate_limiter.as_deref();
        let page = match &ctx.proxy {
            Some(endpoint) => {
                tracing::debug!("Task {} fetching {} via {}", ctx.task_id, url, endpoint.address);
                let client = build_http_client(&self.config, Some(endpoint))?;
                self.fetch_with_retry(&client, url, limiter).await?
            }
            None => self.fetch_with_retry(&self.client, url, limiter).await?,
        };

        let extracted = extract_items(&page.body, selector)?;
        let item_count = extracted.items.len();

        Ok(CrawlOutput {
            data: json!({
                "url": url,
                "final_url": page.final_url,
                "status": page.status_code,
                "title": extracted.title,
                "items": extracted.items,
                "platform": params.get("platform"),
                "keyword": params.get("keyword"),
            }),
            item_count,
        })
    }
}

/// Maps a transport-level reqwest error to a fetch error
fn transport_error(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else if e.is_connect() {
        FetchError::Connect {
            url: url.to_string(),
            source: e,
        }
    } else {
        FetchError::Request {
            url: url.to_string(),
            source: e,
        }
    }
}
