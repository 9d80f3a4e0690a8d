//! Ploomes CRM API client.
//!
//! Read-only access to the contacts and deals the sync imports.
//!
//! # API Reference
//!
//! - Base URL: `https://public-api2.ploomes.com`
//! - Authentication: `User-Key` header
//! - Collections are OData: `{ "value": [...] }`, paged with `$top` / `$skip`

mod adapter;
mod types;

pub use adapter::{customer_from_contact, sale_from_deal};
pub use types::*;

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::instrument;

use crate::config::PloomesConfig;

/// Retries of one page request after a 429.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Deal fields the sales import reads.
const DEAL_FIELDS: &str =
    "Id,ContactId,OwnerId,Amount,StageId,StatusId,CreateDate,LastUpdateDate,Title";

/// Errors that can occur when interacting with the Ploomes API.
#[derive(Debug, Error)]
pub enum PloomesError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Rate limited and out of retries.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Failed to build a request or parse a response.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Unauthorized (invalid `User-Key`).
    #[error("Unauthorized: invalid API key")]
    Unauthorized,
}

/// Source of CRM records for the sync.
#[async_trait]
pub trait CrmSource: Send + Sync {
    /// Every contact tagged as a customer.
    async fn list_customer_contacts(&self) -> Result<Vec<Contact>, PloomesError>;

    /// Every deal.
    async fn list_deals(&self) -> Result<Vec<Deal>, PloomesError>;
}

/// Ploomes API client.
#[derive(Clone)]
pub struct PloomesClient {
    inner: Arc<PloomesClientInner>,
}

struct PloomesClientInner {
    client: reqwest::Client,
    base_url: String,
    client_tag_id: i64,
    page_size: u32,
    limiter: DefaultDirectRateLimiter,
}

impl PloomesClient {
    /// Create a new Ploomes API client.
    ///
    /// # Errors
    ///
    /// Returns error if the API key is not a valid header value or the HTTP
    /// client fails to build.
    pub fn new(config: &PloomesConfig) -> Result<Self, PloomesError> {
        let headers = default_headers(&config.api_key)?;

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()?;

        let per_minute = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            inner: Arc::new(PloomesClientInner {
                client,
                base_url: config.base_url.trim_end_matches('/').to_string(),
                client_tag_id: config.client_tag_id,
                page_size: config.page_size.max(1),
                limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
            }),
        })
    }

    /// Contacts carrying the customer tag, with city and tags expanded.
    ///
    /// # Errors
    ///
    /// Returns the first page error; partial results are discarded.
    #[instrument(skip(self))]
    pub async fn list_customer_contacts(&self) -> Result<Vec<Contact>, PloomesError> {
        let filter = format!(
            "Tags/any(t: t/TagId eq {})",
            self.inner.client_tag_id
        );
        let contacts = self
            .get_all::<Contact>("/Contacts", &[("$expand", "City,Tags"), ("$filter", filter.as_str())])
            .await?;
        tracing::info!(count = contacts.len(), "Fetched customer contacts");
        Ok(contacts)
    }

    /// All deals, with only the fields the sales import reads.
    ///
    /// # Errors
    ///
    /// Returns the first page error; partial results are discarded.
    #[instrument(skip(self))]
    pub async fn list_deals(&self) -> Result<Vec<Deal>, PloomesError> {
        let deals = self
            .get_all::<Deal>("/Deals", &[("$select", DEAL_FIELDS)])
            .await?;
        tracing::info!(count = deals.len(), "Fetched deals");
        Ok(deals)
    }

    /// Walk an OData collection until a page comes back short.
    async fn get_all<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<Vec<T>, PloomesError> {
        let page_size = self.inner.page_size;
        let top = page_size.to_string();
        let mut items = Vec::new();
        let mut skip: u64 = 0;

        loop {
            let skip_value = skip.to_string();
            let mut query: Vec<(&str, &str)> = params.to_vec();
            query.push(("$top", &top));
            query.push(("$skip", &skip_value));

            let page: ODataPage<T> = self.get(path, &query).await?;
            let received = page.value.len();
            tracing::debug!(path, skip, received, "Fetched page");
            items.extend(page.value);

            if received < page_size as usize {
                break;
            }
            skip += u64::from(page_size);
        }

        Ok(items)
    }

    /// Execute a GET request, waiting out rate limits.
    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, PloomesError> {
        let url = url::Url::parse_with_params(&format!("{}{path}", self.inner.base_url), query)
            .map_err(|e| PloomesError::Parse(format!("Invalid request URL: {e}")))?;

        let mut retries = 0;
        loop {
            self.inner.limiter.until_ready().await;
            let response = self.inner.client.get(url.clone()).send().await?;

            match handle_response(response).await {
                Err(PloomesError::RateLimited(wait)) if retries < MAX_RATE_LIMIT_RETRIES => {
                    retries += 1;
                    tracing::warn!(path, wait, retries, "Ploomes rate limit hit, backing off");
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl CrmSource for PloomesClient {
    async fn list_customer_contacts(&self) -> Result<Vec<Contact>, PloomesError> {
        Self::list_customer_contacts(self).await
    }

    async fn list_deals(&self) -> Result<Vec<Deal>, PloomesError> {
        Self::list_deals(self).await
    }
}

impl std::fmt::Debug for PloomesClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PloomesClient")
            .field("base_url", &self.inner.base_url)
            .field("client_tag_id", &self.inner.client_tag_id)
            .field("page_size", &self.inner.page_size)
            .finish_non_exhaustive()
    }
}

fn default_headers(api_key: &SecretString) -> Result<HeaderMap, PloomesError> {
    let mut headers = HeaderMap::new();

    let mut key = HeaderValue::from_str(api_key.expose_secret())
        .map_err(|e| PloomesError::Parse(format!("Invalid API key format: {e}")))?;
    key.set_sensitive(true);
    headers.insert("User-Key", key);

    headers.insert(
        "Content-Type",
        HeaderValue::from_static("application/json; charset=utf-8"),
    );

    Ok(headers)
}

/// Handle API response and parse JSON.
async fn handle_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, PloomesError> {
    let status = response.status();

    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| PloomesError::Parse(format!("Failed to parse response: {e}")));
    }

    Err(parse_error(response).await)
}

/// Parse error response from the Ploomes API.
async fn parse_error(response: reqwest::Response) -> PloomesError {
    let status = response.status().as_u16();

    if status == 429 {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);
        return PloomesError::RateLimited(retry_after);
    }

    if status == 401 || status == 403 {
        return PloomesError::Unauthorized;
    }

    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    PloomesError::Api { status, message }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config() -> PloomesConfig {
        PloomesConfig {
            api_key: SecretString::from("9F3B7C2E1A8D4F6B0C5E"),
            base_url: "https://public-api2.ploomes.com/".to_string(),
            client_tag_id: crate::config::DEFAULT_CLIENT_TAG_ID,
            page_size: 300,
            requests_per_minute: 0,
        }
    }

    #[test]
    fn test_client_trims_base_url_and_redacts_key() {
        let client = PloomesClient::new(&config()).unwrap();
        let debug = format!("{client:?}");
        assert!(debug.contains("https://public-api2.ploomes.com\""));
        assert!(!debug.contains("9F3B7C2E1A8D4F6B0C5E"));
    }

    #[test]
    fn test_default_headers_mark_key_sensitive() {
        let headers = default_headers(&SecretString::from("abc123")).unwrap();
        assert!(headers.get("User-Key").unwrap().is_sensitive());
    }

    #[test]
    fn test_rejects_key_with_newline() {
        let result = default_headers(&SecretString::from("abc\n123"));
        assert!(matches!(result, Err(PloomesError::Parse(_))));
    }
}
