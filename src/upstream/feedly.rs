use async_trait::async_trait;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use url::Url;

use super::types::{decode_items, RawItem, StreamContents, UnreadCount, UnreadCountsResponse};
use super::{Authorized, UpstreamClient, UpstreamError};

const MAX_RETRIES: u32 = 3;
const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024; // 10MB
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// reqwest-backed client for a Feedly-compatible v3 API.
///
/// GET requests retry 429 and 5xx responses with exponential backoff.
/// The mark-read POST is sent exactly once.
pub struct FeedlyClient {
    http: reqwest::Client,
    base_url: Url,
    page_size: AtomicUsize,
    token: RwLock<Option<SecretString>>,
    retry_base: Duration,
}

impl FeedlyClient {
    /// Build a client for `base_url` (e.g. `https://cloud.feedly.com/v3`).
    ///
    /// # Errors
    ///
    /// [`UpstreamError::InvalidUrl`] when the base cannot be parsed, or is plain
    /// HTTP on anything but localhost (the credential would travel in clear).
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        page_size: usize,
        token: Option<String>,
    ) -> Result<Self, UpstreamError> {
        let base_url =
            Url::parse(base_url).map_err(|e| UpstreamError::InvalidUrl(e.to_string()))?;

        match base_url.scheme() {
            "https" => {}
            "http" if is_localhost(&base_url) => {
                tracing::warn!(base_url = %base_url, "Using non-HTTPS API base URL (localhost only)");
            }
            _ => {
                tracing::error!(base_url = %base_url, "Rejecting non-HTTPS API base URL");
                return Err(UpstreamError::InvalidUrl(format!(
                    "{base_url}: HTTPS required (except localhost)"
                )));
            }
        }
        if base_url.cannot_be_a_base() {
            return Err(UpstreamError::InvalidUrl(base_url.to_string()));
        }

        Ok(Self {
            http,
            base_url,
            page_size: AtomicUsize::new(page_size.max(1)),
            token: RwLock::new(token.map(SecretString::from)),
            retry_base: Duration::from_secs(1),
        })
    }

    /// Override the first backoff delay (1s by default; doubles per retry).
    pub fn with_retry_base(mut self, retry_base: Duration) -> Self {
        self.retry_base = retry_base;
        self
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, UpstreamError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| UpstreamError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let token = self.token.read().unwrap_or_else(PoisonError::into_inner);
        match token.as_ref() {
            Some(secret) => {
                request.header("Authorization", format!("OAuth {}", secret.expose_secret()))
            }
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, UpstreamError> {
        tokio::time::timeout(REQUEST_TIMEOUT, self.authorize(request).send())
            .await
            .map_err(|_| UpstreamError::Timeout)?
            .map_err(UpstreamError::Network)
    }

    /// GET `url` and decode JSON, retrying transient failures.
    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<Authorized<T>, UpstreamError> {
        let mut retry_count = 0;

        loop {
            let response = self.send(self.http.get(url.clone())).await?;
            let status = response.status();

            if is_auth_failure(status) {
                tracing::info!(endpoint = %url.path(), status = %status, "Upstream requires authorization");
                return Ok(Authorized::Required);
            }

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                if retry_count >= MAX_RETRIES {
                    return Err(if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        UpstreamError::RateLimited(MAX_RETRIES)
                    } else {
                        UpstreamError::HttpStatus(status.as_u16())
                    });
                }

                let delay = self.retry_base * 2u32.pow(retry_count);
                tracing::warn!(
                    endpoint = %url.path(),
                    status = %status,
                    retry = retry_count + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Transient upstream error, retrying after delay"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if !status.is_success() {
                return Err(UpstreamError::HttpStatus(status.as_u16()));
            }

            let bytes = read_limited_bytes(response, MAX_RESPONSE_SIZE).await?;
            let body = serde_json::from_slice(&bytes)?;
            return Ok(Authorized::Granted(body));
        }
    }
}

#[async_trait]
impl UpstreamClient for FeedlyClient {
    async fn unread_counts(&self) -> Result<Authorized<Vec<UnreadCount>>, UpstreamError> {
        let url = self.endpoint(&["markers", "counts"])?;
        let reply: Authorized<UnreadCountsResponse> = self.get_json(url).await?;
        Ok(reply.map(|body| body.unreadcounts))
    }

    async fn unread_entries(
        &self,
        category_id: &str,
    ) -> Result<Authorized<Vec<RawItem>>, UpstreamError> {
        let mut url = self.endpoint(&["streams", category_id, "contents"])?;
        url.query_pairs_mut()
            .append_pair("unreadOnly", "true")
            .append_pair("count", &self.page_size.load(Ordering::Relaxed).to_string());

        let reply: Authorized<StreamContents> = self.get_json(url).await?;
        Ok(reply.map(|body| {
            let (items, skipped) = decode_items(body.items);
            if skipped > 0 {
                tracing::warn!(
                    category = %category_id,
                    skipped = skipped,
                    "Upstream items with unexpected shape skipped"
                );
            }
            items
        }))
    }

    async fn mark_entries_read(&self, ids: &[String]) -> Result<Authorized<()>, UpstreamError> {
        let url = self.endpoint(&["markers"])?;
        let body = serde_json::json!({
            "action": "markAsRead",
            "type": "entries",
            "entryIds": ids,
        });

        let response = self.send(self.http.post(url).json(&body)).await?;
        let status = response.status();
        if is_auth_failure(status) {
            return Ok(Authorized::Required);
        }
        if !status.is_success() {
            return Err(UpstreamError::HttpStatus(status.as_u16()));
        }
        Ok(Authorized::Granted(()))
    }

    fn set_credential(&self, token: Option<String>) {
        let mut slot = self.token.write().unwrap_or_else(PoisonError::into_inner);
        *slot = token.map(SecretString::from);
        tracing::debug!(configured = slot.is_some(), "Upstream credential replaced");
    }

    fn set_page_size(&self, page_size: usize) {
        let page_size = page_size.max(1);
        self.page_size.store(page_size, Ordering::Relaxed);
        tracing::debug!(page_size, "Upstream page size replaced");
    }
}

/// HTTP client for talking to the aggregation service.
///
/// Redirects are capped at 3 and may not leave the original host, so the
/// credential header is never replayed to a third party.
pub fn build_http_client() -> Result<reqwest::Client, UpstreamError> {
    let policy = reqwest::redirect::Policy::custom(|attempt| {
        if attempt.previous().len() >= 3 {
            return attempt.error("Too many redirects (max 3)");
        }
        let same_host = attempt
            .previous()
            .first()
            .is_some_and(|first| first.host_str() == attempt.url().host_str());
        if !same_host {
            return attempt.error("Cross-host redirect refused");
        }
        tracing::debug!(to = %attempt.url(), hop = attempt.previous().len(), "Following redirect");
        attempt.follow()
    });

    reqwest::Client::builder()
        .redirect(policy)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60))
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(UpstreamError::Network)
}

fn is_auth_failure(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
}

fn is_localhost(url: &Url) -> bool {
    matches!(url.host_str(), Some("localhost") | Some("127.0.0.1") | Some("[::1]"))
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, UpstreamError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(UpstreamError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(UpstreamError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(UpstreamError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
