//! Contract with the feed-aggregation service.
//!
//! The sync core only talks to the service through [`UpstreamClient`]:
//!
//! - [`UpstreamClient::unread_counts`] - unread totals per category
//! - [`UpstreamClient::unread_entries`] - unread items of one category
//! - [`UpstreamClient::mark_entries_read`] - mark a set of entries read
//!
//! Every reply is wrapped in [`Authorized`], so an expired session is an
//! ordinary value rather than an error. Transport problems surface as
//! [`UpstreamError`]; retrying them is the client's business.
//!
//! [`FeedlyClient`] is the reqwest-backed implementation used by the binary.

mod feedly;
mod types;

use async_trait::async_trait;

pub use feedly::{build_http_client, FeedlyClient};
pub use types::{
    decode_items, Alternate, ItemText, Origin, RawItem, StreamContents, UnreadCount,
    UnreadCountsResponse,
};

use thiserror::Error;

/// Errors raised while talking to the aggregation service.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with a non-2xx status other than 401/403
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the per-request timeout
    #[error("Request timed out")]
    Timeout,
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Body was not the JSON shape we expected
    #[error("Malformed response: {0}")]
    Decode(#[from] serde_json::Error),
    /// The API base URL or a derived endpoint could not be built
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// A reply that may instead report that the session needs a new login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorized<T> {
    Granted(T),
    Required,
}

impl<T> Authorized<T> {
    pub fn is_granted(&self) -> bool {
        matches!(self, Authorized::Granted(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Authorized<U> {
        match self {
            Authorized::Granted(value) => Authorized::Granted(f(value)),
            Authorized::Required => Authorized::Required,
        }
    }
}

/// Authenticated request/response access to the aggregation service.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Unread totals per category, in the order the service reports them.
    async fn unread_counts(&self) -> Result<Authorized<Vec<UnreadCount>>, UpstreamError>;

    /// Unread items of `category_id`, capped at the service page limit.
    async fn unread_entries(
        &self,
        category_id: &str,
    ) -> Result<Authorized<Vec<RawItem>>, UpstreamError>;

    /// Mark `ids` read on the service.
    async fn mark_entries_read(&self, ids: &[String]) -> Result<Authorized<()>, UpstreamError>;

    /// Replace the credential used for subsequent requests.
    fn set_credential(&self, token: Option<String>);

    /// Replace the number of entries requested per fetch.
    fn set_page_size(&self, page_size: usize);
}
