use thiserror::Error;
use url::Url;

/// Errors that can occur when validating a URL taken from upstream data.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
}

/// Validates a permalink before it is handed to the system URL opener.
///
/// Only `http` and `https` URLs with a host are accepted, so entry data can
/// never make the opener launch `file://`, `javascript:` or custom-scheme
/// handlers.
///
/// # Examples
///
/// ```
/// use feedwatch::util::validate_url_for_open;
///
/// assert!(validate_url_for_open("https://example.com/post/1").is_ok());
/// assert!(validate_url_for_open("file:///etc/passwd").is_err());
/// ```
pub fn validate_url_for_open(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(UrlValidationError::MissingHost),
    }
}

/// Scheme + host (+ non-default port) prefix of an http(s) URL,
/// e.g. `https://blog.example.com` for `https://blog.example.com/2024/post`.
///
/// Returns `None` for anything that is not an absolute http(s) URL with a host.
pub fn site_origin(url_str: &str) -> Option<String> {
    validate_url_for_open(url_str)
        .ok()
        .map(|url| url.origin().ascii_serialization())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_urls() {
        assert!(validate_url_for_open("https://example.com/feed.xml").is_ok());
        assert!(validate_url_for_open("http://news.example.org").is_ok());
        assert!(validate_url_for_open("  https://padded.example.com  ").is_ok());
    }

    #[test]
    fn test_invalid_schemes() {
        assert!(matches!(
            validate_url_for_open("file:///etc/passwd"),
            Err(UrlValidationError::UnsupportedScheme(_))
        ));
        assert!(validate_url_for_open("javascript:alert(1)").is_err());
        assert!(validate_url_for_open("ftp://example.com").is_err());
    }

    #[test]
    fn test_unparsable() {
        assert!(matches!(
            validate_url_for_open("not a url"),
            Err(UrlValidationError::InvalidUrl(_))
        ));
        assert!(validate_url_for_open("").is_err());
    }

    #[test]
    fn test_site_origin() {
        assert_eq!(
            site_origin("https://blog.example.com/2024/01/post?x=1").as_deref(),
            Some("https://blog.example.com")
        );
        assert_eq!(
            site_origin("http://example.com:8080/feed").as_deref(),
            Some("http://example.com:8080")
        );
        assert_eq!(
            site_origin("HTTPS://Example.COM/").as_deref(),
            Some("https://example.com")
        );
    }

    #[test]
    fn test_site_origin_rejects_malformed() {
        assert_eq!(site_origin(""), None);
        assert_eq!(site_origin("example.com/path"), None);
        assert_eq!(site_origin("mailto:someone@example.com"), None);
    }
}
