use thiserror::Error;
use url::Url;

/// Reasons a string cannot be used as a feed URL.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host to connect to.
    #[error("URL has no host")]
    MissingHost,
}

/// Validates a URL string for use as a feed source.
///
/// Only `http` and `https` URLs with a host are accepted. Loopback and
/// private addresses are allowed: a desktop reader legitimately subscribes
/// to feeds served on the local network.
///
/// # Examples
///
/// ```
/// use tumbleweed::util::validate_feed_url;
///
/// let url = validate_feed_url("https://example.com/feed.xml").unwrap();
/// assert_eq!(url.host_str(), Some("example.com"));
///
/// assert!(validate_feed_url("file:///etc/passwd").is_err());
/// assert!(validate_feed_url("not a url").is_err());
/// ```
pub fn validate_feed_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlValidationError::MissingHost);
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_urls() {
        assert!(validate_feed_url("https://example.com/feed.xml").is_ok());
        assert!(validate_feed_url("http://news.example.org").is_ok());
        assert!(validate_feed_url("https://example.com:8443/rss?x=1").is_ok());
    }

    #[test]
    fn test_local_addresses_accepted() {
        assert!(validate_feed_url("http://localhost:8080/feed").is_ok());
        assert!(validate_feed_url("http://127.0.0.1:3000/feed").is_ok());
        assert!(validate_feed_url("http://192.168.1.10/podcast.xml").is_ok());
    }

    #[test]
    fn test_invalid_schemes() {
        assert!(matches!(
            validate_feed_url("file:///etc/passwd"),
            Err(UrlValidationError::UnsupportedScheme(s)) if s == "file"
        ));
        assert!(validate_feed_url("ftp://example.com").is_err());
        assert!(validate_feed_url("javascript:alert(1)").is_err());
    }

    #[test]
    fn test_unparseable_rejected() {
        assert!(matches!(
            validate_feed_url("example.com/feed"),
            Err(UrlValidationError::InvalidUrl(_))
        ));
        assert!(validate_feed_url("").is_err());
    }

    #[test]
    fn test_surrounding_whitespace_trimmed() {
        let url = validate_feed_url("  https://example.com/feed \n").unwrap();
        assert_eq!(url.as_str(), "https://example.com/feed");
    }
}
