use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use url::{Position, Url};

static ABSOLUTE_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://").expect("absolute link pattern is valid"));

/// Errors that can occur during feed URL validation.
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

/// Validates a URL string for use as a feed source.
///
/// Only `http` and `https` URLs with a host are accepted. Loopback and
/// private addresses are allowed: self-hosted RSSHub instances commonly
/// live on `localhost` or a LAN address.
///
/// # Examples
///
/// ```
/// use feedwatch::util::validate_feed_url;
///
/// let url = validate_feed_url("https://example.com/feed.xml").unwrap();
/// assert_eq!(url.host_str(), Some("example.com"));
///
/// assert!(validate_feed_url("file:///etc/passwd").is_err());
/// assert!(validate_feed_url("not a url").is_err());
/// ```
pub fn validate_feed_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str)?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlValidationError::MissingHost);
    }

    Ok(url)
}

/// Canonical form of a feed or endpoint URL: surrounding whitespace and a
/// single trailing `/` removed.
pub fn canonical_feed_url(url_str: &str) -> &str {
    let trimmed = url_str.trim();
    trimmed.strip_suffix('/').unwrap_or(trimmed)
}

/// Whether an item link already carries an `http://` or `https://` prefix.
pub fn is_absolute_link(link: &str) -> bool {
    ABSOLUTE_LINK.is_match(link)
}

/// Scheme and network location of a URL, e.g. `https://example.com:8443`.
pub fn root_url(url: &Url) -> &str {
    &url[..Position::BeforePath]
}

/// Resolves an item link against the feed's root URL.
///
/// Absolute links are returned unchanged. Relative links get the root
/// prepended; protocol-relative links (`//host/path`) only get the scheme.
pub fn absolutize_link(link: &str, root: &str) -> String {
    let link = link.trim();
    if is_absolute_link(link) {
        return link.to_string();
    }
    if let Some(rest) = link.strip_prefix("//") {
        let scheme = root.split("://").next().unwrap_or("https");
        return format!("{scheme}://{rest}");
    }
    if link.starts_with('/') {
        format!("{root}{link}")
    } else {
        format!("{root}/{link}")
    }
}
