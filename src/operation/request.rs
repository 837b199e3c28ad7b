//! The request an operation serves.

use reqwest::Method;
use reqwest::header::{CACHE_CONTROL, HeaderMap, HeaderName, HeaderValue, PRAGMA};
use url::Url;

use super::error::TransportError;

/// Identity of a download operation: method, URL and headers.
///
/// A request is immutable once handed to an operation.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
}

impl DownloadRequest {
    /// Creates a GET request for `url`.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
        }
    }

    /// Parses `url` and creates a GET request for it.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Open`] when the URL cannot be parsed.
    pub fn parse(url: &str) -> Result<Self, TransportError> {
        let parsed = Url::parse(url).map_err(|e| TransportError::open(url, e.to_string()))?;
        Ok(Self::get(parsed))
    }

    /// Replaces the request method.
    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Adds a header, replacing any previous value for the same name.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Returns the request method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request URL.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the request headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the host of the request URL, or the whole URL if it has none.
    #[must_use]
    pub fn host(&self) -> String {
        self.url
            .host_str()
            .map_or_else(|| self.url.to_string(), ToString::to_string)
    }

    /// Returns a copy that bypasses intermediate HTTP caches.
    pub(crate) fn bypassing_caches(mut self) -> Self {
        self.headers
            .insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        self.headers
            .insert(PRAGMA, HeaderValue::from_static("no-cache"));
        self
    }
}
