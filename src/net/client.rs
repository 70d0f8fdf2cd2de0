//! Shared HTTP client construction.

use std::time::Duration;

use reqwest::{Client, ClientBuilder};

/// User agent sent on every outbound request.
pub const USER_AGENT: &str = concat!("modelgate/", env!("CARGO_PKG_VERSION"));

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default whole-request timeout. Streaming responses count against it, so
/// it is generous.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Thin wrapper that gives every outbound client the same defaults.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
}

impl HttpClient {
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Client with the default connect timeout and the given request timeout.
    pub fn with_timeout_secs(secs: u64) -> Result<Self, reqwest::Error> {
        Self::builder()
            .request_timeout(Duration::from_secs(secs))
            .build()
    }

    pub fn inner(&self) -> &Client {
        &self.inner
    }
}

pub struct HttpClientBuilder {
    builder: ClientBuilder,
    request_timeout: Option<Duration>,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            builder: Client::builder()
                .user_agent(USER_AGENT)
                .connect_timeout(CONNECT_TIMEOUT),
            request_timeout: Some(REQUEST_TIMEOUT),
        }
    }
}

impl HttpClientBuilder {
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Only the connect timeout applies. Callers set per-request timeouts
    /// where a bounded wait is wanted.
    pub fn no_request_timeout(mut self) -> Self {
        self.request_timeout = None;
        self
    }

    pub fn build(self) -> Result<HttpClient, reqwest::Error> {
        let builder = match self.request_timeout {
            Some(timeout) => self.builder.timeout(timeout),
            None => self.builder,
        };
        Ok(HttpClient {
            inner: builder.build()?,
        })
    }
}

/// Join a base URL and an absolute path without doubling the slash.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("http://gw:3001/", "/api/v1/models"),
            "http://gw:3001/api/v1/models"
        );
        assert_eq!(
            join_url("http://gw:3001", "api/v1/models"),
            "http://gw:3001/api/v1/models"
        );
    }

    #[test]
    fn test_user_agent_carries_version() {
        assert!(USER_AGENT.starts_with("modelgate/"));
    }

    #[test]
    fn test_builder_builds() {
        assert!(HttpClient::with_timeout_secs(5).is_ok());
        assert!(HttpClient::builder().no_request_timeout().build().is_ok());
    }
}
