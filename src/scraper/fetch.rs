use std::time::Duration;

use tracing::{debug, warn};

use crate::cli::config::ScraperSettings;
use crate::scraper::ScrapeError;

/// Performs single timed HTTP GETs with a fixed user agent.
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    pub fn new(settings: &ScraperSettings) -> Result<Self, ScrapeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.fetch_timeout_secs))
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| ScrapeError::Fetch {
                url: String::new(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self { client })
    }

    /// Fetch a page body. Timeouts, connection errors and non-2xx statuses
    /// all surface as `ScrapeError::Fetch`.
    pub async fn fetch(&self, url: &str) -> Result<String, ScrapeError> {
        debug!("Fetching {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ScrapeError::Fetch {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let response = response.error_for_status().map_err(|e| {
            warn!("Non-success status fetching {}: {}", url, e);
            ScrapeError::Fetch {
                url: url.to_string(),
                reason: e.to_string(),
            }
        })?;

        response.text().await.map_err(|e| ScrapeError::Fetch {
            url: url.to_string(),
            reason: format!("failed to read body: {}", e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_settings() -> ScraperSettings {
        ScraperSettings {
            fetch_timeout_secs: 2,
            user_agent: "Mozilla/5.0".to_string(),
        }
    }

    #[tokio::test]
    async fn test_fetch_returns_body_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>hello</html>"))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&test_settings()).unwrap();
        let body = fetcher.fetch(&server.uri()).await.unwrap();
        assert_eq!(body, "<html>hello</html>");
    }

    #[tokio::test]
    async fn test_fetch_fails_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&test_settings()).unwrap();
        let err = fetcher.fetch(&server.uri()).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Fetch { .. }));
    }

    #[tokio::test]
    async fn test_fetch_fails_on_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_delay(std::time::Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&test_settings()).unwrap();
        let err = fetcher.fetch(&server.uri()).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Fetch { .. }));
    }
}
