use crate::error::{AnalysisError, AnalysisResult};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// Follows a link to its final destination.
#[async_trait]
pub trait LinkResolver: Send + Sync {
    async fn resolve(&self, url: &str) -> AnalysisResult<String>;
}

pub struct UrlResolver {
    client: Client,
    max_redirects: u8,
}

impl UrlResolver {
    pub fn new(timeout: Duration, max_redirects: u8) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("phishscope/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            max_redirects,
        })
    }
}

#[async_trait]
impl LinkResolver for UrlResolver {
    /// GETs the link and follows `Location` headers up to the redirect limit.
    async fn resolve(&self, url: &str) -> AnalysisResult<String> {
        let mut current_url = url.to_string();
        let mut redirect_count = 0;

        loop {
            let response = self.client.get(&current_url).send().await?;
            if !response.status().is_redirection() {
                break;
            }
            let Some(location) = response.headers().get(reqwest::header::LOCATION) else {
                break;
            };
            if redirect_count >= self.max_redirects {
                return Err(AnalysisError::ExternalService(format!(
                    "too many redirects from {url}"
                )));
            }
            let location_str = location
                .to_str()
                .map_err(|e| AnalysisError::ExternalService(format!("bad Location header: {e}")))?;

            // Handle relative URLs
            let base = Url::parse(&current_url)
                .map_err(|e| AnalysisError::InvalidInput(format!("{current_url}: {e}")))?;
            current_url = base
                .join(location_str)
                .map_err(|e| AnalysisError::ExternalService(format!("bad redirect target: {e}")))?
                .to_string();
            redirect_count += 1;
        }

        log::debug!("Resolved {url} -> {current_url} ({redirect_count} redirects)");
        Ok(current_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_follows_relative_and_absolute_redirects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/short"))
            .respond_with(ResponseTemplate::new(301).insert_header("Location", "/hop"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/hop"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("Location", format!("{}/landing", server.uri()).as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/landing"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let resolver = UrlResolver::new(Duration::from_secs(5), 5).unwrap();
        let final_url = resolver
            .resolve(&format!("{}/short", server.uri()))
            .await
            .unwrap();
        assert_eq!(final_url, format!("{}/landing", server.uri()));
    }

    #[tokio::test]
    async fn test_redirect_loop_is_bounded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/loop"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/loop"))
            .mount(&server)
            .await;

        let resolver = UrlResolver::new(Duration::from_secs(5), 3).unwrap();
        let result = resolver.resolve(&format!("{}/loop", server.uri())).await;
        assert!(matches!(result, Err(AnalysisError::ExternalService(_))));
    }
}
