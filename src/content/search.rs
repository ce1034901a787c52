use crate::error::{AnalysisError, AnalysisResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchItem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub display_link: String,
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Ranked results for a query; empty when nothing matched.
    async fn search(&self, query: &str) -> AnalysisResult<Vec<SearchItem>>;
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

/// Google Programmable Search JSON API.
pub struct GoogleSearch {
    client: Client,
    api_base: String,
    api_key: String,
    cx: String,
    country: String,
}

impl GoogleSearch {
    pub fn new(
        api_base: &str,
        api_key: &str,
        cx: &str,
        country: &str,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            api_base: api_base.to_string(),
            api_key: api_key.to_string(),
            cx: cx.to_string(),
            country: country.to_lowercase(),
        })
    }
}

#[async_trait]
impl WebSearch for GoogleSearch {
    async fn search(&self, query: &str) -> AnalysisResult<Vec<SearchItem>> {
        let response = self
            .client
            .get(&self.api_base)
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.cx.as_str()),
                ("gl", self.country.as_str()),
                ("q", query),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AnalysisError::ExternalService(format!(
                "search returned {}",
                response.status()
            )));
        }
        let body: SearchResponse = response.json().await?;
        Ok(body.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> GoogleSearch {
        GoogleSearch::new(&server.uri(), "k", "cx1", "GB", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_search_items() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("q", "Acme Corp"))
            .and(query_param("cx", "cx1"))
            .and(query_param("gl", "gb"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{
                    "title": "Acme Corp - Home",
                    "link": "https://www.acme.com/",
                    "displayLink": "www.acme.com"
                }]
            })))
            .mount(&server)
            .await;

        let items = client(&server).search("Acme Corp").await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].display_link, "www.acme.com");
    }

    #[tokio::test]
    async fn test_no_items_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"kind": "x"})))
            .mount(&server)
            .await;
        assert!(client(&server).search("nothing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_quota_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        assert!(matches!(
            client(&server).search("x").await,
            Err(AnalysisError::ExternalService(_))
        ));
    }
}
