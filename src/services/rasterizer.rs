//! HTML-to-image rasterization, treated as a remote service.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use crate::error::RenderError;

const RASTERIZE_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn render(&self, html: &str, width: u32, height: u32) -> Result<Vec<u8>, RenderError>;
}

/// Talks to an external rasterization service (headless browser behind an
/// HTTP API): POST `{html, width, height}`, PNG bytes back.
pub struct HttpRasterizer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRasterizer {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Rasterizer for HttpRasterizer {
    async fn render(&self, html: &str, width: u32, height: u32) -> Result<Vec<u8>, RenderError> {
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(RASTERIZE_TIMEOUT)
            .json(&json!({
                "html": html,
                "width": width,
                "height": height,
            }))
            .send()
            .await
            .map_err(|e| RenderError::Rasterizer(e.to_string()))?
            .error_for_status()
            .map_err(|e| RenderError::Rasterizer(e.to_string()))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RenderError::Rasterizer(e.to_string()))?;
        if bytes.is_empty() {
            return Err(RenderError::Rasterizer("empty response body".into()));
        }
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

    #[tokio::test]
    async fn posts_document_and_returns_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"width": 800, "height": 480})))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(PNG_MAGIC))
            .mount(&server)
            .await;

        let rasterizer = HttpRasterizer::new(server.uri());
        let bytes = rasterizer.render("<html></html>", 800, 480).await.unwrap();
        assert_eq!(bytes, PNG_MAGIC);
    }

    #[tokio::test]
    async fn service_error_is_a_rasterizer_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let rasterizer = HttpRasterizer::new(server.uri());
        let err = rasterizer.render("<html></html>", 800, 480).await.unwrap_err();
        assert!(matches!(err, RenderError::Rasterizer(_)));
    }

    #[tokio::test]
    async fn empty_body_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let rasterizer = HttpRasterizer::new(server.uri());
        assert!(rasterizer.render("<html></html>", 800, 480).await.is_err());
    }
}
