use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::VectorError;

/// Default embeddings endpoint
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// External embedding provider
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input, in input order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, VectorError>;

    /// Model identifier, recorded for observability
    fn model(&self) -> &str;
}

/// Embedder speaking the OpenAI embeddings wire format
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
}

impl HttpEmbedder {
    pub fn new(model: String, base_url: Option<String>, api_key: Option<SecretString>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model,
            api_key,
        }
    }
}

/// Wire format for the embeddings API request
#[derive(Serialize)]
struct WireRequest<'a> {
    input: &'a [String],
    model: &'a str,
    encoding_format: &'static str,
}

/// Wire format for the embeddings API response
#[derive(Deserialize)]
struct WireResponse {
    data: Vec<WireEmbedding>,
}

#[derive(Deserialize)]
struct WireEmbedding {
    embedding: Vec<f32>,
    index: usize,
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, VectorError> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));

        tracing::debug!(model = %self.model, inputs = texts.len(), "sending embeddings request");

        let mut request = self.client.post(&url).json(&WireRequest {
            input: texts,
            model: &self.model,
            encoding_format: "float",
        });

        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key.expose_secret()));
        }

        let response = request
            .send()
            .await
            .map_err(|e| VectorError::Embedder(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VectorError::Embedder(format!("HTTP {status}: {body}")));
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| VectorError::Embedder(format!("malformed response: {e}")))?;

        if wire.data.len() != texts.len() {
            return Err(VectorError::Embedder(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                wire.data.len()
            )));
        }

        let mut data = wire.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    fn model(&self) -> &str {
        &self.model
    }
}
