//! Language-model transport.
//!
//! [`CompletionTransport`] opens one streaming completion and hands back the
//! raw response body as a stream of byte chunks. Decoding is left to
//! [`StreamDecoder`](crate::StreamDecoder), so a transport knows nothing about
//! SSE framing and test transports can replay recorded bytes as-is.
//!
//! [`OpenAiTransport`] talks to any OpenAI-compatible `/chat/completions`
//! endpoint over `reqwest`. Only opening the connection is retried; once bytes
//! have started flowing, a failure ends the stream and the orchestrator keeps
//! whatever text arrived.

use crate::retry::{RetryConfig, retry_with_backoff_conditional};
use crate::types::{ChatCompletionRequest, CompletionOptions};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;

/// Raw response body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Opens streaming completions.
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    async fn open_stream(&self, request: &ChatCompletionRequest) -> Result<ByteStream>;
}

/// Transport for OpenAI-compatible chat completion servers.
#[derive(Debug, Clone)]
pub struct OpenAiTransport {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetryConfig,
}

impl OpenAiTransport {
    /// Build a transport from the endpoint, key and timeout in `options`.
    pub fn new(options: &CompletionOptions) -> Result<Self> {
        // the timeout covers the whole request, body included
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(options.timeout))
            .build()
            .map_err(Error::Http)?;

        Ok(Self {
            http_client,
            base_url: options.base_url.clone(),
            api_key: options.api_key.clone(),
            retry: RetryConfig::default(),
        })
    }

    /// Replace the retry policy for opening connections.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn connect(&self, request: &ChatCompletionRequest) -> Result<reqwest::Response> {
        let mut builder = self
            .http_client
            .post(self.endpoint())
            .header("Content-Type", "application/json")
            .json(request);
        if !self.api_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::timeout()
            } else {
                Error::Http(e)
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|e| {
                log::warn!("Failed to read error response body: {}", e);
                "Unknown error (failed to read response body)".to_string()
            });
            return Err(Error::api(format!("API error {}: {}", status, body)));
        }

        Ok(response)
    }
}

#[async_trait]
impl CompletionTransport for OpenAiTransport {
    async fn open_stream(&self, request: &ChatCompletionRequest) -> Result<ByteStream> {
        log::debug!(
            "opening completion stream: model={} messages={}",
            request.model,
            request.messages.len()
        );

        let response =
            retry_with_backoff_conditional(self.retry.clone(), || self.connect(request)).await?;

        let body = response.bytes_stream().map(|chunk| match chunk {
            Ok(bytes) => Ok(bytes.to_vec()),
            Err(e) if e.is_timeout() => Err(Error::timeout()),
            Err(e) => Err(Error::stream(format!("response body interrupted: {}", e))),
        });
        Ok(Box::pin(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> CompletionOptions {
        CompletionOptions::builder()
            .model("gpt-3.5-turbo")
            .base_url("http://localhost:1234/v1/")
            .api_key("sk-test")
            .build()
            .unwrap()
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let transport = OpenAiTransport::new(&options()).unwrap();
        assert_eq!(
            transport.endpoint(),
            "http://localhost:1234/v1/chat/completions"
        );
    }

    #[test]
    fn test_with_retry_replaces_policy() {
        let transport = OpenAiTransport::new(&options())
            .unwrap()
            .with_retry(RetryConfig::new().with_max_attempts(1));
        assert_eq!(transport.retry.max_attempts, 1);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_an_error() {
        let options = CompletionOptions::builder()
            .model("m")
            .base_url("http://127.0.0.1:9")
            .timeout(2)
            .build()
            .unwrap();
        let transport = OpenAiTransport::new(&options)
            .unwrap()
            .with_retry(RetryConfig::new().with_max_attempts(1));
        let request = ChatCompletionRequest::new("m", Vec::new());
        assert!(transport.open_stream(&request).await.is_err());
    }
}
