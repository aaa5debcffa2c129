//! OpenAI-compatible chat completions gateway

use super::http::{build_client, read_json, status_error, transport_error};
use super::wire::{self, ChatRequest, ChatResponse};
use super::{CompletionGateway, EventStream, LlmError, LlmRequest, Message};
use crate::config::{ConfigError, GatewayConfig};
use crate::stream::{decode_stream, SseDecoder};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};

/// Stateless gateway over `POST {base_url}/chat/completions`
pub struct OpenAiCompletionGateway {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl OpenAiCompletionGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            client: build_client(config.timeout)?,
            api_key: config.api_key.clone(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
        })
    }

    async fn send(&self, body: &ChatRequest) -> Result<Response, LlmError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        Ok(response)
    }
}

#[async_trait]
impl CompletionGateway for OpenAiCompletionGateway {
    async fn run(&self, request: &LlmRequest) -> Result<Message, LlmError> {
        let body = wire::chat_request(request, false);
        let response = self.send(&body).await?;
        let parsed: ChatResponse = read_json(response).await?;
        wire::response_message(parsed)
    }

    async fn run_stream(&self, request: &LlmRequest) -> Result<EventStream, LlmError> {
        let body = wire::chat_request(request, true);
        let response = self.send(&body).await?;
        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| transport_error(&e)));
        Ok(decode_stream(bytes, SseDecoder::LF))
    }
}
