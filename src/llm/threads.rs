//! OpenAI-compatible thread/run gateway

use super::http::{build_client, parse_json, transport_error, FailedResponse};
use super::wire::{self, SubmitRequest, WireList, WireRun, WireThread, WireThreadMessage};
use super::{EventStream, LlmError, Message, RunRequest, ThreadGateway, ThreadRun, ToolOutput};
use crate::config::{ConfigError, GatewayConfig};
use crate::stream::{decode_stream, SseDecoder};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

const BETA_HEADER: &str = "OpenAI-Beta";
const BETA_VALUE: &str = "assistants=v2";
const PAGE_SIZE: usize = 100;

/// Stateful gateway over `{base_url}/threads`
pub struct OpenAiThreadGateway {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiThreadGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            client: build_client(config.timeout)?,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(&self.api_key)
            .header(BETA_HEADER, BETA_VALUE)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, LlmError> {
        let response = builder.send().await.map_err(|e| transport_error(&e))?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(thread_status_error(response).await)
        }
    }

    async fn call<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, LlmError> {
        let response = self.send(builder).await?;
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;
        parse_json(&body).map_err(classify_desync)
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, LlmError> {
        self.call(self.request(Method::POST, path).json(body)).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, LlmError> {
        self.call(self.request(Method::GET, path)).await
    }
}

/// Thread-specific classification: a missing thread or run is a desync.
/// A missing assistant or graph is a configuration problem and halts.
async fn thread_status_error(response: Response) -> LlmError {
    let failed = FailedResponse::read(response).await;
    let error = match failed.status {
        404 | 422 if names_run_target(&failed.message) => {
            LlmError::protocol(format!("Run target not found: {}", failed.message))
        }
        404 => LlmError::desync(format!("Not found: {}", failed.message)),
        422 => LlmError::desync(format!("Unprocessable: {}", failed.message)),
        status => classify_desync(LlmError::from_status(status, &failed.message)),
    };
    failed.attach(error)
}

fn classify_desync(error: LlmError) -> LlmError {
    let lower = error.message.to_lowercase();
    if names_run_target(&lower) {
        return error;
    }
    if lower.contains("not found") || lower.contains("unprocessable") {
        LlmError::desync(error.message)
    } else {
        error
    }
}

fn names_run_target(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("assistant") || lower.contains("graph")
}

#[async_trait]
impl ThreadGateway for OpenAiThreadGateway {
    async fn create_thread(&self) -> Result<String, LlmError> {
        let thread: WireThread = self.post("/threads", &serde_json::json!({})).await?;
        Ok(thread.id)
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<(), LlmError> {
        self.send(self.request(Method::DELETE, &format!("/threads/{thread_id}")))
            .await?;
        Ok(())
    }

    async fn create_run(
        &self,
        thread_id: &str,
        request: &RunRequest,
    ) -> Result<ThreadRun, LlmError> {
        let body = wire::run_request(request, false);
        let run: WireRun = self
            .post(&format!("/threads/{thread_id}/runs"), &body)
            .await?;
        Ok(wire::run(run))
    }

    async fn create_run_stream(
        &self,
        thread_id: &str,
        request: &RunRequest,
    ) -> Result<EventStream, LlmError> {
        let body = wire::run_request(request, true);
        let response = self
            .send(
                self.request(Method::POST, &format!("/threads/{thread_id}/runs"))
                    .json(&body),
            )
            .await?;
        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| transport_error(&e)));
        Ok(decode_stream(bytes, SseDecoder::LF))
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<ThreadRun, LlmError> {
        let run: WireRun = self
            .get(&format!("/threads/{thread_id}/runs/{run_id}"))
            .await?;
        Ok(wire::run(run))
    }

    async fn get_runs(&self, thread_id: &str) -> Result<Vec<ThreadRun>, LlmError> {
        let list: WireList<WireRun> = self
            .get(&format!("/threads/{thread_id}/runs?order=desc"))
            .await?;
        Ok(list.data.into_iter().map(wire::run).collect())
    }

    async fn get_messages(&self, thread_id: &str) -> Result<Vec<Message>, LlmError> {
        let mut messages = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let mut path = format!("/threads/{thread_id}/messages?order=asc&limit={PAGE_SIZE}");
            if let Some(cursor) = &after {
                path.push_str("&after=");
                path.push_str(cursor);
            }
            let page: WireList<WireThreadMessage> = self.get(&path).await?;
            let cursor = page
                .last_id
                .clone()
                .or_else(|| page.data.last().map(|m| m.id.clone()));
            messages.extend(
                page.data
                    .into_iter()
                    .map(|m| wire::thread_message(m, thread_id)),
            );

            match cursor {
                Some(cursor) if page.has_more && after.as_ref() != Some(&cursor) => {
                    after = Some(cursor);
                }
                _ => break,
            }
        }
        Ok(messages)
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<ThreadRun, LlmError> {
        let run: WireRun = self
            .post(
                &format!("/threads/{thread_id}/runs/{run_id}/submit_tool_outputs"),
                &SubmitRequest {
                    tool_outputs: outputs,
                },
            )
            .await?;
        Ok(wire::run(run))
    }

    async fn create_thread_message(
        &self,
        thread_id: &str,
        message: &Message,
    ) -> Result<Message, LlmError> {
        let Some(body) = wire::new_thread_message(message) else {
            return Err(LlmError::protocol(format!(
                "Role {} cannot be added to a thread",
                message.role.as_str()
            )));
        };
        let created: WireThreadMessage = self
            .post(&format!("/threads/{thread_id}/messages"), &body)
            .await?;
        Ok(wire::thread_message(created, thread_id))
    }
}
