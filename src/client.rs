use crate::protocol::{StreamEvent, ToolCallResponse, ToolListResponse};
use futures::StreamExt;
use reqwest::{Client as HttpClient, RequestBuilder, Response};
use std::error::Error;
use std::future::Future;

pub struct ClientConfig {
    pub base_url: String,
    pub token: Option<String>,
}

#[derive(Clone)]
pub struct ToolClient {
    base_url: String,
    token: Option<String>,
    http: HttpClient,
}

type ClientResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

impl ToolClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            base_url: normalize_base_url(&config.base_url),
            token: config.token,
            http: HttpClient::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    pub async fn list_tools(&self) -> ClientResult<ToolListResponse> {
        let response = self
            .authorized(self.http.get(format!("{}/tools", self.base_url)))
            .send()
            .await?;
        let response = ensure_success(response, "Failed to list tools").await?;
        Ok(response.json().await?)
    }

    pub async fn call_tool(
        &self,
        name: &str,
        input: serde_json::Value,
    ) -> ClientResult<ToolCallResponse> {
        let response = self
            .authorized(self.http.post(format!("{}/tools/{}", self.base_url, name)))
            .json(&input)
            .send()
            .await?;
        let response = ensure_success(response, "Failed to call tool").await?;
        Ok(response.json().await?)
    }

    pub async fn stream_events<F, Fut>(&self, mut on_event: F) -> ClientResult<()>
    where
        F: FnMut(StreamEvent) -> Fut,
        Fut: Future<Output = ()>,
    {
        let response = self
            .authorized(self.http.get(format!("{}/events", self.base_url)))
            .send()
            .await?;
        let response = ensure_success(response, "Failed to open stream").await?;

        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::default();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for data in decoder.push(&chunk) {
                match serde_json::from_str::<StreamEvent>(&data) {
                    Ok(event) => on_event(event).await,
                    Err(err) => tracing::debug!(error = %err, "skipping unrecognized event"),
                }
            }
        }

        Ok(())
    }
}

async fn ensure_success(response: Response, context: &str) -> ClientResult<Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(format!("{}: {} - {}", context, status, body).into())
}

/// Splits a byte stream into SSE events. Bytes are only decoded once a whole
/// event has arrived, so multibyte characters may straddle chunks.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feeds one chunk and returns the `data` payload of every completed event.
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        // CR never occurs inside a UTF-8 multibyte sequence.
        self.buffer.extend(chunk.iter().copied().filter(|&b| b != b'\r'));

        let mut payloads = Vec::new();
        while let Some(idx) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let raw_event: Vec<u8> = self.buffer.drain(..idx + 2).take(idx).collect();
            match String::from_utf8(raw_event) {
                Ok(raw_event) => payloads.extend(extract_sse_data(&raw_event)),
                Err(err) => tracing::debug!(error = %err, "skipping event with invalid UTF-8"),
            }
        }
        payloads
    }
}

fn normalize_base_url(value: &str) -> String {
    value.trim_end_matches('/').to_string()
}

fn extract_sse_data(raw: &str) -> Option<String> {
    let mut data_lines = Vec::new();
    for line in raw.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(data) = line.strip_prefix("data:") {
            data_lines.push(data.trim_start().to_string());
        }
    }

    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}
