//! Model gateways: streaming text generation from external LLM providers.
//!
//! Ollama streams NDJSON from `/api/chat`. OpenAI streams SSE from
//! `/chat/completions`. Both are read incrementally and surfaced as a
//! boxed stream of [`StreamChunk`]s.

use std::pin::Pin;

use chatrelay_core::{Error, OllamaSettings, OpenAiSettings, Result};
use futures::Stream;
use reqwest::{Client, Url};
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::debug;

use crate::prompt::Prompt;

/// Boxed stream type for returning different stream implementations.
pub type BoxedStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// A single streamed token, the end marker, or an error.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Token(String),
    Done { tokens_used: usize },
    Error(String),
}

/// A single named backend that turns a prompt into a stream of text fragments.
///
/// Gateways are built once at startup and shared read-only between
/// connections. Each call to [`ModelGateway::stream`] starts a fresh request;
/// a returned stream cannot be restarted.
pub trait ModelGateway: Send + Sync {
    /// Provider name, for logs.
    fn name(&self) -> &str;

    /// Upstream model name.
    fn model(&self) -> &str;

    fn stream(&self, prompt: &Prompt) -> BoxedStream;
}

fn parse_base_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| Error::Config(format!("invalid base URL '{}': {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::Config(format!(
            "unsupported scheme '{}' in base URL '{}'",
            other, raw
        ))),
    }
}

fn build_client() -> Result<Client> {
    Client::builder()
        .build()
        .map_err(|e| Error::Http(format!("failed to build HTTP client: {}", e)))
}

/// Pop the next complete line out of `buffer`, trimmed.
fn next_line(buffer: &mut Vec<u8>) -> Option<String> {
    let pos = buffer.iter().position(|b| *b == b'\n')?;
    let line: Vec<u8> = buffer.drain(..=pos).collect();
    Some(String::from_utf8_lossy(&line).trim().to_string())
}

// ---------------------------------------------------------------
// Ollama
// ---------------------------------------------------------------

pub struct OllamaGateway {
    client: Client,
    chat_url: String,
    settings: OllamaSettings,
}

impl OllamaGateway {
    pub fn new(settings: OllamaSettings) -> Result<Self> {
        let base = parse_base_url(&settings.base_url)?;
        // Ollama's native API lives under /api, not the OpenAI-compatible /v1
        let base = base.as_str().trim_end_matches('/');
        let base = base.strip_suffix("/v1").unwrap_or(base);
        let chat_url = format!("{}/api/chat", base);

        Ok(Self {
            client: build_client()?,
            chat_url,
            settings,
        })
    }

    pub fn chat_url(&self) -> &str {
        &self.chat_url
    }
}

/// Interpret one NDJSON line from Ollama's `/api/chat`.
fn parse_ollama_line(line: &str) -> Option<StreamChunk> {
    if line.is_empty() {
        return None;
    }

    let parsed: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            debug!("Skipping unparseable Ollama NDJSON line: {}", e);
            return None;
        }
    };

    if let Some(msg) = parsed["error"].as_str() {
        return Some(StreamChunk::Error(format!("Ollama error: {}", msg)));
    }

    if let Some(content) = parsed["message"]["content"].as_str() {
        if !content.is_empty() {
            return Some(StreamChunk::Token(content.to_string()));
        }
    }

    if parsed["done"].as_bool() == Some(true) {
        let tokens_used = parsed["eval_count"].as_u64().unwrap_or(0) as usize;
        return Some(StreamChunk::Done { tokens_used });
    }

    None
}

impl ModelGateway for OllamaGateway {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.settings.model
    }

    fn stream(&self, prompt: &Prompt) -> BoxedStream {
        let client = self.client.clone();
        let url = self.chat_url.clone();
        let model = self.settings.model.clone();

        let mut body = json!({
            "model": model,
            "messages": prompt.to_messages(),
            "stream": true,
        });
        if let Some(temperature) = self.settings.temperature {
            body["options"] = json!({ "temperature": temperature });
        }

        Box::pin(async_stream::stream! {
            debug!("Streaming from {} with model {}", url, model);

            let response = match client.post(&url).json(&body).send().await {
                Ok(r) => r,
                Err(e) => {
                    yield StreamChunk::Error(format!("Request failed: {}", e));
                    return;
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                yield StreamChunk::Error(format!("Ollama API error {}: {}", status, body));
                return;
            }

            let mut stream = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();
            let mut token_count = 0usize;
            let mut finished = false;

            loop {
                match stream.next().await {
                    Some(Ok(bytes)) => buffer.extend_from_slice(&bytes),
                    Some(Err(e)) => {
                        yield StreamChunk::Error(format!("Stream read error: {}", e));
                        return;
                    }
                    None => {
                        // Flush a trailing line that had no newline
                        buffer.push(b'\n');
                        finished = true;
                    }
                }

                while let Some(line) = next_line(&mut buffer) {
                    match parse_ollama_line(&line) {
                        Some(StreamChunk::Token(text)) => {
                            token_count += 1;
                            yield StreamChunk::Token(text);
                        }
                        Some(StreamChunk::Done { tokens_used }) => {
                            let tokens_used = if tokens_used > 0 { tokens_used } else { token_count };
                            yield StreamChunk::Done { tokens_used };
                            return;
                        }
                        Some(StreamChunk::Error(msg)) => {
                            debug!("{}", msg);
                            yield StreamChunk::Error(msg);
                            return;
                        }
                        None => {}
                    }
                }

                if finished {
                    break;
                }
            }

            yield StreamChunk::Done { tokens_used: token_count };
        })
    }
}

// ---------------------------------------------------------------
// OpenAI
// ---------------------------------------------------------------

pub struct OpenAiGateway {
    client: Client,
    completions_url: String,
    api_key: String,
    settings: OpenAiSettings,
}

impl OpenAiGateway {
    /// Fails when no API key is configured or the base URL is invalid.
    pub fn new(settings: OpenAiSettings) -> Result<Self> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::Config("OPENAI_API_KEY is not set".into()))?;
        let base = parse_base_url(&settings.base_url)?;
        let completions_url = format!("{}/chat/completions", base.as_str().trim_end_matches('/'));

        Ok(Self {
            client: build_client()?,
            completions_url,
            api_key,
            settings,
        })
    }

    pub fn completions_url(&self) -> &str {
        &self.completions_url
    }
}

/// Interpret one SSE line from an OpenAI-compatible streaming response.
fn parse_sse_line(line: &str) -> Option<StreamChunk> {
    if line.is_empty() || line.starts_with(':') {
        return None;
    }

    let data = line.strip_prefix("data:")?.trim_start();
    if data.trim() == "[DONE]" {
        return Some(StreamChunk::Done { tokens_used: 0 });
    }

    let parsed: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            debug!("Skipping unparseable SSE payload: {}", e);
            return None;
        }
    };

    if let Some(msg) = parsed["error"]["message"].as_str() {
        return Some(StreamChunk::Error(format!("OpenAI error: {}", msg)));
    }

    match parsed["choices"][0]["delta"]["content"].as_str() {
        Some(content) if !content.is_empty() => Some(StreamChunk::Token(content.to_string())),
        _ => None,
    }
}

impl ModelGateway for OpenAiGateway {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.settings.model
    }

    fn stream(&self, prompt: &Prompt) -> BoxedStream {
        let client = self.client.clone();
        let url = self.completions_url.clone();
        let api_key = self.api_key.clone();
        let model = self.settings.model.clone();

        let body = json!({
            "model": model,
            "messages": prompt.to_messages(),
            "temperature": self.settings.temperature,
            "stream": true,
        });

        Box::pin(async_stream::stream! {
            debug!("Streaming from {} with model {}", url, model);

            let response = match client
                .post(&url)
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    yield StreamChunk::Error(format!("Request failed: {}", e));
                    return;
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                yield StreamChunk::Error(format!("API error {}: {}", status, body));
                return;
            }

            let mut stream = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();
            let mut token_count = 0usize;
            let mut finished = false;

            loop {
                match stream.next().await {
                    Some(Ok(bytes)) => buffer.extend_from_slice(&bytes),
                    Some(Err(e)) => {
                        yield StreamChunk::Error(format!("Stream read error: {}", e));
                        return;
                    }
                    None => {
                        buffer.push(b'\n');
                        finished = true;
                    }
                }

                while let Some(line) = next_line(&mut buffer) {
                    match parse_sse_line(&line) {
                        Some(StreamChunk::Token(text)) => {
                            token_count += 1;
                            yield StreamChunk::Token(text);
                        }
                        Some(StreamChunk::Done { .. }) => {
                            yield StreamChunk::Done { tokens_used: token_count };
                            return;
                        }
                        Some(StreamChunk::Error(msg)) => {
                            debug!("{}", msg);
                            yield StreamChunk::Error(msg);
                            return;
                        }
                        None => {}
                    }
                }

                if finished {
                    break;
                }
            }

            yield StreamChunk::Done { tokens_used: token_count };
        })
    }
}
