//! Wire types shared by the chain and the WebSocket relay.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stage name of the model step inside a chain.
pub const MODEL_STAGE: &str = "model";
/// Stage name of the output-decoding step; only its events reach clients.
pub const OUTPUT_STAGE: &str = "Assistant";
/// Run name reported for the chain as a whole.
pub const CHAIN_NAME: &str = "RunnableSequence";

/// Backend identifier a client can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelId {
    Ollama,
    OpenAI,
}

impl ModelId {
    pub const DEFAULT: ModelId = ModelId::Ollama;
    pub const ALL: [ModelId; 2] = [ModelId::Ollama, ModelId::OpenAI];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelId::Ollama => "ollama",
            ModelId::OpenAI => "openai",
        }
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ollama" => Ok(ModelId::Ollama),
            "openai" => Ok(ModelId::OpenAI),
            other => Err(format!("unknown model '{}'", other)),
        }
    }
}

/// Chat message handed to a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Incoming client frame.
///
/// `model` stays a plain string so unknown ids reach the selector and are
/// reported as unavailable instead of failing to parse.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    pub message: String,
    #[serde(default)]
    pub model: Option<String>,
}

impl InboundMessage {
    /// Requested model id, defaulting to `ollama`.
    pub fn model_id(&self) -> &str {
        self.model.as_deref().unwrap_or(ModelId::DEFAULT.as_str())
    }
}

/// Event kinds emitted while a chain runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "on_chain_start")]
    ChainStart,
    #[serde(rename = "on_chain_end")]
    ChainEnd,
    #[serde(rename = "on_chat_model_start")]
    ChatModelStart,
    #[serde(rename = "on_chat_model_stream")]
    ChatModelStream,
    #[serde(rename = "on_chat_model_end")]
    ChatModelEnd,
    #[serde(rename = "on_parser_start")]
    ParserStart,
    #[serde(rename = "on_parser_stream")]
    ParserStream,
    #[serde(rename = "on_parser_end")]
    ParserEnd,
}

/// One unit of incremental chain output, tagged with the stage that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub event: EventKind,
    /// Stage (run) name.
    pub name: String,
    pub run_id: Uuid,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub data: serde_json::Value,
}

impl StreamEvent {
    pub fn new(
        event: EventKind,
        name: impl Into<String>,
        run_id: Uuid,
        tags: Vec<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event,
            name: name.into(),
            run_id,
            tags,
            metadata: serde_json::Map::new(),
            data,
        }
    }

    /// Whether this event is sent to clients: start or chunk of the output stage.
    pub fn is_client_output(&self) -> bool {
        self.name == OUTPUT_STAGE
            && matches!(self.event, EventKind::ParserStart | EventKind::ParserStream)
    }

    /// Text carried by a `*_stream` event.
    pub fn chunk(&self) -> Option<&str> {
        self.data.get("chunk").and_then(|c| c.as_str())
    }
}

/// Outbound error frame: `{"event": "error", "data": {"error": "..."}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub event: String,
    pub data: ErrorData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    pub error: String,
}

impl ErrorEnvelope {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            event: "error".into(),
            data: ErrorData {
                error: error.into(),
            },
        }
    }

    pub fn model_unavailable(model_id: &str) -> Self {
        Self::new(format!("Selected model '{}' is not available", model_id))
    }

    pub fn processing(cause: impl std::fmt::Display) -> Self {
        Self::new(format!("Error processing message: {}", cause))
    }
}
