//! Chains (prompt → model → output decoding) and the selector that maps a
//! client model id onto one of them.

use std::pin::Pin;
use std::sync::Arc;

use chatrelay_core::{Error, RelayConfig, Result};
use futures::Stream;
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::prompt::PromptBuilder;
use crate::providers::{ModelGateway, OllamaGateway, OpenAiGateway, StreamChunk};
use crate::types::{EventKind, ModelId, StreamEvent, CHAIN_NAME, MODEL_STAGE, OUTPUT_STAGE};

/// Events of one chain run. Ends after the first `Err`.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// A prompt builder, a model gateway and the output-decoding stage.
#[derive(Clone)]
pub struct Chain {
    prompt: PromptBuilder,
    gateway: Arc<dyn ModelGateway>,
}

impl Chain {
    pub fn new(gateway: Arc<dyn ModelGateway>) -> Self {
        Self {
            prompt: PromptBuilder,
            gateway,
        }
    }

    pub fn gateway(&self) -> &dyn ModelGateway {
        self.gateway.as_ref()
    }

    /// Run the chain for one user input.
    ///
    /// Order: chain start, model start, then per token a model chunk followed
    /// by an output chunk (the output stage starts right before its first
    /// chunk), then model end, output end, chain end. An upstream error
    /// yields a single `Err` and stops the stream.
    pub fn stream_events(&self, input: &str) -> EventStream {
        let prompt = self.prompt.build(input);
        let mut upstream = self.gateway.stream(&prompt);
        let input = input.to_string();
        let provider = self.gateway.name().to_string();

        Box::pin(async_stream::stream! {
            let chain_run = Uuid::new_v4();
            let model_run = Uuid::new_v4();
            let parser_run = Uuid::new_v4();
            let model_tags = vec!["seq:step:2".to_string()];
            let parser_tags = vec!["seq:step:3".to_string()];

            yield Ok(StreamEvent::new(
                EventKind::ChainStart,
                CHAIN_NAME,
                chain_run,
                Vec::new(),
                json!({ "input": { "input": input } }),
            ));
            yield Ok(StreamEvent::new(
                EventKind::ChatModelStart,
                MODEL_STAGE,
                model_run,
                model_tags.clone(),
                json!({ "input": { "messages": prompt.to_messages() } }),
            ));

            let mut output = String::new();
            let mut tokens = 0usize;
            let mut parser_started = false;

            while let Some(chunk) = upstream.next().await {
                match chunk {
                    StreamChunk::Token(text) => {
                        yield Ok(StreamEvent::new(
                            EventKind::ChatModelStream,
                            MODEL_STAGE,
                            model_run,
                            model_tags.clone(),
                            json!({ "chunk": text }),
                        ));
                        if !parser_started {
                            parser_started = true;
                            yield Ok(StreamEvent::new(
                                EventKind::ParserStart,
                                OUTPUT_STAGE,
                                parser_run,
                                parser_tags.clone(),
                                json!({}),
                            ));
                        }
                        output.push_str(&text);
                        yield Ok(StreamEvent::new(
                            EventKind::ParserStream,
                            OUTPUT_STAGE,
                            parser_run,
                            parser_tags.clone(),
                            json!({ "chunk": text }),
                        ));
                    }
                    StreamChunk::Done { tokens_used } => {
                        tokens = tokens_used;
                        break;
                    }
                    StreamChunk::Error(e) => {
                        yield Err(Error::Generation(e));
                        return;
                    }
                }
            }

            debug!("{} generation finished ({} tokens)", provider, tokens);

            yield Ok(StreamEvent::new(
                EventKind::ChatModelEnd,
                MODEL_STAGE,
                model_run,
                model_tags,
                json!({ "output": output, "tokens_used": tokens }),
            ));
            if !parser_started {
                yield Ok(StreamEvent::new(
                    EventKind::ParserStart,
                    OUTPUT_STAGE,
                    parser_run,
                    parser_tags.clone(),
                    json!({}),
                ));
            }
            yield Ok(StreamEvent::new(
                EventKind::ParserEnd,
                OUTPUT_STAGE,
                parser_run,
                parser_tags,
                json!({ "output": output }),
            ));
            yield Ok(StreamEvent::new(
                EventKind::ChainEnd,
                CHAIN_NAME,
                chain_run,
                Vec::new(),
                json!({ "output": output }),
            ));
        })
    }
}

/// Maps model ids onto the two statically built chains.
///
/// A `None` slot means the gateway failed to initialize; it stays unavailable
/// for the life of the process.
#[derive(Clone, Default)]
pub struct ChainSelector {
    ollama: Option<Chain>,
    openai: Option<Chain>,
}

impl ChainSelector {
    pub fn new(
        ollama: Option<Arc<dyn ModelGateway>>,
        openai: Option<Arc<dyn ModelGateway>>,
    ) -> Self {
        Self {
            ollama: ollama.map(Chain::new),
            openai: openai.map(Chain::new),
        }
    }

    /// Initialize both gateways from configuration. Failures are logged and
    /// leave the corresponding chain unavailable.
    pub fn from_config(config: &RelayConfig) -> Self {
        let ollama = match OllamaGateway::new(config.ollama.clone()) {
            Ok(g) => {
                info!("Ollama gateway ready: {} at {}", config.ollama.model, g.chat_url());
                Some(Arc::new(g) as Arc<dyn ModelGateway>)
            }
            Err(e) => {
                error!("Error initializing Ollama: {}", e);
                None
            }
        };

        let openai = match OpenAiGateway::new(config.openai.clone()) {
            Ok(g) => {
                info!("OpenAI gateway ready: {} at {}", config.openai.model, g.completions_url());
                Some(Arc::new(g) as Arc<dyn ModelGateway>)
            }
            Err(e) => {
                error!("Error initializing OpenAI: {}", e);
                None
            }
        };

        Self::new(ollama, openai)
    }

    /// Resolve a client model id. Unknown ids and failed gateways give `None`.
    pub fn resolve(&self, model_id: &str) -> Option<&Chain> {
        match model_id.parse::<ModelId>().ok()? {
            ModelId::Ollama => self.ollama.as_ref(),
            ModelId::OpenAI => self.openai.as_ref(),
        }
    }

    /// Availability of every recognized model id.
    pub fn availability(&self) -> Vec<(ModelId, bool)> {
        ModelId::ALL
            .iter()
            .map(|id| (*id, self.resolve(id.as_str()).is_some()))
            .collect()
    }
}
