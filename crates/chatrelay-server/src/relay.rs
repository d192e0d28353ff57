//! Streaming relay: one inbound frame in, zero or more outbound frames out.
//!
//! The loop here is transport-agnostic. It reads text frames from any
//! `Stream<Item = String>` and writes JSON text to any `Sink<String>`, so
//! the WebSocket route and the tests drive the same code.

use std::any::Any;
use std::fmt::Display;
use std::panic::AssertUnwindSafe;

use chatrelay_chat::{ChainSelector, ErrorEnvelope, InboundMessage};
use chatrelay_core::Error;
use futures::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Serve one connection until the client goes away.
///
/// Frames are handled strictly one after another. A failed generation is
/// reported to the client and the loop keeps going; only the transport
/// (frames ending, or a send failing) ends the session.
pub async fn relay_session<R, S>(chains: &ChainSelector, session_id: &str, mut frames: R, mut out: S)
where
    R: Stream<Item = String> + Unpin,
    S: Sink<String> + Unpin,
    S::Error: Display,
{
    info!("Client {} connected", session_id);

    while let Some(text) = frames.next().await {
        let handled = AssertUnwindSafe(handle_frame(chains, &text, &mut out))
            .catch_unwind()
            .await;

        match handled {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Send to {} failed, closing: {}", session_id, e);
                break;
            }
            Err(panic) => {
                error!(
                    "Unexpected error handling message from {}: {}",
                    session_id,
                    panic_message(panic.as_ref())
                );
            }
        }
    }

    info!("Client {} disconnected", session_id);
}

/// Handle a single inbound text frame.
///
/// Malformed JSON is logged and dropped without a reply. Only send failures
/// are returned as errors.
pub async fn handle_frame<S>(chains: &ChainSelector, text: &str, out: &mut S) -> Result<(), S::Error>
where
    S: Sink<String> + Unpin,
{
    let inbound: InboundMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("Invalid JSON received: {}", e);
            return Ok(());
        }
    };

    let model_id = inbound.model_id();
    let Some(chain) = chains.resolve(model_id) else {
        warn!("Requested model '{}' is not available", model_id);
        return send_json(out, &ErrorEnvelope::model_unavailable(model_id)).await;
    };

    debug!(
        "Generating with {} ({} chars of input)",
        chain.gateway().model(),
        inbound.message.len()
    );

    let mut events = chain.stream_events(&inbound.message);
    while let Some(event) = events.next().await {
        match event {
            Ok(event) if event.is_client_output() => send_json(out, &event).await?,
            Ok(_) => {}
            Err(e) => {
                let envelope = ErrorEnvelope::processing(failure_cause(&e));
                error!("{}", envelope.data.error);
                return send_json(out, &envelope).await;
            }
        }
    }

    Ok(())
}

async fn send_json<S, T>(out: &mut S, value: &T) -> Result<(), S::Error>
where
    S: Sink<String> + Unpin,
    T: Serialize,
{
    match serde_json::to_string(value) {
        Ok(json) => out.send(json).await,
        Err(e) => {
            error!("Failed to serialize outbound frame: {}", e);
            Ok(())
        }
    }
}

fn failure_cause(e: &Error) -> String {
    match e {
        Error::Generation(msg) => msg.clone(),
        other => other.to_string(),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use chatrelay_chat::providers::BoxedStream;
    use chatrelay_chat::{EventKind, ModelGateway, Prompt, StreamChunk, StreamEvent, OUTPUT_STAGE};
    use serde_json::Value;

    /// Replays fixed chunks; each token is prefixed with the user input so
    /// frames from different messages can be told apart.
    struct EchoGateway {
        tokens: Vec<&'static str>,
        fail_with: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl EchoGateway {
        fn new(tokens: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                tokens,
                fail_with: None,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(tokens: Vec<&'static str>, error: &'static str) -> Arc<Self> {
            Arc::new(Self {
                tokens,
                fail_with: Some(error),
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl ModelGateway for EchoGateway {
        fn name(&self) -> &str {
            "echo"
        }

        fn model(&self) -> &str {
            "echo-1"
        }

        fn stream(&self, prompt: &Prompt) -> BoxedStream {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut chunks: Vec<StreamChunk> = self
                .tokens
                .iter()
                .map(|t| StreamChunk::Token(format!("{}:{}", prompt.user, t)))
                .collect();
            match self.fail_with {
                Some(e) => chunks.push(StreamChunk::Error(e.to_string())),
                None => chunks.push(StreamChunk::Done { tokens_used: self.tokens.len() }),
            }
            Box::pin(futures::stream::iter(chunks))
        }
    }

    struct PanickingGateway;

    impl ModelGateway for PanickingGateway {
        fn name(&self) -> &str {
            "panicking"
        }

        fn model(&self) -> &str {
            "panicking-1"
        }

        fn stream(&self, _prompt: &Prompt) -> BoxedStream {
            panic!("gateway blew up");
        }
    }

    fn selector(
        ollama: Option<Arc<dyn ModelGateway>>,
        openai: Option<Arc<dyn ModelGateway>>,
    ) -> ChainSelector {
        ChainSelector::new(ollama, openai)
    }

    fn some<G: ModelGateway + 'static>(gateway: Arc<G>) -> Option<Arc<dyn ModelGateway>> {
        let gateway: Arc<dyn ModelGateway> = gateway;
        Some(gateway)
    }

    async fn run(chains: &ChainSelector, frames: &[&str]) -> Vec<Value> {
        let (tx, rx) = futures::channel::mpsc::unbounded::<String>();
        let frames: Vec<String> = frames.iter().map(|f| f.to_string()).collect();
        relay_session(chains, "test", futures::stream::iter(frames), tx).await;
        rx.map(|text| serde_json::from_str::<Value>(&text).unwrap())
            .collect()
            .await
    }

    fn chunks(frames: &[Value]) -> Vec<&str> {
        frames
            .iter()
            .filter(|f| f["event"] == "on_parser_stream")
            .map(|f| f["data"]["chunk"].as_str().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_model_defaults_to_ollama() {
        let ollama = EchoGateway::new(vec!["Hi"]);
        let openai = EchoGateway::new(vec!["nope"]);
        let chains = selector(some(ollama.clone()), some(openai.clone()));

        let frames = run(&chains, &[r#"{"message":"hello"}"#]).await;

        assert_eq!(ollama.calls.load(Ordering::SeqCst), 1);
        assert_eq!(openai.calls.load(Ordering::SeqCst), 0);
        assert_eq!(chunks(&frames), vec!["hello:Hi"]);
    }

    #[tokio::test]
    async fn test_explicit_openai() {
        let ollama = EchoGateway::new(vec!["a"]);
        let openai = EchoGateway::new(vec!["b"]);
        let chains = selector(some(ollama.clone()), some(openai.clone()));

        let frames = run(&chains, &[r#"{"message":"q","model":"openai"}"#]).await;

        assert_eq!(ollama.calls.load(Ordering::SeqCst), 0);
        assert_eq!(chunks(&frames), vec!["q:b"]);
    }

    #[tokio::test]
    async fn test_unavailable_model_sends_one_error() {
        let ollama = EchoGateway::new(vec!["Hi"]);
        let chains = selector(some(ollama.clone()), None);

        let frames = run(&chains, &[r#"{"message":"hello","model":"openai"}"#]).await;

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["event"], "error");
        let msg = frames[0]["data"]["error"].as_str().unwrap();
        assert!(msg.contains("openai"));
        assert_eq!(msg, "Selected model 'openai' is not available");
        assert_eq!(ollama.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_model_is_unavailable() {
        let chains = selector(some(EchoGateway::new(vec!["Hi"])), None);
        let frames = run(&chains, &[r#"{"message":"hello","model":"claude"}"#]).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["data"]["error"], "Selected model 'claude' is not available");
    }

    #[tokio::test]
    async fn test_forwards_only_output_start_and_chunks_in_order() {
        let chains = selector(some(EchoGateway::new(vec!["one", "two", "three"])), None);

        let frames = run(&chains, &[r#"{"message":"m"}"#]).await;

        let kinds: Vec<&str> = frames.iter().map(|f| f["event"].as_str().unwrap()).collect();
        assert_eq!(
            kinds,
            vec!["on_parser_start", "on_parser_stream", "on_parser_stream", "on_parser_stream"]
        );
        assert!(frames.iter().all(|f| f["name"] == OUTPUT_STAGE));
        assert_eq!(chunks(&frames), vec!["m:one", "m:two", "m:three"]);
    }

    #[tokio::test]
    async fn test_forwarded_frames_are_whole_events() {
        let chains = selector(some(EchoGateway::new(vec!["x"])), None);
        let frames = run(&chains, &[r#"{"message":"m"}"#]).await;
        let event: StreamEvent = serde_json::from_value(frames[1].clone()).unwrap();
        assert_eq!(event.event, EventKind::ParserStream);
        assert_eq!(event.chunk(), Some("m:x"));
    }

    #[tokio::test]
    async fn test_malformed_json_is_silent_and_connection_survives() {
        let ollama = EchoGateway::new(vec!["ok"]);
        let chains = selector(some(ollama.clone()), None);

        let frames = run(&chains, &["{not json"]).await;
        assert!(frames.is_empty());

        let frames = run(
            &chains,
            &["{not json", r#"{"model":"ollama"}"#, r#"{"message":"after"}"#],
        )
        .await;
        assert_eq!(chunks(&frames), vec!["after:ok"]);
        assert!(frames.iter().all(|f| f["event"] != "error"));
        assert_eq!(ollama.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_generation_failure_reports_and_continues() {
        let chains = selector(
            some(EchoGateway::failing(vec!["partial"], "upstream closed")),
            some(EchoGateway::new(vec!["fine"])),
        );

        let frames = run(
            &chains,
            &[r#"{"message":"a"}"#, r#"{"message":"b","model":"openai"}"#],
        )
        .await;

        let kinds: Vec<&str> = frames.iter().map(|f| f["event"].as_str().unwrap()).collect();
        assert_eq!(
            kinds,
            vec![
                "on_parser_start",
                "on_parser_stream",
                "error",
                "on_parser_start",
                "on_parser_stream",
            ]
        );
        assert_eq!(frames[2]["data"]["error"], "Error processing message: upstream closed");
        assert_eq!(chunks(&frames), vec!["a:partial", "b:fine"]);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let panicking: Arc<dyn ModelGateway> = Arc::new(PanickingGateway);
        let chains = selector(Some(panicking), some(EchoGateway::new(vec!["still here"])));

        let frames = run(
            &chains,
            &[r#"{"message":"boom"}"#, r#"{"message":"next","model":"openai"}"#],
        )
        .await;

        assert!(frames.iter().all(|f| f["event"] != "error"));
        assert_eq!(chunks(&frames), vec!["next:still here"]);
    }

    #[tokio::test]
    async fn test_sequential_messages_do_not_interleave() {
        let chains = selector(some(EchoGateway::new(vec!["1", "2", "3"])), None);

        let frames = run(&chains, &[r#"{"message":"first"}"#, r#"{"message":"second"}"#]).await;

        assert_eq!(
            chunks(&frames),
            vec!["first:1", "first:2", "first:3", "second:1", "second:2", "second:3"]
        );
    }

    #[tokio::test]
    async fn test_closed_sink_ends_session() {
        let ollama = EchoGateway::new(vec!["Hi"]);
        let chains = selector(some(ollama.clone()), None);
        let (tx, rx) = futures::channel::mpsc::unbounded::<String>();
        drop(rx);

        let frames = vec![r#"{"message":"a"}"#.to_string(), r#"{"message":"b"}"#.to_string()];
        relay_session(&chains, "test", futures::stream::iter(frames), tx).await;

        // The first send fails, so the second frame is never handled
        assert_eq!(ollama.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(boxed.as_ref()), "static str");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
