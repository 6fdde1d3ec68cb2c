//! Session manager state machine and concurrency tests.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pocketlm_core::{
    chat::{Message, MessageRole},
    config::InferenceConfig,
    engine::{InferenceEngine, ModelContext, ModelInfo, ResourceUsage},
    error::{Error, Result},
    session::{FinishReason, GenerationRequest, SessionLimits, SessionManager, SessionState},
    EchoEngine, StreamEvent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineEvent {
    Reset,
    NextToken,
    Unload,
}

/// Engine that records every context call and streams tokens forever, so
/// tests can assert call ordering around cancellation and eject.
struct RecordingEngine {
    events: Arc<Mutex<Vec<EngineEvent>>>,
    token_delay: Duration,
}

impl RecordingEngine {
    fn new(token_delay: Duration) -> (Self, Arc<Mutex<Vec<EngineEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                events: events.clone(),
                token_delay,
            },
            events,
        )
    }
}

#[async_trait]
impl InferenceEngine for RecordingEngine {
    async fn load_model(
        &self,
        path: &Path,
        config: &InferenceConfig,
    ) -> Result<Box<dyn ModelContext>> {
        Ok(Box::new(RecordingContext {
            events: self.events.clone(),
            token_delay: self.token_delay,
            info: ModelInfo::from_path(path, config),
        }))
    }
}

struct RecordingContext {
    events: Arc<Mutex<Vec<EngineEvent>>>,
    token_delay: Duration,
    info: ModelInfo,
}

#[async_trait]
impl ModelContext for RecordingContext {
    async fn next_token(&mut self, _prompt: &str) -> Result<String> {
        self.events.lock().unwrap().push(EngineEvent::NextToken);
        tokio::time::sleep(self.token_delay).await;
        Ok(" tok".to_string())
    }

    async fn reset(&mut self) -> Result<()> {
        self.events.lock().unwrap().push(EngineEvent::Reset);
        Ok(())
    }

    async fn unload(&mut self) -> Result<()> {
        self.events.lock().unwrap().push(EngineEvent::Unload);
        Ok(())
    }

    fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn resource_usage(&self) -> ResourceUsage {
        ResourceUsage::default()
    }
}

/// Engine whose load blocks until released, for load-while-loading tests.
struct GatedEngine {
    gate: Arc<tokio::sync::Notify>,
}

#[async_trait]
impl InferenceEngine for GatedEngine {
    async fn load_model(
        &self,
        path: &Path,
        config: &InferenceConfig,
    ) -> Result<Box<dyn ModelContext>> {
        self.gate.notified().await;
        EchoEngine::new().load_model(path, config).await
    }
}

fn request(messages: Vec<Message>) -> GenerationRequest {
    GenerationRequest {
        chat_id: "chat-1".to_string(),
        assistant_message_id: "msg-1".to_string(),
        messages,
        max_tokens: None,
    }
}

fn user_message(content: &str) -> Message {
    Message::new("chat-1", MessageRole::User, content)
}

async fn wait_for_state(session: &SessionManager, state: SessionState) {
    let mut rx = session.subscribe_state();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed");
}

#[tokio::test]
async fn generate_without_model_is_rejected_without_state_change() {
    let session = SessionManager::new(Arc::new(EchoEngine::new()), SessionLimits::default());
    assert_eq!(session.state(), SessionState::Idle);

    let mut stream = session.generate_completion(request(vec![user_message("hi")]));
    match stream.next().await {
        Some(StreamEvent::Done(completion)) => {
            assert_eq!(completion.reason, FinishReason::Rejected);
            assert!(completion.content.is_empty());
        }
        other => panic!("expected immediate terminal event, got {other:?}"),
    }
    assert!(stream.next().await.is_none());
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn load_failure_moves_session_to_error() {
    let session = SessionManager::new(
        Arc::new(EchoEngine::new().failing_load()),
        SessionLimits::default(),
    );
    let result = session
        .load_model(&PathBuf::from("missing.gguf"), &InferenceConfig::default())
        .await;
    assert!(matches!(result, Err(Error::Load(_))));
    assert_eq!(session.state(), SessionState::Error);
    assert!(!session.is_model_loaded());
}

#[tokio::test]
async fn load_while_loading_is_rejected() {
    let gate = Arc::new(tokio::sync::Notify::new());
    let session = SessionManager::new(
        Arc::new(GatedEngine { gate: gate.clone() }),
        SessionLimits::default(),
    );

    let background = {
        let session = session.clone();
        tokio::spawn(async move {
            session
                .load_model(&PathBuf::from("m.gguf"), &InferenceConfig::default())
                .await
        })
    };
    wait_for_state(&session, SessionState::Loading).await;

    let second = session
        .load_model(&PathBuf::from("other.gguf"), &InferenceConfig::default())
        .await;
    assert!(matches!(second, Err(Error::Busy(_))));

    gate.notify_one();
    background.await.unwrap().unwrap();
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test]
async fn natural_completion_returns_full_text_and_ready() {
    let session = SessionManager::new(
        Arc::new(EchoEngine::new().with_reply("alpha beta gamma")),
        SessionLimits::default(),
    );
    session
        .load_model(&PathBuf::from("gemma-2b.gguf"), &InferenceConfig::default())
        .await
        .unwrap();

    let completion = session
        .generate_completion(request(vec![user_message("hi")]))
        .collect()
        .await;
    assert_eq!(completion.reason, FinishReason::Stop);
    assert_eq!(completion.content, "alpha beta gamma");
    assert_eq!(completion.tokens, 3);

    wait_for_state(&session, SessionState::Ready).await;
}

#[tokio::test]
async fn second_generation_is_rejected_while_first_runs() {
    let (engine, _events) = RecordingEngine::new(Duration::from_millis(10));
    let session = SessionManager::new(Arc::new(engine), SessionLimits::default());
    session
        .load_model(&PathBuf::from("m.gguf"), &InferenceConfig::default())
        .await
        .unwrap();

    let mut stream_a = session.generate_completion(request(vec![user_message("first")]));
    assert!(matches!(
        stream_a.next().await,
        Some(StreamEvent::Token(_))
    ));

    // B must be rejected immediately with empty content and no state change.
    let mut stream_b = session.generate_completion(request(vec![user_message("second")]));
    match stream_b.next().await {
        Some(StreamEvent::Done(completion)) => {
            assert_eq!(completion.reason, FinishReason::Rejected);
            assert!(completion.content.is_empty());
        }
        _ => panic!("expected rejection event"),
    }
    assert_eq!(session.state(), SessionState::Generating);

    // A continues uninterrupted.
    assert!(matches!(
        stream_a.next().await,
        Some(StreamEvent::Token(_))
    ));

    session.stop_generation();
    let completion = stream_a.collect().await;
    assert_eq!(completion.reason, FinishReason::Cancelled);
    wait_for_state(&session, SessionState::Ready).await;
}

#[tokio::test]
async fn stop_generation_yields_exactly_one_terminal_event() {
    let (engine, _events) = RecordingEngine::new(Duration::from_millis(5));
    let session = SessionManager::new(Arc::new(engine), SessionLimits::default());
    session
        .load_model(&PathBuf::from("m.gguf"), &InferenceConfig::default())
        .await
        .unwrap();

    let mut stream = session.generate_completion(request(vec![user_message("go")]));
    assert!(matches!(stream.next().await, Some(StreamEvent::Token(_))));

    session.stop_generation();

    let mut terminals = 0;
    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::Token(_) => {}
            StreamEvent::Done(completion) => {
                terminals += 1;
                assert_eq!(completion.reason, FinishReason::Cancelled);
                // Partial output is a first-class result.
                assert!(completion.content.starts_with(" tok"));
            }
        }
    }
    assert_eq!(terminals, 1);
    wait_for_state(&session, SessionState::Ready).await;
}

#[tokio::test]
async fn eject_during_generation_unloads_only_after_loop_stops() {
    let (engine, events) = RecordingEngine::new(Duration::from_millis(10));
    let session = SessionManager::new(Arc::new(engine), SessionLimits::default());
    session
        .load_model(&PathBuf::from("m.gguf"), &InferenceConfig::default())
        .await
        .unwrap();

    let mut stream = session.generate_completion(request(vec![user_message("go")]));
    assert!(matches!(stream.next().await, Some(StreamEvent::Token(_))));
    assert!(matches!(stream.next().await, Some(StreamEvent::Token(_))));

    session.eject_model().await.unwrap();
    assert_eq!(session.state(), SessionState::Idle);
    assert!(!session.is_model_loaded());

    // The generation still terminates with its partial content.
    let completion = stream.collect().await;
    assert_eq!(completion.reason, FinishReason::Cancelled);
    assert!(!completion.content.is_empty());

    // No context call may follow the unload.
    let log = events.lock().unwrap().clone();
    let unload_positions: Vec<_> = log
        .iter()
        .enumerate()
        .filter(|(_, e)| **e == EngineEvent::Unload)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(unload_positions.len(), 1, "exactly one unload, log: {log:?}");
    assert_eq!(
        unload_positions[0],
        log.len() - 1,
        "unload must be the final engine event, log: {log:?}"
    );
}

#[tokio::test]
async fn token_cap_bounds_runaway_generation() {
    let (engine, _events) = RecordingEngine::new(Duration::ZERO);
    let session = SessionManager::new(Arc::new(engine), SessionLimits::default());
    session
        .load_model(&PathBuf::from("m.gguf"), &InferenceConfig::default())
        .await
        .unwrap();

    let mut generation = request(vec![user_message("go")]);
    generation.max_tokens = Some(5);
    let completion = session.generate_completion(generation).collect().await;
    assert_eq!(completion.reason, FinishReason::MaxTokens);
    assert_eq!(completion.tokens, 5);
    wait_for_state(&session, SessionState::Ready).await;
}

#[tokio::test]
async fn engine_fault_resolves_with_partial_content() {
    let session = SessionManager::new(
        Arc::new(
            EchoEngine::new()
                .with_reply("one two three four five")
                .failing_after(2),
        ),
        SessionLimits::default(),
    );
    session
        .load_model(&PathBuf::from("m.gguf"), &InferenceConfig::default())
        .await
        .unwrap();

    let completion = session
        .generate_completion(request(vec![user_message("hi")]))
        .collect()
        .await;
    assert_eq!(completion.reason, FinishReason::Fault);
    assert_eq!(completion.content, "one two");
    wait_for_state(&session, SessionState::Ready).await;
}

#[tokio::test]
async fn eject_from_ready_returns_to_idle() {
    let session = SessionManager::new(Arc::new(EchoEngine::new()), SessionLimits::default());
    session
        .load_model(&PathBuf::from("m.gguf"), &InferenceConfig::default())
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    assert!(session.is_model_loaded());

    session.eject_model().await.unwrap();
    assert_eq!(session.state(), SessionState::Idle);
    assert!(!session.is_model_loaded());
    assert_eq!(session.resource_usage().await, ResourceUsage::default());
}

#[tokio::test]
async fn load_over_load_replaces_model() {
    let session = SessionManager::new(Arc::new(EchoEngine::new()), SessionLimits::default());
    session
        .load_model(&PathBuf::from("first.gguf"), &InferenceConfig::default())
        .await
        .unwrap();
    session
        .load_model(&PathBuf::from("second.gguf"), &InferenceConfig::default())
        .await
        .unwrap();

    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.model_info().unwrap().name, "second.gguf");
}

#[tokio::test]
async fn active_request_identity_is_published_then_cleared() {
    let (engine, _events) = RecordingEngine::new(Duration::from_millis(5));
    let session = SessionManager::new(Arc::new(engine), SessionLimits::default());
    session
        .load_model(&PathBuf::from("m.gguf"), &InferenceConfig::default())
        .await
        .unwrap();

    let mut stream = session.generate_completion(request(vec![user_message("go")]));
    assert!(matches!(stream.next().await, Some(StreamEvent::Token(_))));

    let active = session.active_request().expect("active request published");
    assert_eq!(active.chat_id, "chat-1");
    assert_eq!(active.assistant_message_id, "msg-1");

    session.stop_generation();
    let _ = stream.collect().await;
    wait_for_state(&session, SessionState::Ready).await;
    assert!(session.active_request().is_none());
}
