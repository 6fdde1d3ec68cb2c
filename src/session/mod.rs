//! Inference session management.
//!
//! [`SessionManager`] owns the lifecycle of the single loaded model and
//! serializes generation against load/eject. The native context is the one
//! shared mutable resource in the system; it lives inside a mutex-guarded
//! slot together with an epoch counter, and every generation step re-validates
//! the epoch under the lock before touching the context. Eject takes the
//! context out under the same lock, so a stale handle can never be
//! dereferenced, and an unload can never run while a generation step is
//! mid-call.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::chat::Message;
use crate::config::InferenceConfig;
use crate::engine::{InferenceEngine, ModelContext, ModelInfo, ResourceUsage};
use crate::error::{Error, Result};
use crate::template;

pub mod stream;

pub use stream::{Completion, CompletionStream, FinishReason, StreamEvent};

/// Session lifecycle state. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Loading,
    Ready,
    Generating,
    Error,
}

/// One generation request. At most one may be in flight per session.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub chat_id: String,
    pub assistant_message_id: String,
    pub messages: Vec<Message>,
    /// Per-request override of the session's token cap.
    pub max_tokens: Option<usize>,
}

/// Caps applied to every generation.
#[derive(Debug, Clone)]
pub struct SessionLimits {
    /// Hard cap on emitted tokens; a safety valve against runaway generation.
    pub max_generation_tokens: usize,
    /// Capacity of the per-request token channel.
    pub stream_buffer: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_generation_tokens: 1000,
            stream_buffer: 100,
        }
    }
}

/// Identity of the in-flight request, readable by UI-style consumers.
#[derive(Debug, Clone)]
pub struct ActiveRequest {
    pub request_id: Uuid,
    pub chat_id: String,
    pub assistant_message_id: String,
}

struct ActiveSlot {
    request: ActiveRequest,
    cancel: CancellationToken,
}

/// The loaded context plus its epoch. The epoch is bumped whenever the
/// context is replaced or removed; a generation loop that captured an older
/// epoch stops at its next step.
struct ModelSlot {
    ctx: Option<Box<dyn ModelContext>>,
    epoch: u64,
}

struct SessionInner {
    engine: Arc<dyn InferenceEngine>,
    slot: AsyncMutex<ModelSlot>,
    state_tx: watch::Sender<SessionState>,
    model_info: parking_lot::RwLock<Option<ModelInfo>>,
    active: parking_lot::Mutex<Option<ActiveSlot>>,
    live_text: watch::Sender<String>,
    limits: SessionLimits,
}

/// Coordinates model load/unload, single-flight generation with cooperative
/// cancellation, and published streaming state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    pub fn new(engine: Arc<dyn InferenceEngine>, limits: SessionLimits) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (live_text, _) = watch::channel(String::new());
        Self {
            inner: Arc::new(SessionInner {
                engine,
                slot: AsyncMutex::new(ModelSlot {
                    ctx: None,
                    epoch: 0,
                }),
                state_tx,
                model_info: parking_lot::RwLock::new(None),
                active: parking_lot::Mutex::new(None),
                live_text,
                limits,
            }),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.inner.state_tx.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// Watch the accumulated text of the in-flight generation.
    pub fn subscribe_live_text(&self) -> watch::Receiver<String> {
        self.inner.live_text.subscribe()
    }

    pub fn is_model_loaded(&self) -> bool {
        self.inner.model_info.read().is_some()
    }

    pub fn model_info(&self) -> Option<ModelInfo> {
        self.inner.model_info.read().clone()
    }

    /// Identity of the in-flight request, if any.
    pub fn active_request(&self) -> Option<ActiveRequest> {
        self.inner.active.lock().as_ref().map(|a| a.request.clone())
    }

    /// Utilization of the loaded model; zeroed when nothing is loaded.
    pub async fn resource_usage(&self) -> ResourceUsage {
        let slot = self.inner.slot.lock().await;
        slot.ctx
            .as_ref()
            .map(|ctx| ctx.resource_usage())
            .unwrap_or_default()
    }

    /// Load the model at `path`, replacing any previously loaded one.
    ///
    /// Rejected with [`Error::Busy`] if a load is already in progress. Any
    /// in-flight generation is cancelled and drained before the old context
    /// is released. On failure the session moves to [`SessionState::Error`]
    /// with no model loaded.
    pub async fn load_model(&self, path: &Path, config: &InferenceConfig) -> Result<ModelInfo> {
        let entered = self.inner.state_tx.send_if_modified(|s| {
            if *s == SessionState::Loading {
                false
            } else {
                *s = SessionState::Loading;
                true
            }
        });
        if !entered {
            warn!("load rejected: a model load is already in progress");
            return Err(Error::Busy("model load already in progress"));
        }

        info!(path = %path.display(), threads = config.threads, gpu_layers = config.gpu_layers,
              context_size = config.context_size, "loading model");

        self.cancel_active();

        let mut slot = self.inner.slot.lock().await;
        if let Some(mut old) = slot.ctx.take() {
            slot.epoch += 1;
            *self.inner.model_info.write() = None;
            debug!("unloading previous model before load");
            if let Err(e) = old.unload().await {
                warn!(error = %e, "failed to unload previous model");
            }
        }

        match self.inner.engine.load_model(path, config).await {
            Ok(ctx) => {
                let model_info = ctx.info().clone();
                slot.ctx = Some(ctx);
                slot.epoch += 1;
                drop(slot);
                *self.inner.model_info.write() = Some(model_info.clone());
                self.inner.state_tx.send_replace(SessionState::Ready);
                info!(model = %model_info.name, "model loaded");
                Ok(model_info)
            }
            Err(e) => {
                drop(slot);
                error!(error = %e, "model load failed");
                self.inner.state_tx.send_replace(SessionState::Error);
                Err(e)
            }
        }
    }

    /// Cancel any in-flight generation, wait for it to stop touching the
    /// context, unload, and return to [`SessionState::Idle`].
    pub async fn eject_model(&self) -> Result<()> {
        info!("ejecting model");
        self.cancel_active();

        // Acquiring the slot waits out any in-flight engine step; taking the
        // context and bumping the epoch makes the running loop exit at its
        // next step without ever seeing the stale context.
        let mut slot = self.inner.slot.lock().await;
        let old = slot.ctx.take();
        slot.epoch += 1;
        *self.inner.model_info.write() = None;

        let result = match old {
            Some(mut ctx) => ctx.unload().await,
            None => Ok(()),
        };
        drop(slot);

        self.inner.state_tx.send_replace(SessionState::Idle);
        match result {
            Ok(()) => {
                info!("model ejected");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "native unload failed");
                Err(e)
            }
        }
    }

    /// Signal cooperative cancellation to the in-flight generation, if any.
    ///
    /// Drives no state transition itself; the generation loop's terminal path
    /// moves the session back to ready.
    pub fn stop_generation(&self) {
        info!("stop requested");
        self.cancel_active();
    }

    /// Start a generation. Returns a stream of token events terminated by
    /// exactly one [`StreamEvent::Done`], on every exit path.
    ///
    /// Rejected unless the session is exactly [`SessionState::Ready`]; a
    /// rejected request still yields its terminal event (with empty content)
    /// and leaves session state untouched.
    pub fn generate_completion(&self, request: GenerationRequest) -> CompletionStream {
        let (tx, rx) = mpsc::channel(self.inner.limits.stream_buffer.max(1));
        let cancel = CancellationToken::new();

        let entered = self.inner.state_tx.send_if_modified(|s| {
            if *s == SessionState::Ready {
                *s = SessionState::Generating;
                true
            } else {
                false
            }
        });
        if !entered {
            warn!(state = ?self.state(), chat_id = %request.chat_id,
                  "generation rejected: session not ready");
            let _ = tx.try_send(StreamEvent::Done(Completion {
                content: String::new(),
                reason: FinishReason::Rejected,
                tokens: 0,
            }));
            return CompletionStream::new(rx, cancel);
        }

        let request_id = Uuid::new_v4();
        *self.inner.active.lock() = Some(ActiveSlot {
            request: ActiveRequest {
                request_id,
                chat_id: request.chat_id.clone(),
                assistant_message_id: request.assistant_message_id.clone(),
            },
            cancel: cancel.clone(),
        });
        self.inner.live_text.send_replace(String::new());

        info!(chat_id = %request.chat_id, messages = request.messages.len(), "generation started");

        let inner = Arc::clone(&self.inner);
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            run_generation(inner, request, request_id, tx, task_cancel).await;
        });

        CompletionStream::new(rx, cancel)
    }

    fn cancel_active(&self) {
        if let Some(active) = self.inner.active.lock().as_ref() {
            debug!(request_id = %active.request.request_id, "cancelling in-flight generation");
            active.cancel.cancel();
        }
    }
}

/// The generation loop. Every exit path funnels into the single terminal
/// block at the bottom: one `Done` event, a conditional transition back to
/// `Ready`, and the active identity cleared. Cancellation is polled before
/// each engine step and each delivery; it never skips the terminal block.
async fn run_generation(
    inner: Arc<SessionInner>,
    request: GenerationRequest,
    request_id: Uuid,
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
) {
    let model_name = inner
        .model_info
        .read()
        .as_ref()
        .map(|i| i.name.clone())
        .unwrap_or_default();
    let prompt = template::render(&model_name, &request.messages);
    let max_tokens = request
        .max_tokens
        .unwrap_or(inner.limits.max_generation_tokens);
    debug!(prompt_len = prompt.len(), max_tokens, "prompt rendered");

    let mut content = String::new();
    let mut tokens = 0usize;
    let mut reason;

    // Prime the context: reset clears KV state left over from the previous
    // request. The epoch captured here pins the context identity for the
    // whole loop.
    let epoch = {
        let mut slot = inner.slot.lock().await;
        match slot.ctx.as_mut() {
            Some(ctx) => match ctx.reset().await {
                Ok(()) => {
                    reason = None;
                    slot.epoch
                }
                Err(e) => {
                    warn!(error = %e, "context reset failed");
                    reason = Some(FinishReason::Fault);
                    slot.epoch
                }
            },
            None => {
                warn!("generation started with no model in slot");
                reason = Some(FinishReason::Fault);
                0
            }
        }
    };

    let mut first = true;
    while reason.is_none() {
        if cancel.is_cancelled() {
            reason = Some(FinishReason::Cancelled);
            break;
        }
        if tokens >= max_tokens {
            info!(tokens, "token cap reached");
            reason = Some(FinishReason::MaxTokens);
            break;
        }

        // The context is only ever touched inside this critical section, and
        // only after re-checking that eject/load has not invalidated it.
        let step = {
            let mut slot = inner.slot.lock().await;
            if slot.epoch != epoch {
                None
            } else {
                match slot.ctx.as_mut() {
                    Some(ctx) => {
                        let step_prompt = if first { prompt.as_str() } else { "" };
                        Some(ctx.next_token(step_prompt).await)
                    }
                    None => None,
                }
            }
        };
        first = false;

        match step {
            None => {
                // Model was ejected or replaced underneath us.
                reason = Some(FinishReason::Cancelled);
            }
            Some(Err(e)) => {
                warn!(error = %e, tokens, "engine fault mid-generation; finishing with partial content");
                reason = Some(FinishReason::Fault);
            }
            Some(Ok(fragment)) => {
                if fragment.is_empty() {
                    reason = Some(FinishReason::Stop);
                    continue;
                }
                content.push_str(&fragment);
                tokens += 1;
                inner.live_text.send_replace(content.clone());
                if cancel.is_cancelled() {
                    reason = Some(FinishReason::Cancelled);
                } else if tx.send(StreamEvent::Token(fragment)).await.is_err() {
                    // Consumer went away; stop producing, still finalize.
                    debug!("token stream consumer dropped");
                    reason = Some(FinishReason::Cancelled);
                }
            }
        }
    }

    let reason = reason.unwrap_or(FinishReason::Stop);
    info!(tokens, ?reason, "generation finished");

    // Terminal path: unconditional, exactly once, immune to cancellation.
    let _ = tx
        .send(StreamEvent::Done(Completion {
            content,
            reason,
            tokens,
        }))
        .await;

    inner.state_tx.send_if_modified(|s| {
        if *s == SessionState::Generating {
            *s = SessionState::Ready;
            true
        } else {
            false
        }
    });

    // Only clear the identity if it still belongs to this request; a newer
    // generation may already have replaced it.
    let mut active = inner.active.lock();
    if active
        .as_ref()
        .map(|a| a.request.request_id == request_id)
        .unwrap_or(false)
    {
        *active = None;
    }
}
