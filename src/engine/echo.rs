//! Deterministic in-process engine.
//!
//! Streams a canned reply one word at a time. Used by the binary when no
//! native backend is compiled in, and by the test suite to script load
//! failures, mid-loop faults and slow token cadence.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use crate::config::InferenceConfig;
use crate::error::{Error, Result};

use super::{InferenceEngine, ModelContext, ModelInfo, ResourceUsage};

const DEFAULT_REPLY: &str = "This is a locally generated reply from the echo engine.";

/// Engine that fabricates completions without any native code.
#[derive(Debug, Clone)]
pub struct EchoEngine {
    reply: String,
    token_delay: Duration,
    fail_load: bool,
    fail_after: Option<usize>,
}

impl EchoEngine {
    pub fn new() -> Self {
        Self {
            reply: DEFAULT_REPLY.to_string(),
            token_delay: Duration::ZERO,
            fail_load: false,
            fail_after: None,
        }
    }

    /// Use `reply` as the canned completion text.
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = reply.into();
        self
    }

    /// Sleep this long before yielding each fragment.
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    /// Make every `load_model` call fail.
    pub fn failing_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    /// Return an engine error after yielding `n` fragments.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }
}

impl Default for EchoEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InferenceEngine for EchoEngine {
    async fn load_model(
        &self,
        path: &Path,
        config: &InferenceConfig,
    ) -> Result<Box<dyn ModelContext>> {
        if self.fail_load {
            return Err(Error::Load(format!(
                "failed to load model from {}",
                path.display()
            )));
        }

        // Word-split with the separating space kept on the fragment, so the
        // concatenation of fragments reproduces the reply.
        let mut script = Vec::new();
        for (i, word) in self.reply.split_whitespace().enumerate() {
            if i == 0 {
                script.push(word.to_string());
            } else {
                script.push(format!(" {}", word));
            }
        }

        Ok(Box::new(EchoContext {
            info: ModelInfo::from_path(path, config),
            script,
            cursor: 0,
            emitted: 0,
            token_delay: self.token_delay,
            fail_after: self.fail_after,
            unloaded: false,
        }))
    }
}

struct EchoContext {
    info: ModelInfo,
    script: Vec<String>,
    cursor: usize,
    emitted: usize,
    token_delay: Duration,
    fail_after: Option<usize>,
    unloaded: bool,
}

#[async_trait]
impl ModelContext for EchoContext {
    async fn next_token(&mut self, prompt: &str) -> Result<String> {
        if self.unloaded {
            return Err(Error::Generation("context already unloaded".to_string()));
        }
        if !prompt.is_empty() {
            self.cursor = 0;
        }
        if let Some(limit) = self.fail_after {
            if self.emitted >= limit {
                return Err(Error::Generation("scripted engine fault".to_string()));
            }
        }
        if !self.token_delay.is_zero() {
            tokio::time::sleep(self.token_delay).await;
        }
        match self.script.get(self.cursor) {
            Some(fragment) => {
                self.cursor += 1;
                self.emitted += 1;
                Ok(fragment.clone())
            }
            None => Ok(String::new()),
        }
    }

    async fn reset(&mut self) -> Result<()> {
        self.cursor = 0;
        self.emitted = 0;
        Ok(())
    }

    async fn unload(&mut self) -> Result<()> {
        self.unloaded = true;
        Ok(())
    }

    fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn resource_usage(&self) -> ResourceUsage {
        ResourceUsage {
            cpu: 0.05,
            ram: 0.10,
            vram: 0.0,
            gpu: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InferenceConfig;
    use std::path::PathBuf;

    #[tokio::test]
    async fn echoes_reply_fragment_by_fragment() {
        let engine = EchoEngine::new().with_reply("one two three");
        let mut ctx = engine
            .load_model(&PathBuf::from("m.gguf"), &InferenceConfig::default())
            .await
            .unwrap();

        let mut out = String::new();
        let mut fragment = ctx.next_token("prompt").await.unwrap();
        while !fragment.is_empty() {
            out.push_str(&fragment);
            fragment = ctx.next_token("").await.unwrap();
        }
        assert_eq!(out, "one two three");
    }

    #[tokio::test]
    async fn failing_load_surfaces_load_error() {
        let engine = EchoEngine::new().failing_load();
        let result = engine
            .load_model(&PathBuf::from("m.gguf"), &InferenceConfig::default())
            .await;
        assert!(matches!(result, Err(Error::Load(_))));
    }
}
