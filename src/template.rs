//! Chat template rendering.
//!
//! Maps a model display name and an ordered message list to the single prompt
//! string the native engine consumes. The set of supported formats is closed,
//! so selection is an exhaustive match over an enum rather than anything
//! dynamic. Rendering is pure: the same name and messages always produce the
//! same string.

use crate::chat::{Message, MessageRole};

/// Supported chat-turn formats, selected by model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatTemplate {
    Gemma,
    Llama3,
    Llama2,
    Mistral,
    Phi,
    Qwen,
    DeepSeek,
    CommandR,
    Vicuna,
    Universal,
}

impl ChatTemplate {
    /// Select a template by substring-matching the lower-cased model name.
    ///
    /// Ordering matters: more specific keywords are tested before generic
    /// ones ("llama" + "3" before a bare "llama" rule), and DeepSeek's
    /// distilled variants share Qwen's turn syntax so they route there.
    pub fn detect(model_name: &str) -> Self {
        let name = model_name.to_lowercase();

        if name.contains("deepseek") {
            if name.contains("distill") {
                return ChatTemplate::Qwen;
            }
            return ChatTemplate::DeepSeek;
        }
        if name.contains("gemma") {
            return ChatTemplate::Gemma;
        }
        if name.contains("llama") && name.contains('3') {
            return ChatTemplate::Llama3;
        }
        if name.contains("llama") && name.contains('2') {
            return ChatTemplate::Llama2;
        }
        if name.contains("mistral") || name.contains("mixtral") || name.contains("zephyr") {
            return ChatTemplate::Mistral;
        }
        if name.contains("phi") {
            return ChatTemplate::Phi;
        }
        if name.contains("command-r") || name.contains("c4ai") {
            return ChatTemplate::CommandR;
        }
        if name.contains("vicuna") || name.contains("wizardlm") || name.contains("alpaca") {
            return ChatTemplate::Vicuna;
        }
        if ["qwen", "hermes", "dolphin", "yi", "orca", "chatml"]
            .iter()
            .any(|kw| name.contains(kw))
        {
            return ChatTemplate::Qwen;
        }
        ChatTemplate::Universal
    }

    /// Render `messages` into a prompt, closing with the open assistant turn.
    pub fn render(&self, messages: &[Message]) -> String {
        match self {
            ChatTemplate::Gemma => render_gemma(messages),
            ChatTemplate::Llama3 => render_llama3(messages),
            ChatTemplate::Llama2 => render_llama2(messages),
            ChatTemplate::Mistral => render_mistral(messages),
            ChatTemplate::Phi => render_phi(messages),
            ChatTemplate::Qwen => render_qwen(messages),
            ChatTemplate::DeepSeek => render_deepseek(messages),
            ChatTemplate::CommandR => render_command_r(messages),
            ChatTemplate::Vicuna => render_vicuna(messages),
            ChatTemplate::Universal => render_universal(messages),
        }
    }
}

/// Convenience wrapper: detect the template for `model_name` and render.
pub fn render(model_name: &str, messages: &[Message]) -> String {
    ChatTemplate::detect(model_name).render(messages)
}

// Gemma has no system role; system content folds into the first user turn.
fn render_gemma(messages: &[Message]) -> String {
    let mut prompt = String::new();
    let mut system = String::new();
    let mut system_pending = false;

    for message in messages {
        match message.role {
            MessageRole::System => {
                system.push_str(message.content.trim());
                system_pending = true;
            }
            MessageRole::User => {
                prompt.push_str("<start_of_turn>user\n");
                if system_pending {
                    prompt.push_str(&system);
                    prompt.push_str("\n\n");
                    system_pending = false;
                }
                prompt.push_str(message.content.trim());
                prompt.push_str("<end_of_turn>\n");
            }
            MessageRole::Assistant => {
                prompt.push_str("<start_of_turn>model\n");
                prompt.push_str(message.content.trim());
                prompt.push_str("<end_of_turn>\n");
            }
        }
    }

    prompt.push_str("<start_of_turn>model\n");
    prompt
}

fn render_llama3(messages: &[Message]) -> String {
    let mut prompt = String::from("<|begin_of_text|>");

    for message in messages {
        prompt.push_str("<|start_header_id|>");
        prompt.push_str(message.role.as_str());
        prompt.push_str("<|end_header_id|>\n\n");
        prompt.push_str(message.content.trim());
        prompt.push_str("<|eot_id|>");
    }

    prompt.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
    prompt
}

fn render_llama2(messages: &[Message]) -> String {
    let mut prompt = String::new();
    let mut has_system = false;

    for message in messages {
        match message.role {
            MessageRole::System => {
                prompt.push_str("<<SYS>>\n");
                prompt.push_str(message.content.trim());
                prompt.push_str("\n<</SYS>>\n\n");
                has_system = true;
            }
            MessageRole::User => {
                if !has_system {
                    prompt.push_str("<s>");
                }
                prompt.push_str("[INST] ");
                prompt.push_str(message.content.trim());
                prompt.push_str(" [/INST]");
            }
            MessageRole::Assistant => {
                prompt.push(' ');
                prompt.push_str(message.content.trim());
                prompt.push_str(" </s>");
            }
        }
    }

    if matches!(messages.last().map(|m| m.role), Some(MessageRole::User)) {
        prompt.push(' ');
    }
    prompt
}

// Mistral v1 has no system turn at all; system messages are dropped.
fn render_mistral(messages: &[Message]) -> String {
    let mut prompt = String::new();

    for message in messages {
        match message.role {
            MessageRole::User => {
                prompt.push_str("<s>[INST] ");
                prompt.push_str(message.content.trim());
                prompt.push_str(" [/INST]");
            }
            MessageRole::Assistant => {
                prompt.push(' ');
                prompt.push_str(message.content.trim());
                prompt.push_str(" </s>");
            }
            MessageRole::System => {}
        }
    }

    if matches!(messages.last().map(|m| m.role), Some(MessageRole::User)) {
        prompt.push(' ');
    }
    prompt
}

fn render_phi(messages: &[Message]) -> String {
    let mut prompt = String::new();

    for message in messages {
        let tag = match message.role {
            MessageRole::System => "<|system|>\n",
            MessageRole::User => "<|user|>\n",
            MessageRole::Assistant => "<|assistant|>\n",
        };
        prompt.push_str(tag);
        prompt.push_str(message.content.trim());
        prompt.push_str("<|end|>\n");
    }

    prompt.push_str("<|assistant|>\n");
    prompt
}

fn render_qwen(messages: &[Message]) -> String {
    let mut prompt = String::new();

    for message in messages {
        prompt.push_str("<|im_start|>");
        prompt.push_str(message.role.as_str());
        prompt.push('\n');
        prompt.push_str(message.content.trim());
        prompt.push_str("<|im_end|>\n");
    }

    prompt.push_str("<|im_start|>assistant\n");
    prompt
}

// DeepSeek's base chat format is plain role-prefixed text with a bare leading
// system block.
fn render_deepseek(messages: &[Message]) -> String {
    let mut prompt = String::new();

    for message in messages {
        match message.role {
            MessageRole::System => {
                prompt.push_str(message.content.trim());
                prompt.push_str("\n\n");
            }
            MessageRole::User => {
                prompt.push_str("User: ");
                prompt.push_str(message.content.trim());
                prompt.push_str("\n\n");
            }
            MessageRole::Assistant => {
                prompt.push_str("Assistant: ");
                prompt.push_str(message.content.trim());
                prompt.push_str("\n\n");
            }
        }
    }

    prompt.push_str("Assistant: ");
    prompt
}

fn render_command_r(messages: &[Message]) -> String {
    let mut prompt = String::new();

    for message in messages {
        let role_token = match message.role {
            MessageRole::System => "<|SYSTEM_TOKEN|>",
            MessageRole::User => "<|USER_TOKEN|>",
            MessageRole::Assistant => "<|CHATBOT_TOKEN|>",
        };
        prompt.push_str("<|START_OF_TURN_TOKEN|>");
        prompt.push_str(role_token);
        prompt.push_str(message.content.trim());
        prompt.push_str("<|END_OF_TURN_TOKEN|>");
    }

    prompt.push_str("<|START_OF_TURN_TOKEN|><|CHATBOT_TOKEN|>");
    prompt
}

// Vicuna-style: bare leading system paragraph, upper-case role labels.
fn render_vicuna(messages: &[Message]) -> String {
    let mut prompt = String::new();

    for message in messages {
        match message.role {
            MessageRole::System => {
                prompt.push_str(message.content.trim());
                prompt.push_str("\n\n");
            }
            MessageRole::User => {
                prompt.push_str("USER: ");
                prompt.push_str(message.content.trim());
                prompt.push('\n');
            }
            MessageRole::Assistant => {
                prompt.push_str("ASSISTANT: ");
                prompt.push_str(message.content.trim());
                prompt.push('\n');
            }
        }
    }

    prompt.push_str("ASSISTANT:");
    prompt
}

fn render_universal(messages: &[Message]) -> String {
    let mut prompt = String::new();

    for message in messages {
        let label = match message.role {
            MessageRole::System => "System: ",
            MessageRole::User => "User: ",
            MessageRole::Assistant => "Assistant: ",
        };
        prompt.push_str(label);
        prompt.push_str(message.content.trim());
        prompt.push_str("\n\n");
    }

    prompt.push_str("Assistant: ");
    prompt
}
