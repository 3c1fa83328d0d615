//! Core types for the chat relay

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Options for configuring completion requests
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    /// Persona prompt placed in front of every request as the system message
    pub persona: String,

    /// Model name (e.g., "gpt-3.5-turbo")
    pub model: String,

    /// OpenAI-compatible endpoint URL
    pub base_url: String,

    /// API key sent as a bearer token
    pub api_key: String,

    /// Token ceiling shared by prompt and response; the response budget is
    /// this minus the session's prompt tokens
    pub max_tokens: u32,

    /// Sampling temperature (0.0 to 2.0)
    pub temperature: f32,

    /// Frequency penalty (-2.0 to 2.0)
    pub frequency_penalty: f32,

    /// Request timeout in seconds
    pub timeout: u64,

    /// Maximum function-call round trips per inbound message
    pub max_function_iterations: u32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            persona: String::new(),
            model: String::new(),
            base_url: String::new(),
            api_key: String::new(),
            max_tokens: 4037,
            temperature: 0.7,
            frequency_penalty: 0.2,
            timeout: 60,
            max_function_iterations: 5,
        }
    }
}

impl CompletionOptions {
    /// Create a new builder for CompletionOptions
    pub fn builder() -> CompletionOptionsBuilder {
        CompletionOptionsBuilder::default()
    }

    /// Response token budget left once `prompt_tokens` are spent.
    pub fn response_budget(&self, prompt_tokens: usize) -> u32 {
        let prompt = u32::try_from(prompt_tokens).unwrap_or(u32::MAX);
        self.max_tokens.saturating_sub(prompt).max(1)
    }
}

/// Builder for CompletionOptions
#[derive(Debug, Default)]
pub struct CompletionOptionsBuilder {
    persona: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
    api_key: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    frequency_penalty: Option<f32>,
    timeout: Option<u64>,
    max_function_iterations: Option<u32>,
}

impl CompletionOptionsBuilder {
    pub fn persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = Some(persona.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn frequency_penalty(mut self, penalty: f32) -> Self {
        self.frequency_penalty = Some(penalty);
        self
    }

    pub fn timeout(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_function_iterations(mut self, iterations: u32) -> Self {
        self.max_function_iterations = Some(iterations);
        self
    }

    pub fn build(self) -> crate::Result<CompletionOptions> {
        let model = self
            .model
            .ok_or_else(|| crate::Error::config("model is required"))?;

        let base_url = self
            .base_url
            .ok_or_else(|| crate::Error::config("base_url is required"))?;

        let defaults = CompletionOptions::default();

        Ok(CompletionOptions {
            persona: self.persona.unwrap_or_default(),
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: self.api_key.unwrap_or_default(),
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            frequency_penalty: self
                .frequency_penalty
                .unwrap_or(defaults.frequency_penalty),
            timeout: self.timeout.unwrap_or(defaults.timeout),
            max_function_iterations: self
                .max_function_iterations
                .unwrap_or(defaults.max_function_iterations),
        })
    }
}

/// Message role in the conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Function,
}

/// A message in the conversation.
///
/// Each variant carries only the fields valid for its role. Serializes to the
/// OpenAI chat message shape (`{"role": ..., "content": ..., "name": ...}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChatMessage {
    System { content: String },
    User { content: String },
    Assistant { content: String },
    Function { name: String, content: String },
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage::Assistant {
            content: content.into(),
        }
    }

    pub fn function(name: impl Into<String>, content: impl Into<String>) -> Self {
        ChatMessage::Function {
            name: name.into(),
            content: content.into(),
        }
    }

    pub fn role(&self) -> MessageRole {
        match self {
            ChatMessage::System { .. } => MessageRole::System,
            ChatMessage::User { .. } => MessageRole::User,
            ChatMessage::Assistant { .. } => MessageRole::Assistant,
            ChatMessage::Function { .. } => MessageRole::Function,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            ChatMessage::System { content }
            | ChatMessage::User { content }
            | ChatMessage::Assistant { content }
            | ChatMessage::Function { content, .. } => content,
        }
    }

    /// Function name, only present on function-role messages.
    pub fn function_name(&self) -> Option<&str> {
        match self {
            ChatMessage::Function { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// OpenAI API chat completion request
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub n: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub functions: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl ChatCompletionRequest {
    /// Streaming request for a single choice with server-side defaults.
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: true,
            n: 1,
            max_tokens: None,
            temperature: None,
            frequency_penalty: None,
            functions: None,
            user: None,
        }
    }
}

/// OpenAI API streaming chunk
///
/// Only the fields the decoder reads are modelled; everything else in the
/// payload is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

/// Choice in a streaming chunk
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Delta in a streaming chunk
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub function_call: Option<FunctionCallDelta>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// Legacy `function_call` delta
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionCallDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// `tool_calls` delta entry
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub function: Option<FunctionCallDelta>,
}
