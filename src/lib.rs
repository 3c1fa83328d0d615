//! # Chat Relay
//!
//! A streaming chat-completion engine for chat bots: it turns a token-by-token
//! model response into progressively updated chat messages, keeps per-user
//! conversation memory inside a token budget, and lets the model call
//! registered functions in the middle of a conversation.
//!
//! ## Key Features
//!
//! - **Incremental rendering**: every completed line is classified as text,
//!   list or code and rendered as a new block or an in-place update
//! - **Token-budgeted sessions**: oldest-first eviction per `(user, channel)`
//!   with idle expiry for channel conversations
//! - **Function calls**: the model can call registered functions; results are
//!   fed back and the stream resumes, up to a configurable number of round trips
//! - **Partial results survive**: cancelled turns and dropped connections
//!   still flush and commit the text received so far
//!
//! ## Example
//!
//! ```rust,no_run
//! use chat_relay::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(presenter: &dyn Presenter) -> Result<()> {
//! let options = CompletionOptions::from_env()?;
//! let transport = Arc::new(OpenAiTransport::new(&options)?);
//! let registry = Arc::new(FunctionRegistry::with_builtins());
//! let orchestrator = CompletionOrchestrator::new(transport, registry.clone(), options);
//!
//! let store = SessionStore::default();
//! let session = store.get(SessionKind::Direct, "U123", "D456").await;
//! let mut session = session.lock().await;
//!
//! let text = "roll a twenty sided die -f dice";
//! session.use_functions(registry.parse_requested(text));
//! let outcome = orchestrator.run(text, &mut session, presenter).await?;
//! println!("{}", outcome.text);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **decoder**: SSE bytes → completed lines and the final message / function call
//! - **render**: line classification state machine and the incremental renderer
//! - **orchestrator**: the stream → render → commit loop with function calls
//! - **session**: per-conversation history with token budget and expiry
//! - **functions**: function registry, request flag parsing, built-ins
//! - **context**: approximate token counting
//! - **presenter** / **transport**: interfaces to the chat platform and the model server
//! - **config**: environment variables → [`CompletionOptions`]
//! - **retry**: exponential backoff for opening connections

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

/// Environment configuration for completion options.
mod config;

/// Token counting for history budgets.
mod context;

/// Incremental SSE decoder.
mod decoder;

/// Error types and the crate `Result` alias.
mod error;

/// Function registry and built-in functions.
mod functions;

/// Stream → render → commit loop.
mod orchestrator;

/// Presentation collaborator interface.
mod presenter;

/// Line classification and incremental rendering.
mod render;

/// Conversation sessions and the session store.
mod session;

/// Streaming completion transport.
mod transport;

/// Chat messages, options and wire types.
mod types;

// ============================================================================
// PUBLIC EXPORTS
// ============================================================================

/// Retry utilities with exponential backoff and jitter.
pub mod retry;

// --- Orchestration ---

pub use orchestrator::{CompletionOrchestrator, CompletionOutcome, TurnEnd};
pub use tokio_util::sync::CancellationToken;

// --- Streaming ---

pub use decoder::{DecoderEvent, FunctionCall, StreamCompletion, StreamDecoder};
pub use render::{
    IncrementalRenderer, LineClassifier, RenderBlock, RenderCommand, RenderMode, is_list_item,
};

// --- Collaborators ---

pub use presenter::{BlockId, Presenter, reaction};
pub use transport::{ByteStream, CompletionTransport, OpenAiTransport};

// --- Sessions ---

pub use context::{ApproximateTokenCounter, TokenCounter};
pub use session::{
    Session, SessionConfig, SessionKey, SessionKind, SessionStore, SharedSession,
    is_reset_command,
};

// --- Functions ---

pub use functions::{
    FunctionDefinition, FunctionHandler, FunctionInfo, FunctionRegistry, builtin, split_args,
};

// --- Configuration ---

pub use config::{get_api_key, get_base_url, get_max_tokens, get_model};

// --- Error Handling ---

pub use error::{Error, Result};

// --- Core Types ---

pub use types::{
    ChatChunk, ChatCompletionRequest, ChatMessage, ChunkChoice, ChunkDelta, CompletionOptions,
    CompletionOptionsBuilder, FunctionCallDelta, MessageRole, ToolCallDelta,
};

// ============================================================================
// CONVENIENCE PRELUDE
// ============================================================================

/// The types most bots need. Import with `use chat_relay::prelude::*;`.
pub mod prelude {
    pub use crate::{
        BlockId, CancellationToken, ChatMessage, CompletionOptions, CompletionOrchestrator,
        CompletionOutcome, CompletionTransport, Error, FunctionRegistry, OpenAiTransport,
        Presenter, RenderBlock, Result, SessionConfig, SessionKind, SessionStore, TurnEnd,
        is_reset_command,
    };
}
