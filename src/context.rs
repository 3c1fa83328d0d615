//! Token accounting for conversation budgets
//!
//! Token costs here are approximations used only to keep session history
//! inside a budget. They do not match any specific model tokenizer, so the
//! counter is a trait and callers can plug in a real tokenizer if they have one.
//!
//! # Examples
//!
//! ```rust
//! use chat_relay::{ApproximateTokenCounter, ChatMessage, TokenCounter};
//!
//! let counter = ApproximateTokenCounter::default();
//! let cost = counter.count(&ChatMessage::user("Hello world"));
//! assert_eq!(cost, 3 + 3);
//! ```

use crate::types::{ChatMessage, MessageRole};

/// Approximates the token cost of a single message.
///
/// Implementations must be pure: the same message always costs the same.
pub trait TokenCounter: Send + Sync {
    fn count(&self, message: &ChatMessage) -> usize;
}

/// Character-based approximation: 1 token ≈ 4 bytes of content, plus a fixed
/// per-role overhead for the chat framing around each message.
#[derive(Debug, Clone, Copy)]
pub struct ApproximateTokenCounter {
    /// Bytes per token
    pub bytes_per_token: usize,
    /// Overhead for user and function messages
    pub user_overhead: usize,
    /// Overhead for assistant and system messages
    pub assistant_overhead: usize,
}

impl Default for ApproximateTokenCounter {
    fn default() -> Self {
        Self {
            bytes_per_token: 4,
            user_overhead: 3,
            assistant_overhead: 4,
        }
    }
}

impl ApproximateTokenCounter {
    /// Token estimate for raw text, rounded up.
    pub fn text_tokens(&self, text: &str) -> usize {
        let per = self.bytes_per_token.max(1);
        text.len().div_ceil(per)
    }

    fn overhead(&self, role: MessageRole) -> usize {
        match role {
            MessageRole::User | MessageRole::Function => self.user_overhead,
            MessageRole::Assistant | MessageRole::System => self.assistant_overhead,
        }
    }
}

impl TokenCounter for ApproximateTokenCounter {
    fn count(&self, message: &ChatMessage) -> usize {
        let name_tokens = message
            .function_name()
            .map(|name| self.text_tokens(name))
            .unwrap_or(0);
        self.overhead(message.role()) + name_tokens + self.text_tokens(message.content())
    }
}
