//! Environment configuration
//!
//! The engine itself takes plain parameters. These helpers read the
//! environment once at startup and turn it into [`CompletionOptions`].
//!
//! | Variable           | Default                      |
//! |--------------------|------------------------------|
//! | `OPENAI_API_KEY`   | empty (no `Authorization`)   |
//! | `OPENAI_MODEL`     | `gpt-3.5-turbo`              |
//! | `OPENAI_MAX_TOKEN` | `4037`                       |
//! | `OPENAI_BASE_URL`  | `https://api.openai.com/v1`  |
//! | `CHAT_PERSONA`     | built-in persona             |

use crate::types::CompletionOptions;
use crate::{Error, Result};
use std::env;

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MAX_TOKENS: u32 = 4037;
pub const DEFAULT_PERSONA: &str = "The assistant is a chatbot that can talk to humans. Try to be nice.";

pub const API_KEY_VAR: &str = "OPENAI_API_KEY";
pub const MODEL_VAR: &str = "OPENAI_MODEL";
pub const MAX_TOKENS_VAR: &str = "OPENAI_MAX_TOKEN";
pub const BASE_URL_VAR: &str = "OPENAI_BASE_URL";
pub const PERSONA_VAR: &str = "CHAT_PERSONA";

fn from_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get the model name from `OPENAI_MODEL`, then `fallback`, then the default.
///
/// ```rust,no_run
/// use chat_relay::get_model;
///
/// let model = get_model(None);
/// let model = get_model(Some("gpt-4o-mini"));
/// ```
pub fn get_model(fallback: Option<&str>) -> String {
    from_env(MODEL_VAR)
        .or_else(|| fallback.map(str::to_string))
        .unwrap_or_else(|| DEFAULT_MODEL.to_string())
}

/// Get the base URL from `OPENAI_BASE_URL`, then `fallback`, then the default.
pub fn get_base_url(fallback: Option<&str>) -> String {
    from_env(BASE_URL_VAR)
        .or_else(|| fallback.map(str::to_string))
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
}

/// Get the API key, if one is set.
pub fn get_api_key() -> Option<String> {
    from_env(API_KEY_VAR)
}

/// Get the token ceiling from `OPENAI_MAX_TOKEN`.
pub fn get_max_tokens() -> Result<u32> {
    parse_max_tokens(from_env(MAX_TOKENS_VAR))
}

fn parse_max_tokens(raw: Option<String>) -> Result<u32> {
    match raw {
        None => Ok(DEFAULT_MAX_TOKENS),
        Some(raw) => raw.trim().parse::<u32>().map_err(|e| {
            Error::config(format!("{} must be a positive integer, got {:?}: {}", MAX_TOKENS_VAR, raw, e))
        }),
    }
}

impl CompletionOptions {
    /// Options from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(from_env)
    }

    /// Options from an arbitrary variable lookup. Empty values count as unset.
    ///
    /// ```rust
    /// use chat_relay::CompletionOptions;
    ///
    /// let options = CompletionOptions::from_lookup(|key| match key {
    ///     "OPENAI_MODEL" => Some("gpt-4o-mini".to_string()),
    ///     _ => None,
    /// })
    /// .unwrap();
    /// assert_eq!(options.model, "gpt-4o-mini");
    /// assert_eq!(options.max_tokens, 4037);
    /// ```
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let max_tokens = parse_max_tokens(get(MAX_TOKENS_VAR))?;
        if max_tokens == 0 {
            return Err(Error::config(format!("{} must be greater than 0", MAX_TOKENS_VAR)));
        }

        let mut builder = CompletionOptions::builder()
            .model(get(MODEL_VAR).unwrap_or_else(|| DEFAULT_MODEL.to_string()))
            .base_url(get(BASE_URL_VAR).unwrap_or_else(|| DEFAULT_BASE_URL.to_string()))
            .persona(get(PERSONA_VAR).unwrap_or_else(|| DEFAULT_PERSONA.to_string()))
            .max_tokens(max_tokens);
        if let Some(key) = get(API_KEY_VAR) {
            builder = builder.api_key(key);
        }
        builder.build()
    }
}
