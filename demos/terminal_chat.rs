//! Terminal Chat Demo
//!
//! A line-based chat in the terminal using the full engine: streamed
//! rendering, session memory and function calls.
//!
//! - Type a message and press enter
//! - Add `-f dice` or `-f echo` to let the model call a built-in function
//! - Type `----` to start a new conversation
//! - Press Ctrl-C while an answer streams to interrupt it
//!
//! Configuration comes from the environment (`OPENAI_API_KEY`,
//! `OPENAI_MODEL`, `OPENAI_BASE_URL`, `OPENAI_MAX_TOKEN`, `CHAT_PERSONA`).
//! Works with any OpenAI-compatible server, e.g.
//! `OPENAI_BASE_URL=http://localhost:11434/v1 OPENAI_MODEL=qwen3:8b`.
//!
//! Run with `RUST_LOG=chat_relay=debug` to see decoder and session logs.

use async_trait::async_trait;
use chat_relay::prelude::*;
use chat_relay::{RenderMode, reaction};
use std::io::Write;
use std::sync::Arc;
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

/// Prints blocks to stdout. A terminal cannot rewrite earlier output, so an
/// amend prints only the text added since the last call for that block.
#[derive(Default)]
struct StdoutPresenter {
    state: Mutex<(u64, usize)>,
}

impl StdoutPresenter {
    fn print(&self, text: &str) {
        print!("{}", text);
        let _ = std::io::stdout().flush();
    }
}

#[async_trait]
impl Presenter for StdoutPresenter {
    async fn create_block(&self, block: &RenderBlock) -> Result<BlockId> {
        let id = {
            let mut state = self.state.lock().map_err(|e| Error::other(e.to_string()))?;
            state.0 += 1;
            state.1 = block.text.len();
            state.0
        };

        if block.mode == RenderMode::CodeBlock {
            let language = block.language.as_deref().unwrap_or("code");
            self.print(&format!("\n[{}]\n", language));
        } else {
            self.print("\n");
        }
        self.print(&block.text);
        Ok(BlockId::new(id.to_string()))
    }

    async fn amend_block(&self, _id: &BlockId, block: &RenderBlock) -> Result<()> {
        let printed = {
            let mut state = self.state.lock().map_err(|e| Error::other(e.to_string()))?;
            std::mem::replace(&mut state.1, block.text.len())
        };
        if let Some(added) = block.text.get(printed..) {
            self.print(added);
        }
        Ok(())
    }

    async fn add_reaction(&self, name: &str) -> Result<()> {
        if name == reaction::FUNCTION_RUNNING {
            self.print("\n(calling a function...)");
        }
        Ok(())
    }

    async fn remove_reaction(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn report_error(&self, message: &str) -> Result<()> {
        eprintln!("\n⚠️  {}", message);
        Ok(())
    }

    async fn complete(&self, _full_text: &str) -> Result<()> {
        self.print("\n\n");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let options = CompletionOptions::from_env()?;
    println!("{}", "=".repeat(60));
    println!("Chatting with {} at {}", options.model, options.base_url);
    println!("Functions: -f dice, -f echo   Reset: ----   Quit: Ctrl-D");
    println!("{}", "=".repeat(60));

    let transport = Arc::new(OpenAiTransport::new(&options)?);
    let registry = Arc::new(FunctionRegistry::with_builtins());
    let orchestrator = CompletionOrchestrator::new(transport, registry.clone(), options);
    let store = SessionStore::new(SessionConfig::default());
    let presenter = StdoutPresenter::default();

    let user = std::env::var("USER").unwrap_or_else(|_| "local".to_string());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }

        if is_reset_command(text) {
            store.clear(&user, "terminal").await;
            println!("Conversation reset.");
            continue;
        }

        let session = store.get(SessionKind::Direct, &user, "terminal").await;
        let mut session = session.lock().await;
        session.use_functions(registry.parse_requested(text));

        // Ctrl-C cancels this answer only
        let cancel = CancellationToken::new();
        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            })
        };

        let result = orchestrator
            .run_with_cancel(text, &mut session, &presenter, &cancel)
            .await;
        watcher.abort();

        match result {
            Ok(outcome) => match outcome.end {
                TurnEnd::Interrupted { reason } => println!("\n[interrupted: {}]\n", reason),
                TurnEnd::IterationLimit => println!("\n[stopped after too many function calls]\n"),
                TurnEnd::Completed | TurnEnd::FunctionFailed { .. } => {}
            },
            Err(e) => eprintln!("Request failed: {}", e),
        }
        log::debug!(
            "history: {} messages, {} tokens",
            session.len(),
            session.prompt_tokens()
        );
    }

    Ok(())
}
