//! Completion orchestration.
//!
//! [`CompletionOrchestrator::run`] handles one inbound message for one session:
//!
//! ```text
//! Idle ──▶ Streaming ──▶ Completed
//!              │  ▲
//!              ▼  │
//!        FunctionPending
//! ```
//!
//! 1. The user message goes into the session history and the request context
//!    is assembled: persona, history, and the session's enabled functions.
//! 2. The transport stream is fed through a fresh [`StreamDecoder`] and every
//!    completed line goes straight to an [`IncrementalRenderer`].
//! 3. If the stream ends with a function call, the function runs. Its result is
//!    appended to history as a `function` message and a new stream is opened
//!    with the grown context. This repeats at most
//!    `max_function_iterations` times.
//! 4. Otherwise the full assistant text is committed to history and handed to
//!    [`Presenter::complete`].
//!
//! A dropped connection or a cancelled turn still runs the decoder's
//! end-of-stream path, so the partial text is rendered and committed rather
//! than lost. Cancellation is per turn: pass a [`CancellationToken`] to
//! [`CompletionOrchestrator::run_with_cancel`] and cancel it from anywhere.
//! It takes effect even while the stream is waiting for its next chunk.
//! Dropping the `run` future instead loses the partial text.
//!
//! A failed function call is reported through the presenter and ends the
//! turn without committing anything for the failed attempt.

use crate::decoder::{DecoderEvent, FunctionCall, StreamCompletion, StreamDecoder};
use crate::functions::FunctionRegistry;
use crate::presenter::{Presenter, reaction};
use crate::render::IncrementalRenderer;
use crate::session::Session;
use crate::transport::CompletionTransport;
use crate::types::{ChatCompletionRequest, ChatMessage, CompletionOptions};
use crate::Result;
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEnd {
    /// The model finished its answer
    Completed,
    /// The stream was cancelled or dropped; the partial text was kept
    Interrupted { reason: String },
    /// The model kept calling functions past the iteration cap
    IterationLimit,
    /// A function call failed and the turn was abandoned
    FunctionFailed { name: String, error: String },
}

/// Result of [`CompletionOrchestrator::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionOutcome {
    /// Assistant text committed to the session. Empty when nothing was committed.
    pub text: String,
    /// Functions invoked successfully during the turn, in call order
    pub functions_called: Vec<String>,
    pub end: TurnEnd,
}

impl CompletionOutcome {
    pub fn is_completed(&self) -> bool {
        self.end == TurnEnd::Completed
    }
}

const INTERRUPTED: &str = "interrupted";

struct StreamResult {
    completion: StreamCompletion,
    cut_short: Option<String>,
}

/// Runs completions, renders them and manages the function-call loop.
///
/// One orchestrator serves any number of concurrent turns; each turn carries
/// its own cancellation token.
pub struct CompletionOrchestrator {
    transport: Arc<dyn CompletionTransport>,
    registry: Arc<FunctionRegistry>,
    options: CompletionOptions,
}

impl std::fmt::Debug for CompletionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionOrchestrator")
            .field("registry", &self.registry)
            .field("options", &self.options)
            .finish()
    }
}

impl CompletionOrchestrator {
    pub fn new(
        transport: Arc<dyn CompletionTransport>,
        registry: Arc<FunctionRegistry>,
        options: CompletionOptions,
    ) -> Self {
        Self {
            transport,
            registry,
            options,
        }
    }

    pub fn options(&self) -> &CompletionOptions {
        &self.options
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Handle one inbound user message that cannot be cancelled.
    ///
    /// See [`run_with_cancel`](Self::run_with_cancel).
    pub async fn run<P>(
        &self,
        input: &str,
        session: &mut Session,
        presenter: &P,
    ) -> Result<CompletionOutcome>
    where
        P: Presenter + ?Sized,
    {
        self.run_with_cancel(input, session, presenter, &CancellationToken::new())
            .await
    }

    /// Handle one inbound user message.
    ///
    /// Cancelling `cancel` stops the stream at once, even mid-wait. The
    /// partial answer is flushed, rendered and committed as usual and the
    /// turn ends with [`TurnEnd::Interrupted`].
    ///
    /// Returns an error only when a completion stream could not be opened.
    /// The failure is reported through the presenter first; the session
    /// keeps the user message.
    ///
    /// ```rust,no_run
    /// # use chat_relay::prelude::*;
    /// # use chat_relay::Session;
    /// # use tokio_util::sync::CancellationToken;
    /// # async fn example(
    /// #     orchestrator: &CompletionOrchestrator,
    /// #     session: &mut Session,
    /// #     presenter: &dyn Presenter,
    /// # ) -> Result<()> {
    /// let cancel = CancellationToken::new();
    /// let timer = cancel.clone();
    /// tokio::spawn(async move {
    ///     tokio::time::sleep(std::time::Duration::from_secs(30)).await;
    ///     timer.cancel();
    /// });
    /// let outcome = orchestrator
    ///     .run_with_cancel("hello", session, presenter, &cancel)
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run_with_cancel<P>(
        &self,
        input: &str,
        session: &mut Session,
        presenter: &P,
        cancel: &CancellationToken,
    ) -> Result<CompletionOutcome>
    where
        P: Presenter + ?Sized,
    {
        session.add_history(ChatMessage::user(input));

        let mut functions_called = Vec::new();
        let mut iteration = 0;

        loop {
            let request = self.build_request(session);

            let streamed = match self.stream_once(&request, presenter, cancel).await {
                Ok(streamed) => streamed,
                Err(e) => {
                    log::error!("Failed to open completion stream: {}", e);
                    soft("report_error", presenter.report_error(&e.to_string())).await;
                    return Err(e);
                }
            };

            let StreamResult {
                completion,
                cut_short,
            } = streamed;

            if let Some(reason) = cut_short {
                let text = self.commit(session, presenter, completion.full_message).await;
                return Ok(CompletionOutcome {
                    text,
                    functions_called,
                    end: TurnEnd::Interrupted { reason },
                });
            }

            let Some(call) = completion.function_call else {
                let text = self.commit(session, presenter, completion.full_message).await;
                return Ok(CompletionOutcome {
                    text,
                    functions_called,
                    end: TurnEnd::Completed,
                });
            };

            if iteration >= self.options.max_function_iterations {
                log::warn!(
                    "Function call limit of {} reached, ignoring call to {}",
                    self.options.max_function_iterations,
                    call.name
                );
                let text = self.commit(session, presenter, completion.full_message).await;
                return Ok(CompletionOutcome {
                    text,
                    functions_called,
                    end: TurnEnd::IterationLimit,
                });
            }
            iteration += 1;

            match self.invoke(&call, presenter).await {
                Ok(message) => {
                    session.add_history(message);
                    functions_called.push(call.name);
                }
                Err(e) => {
                    log::warn!("Function {} failed: {}", call.name, e);
                    soft("report_error", presenter.report_error(&e.to_string())).await;
                    soft("add_reaction", presenter.add_reaction(reaction::ERROR)).await;
                    return Ok(CompletionOutcome {
                        text: String::new(),
                        functions_called,
                        end: TurnEnd::FunctionFailed {
                            name: call.name,
                            error: e.to_string(),
                        },
                    });
                }
            }
        }
    }

    /// Request for the session's current context.
    pub fn build_request(&self, session: &Session) -> ChatCompletionRequest {
        let mut request = ChatCompletionRequest::new(
            self.options.model.clone(),
            session.context(&self.options.persona),
        );
        request.max_tokens = Some(self.options.response_budget(session.prompt_tokens()));
        request.temperature = Some(self.options.temperature);
        request.frequency_penalty = Some(self.options.frequency_penalty);
        request.user = Some(session.key().user.clone());

        let functions = session.functions();
        if !functions.is_empty() {
            request.functions = Some(functions.iter().map(|f| f.to_openai_format()).collect());
        }
        request
    }

    async fn stream_once<P>(
        &self,
        request: &ChatCompletionRequest,
        presenter: &P,
        cancel: &CancellationToken,
    ) -> Result<StreamResult>
    where
        P: Presenter + ?Sized,
    {
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::info!("Turn cancelled before the stream opened");
                return Ok(StreamResult {
                    completion: StreamCompletion::default(),
                    cut_short: Some(INTERRUPTED.to_string()),
                });
            }
            opened = self.transport.open_stream(request) => opened?,
        };
        let mut decoder = StreamDecoder::new();
        let mut renderer = IncrementalRenderer::new(presenter);
        let mut completion = None;
        let mut cut_short = None;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::info!("Completion stream interrupted");
                    cut_short = Some(INTERRUPTED.to_string());
                    break;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(bytes)) => {
                    for event in decoder.feed(&bytes) {
                        handle_event(event, &mut renderer, &mut completion).await;
                    }
                    if decoder.is_finished() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    log::warn!("Completion stream ended early: {}", e);
                    cut_short = Some(e.to_string());
                    break;
                }
                None => break,
            }
        }
        drop(stream);

        for event in decoder.finish() {
            handle_event(event, &mut renderer, &mut completion).await;
        }

        Ok(StreamResult {
            completion: completion.unwrap_or_default(),
            cut_short,
        })
    }

    async fn invoke<P>(&self, call: &FunctionCall, presenter: &P) -> Result<ChatMessage>
    where
        P: Presenter + ?Sized,
    {
        log::debug!("Model requested {}({})", call.name, call.arguments_json);
        soft(
            "add_reaction",
            presenter.add_reaction(reaction::FUNCTION_RUNNING),
        )
        .await;

        let result = match call.arguments() {
            Ok(params) => self.registry.invoke(&call.name, params).await,
            Err(e) => Err(e),
        };

        soft(
            "remove_reaction",
            presenter.remove_reaction(reaction::FUNCTION_RUNNING),
        )
        .await;
        result
    }

    // Ends the turn: stores non-empty text and always tells the presenter.
    async fn commit<P>(&self, session: &mut Session, presenter: &P, text: String) -> String
    where
        P: Presenter + ?Sized,
    {
        if !text.is_empty() {
            session.add_history(ChatMessage::assistant(text.clone()));
        }
        soft("complete", presenter.complete(&text)).await;
        text
    }
}

async fn handle_event<P>(
    event: DecoderEvent,
    renderer: &mut IncrementalRenderer<'_, P>,
    completion: &mut Option<StreamCompletion>,
) where
    P: Presenter + ?Sized,
{
    match event {
        DecoderEvent::Line(line) => renderer.push_line(&line).await,
        DecoderEvent::Completed(done) => *completion = Some(done),
    }
}

// Presenter failures never abort a turn.
async fn soft(what: &str, call: impl Future<Output = Result<()>>) {
    if let Err(e) = call.await {
        log::warn!("Presenter {} failed: {}", what, e);
    }
}
