//! Shared test doubles: a transport that replays scripted SSE bytes and a
//! presenter that records every call.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use chat_relay::{
    BlockId, ByteStream, ChatCompletionRequest, CompletionTransport, Error, Presenter,
    RenderBlock, Result,
};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// One step of a scripted response body.
#[derive(Clone)]
pub enum Step {
    Bytes(Vec<u8>),
    /// Body read failure
    Fail(String),
    /// Cancel a turn, then yield an empty chunk
    Cancel(CancellationToken),
    /// Never yield again; everything after it is ignored
    Stall,
}

/// Replays one script per `open_stream` call and records every request.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    requests: Mutex<Vec<ChatCompletionRequest>>,
}

impl ScriptedTransport {
    pub fn new(scripts: Vec<Vec<Step>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, script: Vec<Step>) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn requests(&self) -> Vec<ChatCompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionTransport for ScriptedTransport {
    async fn open_stream(&self, request: &ChatCompletionRequest) -> Result<ByteStream> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::api("API error 500: no scripted response left"))?;

        let stalls = script.iter().any(|step| matches!(step, Step::Stall));
        let steps: Vec<Step> = script
            .into_iter()
            .take_while(|step| !matches!(step, Step::Stall))
            .collect();

        // Cancel fires when the stream reaches it, not when it is opened
        let body = futures::stream::iter(steps).map(|step| match step {
            Step::Bytes(bytes) => Ok(bytes),
            Step::Fail(msg) => Err(Error::stream(msg)),
            Step::Cancel(token) => {
                token.cancel();
                Ok(Vec::new())
            }
            Step::Stall => Ok(Vec::new()),
        });
        if stalls {
            Ok(Box::pin(body.chain(futures::stream::pending())))
        } else {
            Ok(Box::pin(body))
        }
    }
}

/// Everything a presenter was asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create(BlockId, RenderBlock),
    Amend(BlockId, RenderBlock),
    AddReaction(String),
    RemoveReaction(String),
    ReportError(String),
    Complete(String),
}

#[derive(Default)]
pub struct RecordingPresenter {
    calls: Mutex<Vec<Call>>,
    next_id: Mutex<u32>,
    failing_creates: Mutex<u32>,
}

impl RecordingPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` creates fail.
    pub fn fail_next_creates(&self, n: u32) {
        *self.failing_creates.lock().unwrap() = n;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Create/amend calls only, as `(is_create, block)`.
    pub fn render_ops(&self) -> Vec<(bool, RenderBlock)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Create(_, block) => Some((true, block)),
                Call::Amend(_, block) => Some((false, block)),
                _ => None,
            })
            .collect()
    }

    pub fn reactions(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::AddReaction(_) | Call::RemoveReaction(_)))
            .collect()
    }
}

#[async_trait]
impl Presenter for RecordingPresenter {
    async fn create_block(&self, block: &RenderBlock) -> Result<BlockId> {
        {
            let mut failing = self.failing_creates.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(Error::other("channel_not_found"));
            }
        }
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            BlockId::new(format!("ts-{}", next))
        };
        self.calls
            .lock()
            .unwrap()
            .push(Call::Create(id.clone(), block.clone()));
        Ok(id)
    }

    async fn amend_block(&self, id: &BlockId, block: &RenderBlock) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Amend(id.clone(), block.clone()));
        Ok(())
    }

    async fn add_reaction(&self, name: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::AddReaction(name.to_string()));
        Ok(())
    }

    async fn remove_reaction(&self, name: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::RemoveReaction(name.to_string()));
        Ok(())
    }

    async fn report_error(&self, message: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::ReportError(message.to_string()));
        Ok(())
    }

    async fn complete(&self, full_text: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Complete(full_text.to_string()));
        Ok(())
    }
}

pub fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}

/// SSE frame carrying a content delta.
pub fn content_frame(text: &str) -> String {
    format!(
        "data: {}\n\n",
        json!({"id": "chatcmpl-1", "object": "chat.completion.chunk",
               "choices": [{"index": 0, "delta": {"content": text}, "finish_reason": null}]})
    )
}

/// SSE frames streaming a legacy function call in small pieces.
pub fn function_frames(name: &str, arguments: &str) -> Vec<String> {
    let mut frames = vec![format!(
        "data: {}\n\n",
        json!({"choices": [{"index": 0, "delta": {"role": "assistant", "content": null,
               "function_call": {"name": name, "arguments": ""}}}]})
    )];
    let chars: Vec<char> = arguments.chars().collect();
    for piece in chars.chunks(4) {
        let piece: String = piece.iter().collect();
        frames.push(format!(
            "data: {}\n\n",
            json!({"choices": [{"index": 0, "delta": {"function_call": {"arguments": piece}}}]})
        ));
    }
    frames.push(format!(
        "data: {}\n\n",
        json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "function_call"}]})
    ));
    frames
}

pub const DONE: &str = "data: [DONE]\n\n";

/// Full SSE body for a plain text answer, one frame per piece.
pub fn text_body(pieces: &[&str]) -> String {
    let mut body: String = pieces.iter().map(|p| content_frame(p)).collect();
    body.push_str(DONE);
    body
}

/// Full SSE body for a function call.
pub fn function_body(name: &str, arguments: &str) -> String {
    let mut body: String = function_frames(name, arguments).concat();
    body.push_str(DONE);
    body
}

/// Script that delivers `body` in reads of `size` bytes.
pub fn chunked(body: &str, size: usize) -> Vec<Step> {
    body.as_bytes()
        .chunks(size.max(1))
        .map(|c| Step::Bytes(c.to_vec()))
        .collect()
}

/// Script that delivers `body` in one read.
pub fn whole(body: &str) -> Vec<Step> {
    vec![Step::Bytes(body.as_bytes().to_vec())]
}

pub fn transport(scripts: Vec<Vec<Step>>) -> Arc<ScriptedTransport> {
    Arc::new(ScriptedTransport::new(scripts))
}
