//! Line classification and incremental rendering.
//!
//! [`LineClassifier`] is a pure state machine over completed lines. It has
//! three states, [`RenderMode::Markdown`] (initial), [`RenderMode::CodeBlock`]
//! and [`RenderMode::List`], and turns each line into zero or more
//! [`RenderCommand`]s:
//!
//! - entering a state creates a new block
//! - every further line in the same state amends the last created block with
//!   the accumulated text
//!
//! Rules, checked in order for each line:
//!
//! 1. A fence line (```` ``` ````, optionally followed by a language tag)
//!    toggles between `CodeBlock` and `Markdown`. Entering creates an empty
//!    code block carrying the language; leaving emits nothing and resets the
//!    buffer.
//! 2. Outside a code block, a bullet or ordered-list item enters or stays in `List`.
//! 3. A non-item line after `List` goes back to `Markdown` with a fresh buffer.
//! 4. Otherwise the state is unchanged.
//!
//! In `Markdown`, `# Heading` lines become `*Heading*` and blank lines are
//! suppressed.
//!
//! [`IncrementalRenderer`] drives a [`Presenter`] with those commands and
//! remembers the [`BlockId`] of the last created block so amends find it.

use crate::presenter::{BlockId, Presenter};
use regex::Regex;
use serde_json::{Value, json};
use std::sync::LazyLock;

static LIST_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*]|\d+\.)\s").expect("list item pattern is valid")
});

static HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*#{1,6}\s+(.*?)\s*#*\s*$").expect("heading pattern is valid")
});

const FENCE: &str = "```";

/// Classifier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    #[default]
    Markdown,
    CodeBlock,
    List,
}

/// One addressable unit of output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderBlock {
    pub mode: RenderMode,
    /// Accumulated text of the block so far
    pub text: String,
    /// Language tag of a code block
    pub language: Option<String>,
}

impl RenderBlock {
    pub fn markdown(text: impl Into<String>) -> Self {
        Self {
            mode: RenderMode::Markdown,
            text: text.into(),
            language: None,
        }
    }

    pub fn list(text: impl Into<String>) -> Self {
        Self {
            mode: RenderMode::List,
            text: text.into(),
            language: None,
        }
    }

    pub fn code(text: impl Into<String>, language: Option<String>) -> Self {
        Self {
            mode: RenderMode::CodeBlock,
            text: text.into(),
            language,
        }
    }

    /// Block text in chat-platform markup. Code is wrapped in a fence.
    pub fn to_mrkdwn(&self) -> String {
        match self.mode {
            RenderMode::CodeBlock => format!("{FENCE}\n{}\n{FENCE}", self.text),
            RenderMode::Markdown | RenderMode::List => self.text.clone(),
        }
    }

    /// Section/context block JSON for chat platforms with block layouts.
    ///
    /// A code block with a language gets a context element naming it.
    pub fn to_blocks(&self) -> Vec<Value> {
        let mut blocks = Vec::with_capacity(2);
        if let (RenderMode::CodeBlock, Some(language)) = (self.mode, &self.language) {
            blocks.push(json!({
                "type": "context",
                "elements": [{"type": "mrkdwn", "text": language}],
            }));
        }
        blocks.push(json!({
            "type": "section",
            "text": {"type": "mrkdwn", "text": self.to_mrkdwn()},
        }));
        blocks
    }
}

/// Instruction for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderCommand {
    /// Create a new block
    Create(RenderBlock),
    /// Replace the contents of the last created block
    Amend(RenderBlock),
}

impl RenderCommand {
    pub fn block(&self) -> &RenderBlock {
        match self {
            RenderCommand::Create(block) | RenderCommand::Amend(block) => block,
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(self, RenderCommand::Create(_))
    }
}

/// Pure line → command state machine for one output channel.
#[derive(Debug, Clone, Default)]
pub struct LineClassifier {
    mode: RenderMode,
    buffer: String,
    buffered_lines: usize,
    language: Option<String>,
    // a block exists for the current state
    block_open: bool,
}

impl LineClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    /// Text accumulated for the current block.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Classify one completed line.
    ///
    /// `"\n"` is the decoder's blank line and is treated as empty.
    pub fn push_line(&mut self, line: &str) -> Vec<RenderCommand> {
        let line = if line == "\n" {
            ""
        } else {
            line.trim_end_matches(['\r', '\n'])
        };

        if let Some(tag) = line.trim_start().strip_prefix(FENCE) {
            return self.toggle_fence(tag);
        }

        if self.mode == RenderMode::CodeBlock {
            self.append(line);
            return vec![RenderCommand::Amend(self.current_block())];
        }

        if is_list_item(line) {
            if self.mode == RenderMode::List {
                self.append(line);
                return vec![RenderCommand::Amend(self.current_block())];
            }
            self.enter(RenderMode::List);
            self.append(line);
            self.block_open = true;
            return vec![RenderCommand::Create(self.current_block())];
        }

        if self.mode == RenderMode::List {
            self.enter(RenderMode::Markdown);
        }

        if line.trim().is_empty() {
            return Vec::new();
        }

        self.append(&rewrite_heading(line));
        if self.block_open {
            vec![RenderCommand::Amend(self.current_block())]
        } else {
            self.block_open = true;
            vec![RenderCommand::Create(self.current_block())]
        }
    }

    fn toggle_fence(&mut self, tag: &str) -> Vec<RenderCommand> {
        if self.mode == RenderMode::CodeBlock {
            self.enter(RenderMode::Markdown);
            return Vec::new();
        }

        self.enter(RenderMode::CodeBlock);
        let tag = tag.trim();
        self.language = (!tag.is_empty()).then(|| tag.to_string());
        self.block_open = true;
        vec![RenderCommand::Create(self.current_block())]
    }

    fn enter(&mut self, mode: RenderMode) {
        self.mode = mode;
        self.buffer.clear();
        self.buffered_lines = 0;
        self.language = None;
        self.block_open = false;
    }

    fn append(&mut self, line: &str) {
        if self.buffered_lines > 0 {
            self.buffer.push('\n');
        }
        self.buffer.push_str(line);
        self.buffered_lines += 1;
    }

    fn current_block(&self) -> RenderBlock {
        RenderBlock {
            mode: self.mode,
            text: self.buffer.clone(),
            language: self.language.clone(),
        }
    }
}

/// True for `- item`, `* item` and `1. item` lines.
pub fn is_list_item(line: &str) -> bool {
    LIST_ITEM.is_match(line)
}

fn rewrite_heading(line: &str) -> String {
    match HEADING.captures(line) {
        Some(caps) => {
            let title = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            if title.is_empty() {
                line.to_string()
            } else {
                format!("*{title}*")
            }
        }
        None => line.to_string(),
    }
}

/// Feeds classified lines to a [`Presenter`], in order.
///
/// Presenter failures are logged and do not stop rendering. An amend with no
/// known block to target is sent as a create instead.
pub struct IncrementalRenderer<'a, P: Presenter + ?Sized> {
    presenter: &'a P,
    classifier: LineClassifier,
    last_block: Option<BlockId>,
    last_text: String,
    blocks_created: usize,
}

impl<'a, P: Presenter + ?Sized> IncrementalRenderer<'a, P> {
    pub fn new(presenter: &'a P) -> Self {
        Self {
            presenter,
            classifier: LineClassifier::new(),
            last_block: None,
            last_text: String::new(),
            blocks_created: 0,
        }
    }

    /// Classify `line` and apply the resulting commands.
    pub async fn push_line(&mut self, line: &str) {
        for command in self.classifier.push_line(line) {
            self.apply(command).await;
        }
    }

    pub fn mode(&self) -> RenderMode {
        self.classifier.mode()
    }

    /// Handle of the most recently created block.
    pub fn last_block(&self) -> Option<&BlockId> {
        self.last_block.as_ref()
    }

    /// Text last sent to the presenter.
    pub fn last_text(&self) -> &str {
        &self.last_text
    }

    pub fn blocks_created(&self) -> usize {
        self.blocks_created
    }

    async fn apply(&mut self, command: RenderCommand) {
        let target = match (&command, &self.last_block) {
            (RenderCommand::Amend(_), Some(id)) => Some(id.clone()),
            _ => None,
        };

        let block = command.block();
        match target {
            Some(id) => {
                if let Err(e) = self.presenter.amend_block(&id, block).await {
                    log::warn!("Failed to amend block {}: {}", id, e);
                }
            }
            None => match self.presenter.create_block(block).await {
                Ok(id) => {
                    self.last_block = Some(id);
                    self.blocks_created += 1;
                }
                Err(e) => {
                    log::warn!("Failed to create block: {}", e);
                    self.last_block = None;
                }
            },
        }
        self.last_text = block.text.clone();
    }
}
