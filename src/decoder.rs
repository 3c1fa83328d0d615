//! Incremental decoder for streamed chat completions.
//!
//! The model server answers with Server-Sent Events:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Hel"}}]}
//!
//! data: {"choices":[{"delta":{"content":"lo\nWor"}}]}
//!
//! data: [DONE]
//! ```
//!
//! Reads from the transport do not line up with events, so [`StreamDecoder`]
//! keeps the bytes after the last newline until the rest of the frame arrives.
//! Each decoded delta is folded into three accumulators:
//!
//! - `full_message`: every content fragment, in order
//! - `pending_line`: content after the last newline, not yet handed out
//! - the function call: name and argument fragments, concatenated as received
//!
//! Completed lines come out as [`DecoderEvent::Line`] as soon as their newline
//! arrives. The end of the stream (the `[DONE]` sentinel, or [`StreamDecoder::finish`]
//! when the connection ends without one) flushes the pending line and yields a
//! single [`DecoderEvent::Completed`].
//!
//! ```text
//! raw bytes ──feed()──▶ frame lines ──serde──▶ ChatChunk ──▶ Line* ... Completed
//! ```
//!
//! A frame whose JSON does not parse is logged and skipped; the stream goes on.

use crate::types::{ChatChunk, FunctionCallDelta};
use crate::{Error, Result};
use serde_json::Value;

/// Output of the decoder.
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderEvent {
    /// One completed line of assistant text. Blank lines arrive as `"\n"`.
    Line(String),
    /// The stream ended.
    Completed(StreamCompletion),
}

/// Final state of a decoded stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamCompletion {
    pub full_message: String,
    /// Present when the model asked for a function call
    pub function_call: Option<FunctionCall>,
}

/// A function call requested by the model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionCall {
    pub name: String,
    /// Raw argument JSON exactly as streamed
    pub arguments_json: String,
}

impl FunctionCall {
    /// Parse the accumulated arguments. An empty argument string is `{}`.
    pub fn arguments(&self) -> Result<Value> {
        if self.arguments_json.trim().is_empty() {
            return Ok(serde_json::json!({}));
        }
        serde_json::from_str(&self.arguments_json).map_err(|e| {
            Error::function(format!(
                "could not parse arguments for {}: {}",
                self.name, e
            ))
        })
    }
}

/// Stateful SSE → line decoder for one completion stream.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    // bytes after the last frame newline
    frame_buffer: Vec<u8>,
    full_message: String,
    pending_line: String,
    function_call: FunctionCall,
    finished: bool,
    malformed_frames: usize,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes from the transport. Returns the events completed by them.
    ///
    /// Bytes fed after the end of the stream are ignored.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<DecoderEvent> {
        let mut events = Vec::new();
        if self.finished {
            if !bytes.is_empty() {
                log::debug!("ignoring {} bytes after end of stream", bytes.len());
            }
            return events;
        }

        self.frame_buffer.extend_from_slice(bytes);

        while let Some(pos) = self.frame_buffer.iter().position(|b| *b == b'\n') {
            let frame: Vec<u8> = self.frame_buffer.drain(..=pos).collect();
            self.process_frame(&frame, &mut events);
            if self.finished {
                self.frame_buffer.clear();
                break;
            }
        }

        events
    }

    /// End the stream: decode any unterminated final frame, flush the pending
    /// line and emit [`DecoderEvent::Completed`]. Calling it again returns
    /// nothing.
    pub fn finish(&mut self) -> Vec<DecoderEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        let rest = std::mem::take(&mut self.frame_buffer);
        if !rest.is_empty() {
            self.process_frame(&rest, &mut events);
        }
        self.finalize(&mut events);
        events
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Text received so far.
    pub fn full_message(&self) -> &str {
        &self.full_message
    }

    /// Content after the last newline.
    pub fn pending_line(&self) -> &str {
        &self.pending_line
    }

    /// Frames skipped because their payload did not parse.
    pub fn malformed_frames(&self) -> usize {
        self.malformed_frames
    }

    fn process_frame(&mut self, frame: &[u8], events: &mut Vec<DecoderEvent>) {
        let text = String::from_utf8_lossy(frame);
        let line = text.trim_end_matches(['\n', '\r']);

        // comments, event/id fields and event separators carry no delta
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim();
        if data.is_empty() {
            return;
        }

        if data == "[DONE]" {
            self.finalize(events);
            return;
        }

        match serde_json::from_str::<ChatChunk>(data) {
            Ok(chunk) => self.apply_chunk(chunk, events),
            Err(e) => {
                self.malformed_frames += 1;
                log::warn!("Could not JSON parse stream message {:?}: {}", data, e);
            }
        }
    }

    fn apply_chunk(&mut self, chunk: ChatChunk, events: &mut Vec<DecoderEvent>) {
        for choice in chunk.choices {
            let delta = choice.delta;

            if let Some(content) = delta.content {
                self.push_content(&content, events);
            }

            if let Some(call) = delta.function_call {
                self.push_function_delta(call);
            }

            if let Some(tool_calls) = delta.tool_calls {
                for tool_call in tool_calls {
                    if tool_call.index != 0 {
                        log::warn!(
                            "ignoring parallel tool call at index {}",
                            tool_call.index
                        );
                        continue;
                    }
                    if let Some(function) = tool_call.function {
                        self.push_function_delta(function);
                    }
                }
            }
        }
    }

    fn push_content(&mut self, content: &str, events: &mut Vec<DecoderEvent>) {
        if content.is_empty() {
            return;
        }
        self.full_message.push_str(content);
        self.pending_line.push_str(content);

        if let Some(last_newline) = self.pending_line.rfind('\n') {
            let remainder = self.pending_line.split_off(last_newline + 1);
            let completed = std::mem::replace(&mut self.pending_line, remainder);
            // drop the final newline; every piece before it is a completed line
            let completed = &completed[..completed.len() - 1];
            for line in completed.split('\n') {
                events.push(DecoderEvent::Line(normalize_line(line)));
            }
        }
    }

    fn push_function_delta(&mut self, delta: FunctionCallDelta) {
        if let Some(name) = delta.name {
            self.function_call.name.push_str(&name);
        }
        if let Some(arguments) = delta.arguments {
            self.function_call.arguments_json.push_str(&arguments);
        }
    }

    fn finalize(&mut self, events: &mut Vec<DecoderEvent>) {
        if self.finished {
            return;
        }
        self.finished = true;

        if !self.pending_line.is_empty() {
            let line = std::mem::take(&mut self.pending_line);
            events.push(DecoderEvent::Line(normalize_line(&line)));
        }

        let function_call = if self.function_call.name.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.function_call))
        };

        events.push(DecoderEvent::Completed(StreamCompletion {
            full_message: self.full_message.clone(),
            function_call,
        }));
    }
}

fn normalize_line(line: &str) -> String {
    if line.trim().is_empty() {
        "\n".to_string()
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content_frame(text: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"index": 0, "delta": {"content": text}}]})
        )
    }

    fn function_frame(name: Option<&str>, arguments: Option<&str>) -> String {
        let mut call = serde_json::Map::new();
        if let Some(name) = name {
            call.insert("name".into(), name.into());
        }
        if let Some(arguments) = arguments {
            call.insert("arguments".into(), arguments.into());
        }
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"index": 0, "delta": {"function_call": call}}]})
        )
    }

    fn lines(events: &[DecoderEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                DecoderEvent::Line(l) => Some(l.clone()),
                _ => None,
            })
            .collect()
    }

    fn completion(events: &[DecoderEvent]) -> Option<StreamCompletion> {
        events.iter().find_map(|e| match e {
            DecoderEvent::Completed(c) => Some(c.clone()),
            _ => None,
        })
    }

    #[test]
    fn test_lines_emitted_on_newline() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.feed(content_frame("Hel").as_bytes());
        assert!(events.is_empty());

        let events = decoder.feed(content_frame("lo\nWor").as_bytes());
        assert_eq!(lines(&events), vec!["Hello"]);
        assert_eq!(decoder.pending_line(), "Wor");

        let events = decoder.feed(b"data: [DONE]\n\n");
        assert_eq!(lines(&events), vec!["Wor"]);
        let done = completion(&events).unwrap();
        assert_eq!(done.full_message, "Hello\nWor");
        assert!(done.function_call.is_none());
    }

    #[test]
    fn test_blank_lines_are_normalized_not_dropped() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.feed(content_frame("one\n\n  \ntwo\n").as_bytes());
        assert_eq!(lines(&events), vec!["one", "\n", "\n", "two"]);
    }

    #[test]
    fn test_frame_split_across_reads() {
        let raw = format!("{}{}data: [DONE]\n\n", content_frame("ab\n"), content_frame("cd"));
        let bytes = raw.as_bytes();

        let mut decoder = StreamDecoder::new();
        let mut events = Vec::new();
        for chunk in bytes.chunks(3) {
            events.extend(decoder.feed(chunk));
        }

        assert_eq!(lines(&events), vec!["ab", "cd"]);
        assert_eq!(completion(&events).unwrap().full_message, "ab\ncd");
    }

    #[test]
    fn test_multibyte_text_split_mid_character() {
        let raw = format!("{}data: [DONE]\n", content_frame("안녕하세요\n"));
        let bytes = raw.as_bytes();
        let mut decoder = StreamDecoder::new();
        let mut events = Vec::new();
        for chunk in bytes.chunks(1) {
            events.extend(decoder.feed(chunk));
        }
        assert_eq!(lines(&events), vec!["안녕하세요"]);
    }

    #[test]
    fn test_malformed_frame_is_skipped() {
        let mut decoder = StreamDecoder::new();
        let mut events = decoder.feed(b"data: {not json\n\n");
        events.extend(decoder.feed(content_frame("still here").as_bytes()));
        events.extend(decoder.feed(b"data: [DONE]\n\n"));

        assert_eq!(decoder.malformed_frames(), 1);
        assert_eq!(completion(&events).unwrap().full_message, "still here");
    }

    #[test]
    fn test_function_call_accumulates() {
        let mut decoder = StreamDecoder::new();
        let mut events = decoder.feed(function_frame(Some("ec"), Some("")).as_bytes());
        events.extend(decoder.feed(function_frame(Some("ho"), None).as_bytes()));
        events.extend(decoder.feed(function_frame(None, Some("{\"mess")).as_bytes()));
        events.extend(decoder.feed(function_frame(None, Some("age\":\"hi\"}")).as_bytes()));
        events.extend(decoder.feed(b"data: [DONE]\n\n"));

        let call = completion(&events).unwrap().function_call.unwrap();
        assert_eq!(call.name, "echo");
        assert_eq!(call.arguments_json, r#"{"message":"hi"}"#);
        assert_eq!(call.arguments().unwrap()["message"], "hi");
    }

    #[test]
    fn test_tool_calls_shape_feeds_same_accumulator() {
        let frame = format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_1", "type": "function",
                 "function": {"name": "dice", "arguments": "{\"sides\":20}"}}
            ]}}]})
        );
        let mut decoder = StreamDecoder::new();
        let mut events = decoder.feed(frame.as_bytes());
        events.extend(decoder.finish());

        let call = completion(&events).unwrap().function_call.unwrap();
        assert_eq!(call.name, "dice");
        assert_eq!(call.arguments().unwrap()["sides"], 20);
    }

    #[test]
    fn test_finish_without_done_flushes_partial_line() {
        let mut decoder = StreamDecoder::new();
        decoder.feed(content_frame("partial").as_bytes());
        let events = decoder.finish();
        assert_eq!(lines(&events), vec!["partial"]);
        assert_eq!(completion(&events).unwrap().full_message, "partial");
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_unterminated_final_frame_is_decoded() {
        let mut decoder = StreamDecoder::new();
        let frame = content_frame("tail");
        let events = decoder.feed(frame.trim_end().as_bytes());
        assert!(events.is_empty());
        let events = decoder.finish();
        assert_eq!(lines(&events), vec!["tail"]);
    }

    #[test]
    fn test_bytes_after_done_are_ignored() {
        let raw = format!("data: [DONE]\n\n{}", content_frame("late"));
        let mut decoder = StreamDecoder::new();
        let events = decoder.feed(raw.as_bytes());
        assert_eq!(completion(&events).unwrap().full_message, "");
        assert!(decoder.feed(content_frame("later").as_bytes()).is_empty());
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_non_data_fields_are_ignored() {
        let raw = format!(": keep-alive\nevent: message\nid: 7\n{}", content_frame("x\n"));
        let mut decoder = StreamDecoder::new();
        let events = decoder.feed(raw.as_bytes());
        assert_eq!(lines(&events), vec!["x"]);
        assert_eq!(decoder.malformed_frames(), 0);
    }

    #[test]
    fn test_crlf_frames() {
        let raw = content_frame("a\n").replace('\n', "\r\n");
        // the JSON escape keeps the content newline intact
        let mut decoder = StreamDecoder::new();
        let events = decoder.feed(raw.as_bytes());
        assert_eq!(lines(&events), vec!["a"]);
    }

    #[test]
    fn test_empty_arguments_parse_as_empty_object() {
        let call = FunctionCall {
            name: "dice".into(),
            arguments_json: String::new(),
        };
        assert_eq!(call.arguments().unwrap(), serde_json::json!({}));

        let bad = FunctionCall {
            name: "dice".into(),
            arguments_json: "{\"sides\":".into(),
        };
        assert!(matches!(bad.arguments(), Err(Error::Function(_))));
    }
}
