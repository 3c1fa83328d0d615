//! Streaming pipeline tests
//!
//! The decoder and classifier must produce the same result no matter how the
//! response body is split into reads.

mod common;

use chat_relay::{
    CompletionOptions, CompletionOrchestrator, DecoderEvent, FunctionRegistry, LineClassifier,
    RenderCommand, RenderMode, Session, SessionConfig, SessionKey, SessionKind, StreamDecoder,
};
use common::*;
use std::sync::Arc;

const ANSWER: [&str; 9] = [
    "# Plan\nFirst",
    " some context.\n\n- step one\n- st",
    "ep two\n1. numbered\nBack to text\n",
    "```python\nfor i in range(3):\n",
    "    print(i)\n\n",
    "```\n",
    "안녕하세요, ",
    "세계!\n",
    "The end",
];

fn decode(body: &[u8], read_size: usize) -> (Vec<String>, String) {
    let mut decoder = StreamDecoder::new();
    let mut events = Vec::new();
    for read in body.chunks(read_size) {
        events.extend(decoder.feed(read));
    }
    events.extend(decoder.finish());

    let mut lines = Vec::new();
    let mut full = None;
    for event in events {
        match event {
            DecoderEvent::Line(line) => lines.push(line),
            DecoderEvent::Completed(done) => full = Some(done.full_message),
        }
    }
    (lines, full.expect("stream completed"))
}

fn classify(lines: &[String]) -> Vec<RenderCommand> {
    let mut classifier = LineClassifier::new();
    lines.iter().flat_map(|l| classifier.push_line(l)).collect()
}

/// Test: any read size gives the same lines, message and commands
#[test]
fn test_chunk_boundary_independence() {
    let body = text_body(&ANSWER);
    let (reference_lines, reference_full) = decode(body.as_bytes(), body.len());
    let reference_commands = classify(&reference_lines);

    assert_eq!(reference_full, ANSWER.concat());

    for read_size in [1, 2, 3, 5, 7, 13, 64, 257] {
        let (lines, full) = decode(body.as_bytes(), read_size);
        assert_eq!(lines, reference_lines, "read size {}", read_size);
        assert_eq!(full, reference_full, "read size {}", read_size);
        assert_eq!(classify(&lines), reference_commands, "read size {}", read_size);
    }
}

/// Test: the line sequence for the mixed answer
#[test]
fn test_mixed_answer_lines_and_modes() {
    let body = text_body(&ANSWER);
    let (lines, _) = decode(body.as_bytes(), 11);
    assert_eq!(
        lines,
        vec![
            "# Plan",
            "First some context.",
            "\n",
            "- step one",
            "- step two",
            "1. numbered",
            "Back to text",
            "```python",
            "for i in range(3):",
            "    print(i)",
            "\n",
            "```",
            "안녕하세요, 세계!",
            "The end",
        ]
    );

    let commands = classify(&lines);
    let creates: Vec<RenderMode> = commands
        .iter()
        .filter(|c| c.is_create())
        .map(|c| c.block().mode)
        .collect();
    assert_eq!(
        creates,
        vec![
            RenderMode::Markdown,
            RenderMode::List,
            RenderMode::Markdown,
            RenderMode::CodeBlock,
            RenderMode::Markdown,
        ]
    );

    let code = commands
        .iter()
        .rev()
        .find(|c| c.block().mode == RenderMode::CodeBlock)
        .unwrap();
    assert_eq!(code.block().text, "for i in range(3):\n    print(i)\n");
    assert_eq!(code.block().language.as_deref(), Some("python"));

    assert_eq!(commands[0].block().text, "*Plan*");
    assert_eq!(
        commands.last().unwrap().block().text,
        "안녕하세요, 세계!\nThe end"
    );
}

/// Test: fresh classifiers given the same lines agree exactly
#[test]
fn test_classifier_determinism() {
    let body = text_body(&ANSWER);
    let (lines, _) = decode(body.as_bytes(), 9);
    assert_eq!(classify(&lines), classify(&lines));
}

/// Test: tool_calls deltas drive the same function call path
#[test]
fn test_tool_call_deltas() {
    let frames = [
        r#"{"choices":[{"index":0,"delta":{"role":"assistant","tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"echo","arguments":""}}]}}]}"#,
        r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"message\""}}]}}]}"#,
        r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":":\"hi\"}"}}]}}]}"#,
        r#"{"choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#,
    ];
    let mut body: String = frames.iter().map(|f| format!("data: {}\n\n", f)).collect();
    body.push_str(DONE);

    let mut decoder = StreamDecoder::new();
    let events = decoder.feed(body.as_bytes());
    let call = events
        .into_iter()
        .find_map(|e| match e {
            DecoderEvent::Completed(done) => done.function_call,
            _ => None,
        })
        .unwrap();
    assert_eq!(call.name, "echo");
    assert_eq!(call.arguments().unwrap()["message"], "hi");
}

/// Test: the presenter sees the same blocks for every read size
#[tokio::test]
async fn test_rendered_blocks_independent_of_reads() {
    let body = text_body(&ANSWER);
    let options = CompletionOptions::builder()
        .model("gpt-3.5-turbo")
        .base_url("http://localhost:1234/v1")
        .build()
        .unwrap();

    let mut rendered = Vec::new();
    for read_size in [body.len(), 1, 6, 31] {
        let transport = transport(vec![chunked(&body, read_size)]);
        let orchestrator = CompletionOrchestrator::new(
            transport.clone(),
            Arc::new(FunctionRegistry::new()),
            options.clone(),
        );
        let presenter = RecordingPresenter::new();
        let mut session = Session::new(
            SessionKind::Channel,
            SessionKey::new("U1", "C1"),
            SessionConfig::default(),
        );

        let outcome = orchestrator
            .run("plan it", &mut session, &presenter)
            .await
            .unwrap();
        assert_eq!(outcome.text, ANSWER.concat());
        rendered.push(presenter.calls());
    }

    for calls in &rendered[1..] {
        assert_eq!(calls, &rendered[0]);
    }
}
