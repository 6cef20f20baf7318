//! Decoding of streamed (server-sent event) chat completions.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::Error;
use crate::Result;

use super::super::message::ToolCallRequest;
use super::openai::parse_arguments;
use super::{ChatCompletionChunk, LlmResponse, Turn, Usage};

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Folds the `data:` lines of a streamed completion into one [`LlmResponse`].
///
/// Bytes may be split anywhere; only complete lines are decoded.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    pending: Vec<u8>,
    text: String,
    calls: BTreeMap<usize, PartialCall>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
    done: bool,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw body bytes. Returns the text deltas of every line completed.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<String>> {
        self.pending.extend_from_slice(bytes);

        let mut deltas = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(text) = self.push_line(&String::from_utf8_lossy(&line))? {
                deltas.push(text);
            }
        }
        Ok(deltas)
    }

    /// Decode whatever is left after the body ended without a newline.
    pub fn flush(&mut self) -> Result<Vec<String>> {
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }
        self.feed(b"\n")
    }

    /// `[DONE]` has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Decode one line. Returns the assistant text it carried, if any.
    ///
    /// Blank lines, comments and non-`data` fields are ignored, as is
    /// everything after `[DONE]`.
    pub fn push_line(&mut self, line: &str) -> Result<Option<String>> {
        let line = line.trim_end_matches(['\r', '\n']);
        if self.done {
            return Ok(None);
        }
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(None);
        };
        let data = data.trim_start();
        if data.is_empty() {
            return Ok(None);
        }
        if data == "[DONE]" {
            self.done = true;
            return Ok(None);
        }

        let chunk: ChatCompletionChunk = serde_json::from_str(data)
            .map_err(|e| Error::Provider(format!("Malformed stream chunk: {}", e)))?;

        if let Some(usage) = &chunk.usage {
            self.usage = Some(Usage::from(usage));
        }

        let mut text = String::new();
        for choice in chunk.choices {
            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(reason);
            }
            if let Some(content) = choice.delta.content {
                text.push_str(&content);
            }
            for delta in choice.delta.tool_calls.unwrap_or_default() {
                let call = self.calls.entry(delta.index).or_default();
                if let Some(id) = delta.id.filter(|id| !id.is_empty()) {
                    call.id = Some(id);
                }
                if let Some(function) = delta.function {
                    if let Some(name) = function.name {
                        call.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        call.arguments.push_str(&arguments);
                    }
                }
            }
        }

        if text.is_empty() {
            return Ok(None);
        }
        self.text.push_str(&text);
        Ok(Some(text))
    }

    /// Assemble the response. Tool calls come out in index order.
    pub fn finish(self) -> Result<LlmResponse> {
        let calls = self
            .calls
            .into_iter()
            .map(|(index, call)| ToolCallRequest {
                id: call.id.unwrap_or_else(|| format!("call_{}", index)),
                arguments: parse_arguments(&call.name, Value::String(call.arguments)),
                name: call.name,
            })
            .collect();

        let turn = Turn::from_parts(Some(self.text), calls)?;
        let finish_reason = self.finish_reason.unwrap_or_else(|| match &turn {
            Turn::Text(_) => "stop".to_string(),
            Turn::ToolCalls { .. } => "tool_calls".to_string(),
        });

        Ok(LlmResponse {
            turn,
            finish_reason,
            usage: self.usage.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> String {
        format!("data: {}\n\n", value)
    }

    #[test]
    fn test_text_deltas_across_split_bytes() {
        let body = [
            ": keep-alive\n".to_string(),
            data(json!({"choices": [{"delta": {"role": "assistant", "content": "Hel"}}]})),
            data(json!({"choices": [{"delta": {"content": "lo"}, "finish_reason": "stop"}]})),
            data(json!({"choices": [], "usage": {"prompt_tokens": 4, "completion_tokens": 2, "total_tokens": 6}})),
            "data: [DONE]\n\n".to_string(),
        ]
        .concat();

        let mut stream = StreamAccumulator::new();
        let mut deltas = Vec::new();
        // Chunk boundaries fall mid-line
        for piece in body.as_bytes().chunks(7) {
            deltas.extend(stream.feed(piece).unwrap());
        }

        assert_eq!(deltas.concat(), "Hello");
        assert!(stream.is_done());

        let response = stream.finish().unwrap();
        assert_eq!(response.turn, Turn::Text("Hello".to_string()));
        assert_eq!(response.finish_reason, "stop");
        assert_eq!(response.usage.total_tokens, 6);
    }

    #[test]
    fn test_tool_call_fragments_merge_by_index() {
        let mut stream = StreamAccumulator::new();
        let lines = [
            json!({"choices": [{"delta": {"content": "Looking."}}]}),
            json!({"choices": [{"delta": {"tool_calls": [
                {"index": 1, "id": "call_b", "function": {"name": "list_directory", "arguments": ""}}
            ]}}]}),
            json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_a", "function": {"name": "read_file", "arguments": "{\"file_"}}
            ]}}]}),
            json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "path\": \"a.txt\"}"}}
            ]}}]}),
            json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]}),
        ];
        for line in lines {
            stream.push_line(&format!("data: {}", line)).unwrap();
        }

        let response = stream.finish().unwrap();
        match &response.turn {
            Turn::ToolCalls { text, calls } => {
                assert_eq!(text.as_deref(), Some("Looking."));
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[0].id, "call_a");
                assert_eq!(calls[0].arguments, json!({"file_path": "a.txt"}));
                assert_eq!(calls[1].name, "list_directory");
                assert_eq!(calls[1].arguments, json!({}));
            }
            other => panic!("expected tool calls, got {:?}", other),
        }
        assert_eq!(response.finish_reason, "tool_calls");
    }

    #[test]
    fn test_missing_ids_and_trailing_line() {
        let mut stream = StreamAccumulator::new();
        let last = format!(
            "data: {}",
            json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "function": {"name": "search_files", "arguments": "{}"}}]}}]})
        );
        assert!(stream.feed(last.as_bytes()).unwrap().is_empty());
        stream.flush().unwrap();

        let response = stream.finish().unwrap();
        assert_eq!(response.turn.tool_calls()[0].id, "call_0");
    }

    #[test]
    fn test_lines_after_done_are_ignored() {
        let mut stream = StreamAccumulator::new();
        stream.push_line("data: [DONE]").unwrap();
        assert_eq!(stream.push_line("data: not json").unwrap(), None);
        assert!(stream.finish().is_err());
    }

    #[test]
    fn test_malformed_chunk_is_provider_error() {
        let mut stream = StreamAccumulator::new();
        let err = stream.push_line("data: {oops").unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
    }
}
