use std::collections::BTreeMap;

use serde_json::Value;

use crate::result::ModelUsage;

/// One decoded record from the child's stream-json output.
///
/// Parsing is intentionally best-effort: lines that are not JSON objects, or
/// JSON objects with an unrecognized `type` discriminant, yield `None` and
/// are skipped by the caller. The protocol is forward-compatible by
/// construction.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamRecord {
    Assistant(Vec<ContentBlock>),
    Result(ResultRecord),
}

/// A content block inside an `assistant` record.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
    },
}

/// The terminal `result` record for an iteration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultRecord {
    /// Final text, used only when no text blocks were streamed.
    pub result: String,
    pub total_cost_usd: f64,
    pub num_turns: u64,
    pub model_usage: BTreeMap<String, ModelUsage>,
}

/// Parse a single protocol line.
///
/// Shape examples (simplified):
/// - `{"type":"assistant","message":{"content":[{"type":"text","text":"..."}]}}`
/// - `{"type":"assistant","message":{"content":[{"type":"tool_use","id":"...","name":"Bash","input":{...}}]}}`
/// - `{"type":"result","result":"...","total_cost_usd":0.12,"num_turns":4,"modelUsage":{...}}`
pub fn parse_record(line: &str) -> Option<StreamRecord> {
    let s = line.trim();
    if !(s.starts_with('{') && s.ends_with('}')) {
        return None;
    }

    let v: Value = serde_json::from_str(s).ok()?;

    match v.get("type").and_then(|x| x.as_str()) {
        Some("assistant") => Some(StreamRecord::Assistant(parse_content_blocks(&v))),
        Some("result") => Some(StreamRecord::Result(parse_result(&v))),
        _ => None,
    }
}

fn parse_content_blocks(v: &Value) -> Vec<ContentBlock> {
    let Some(items) = v
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_array())
    else {
        return Vec::new();
    };

    let mut blocks = Vec::with_capacity(items.len());
    for item in items {
        match item.get("type").and_then(|x| x.as_str()) {
            Some("text") => {
                if let Some(text) = item.get("text").and_then(|x| x.as_str()) {
                    if !text.is_empty() {
                        blocks.push(ContentBlock::Text(text.to_string()));
                    }
                }
            }
            Some("tool_use") => {
                let id = item
                    .get("id")
                    .and_then(|x| x.as_str())
                    .unwrap_or_default()
                    .to_string();
                let name = item
                    .get("name")
                    .and_then(|x| x.as_str())
                    .unwrap_or("?")
                    .to_string();
                let input = item.get("input").cloned().unwrap_or(Value::Null);
                blocks.push(ContentBlock::ToolUse { id, name, input });
            }
            Some("tool_result") => {
                let tool_use_id = item
                    .get("tool_use_id")
                    .and_then(|x| x.as_str())
                    .unwrap_or_default()
                    .to_string();
                blocks.push(ContentBlock::ToolResult { tool_use_id });
            }
            _ => {}
        }
    }
    blocks
}

fn parse_result(v: &Value) -> ResultRecord {
    let mut rec = ResultRecord {
        result: v
            .get("result")
            .and_then(|x| x.as_str())
            .unwrap_or_default()
            .to_string(),
        total_cost_usd: v
            .get("total_cost_usd")
            .and_then(|x| x.as_f64())
            .unwrap_or(0.0),
        num_turns: v.get("num_turns").and_then(|x| x.as_u64()).unwrap_or(0),
        model_usage: BTreeMap::new(),
    };

    if let Some(usage) = v.get("modelUsage").and_then(|x| x.as_object()) {
        for (model, data) in usage {
            rec.model_usage
                .insert(model.clone(), ModelUsage::from_json(data));
        }
    }
    rec
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_assistant_text_block() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hello"}]}}"#;
        let rec = parse_record(line).unwrap();
        assert_eq!(
            rec,
            StreamRecord::Assistant(vec![ContentBlock::Text("hello".into())])
        );
    }

    #[test]
    fn parse_assistant_tool_use_and_result() {
        let line = r#"{"type":"assistant","message":{"content":[
            {"type":"tool_use","id":"t1","name":"Bash","input":{"command":"ls"}},
            {"type":"tool_result","tool_use_id":"t1"}
        ]}}"#;
        let StreamRecord::Assistant(blocks) = parse_record(line).unwrap() else {
            panic!("expected assistant record");
        };
        assert_eq!(blocks.len(), 2);
        assert!(matches!(
            &blocks[0],
            ContentBlock::ToolUse { id, name, .. } if id == "t1" && name == "Bash"
        ));
        assert!(matches!(
            &blocks[1],
            ContentBlock::ToolResult { tool_use_id } if tool_use_id == "t1"
        ));
    }

    #[test]
    fn parse_result_record_with_model_usage() {
        let line = r#"{"type":"result","result":"done","total_cost_usd":0.25,"num_turns":7,
            "modelUsage":{"claude-sonnet-4":{"inputTokens":100,"outputTokens":50,
            "cacheReadInputTokens":10,"cacheCreationInputTokens":5,"costUSD":0.25}}}"#;
        let StreamRecord::Result(rec) = parse_record(line).unwrap() else {
            panic!("expected result record");
        };
        assert_eq!(rec.result, "done");
        assert_eq!(rec.num_turns, 7);
        let usage = &rec.model_usage["claude-sonnet-4"];
        assert_eq!(usage.input_tokens, 100);
        assert_eq!(usage.output_tokens, 50);
        assert_eq!(usage.cache_read_input_tokens, 10);
        assert_eq!(usage.cache_creation_input_tokens, 5);
    }

    #[test]
    fn unknown_discriminant_is_ignored() {
        assert_eq!(parse_record(r#"{"type":"system","subtype":"init"}"#), None);
        assert_eq!(parse_record(r#"{"no_type":true}"#), None);
    }

    #[test]
    fn malformed_lines_never_error() {
        assert_eq!(parse_record("not json"), None);
        assert_eq!(parse_record("{truncated"), None);
        assert_eq!(parse_record(""), None);
    }
}
