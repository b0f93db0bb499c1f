//! Tool-call descriptions for the live status display.

use std::collections::HashMap;

use serde_json::Value;

fn str_field<'a>(input: &'a Value, key: &str) -> &'a str {
    input.get(key).and_then(|x| x.as_str()).unwrap_or("")
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn truncated(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Create a compact, readable description of a tool call.
pub fn tool_description(name: &str, input: &Value) -> String {
    match name {
        "Task" => {
            let desc = str_field(input, "description");
            if desc.is_empty() {
                "Agent".to_string()
            } else {
                format!("Agent: {desc}")
            }
        }
        "Read" => {
            let path = str_field(input, "file_path");
            if path.is_empty() {
                "Read".to_string()
            } else {
                format!("Read {}", basename(path))
            }
        }
        "Bash" => {
            let cmd = str_field(input, "command");
            if cmd.is_empty() {
                "Bash".to_string()
            } else {
                format!("$ {}", truncated(cmd, 60))
            }
        }
        "Grep" | "mcp__plugin_meta_mux__search_files" => {
            let pattern = str_field(input, "pattern");
            if pattern.is_empty() {
                "Search".to_string()
            } else {
                format!("Search: {}", truncated(pattern, 50))
            }
        }
        "Glob" => {
            let pattern = str_field(input, "pattern");
            if pattern.is_empty() {
                "Glob".to_string()
            } else {
                format!("Glob: {pattern}")
            }
        }
        "Edit" => {
            let path = str_field(input, "file_path");
            if path.is_empty() {
                "Edit".to_string()
            } else {
                format!("Edit {}", basename(path))
            }
        }
        "Write" => {
            let path = str_field(input, "file_path");
            if path.is_empty() {
                "Write".to_string()
            } else {
                format!("Write {}", basename(path))
            }
        }
        "WebFetch" => {
            let url = str_field(input, "url");
            if url.is_empty() {
                "WebFetch".to_string()
            } else {
                format!("Fetch: {}", truncated(url, 50))
            }
        }
        // Generic fallback: strip common MCP prefixes.
        other => other
            .replace("mcp__plugin_meta_mux__", "")
            .replace("mcp__", ""),
    }
}

/// Tool invocations currently in flight, keyed by the child's opaque call id.
///
/// Written by the decode loop; snapshots are messaged to the display rather
/// than shared, so no locking is needed. Transient per-iteration state, never
/// persisted.
#[derive(Debug, Default)]
pub struct ActiveToolSet {
    entries: HashMap<String, String>,
    order: Vec<String>,
}

impl ActiveToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: &str, description: String) {
        if self.entries.insert(id.to_string(), description).is_none() {
            self.order.push(id.to_string());
        }
    }

    /// Remove by call id. Unknown ids are a no-op: a `tool_result` can arrive
    /// for a call we never saw start.
    pub fn remove(&mut self, id: &str) {
        if self.entries.remove(id).is_some() {
            self.order.retain(|x| x != id);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Descriptions in start order, for the status line.
    pub fn descriptions(&self) -> Vec<String> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id).cloned())
            .collect()
    }
}
