use serde::Deserialize;
use serde_json::Value;

use crate::util::truncate_chars;

/// One line of the agent runtime's `stream-json` output.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "system")]
    System {
        #[serde(default)]
        subtype: String,
        #[serde(default)]
        model: Option<String>,
    },

    #[serde(rename = "assistant")]
    Assistant { message: AssistantMessage },

    #[serde(rename = "user")]
    User {},

    #[serde(rename = "result")]
    Result {
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        num_turns: u32,
        #[serde(default)]
        total_cost_usd: f64,
    },

    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "tool_use")]
    ToolUse { name: String, input: Value },

    #[serde(rename = "text")]
    Text { text: String },

    #[serde(other)]
    Other,
}

/// Parse one output line. Blank and malformed lines yield `None`.
pub fn parse_event(line: &str) -> Option<StreamEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    serde_json::from_str(line).ok()
}

/// Running summary of a session, updated per event and shown on the spinner.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SessionProgress {
    pub model: Option<String>,
    pub current_action: String,
    pub tool_count: u32,
    pub turn_count: u32,
    pub cost_usd: f64,
    pub last_error: Option<String>,
}

impl SessionProgress {
    pub fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::System { subtype, model } => {
                if subtype == "init" {
                    self.model = model.clone();
                    self.current_action = "initialized".to_string();
                }
            }
            StreamEvent::Assistant { message } => {
                for block in &message.content {
                    match block {
                        ContentBlock::ToolUse { name, input } => {
                            self.tool_count += 1;
                            self.current_action = describe_tool_use(name, input);
                        }
                        ContentBlock::Text { text } if !text.trim().is_empty() => {
                            self.current_action = summarize(text);
                        }
                        _ => {}
                    }
                }
            }
            StreamEvent::Result {
                is_error,
                result,
                num_turns,
                total_cost_usd,
            } => {
                self.turn_count = *num_turns;
                self.cost_usd = *total_cost_usd;
                if *is_error {
                    self.current_action = "result error".to_string();
                    self.last_error = Some(
                        result
                            .as_deref()
                            .map(summarize)
                            .unwrap_or_else(|| "result event reported error".to_string()),
                    );
                } else {
                    self.current_action = "result received".to_string();
                }
            }
            StreamEvent::User {} | StreamEvent::Other => {}
        }
    }
}

/// Collapse whitespace and cap at 72 characters for a one-line status.
fn summarize(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed, 69)
}

/// Human-readable description of a tool call.
pub fn describe_tool_use(name: &str, input: &Value) -> String {
    let field = |key: &str| input.get(key).and_then(|v| v.as_str());
    match name {
        "Read" => format!("Reading: {}", field("file_path").map(shorten_path).unwrap_or_default()),
        "Write" => format!("Creating: {}", field("file_path").map(shorten_path).unwrap_or_default()),
        "Edit" => format!("Editing: {}", field("file_path").map(shorten_path).unwrap_or_default()),
        "Bash" => format!(
            "Running: {}",
            field("command").map(|c| truncate_chars(c, 40)).unwrap_or_default()
        ),
        "Task" => format!("Agent: {}", field("description").unwrap_or("subagent")),
        "Skill" => format!("Skill: {}", field("skill").unwrap_or("skill")),
        _ => name.to_string(),
    }
}

fn shorten_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() <= 2 {
        path.to_string()
    } else {
        parts[parts.len() - 2..].join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assistant_tool_use() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Read","input":{"file_path":"/repo/src/main.rs"},"id":"1"}]},"session_id":"abc"}"#;
        let event = parse_event(line).unwrap();
        let mut progress = SessionProgress::default();
        progress.apply(&event);
        assert_eq!(progress.tool_count, 1);
        assert_eq!(progress.current_action, "Reading: src/main.rs");
    }

    #[test]
    fn test_unknown_event_type_still_parses() {
        let event = parse_event(r#"{"type":"rate_limit","retry_in":3}"#).unwrap();
        assert!(matches!(event, StreamEvent::Other));
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        assert!(parse_event("").is_none());
        assert!(parse_event("not json").is_none());
        assert!(parse_event(r#"{"no_type":true}"#).is_none());
    }

    #[test]
    fn test_result_error_recorded() {
        let event = parse_event(
            r#"{"type":"result","subtype":"error","is_error":true,"result":"quota   exceeded","num_turns":4}"#,
        )
        .unwrap();
        let mut progress = SessionProgress::default();
        progress.apply(&event);
        assert_eq!(progress.turn_count, 4);
        assert_eq!(progress.last_error.as_deref(), Some("quota exceeded"));
    }

    #[test]
    fn test_system_init_captures_model() {
        let event =
            parse_event(r#"{"type":"system","subtype":"init","model":"opus","session_id":"s"}"#)
                .unwrap();
        let mut progress = SessionProgress::default();
        progress.apply(&event);
        assert_eq!(progress.model.as_deref(), Some("opus"));
        assert_eq!(progress.current_action, "initialized");
    }

    #[test]
    fn test_describe_tool_use() {
        let input = serde_json::json!({"command": "go test ./..."});
        assert_eq!(describe_tool_use("Bash", &input), "Running: go test ./...");
        let input = serde_json::json!({"description": "review diff"});
        assert_eq!(describe_tool_use("Task", &input), "Agent: review diff");
    }
}
