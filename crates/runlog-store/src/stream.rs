//! Feeds agent stream events into a [`ConversationLogger`].
//!
//! The agent emits newline-delimited JSON objects tagged by `type`. Assistant
//! turns become messages, `tool_use`/`tool_result` pairs become tool
//! executions, and the `result` event is kept for the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::error::StoreError;
use crate::logger::{
    ConversationLogger, MessageOptions, MessageRole, ToolExecutionInfo, ToolStatus,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Assistant { message: AgentMessage },
    User { message: AgentMessage },
    Result(ResultEvent),
    System {
        #[serde(default)]
        subtype: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentMessage {
    #[serde(default, deserialize_with = "nullable_content")]
    pub content: MessageContent,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    #[serde(deserialize_with = "lenient_blocks")]
    Blocks(Vec<ContentBlock>),
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Blocks(Vec::new())
    }
}

fn nullable_content<'de, D>(deserializer: D) -> Result<MessageContent, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<MessageContent>::deserialize(deserializer)?.unwrap_or_default())
}

// A block that does not fit its tagged shape is skipped so the rest of the
// turn is still recorded.
fn lenient_blocks<'de, D>(deserializer: D) -> Result<Vec<ContentBlock>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Vec::<serde_json::Value>::deserialize(deserializer)?;
    Ok(values
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(block) => Some(block),
            Err(err) => {
                debug!("skipping malformed content block: {err}");
                None
            }
        })
        .collect())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: serde_json::Value,
        #[serde(default)]
        is_error: Option<bool>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: Option<i64>,
    #[serde(default)]
    pub output_tokens: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultEvent {
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl ResultEvent {
    pub fn is_success(&self) -> bool {
        !self.is_error && self.subtype.as_deref().is_none_or(|s| s == "success")
    }
}

/// The final `result` event together with the JSON it was parsed from.
#[derive(Debug, Clone)]
pub struct RecordedResult {
    pub event: ResultEvent,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone)]
struct PendingTool {
    tool_use_id: String,
    name: String,
    input: serde_json::Value,
    message_id: Option<String>,
    started_at: DateTime<Utc>,
}

/// Without a logger the recorder only tracks the final result, so a run with
/// telemetry disabled still reports its outcome.
pub struct StreamRecorder<'a> {
    logger: Option<&'a mut ConversationLogger>,
    pending: Vec<PendingTool>,
    final_result: Option<RecordedResult>,
}

impl<'a> StreamRecorder<'a> {
    pub fn new(logger: &'a mut ConversationLogger) -> Self {
        Self::with_logger(Some(logger))
    }

    pub fn detached() -> Self {
        Self::with_logger(None)
    }

    pub fn with_logger(logger: Option<&'a mut ConversationLogger>) -> Self {
        Self {
            logger,
            pending: Vec::new(),
            final_result: None,
        }
    }

    /// Parses one NDJSON line and records it. Parse errors are returned so the
    /// caller can decide whether to skip the line; logger failures are not.
    pub async fn record_line(&mut self, line: &str) -> Result<(), StoreError> {
        let raw: serde_json::Value = serde_json::from_str(line)?;
        let event: AgentEvent = serde_json::from_value(raw.clone())?;
        self.record(event, raw).await;
        Ok(())
    }

    pub async fn record(&mut self, event: AgentEvent, raw: serde_json::Value) {
        match event {
            AgentEvent::Assistant { message } => self.record_assistant(message).await,
            AgentEvent::User { message } => self.record_tool_results(message).await,
            AgentEvent::Result(result) => {
                debug!(subtype = ?result.subtype, "agent result received");
                self.final_result = Some(RecordedResult { event: result, raw });
            }
            AgentEvent::System { .. } | AgentEvent::Other => {}
        }
    }

    async fn record_assistant(&mut self, message: AgentMessage) {
        let Some(logger) = self.logger.as_deref_mut() else {
            return;
        };
        let blocks = match message.content {
            MessageContent::Text(text) => vec![ContentBlock::Text { text }],
            MessageContent::Blocks(blocks) => blocks,
        };

        let text = blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        let tool_uses: Vec<(String, String, serde_json::Value)> = blocks
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => Some((id, name, input)),
                _ => None,
            })
            .collect();

        let mut options = MessageOptions {
            token_count: message.usage.and_then(|u| u.output_tokens),
            ..MessageOptions::default()
        };
        if let Some((_, name, input)) = tool_uses.first() {
            options.tool_name = Some(name.clone());
            options.tool_input = Some(input.clone());
        }

        let message_id = logger
            .log_message(MessageRole::Assistant, &text, options)
            .await;

        let started_at = Utc::now();
        for (tool_use_id, name, input) in tool_uses {
            self.pending.push(PendingTool {
                tool_use_id,
                name,
                input,
                message_id: message_id.clone(),
                started_at,
            });
        }
    }

    async fn record_tool_results(&mut self, message: AgentMessage) {
        let Some(logger) = self.logger.as_deref_mut() else {
            return;
        };
        let MessageContent::Blocks(blocks) = message.content else {
            return;
        };
        for block in blocks {
            let ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } = block
            else {
                continue;
            };
            let Some(idx) = self
                .pending
                .iter()
                .position(|tool| tool.tool_use_id == tool_use_id)
            else {
                debug!(%tool_use_id, "tool result without matching tool use");
                continue;
            };
            let tool = self.pending.remove(idx);
            let failed = is_error.unwrap_or(false);

            let mut info = ToolExecutionInfo::new(
                tool.name,
                if failed {
                    ToolStatus::Error
                } else {
                    ToolStatus::Success
                },
            );
            info.message_id = tool.message_id;
            info.input = Some(tool.input);
            info.started_at = Some(tool.started_at);
            info.ended_at = Some(Utc::now());
            if failed {
                info.error = Some(match &content {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                });
            }
            info.output = Some(content);
            logger.log_tool_execution(info).await;
        }
    }

    /// Records tools that never produced a result as `pending` and hands back
    /// the final result event, if one arrived.
    pub async fn finish(self) -> Option<RecordedResult> {
        if let Some(logger) = self.logger {
            for tool in self.pending {
                let mut info = ToolExecutionInfo::new(tool.name, ToolStatus::Pending);
                info.message_id = tool.message_id;
                info.input = Some(tool.input);
                info.started_at = Some(tool.started_at);
                logger.log_tool_execution(info).await;
            }
        }
        self.final_result
    }
}
