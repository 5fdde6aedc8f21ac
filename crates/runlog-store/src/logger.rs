//! Best-effort recording of one agent session. Public methods of
//! [`ConversationLogger`] never return errors; failures show up as `None` or
//! `false` plus a log line.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use libsql::Value;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::replica::{ReplicaConnection, ReplicaManager, sync_with_timeout};
use crate::rows::{json_text, opt_i64, opt_text, opt_ts};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Running,
    Completed,
    Error,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    Error,
}

impl SessionOutcome {
    pub fn status(self) -> SessionStatus {
        match self {
            SessionOutcome::Completed => SessionStatus::Completed,
            SessionOutcome::Error => SessionStatus::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
    System,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
            MessageRole::System => "system",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    Success,
    Error,
    Pending,
}

impl ToolStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolStatus::Success => "success",
            ToolStatus::Error => "error",
            ToolStatus::Pending => "pending",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: String,
    pub agent_type: String,
    pub model: String,
    pub provider: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl SessionInfo {
    pub fn new(
        id: impl Into<String>,
        agent_type: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            agent_type: agent_type.into(),
            model: model.into(),
            provider: None,
            metadata: None,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct MessageOptions {
    pub tool_name: Option<String>,
    pub tool_input: Option<serde_json::Value>,
    pub tool_output: Option<serde_json::Value>,
    pub token_count: Option<i64>,
}

impl MessageOptions {
    pub fn with_token_count(mut self, token_count: i64) -> Self {
        self.token_count = Some(token_count);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ToolExecutionInfo {
    pub tool_name: String,
    pub status: ToolStatus,
    pub message_id: Option<String>,
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ToolExecutionInfo {
    pub fn new(tool_name: impl Into<String>, status: ToolStatus) -> Self {
        Self {
            tool_name: tool_name.into(),
            status,
            message_id: None,
            input: None,
            output: None,
            error: None,
            started_at: None,
            ended_at: None,
        }
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggerPhase {
    Unstarted,
    Started,
    Ended,
}

pub struct ConversationLogger {
    conn: Arc<dyn ReplicaConnection>,
    session_id: Option<String>,
    sequence: i64,
    phase: LoggerPhase,
    sync_timeout: Duration,
}

impl ConversationLogger {
    pub fn new(conn: Arc<dyn ReplicaConnection>) -> Self {
        Self {
            conn,
            session_id: None,
            sequence: 0,
            phase: LoggerPhase::Unstarted,
            sync_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn phase(&self) -> LoggerPhase {
        self.phase
    }

    /// A failed insert still leaves the logger started.
    pub async fn start_session(&mut self, info: SessionInfo) {
        if self.phase != LoggerPhase::Unstarted {
            warn!(
                current = ?self.session_id,
                requested = %info.id,
                "[ConversationLogger] Session already started; ignoring start"
            );
            return;
        }

        self.session_id = Some(info.id.clone());
        self.sequence = 0;
        self.phase = LoggerPhase::Started;

        best_effort("start session", self.insert_session(&info).await);
    }

    /// The sequence number is consumed even when the insert fails.
    pub async fn log_message(
        &mut self,
        role: MessageRole,
        content: &str,
        options: MessageOptions,
    ) -> Option<String> {
        let session_id = self.active_session("log message")?;

        self.sequence += 1;
        let sequence = self.sequence;
        let id = Uuid::new_v4().to_string();

        best_effort(
            "log message",
            self.insert_message(&id, &session_id, sequence, role, content, &options)
                .await,
        )
        .map(|_| id)
    }

    pub async fn log_tool_execution(&mut self, info: ToolExecutionInfo) -> Option<String> {
        let session_id = self.active_session("log tool execution")?;
        let id = Uuid::new_v4().to_string();

        best_effort(
            "log tool execution",
            self.insert_tool_execution(&id, &session_id, &info).await,
        )
        .map(|_| id)
    }

    pub async fn end_session(&mut self, outcome: SessionOutcome, error_message: Option<&str>) {
        let session_id = match (self.phase, self.session_id.clone()) {
            (LoggerPhase::Started, Some(id)) => id,
            (LoggerPhase::Ended, _) => {
                warn!("[ConversationLogger] Session already ended; ignoring end");
                return;
            }
            _ => {
                warn!("[ConversationLogger] No active session to end");
                return;
            }
        };
        self.phase = LoggerPhase::Ended;

        best_effort(
            "end session",
            self.update_session_end(&session_id, outcome.status(), error_message)
                .await,
        );
    }

    pub async fn sync_to_cloud(&self) -> bool {
        sync_with_timeout(self.conn.as_ref(), self.sync_timeout).await
    }

    fn active_session(&self, action: &str) -> Option<String> {
        match (self.phase, &self.session_id) {
            (LoggerPhase::Started, Some(id)) => Some(id.clone()),
            (LoggerPhase::Ended, _) => {
                warn!("[ConversationLogger] Session already ended; cannot {action}");
                None
            }
            _ => {
                debug!("[ConversationLogger] No active session; cannot {action}");
                None
            }
        }
    }

    async fn insert_session(&self, info: &SessionInfo) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO sessions (id, agent_type, model, provider, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                vec![
                    Value::Text(info.id.clone()),
                    Value::Text(info.agent_type.clone()),
                    Value::Text(info.model.clone()),
                    opt_text(info.provider.as_deref()),
                    json_text(info.metadata.as_ref())?,
                ],
            )
            .await?;
        Ok(())
    }

    async fn insert_message(
        &self,
        id: &str,
        session_id: &str,
        sequence: i64,
        role: MessageRole,
        content: &str,
        options: &MessageOptions,
    ) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO messages
                 (id, session_id, sequence, role, content, tool_name, tool_input, tool_output, token_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                vec![
                    Value::Text(id.to_string()),
                    Value::Text(session_id.to_string()),
                    Value::Integer(sequence),
                    Value::Text(role.as_str().to_string()),
                    Value::Text(content.to_string()),
                    opt_text(options.tool_name.as_deref()),
                    json_text(options.tool_input.as_ref())?,
                    json_text(options.tool_output.as_ref())?,
                    opt_i64(options.token_count),
                ],
            )
            .await?;
        Ok(())
    }

    async fn insert_tool_execution(
        &self,
        id: &str,
        session_id: &str,
        info: &ToolExecutionInfo,
    ) -> Result<(), StoreError> {
        let started_at = info.started_at.unwrap_or_else(Utc::now);
        self.conn
            .execute(
                "INSERT INTO tool_executions
                 (id, session_id, message_id, tool_name, status, input, output, error, started_at, ended_at, duration_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                vec![
                    Value::Text(id.to_string()),
                    Value::Text(session_id.to_string()),
                    opt_text(info.message_id.as_deref()),
                    Value::Text(info.tool_name.clone()),
                    Value::Text(info.status.as_str().to_string()),
                    json_text(info.input.as_ref())?,
                    json_text(info.output.as_ref())?,
                    opt_text(info.error.as_deref()),
                    opt_ts(Some(&started_at)),
                    opt_ts(info.ended_at.as_ref()),
                    opt_i64(info.duration_ms()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn update_session_end(
        &self,
        session_id: &str,
        status: SessionStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        self.conn
            .execute(
                "UPDATE sessions SET status = ?1, error_message = ?2, ended_at = datetime('now')
                 WHERE id = ?3",
                vec![
                    Value::Text(status.as_str().to_string()),
                    opt_text(error_message),
                    Value::Text(session_id.to_string()),
                ],
            )
            .await?;
        Ok(())
    }
}

fn best_effort<T>(action: &str, result: Result<T, StoreError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            error!("[ConversationLogger] Failed to {action}: {err}");
            None
        }
    }
}

/// `None` when telemetry is disabled or the schema could not be applied.
pub async fn create_conversation_logger(manager: &ReplicaManager) -> Option<ConversationLogger> {
    let replica = manager.get_or_create().await?;
    if !replica.ensure_schema().await {
        warn!("[ConversationLogger] Schema unavailable; conversation logging disabled");
        return None;
    }
    Some(
        ConversationLogger::new(replica.connection().clone())
            .with_sync_timeout(manager.sync_timeout()),
    )
}
