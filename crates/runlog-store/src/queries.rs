//! Read-only views over recorded sessions.

use libsql::Value;
use serde::Serialize;

use crate::error::StoreError;
use crate::replica::ReplicaConnection;
use crate::rows::Row;

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub agent_type: String,
    pub model: String,
    pub provider: Option<String>,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub status: String,
    pub message_count: i64,
    pub tool_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    pub id: String,
    pub sequence: i64,
    pub role: String,
    pub content: Option<String>,
    pub tool_name: Option<String>,
    pub tool_input: Option<serde_json::Value>,
    pub tool_output: Option<serde_json::Value>,
    pub created_at: String,
    pub token_count: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolExecutionRecord {
    pub id: String,
    pub message_id: Option<String>,
    pub tool_name: String,
    pub status: String,
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionDetail {
    pub id: String,
    pub agent_type: String,
    pub model: String,
    pub provider: Option<String>,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub messages: Vec<MessageRecord>,
    pub tool_executions: Vec<ToolExecutionRecord>,
}

#[derive(Debug, Clone)]
pub struct ListSessionsOptions {
    pub limit: i64,
    pub offset: i64,
    pub agent_type: Option<String>,
    pub status: Option<String>,
    /// Bounds go through SQLite `datetime()`, so ISO 8601 (`2025-01-02T10:00:00Z`)
    /// and `YYYY-MM-DD HH:MM:SS` compare the same way.
    pub started_after: Option<String>,
    pub started_before: Option<String>,
}

impl Default for ListSessionsOptions {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
            agent_type: None,
            status: None,
            started_after: None,
            started_before: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub total_sessions: i64,
    pub completed_sessions: i64,
    pub error_sessions: i64,
    pub total_messages: i64,
    pub total_tool_executions: i64,
    pub avg_messages_per_session: f64,
}

pub async fn list_sessions(
    conn: &dyn ReplicaConnection,
    options: &ListSessionsOptions,
) -> Result<Vec<SessionSummary>, StoreError> {
    let mut conditions = Vec::new();
    let mut args = Vec::new();

    if let Some(agent_type) = &options.agent_type {
        conditions.push("s.agent_type = ?");
        args.push(Value::Text(agent_type.clone()));
    }
    if let Some(status) = &options.status {
        conditions.push("s.status = ?");
        args.push(Value::Text(status.clone()));
    }
    if let Some(after) = &options.started_after {
        conditions.push("s.started_at >= datetime(?)");
        args.push(Value::Text(after.clone()));
    }
    if let Some(before) = &options.started_before {
        conditions.push("s.started_at <= datetime(?)");
        args.push(Value::Text(before.clone()));
    }
    args.push(Value::Integer(options.limit));
    args.push(Value::Integer(options.offset));

    let sql = format!(
        "SELECT
           s.id, s.agent_type, s.model, s.provider, s.started_at, s.ended_at, s.status,
           COUNT(DISTINCT m.id) AS message_count,
           COUNT(DISTINCT t.id) AS tool_count
         FROM sessions s
         LEFT JOIN messages m ON m.session_id = s.id
         LEFT JOIN tool_executions t ON t.session_id = s.id
         {}
         GROUP BY s.id
         ORDER BY s.started_at DESC
         LIMIT ? OFFSET ?",
        where_clause(&conditions)
    );

    let rows = conn.query(&sql, args).await?;
    rows.iter().map(row_to_summary).collect()
}

pub async fn get_session(
    conn: &dyn ReplicaConnection,
    session_id: &str,
) -> Result<Option<SessionDetail>, StoreError> {
    let sessions = conn
        .query(
            "SELECT id, agent_type, model, provider, started_at, ended_at, status, error_message, metadata
             FROM sessions WHERE id = ?1",
            vec![Value::Text(session_id.to_string())],
        )
        .await?;
    let Some(session) = sessions.first() else {
        return Ok(None);
    };

    let messages = conn
        .query(
            "SELECT id, sequence, role, content, tool_name, tool_input, tool_output, created_at, token_count
             FROM messages
             WHERE session_id = ?1
             ORDER BY sequence ASC",
            vec![Value::Text(session_id.to_string())],
        )
        .await?;

    let tools = conn
        .query(
            "SELECT id, message_id, tool_name, status, input, output, error, started_at, ended_at, duration_ms
             FROM tool_executions
             WHERE session_id = ?1
             ORDER BY started_at ASC",
            vec![Value::Text(session_id.to_string())],
        )
        .await?;

    Ok(Some(SessionDetail {
        id: session.text("id")?,
        agent_type: session.text("agent_type")?,
        model: session.text("model")?,
        provider: session.opt_text("provider"),
        started_at: session.text("started_at")?,
        ended_at: session.opt_text("ended_at"),
        status: session.text("status")?,
        error_message: session.opt_text("error_message"),
        metadata: session.opt_json("metadata"),
        messages: messages
            .iter()
            .map(row_to_message)
            .collect::<Result<_, _>>()?,
        tool_executions: tools
            .iter()
            .map(row_to_tool_execution)
            .collect::<Result<_, _>>()?,
    }))
}

/// Sessions with at least one message whose content contains `query`.
pub async fn search_sessions(
    conn: &dyn ReplicaConnection,
    query: &str,
    limit: i64,
) -> Result<Vec<SessionSummary>, StoreError> {
    let rows = conn
        .query(
            "SELECT DISTINCT
               s.id, s.agent_type, s.model, s.provider, s.started_at, s.ended_at, s.status,
               (SELECT COUNT(*) FROM messages WHERE session_id = s.id) AS message_count,
               (SELECT COUNT(*) FROM tool_executions WHERE session_id = s.id) AS tool_count
             FROM sessions s
             JOIN messages m ON m.session_id = s.id
             WHERE m.content LIKE ?1
             ORDER BY s.started_at DESC
             LIMIT ?2",
            vec![Value::Text(format!("%{query}%")), Value::Integer(limit)],
        )
        .await?;
    rows.iter().map(row_to_summary).collect()
}

pub async fn session_stats(
    conn: &dyn ReplicaConnection,
    agent_type: Option<&str>,
    since: Option<&str>,
) -> Result<SessionStats, StoreError> {
    let mut conditions = Vec::new();
    let mut filter_args = Vec::new();
    if let Some(agent_type) = agent_type {
        conditions.push("agent_type = ?");
        filter_args.push(Value::Text(agent_type.to_string()));
    }
    if let Some(since) = since {
        conditions.push("started_at >= datetime(?)");
        filter_args.push(Value::Text(since.to_string()));
    }
    let filter = where_clause(&conditions);

    // The same filter appears three times; placeholders bind in textual order.
    let sql = format!(
        "SELECT
           COUNT(*) AS total_sessions,
           COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS completed_sessions,
           COALESCE(SUM(CASE WHEN status = 'error' THEN 1 ELSE 0 END), 0) AS error_sessions,
           (SELECT COUNT(*) FROM messages
             WHERE session_id IN (SELECT id FROM sessions {filter})) AS total_messages,
           (SELECT COUNT(*) FROM tool_executions
             WHERE session_id IN (SELECT id FROM sessions {filter})) AS total_tool_executions
         FROM sessions {filter}"
    );
    let args = filter_args
        .iter()
        .cloned()
        .chain(filter_args.iter().cloned())
        .chain(filter_args.iter().cloned())
        .collect();

    let rows = conn.query(&sql, args).await?;
    let Some(row) = rows.first() else {
        return Ok(SessionStats::default());
    };

    let total_sessions = row.opt_i64("total_sessions").unwrap_or(0);
    let total_messages = row.opt_i64("total_messages").unwrap_or(0);
    Ok(SessionStats {
        total_sessions,
        completed_sessions: row.opt_i64("completed_sessions").unwrap_or(0),
        error_sessions: row.opt_i64("error_sessions").unwrap_or(0),
        total_messages,
        total_tool_executions: row.opt_i64("total_tool_executions").unwrap_or(0),
        avg_messages_per_session: if total_sessions > 0 {
            total_messages as f64 / total_sessions as f64
        } else {
            0.0
        },
    })
}

fn where_clause(conditions: &[&str]) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    }
}

fn row_to_summary(row: &Row) -> Result<SessionSummary, StoreError> {
    Ok(SessionSummary {
        id: row.text("id")?,
        agent_type: row.text("agent_type")?,
        model: row.text("model")?,
        provider: row.opt_text("provider"),
        started_at: row.text("started_at")?,
        ended_at: row.opt_text("ended_at"),
        status: row.text("status")?,
        message_count: row.opt_i64("message_count").unwrap_or(0),
        tool_count: row.opt_i64("tool_count").unwrap_or(0),
    })
}

fn row_to_message(row: &Row) -> Result<MessageRecord, StoreError> {
    Ok(MessageRecord {
        id: row.text("id")?,
        sequence: row.i64("sequence")?,
        role: row.text("role")?,
        content: row.opt_text("content"),
        tool_name: row.opt_text("tool_name"),
        tool_input: row.opt_json("tool_input"),
        tool_output: row.opt_json("tool_output"),
        created_at: row.text("created_at")?,
        token_count: row.opt_i64("token_count"),
    })
}

fn row_to_tool_execution(row: &Row) -> Result<ToolExecutionRecord, StoreError> {
    Ok(ToolExecutionRecord {
        id: row.text("id")?,
        message_id: row.opt_text("message_id"),
        tool_name: row.text("tool_name")?,
        status: row.text("status")?,
        input: row.opt_json("input"),
        output: row.opt_json("output"),
        error: row.opt_text("error"),
        started_at: row.text("started_at")?,
        ended_at: row.opt_text("ended_at"),
        duration_ms: row.opt_i64("duration_ms"),
    })
}
