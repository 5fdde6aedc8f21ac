//! Conversation logging schema and its once-per-connection provisioning.

use std::sync::atomic::{AtomicBool, Ordering};

use libsql::Value;
use tracing::{debug, error, info};

use crate::error::StoreError;
use crate::replica::ReplicaConnection;

pub const SCHEMA_VERSION: i64 = 1;

/// Applied in order. Every statement is a no-op when its object already
/// exists.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS schema_version (
      version INTEGER PRIMARY KEY,
      applied_at TEXT NOT NULL DEFAULT (datetime('now'))
    )"#,
    r#"CREATE TABLE IF NOT EXISTS sessions (
      id TEXT PRIMARY KEY,
      agent_type TEXT NOT NULL,
      model TEXT NOT NULL,
      provider TEXT,
      started_at TEXT NOT NULL DEFAULT (datetime('now')),
      ended_at TEXT,
      status TEXT NOT NULL DEFAULT 'running',
      error_message TEXT,
      metadata TEXT
    )"#,
    r#"CREATE TABLE IF NOT EXISTS messages (
      id TEXT PRIMARY KEY,
      session_id TEXT NOT NULL,
      sequence INTEGER NOT NULL,
      role TEXT NOT NULL,
      content TEXT,
      tool_name TEXT,
      tool_input TEXT,
      tool_output TEXT,
      created_at TEXT NOT NULL DEFAULT (datetime('now')),
      token_count INTEGER,
      FOREIGN KEY (session_id) REFERENCES sessions(id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS tool_executions (
      id TEXT PRIMARY KEY,
      session_id TEXT NOT NULL,
      message_id TEXT,
      tool_name TEXT NOT NULL,
      status TEXT NOT NULL,
      input TEXT,
      output TEXT,
      error TEXT,
      started_at TEXT NOT NULL DEFAULT (datetime('now')),
      ended_at TEXT,
      duration_ms INTEGER,
      FOREIGN KEY (session_id) REFERENCES sessions(id),
      FOREIGN KEY (message_id) REFERENCES messages(id)
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id)",
    "CREATE INDEX IF NOT EXISTS idx_messages_created ON messages(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_tool_executions_session ON tool_executions(session_id)",
    "CREATE INDEX IF NOT EXISTS idx_tool_executions_started ON tool_executions(started_at)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_agent_type ON sessions(agent_type)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_started ON sessions(started_at)",
];

/// Tracks whether the schema has been provisioned on one connection.
#[derive(Debug, Default)]
pub struct SchemaProvisioner {
    provisioned: AtomicBool,
}

impl SchemaProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_provisioned(&self) -> bool {
        self.provisioned.load(Ordering::Acquire)
    }

    /// Brings `conn` up to [`SCHEMA_VERSION`]. Returns `false` on failure and
    /// leaves the provisioned flag unset so a later call retries.
    pub async fn ensure_schema(&self, conn: &dyn ReplicaConnection) -> bool {
        if self.is_provisioned() {
            return true;
        }

        match provision(conn).await {
            Ok(applied) => {
                self.provisioned.store(true, Ordering::Release);
                if applied {
                    info!("[Schema] Schema initialized to version {SCHEMA_VERSION}");
                }
                true
            }
            Err(err) => {
                error!("[Schema] Failed to initialize schema: {err}");
                false
            }
        }
    }

    /// Forgets the in-memory flag. Persisted data is untouched.
    pub fn reset_state(&self) {
        self.provisioned.store(false, Ordering::Release);
    }
}

/// Returns whether DDL was executed.
async fn provision(conn: &dyn ReplicaConnection) -> Result<bool, StoreError> {
    let current = stored_version(conn).await;
    if current >= SCHEMA_VERSION {
        debug!(current, "[Schema] already at or past target version");
        return Ok(false);
    }

    for statement in SCHEMA_STATEMENTS {
        conn.execute(statement, Vec::new()).await?;
    }
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
        vec![Value::Integer(SCHEMA_VERSION)],
    )
    .await?;
    Ok(true)
}

/// Latest recorded schema version; 0 when the table is missing or empty.
pub async fn stored_version(conn: &dyn ReplicaConnection) -> i64 {
    match conn
        .query(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            Vec::new(),
        )
        .await
    {
        Ok(rows) => rows
            .first()
            .and_then(|row| row.opt_i64("version"))
            .unwrap_or(0),
        Err(err) => {
            debug!("[Schema] schema_version unreadable, assuming fresh database: {err}");
            0
        }
    }
}
