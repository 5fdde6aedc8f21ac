//! Session telemetry store: embedded replica management, schema
//! provisioning, the conversation logger and read-side queries.

pub mod error;
pub mod logger;
pub mod queries;
pub mod replica;
pub mod rows;
pub mod schema;
pub mod stream;

pub use error::StoreError;
pub use libsql::Value;
pub use logger::{
    ConversationLogger, LoggerPhase, MessageOptions, MessageRole, SessionInfo, SessionOutcome,
    SessionStatus, ToolExecutionInfo, ToolStatus, create_conversation_logger,
};
pub use queries::{
    ListSessionsOptions, MessageRecord, SessionDetail, SessionStats, SessionSummary,
    ToolExecutionRecord, get_session, list_sessions, search_sessions, session_stats,
};
pub use replica::{
    LibsqlOpener, LibsqlReplica, Replica, ReplicaConnection, ReplicaManager, ReplicaOpener,
    sync_with_timeout,
};
pub use rows::Row;
pub use schema::{SCHEMA_STATEMENTS, SCHEMA_VERSION, SchemaProvisioner, stored_version};
pub use stream::{AgentEvent, RecordedResult, ResultEvent, StreamRecorder};
