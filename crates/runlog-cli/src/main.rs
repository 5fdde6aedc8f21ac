use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use runlog_common::{APP_NAME, RemoteConfig, RunlogConfig, logging};
use runlog_store::{
    ListSessionsOptions, RecordedResult, Replica, ReplicaConnection, ReplicaManager, SessionInfo,
    SessionOutcome, SessionSummary, StreamRecorder, create_conversation_logger, get_session,
    list_sessions, search_sessions, session_stats,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "runlog", about = "Session telemetry for agent CLI runs", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Record an agent event stream read from stdin and print its result.
    Record {
        #[arg(long)]
        agent_type: String,
        #[arg(long)]
        model: String,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        session_id: Option<String>,
        /// Extra session metadata as a JSON object.
        #[arg(long)]
        metadata: Option<String>,
    },
    /// Inspect recorded sessions.
    Sessions {
        /// Read a local database file instead of a fresh synced replica.
        #[arg(long, global = true)]
        db: Option<PathBuf>,
        #[command(subcommand)]
        command: SessionsCommand,
    },
    /// Aggregate counts over recorded sessions.
    Stats {
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        agent_type: Option<String>,
        /// Only sessions started at or after this time (ISO 8601 or `YYYY-MM-DD HH:MM:SS`).
        #[arg(long)]
        since: Option<String>,
    },
    /// Show resolved configuration and telemetry status.
    Doctor,
}

#[derive(Debug, Subcommand)]
enum SessionsCommand {
    /// List sessions, newest first.
    List {
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        #[arg(long)]
        agent_type: Option<String>,
        #[arg(long)]
        status: Option<String>,
        /// Started at or after this time (ISO 8601 or `YYYY-MM-DD HH:MM:SS`).
        #[arg(long)]
        after: Option<String>,
        /// Started at or before this time, same formats as `--after`.
        #[arg(long)]
        before: Option<String>,
    },
    /// Show one session with its messages and tool executions.
    Show {
        session_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Find sessions whose messages contain a string.
    Search {
        query: String,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Some(Command::Record {
            agent_type,
            model,
            provider,
            session_id,
            metadata,
        }) => record(RecordArgs {
            agent_type,
            model,
            provider,
            session_id,
            metadata,
        }),
        Some(Command::Sessions { db, command }) => sessions(db, command).map(|_| ExitCode::SUCCESS),
        Some(Command::Stats {
            db,
            agent_type,
            since,
        }) => stats(db, agent_type, since).map(|_| ExitCode::SUCCESS),
        Some(Command::Doctor) => doctor().map(|_| ExitCode::SUCCESS),
        None => {
            println!("{APP_NAME}: no command given.");
            println!("Run `runlog doctor` to check telemetry configuration.");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config() -> Result<RunlogConfig> {
    let (config, _, _) = RunlogConfig::load_or_default()?;
    config.validate()?;
    logging::init(&config.log_level);
    Ok(config)
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

fn doctor() -> Result<()> {
    let (config, path, exists) = RunlogConfig::load_or_default()?;
    config.validate()?;
    logging::init(&config.log_level);

    println!("{} doctor: OK", APP_NAME);
    println!("config: {}", path.display());
    println!("config_exists: {exists}");
    println!("log_level: {}", config.log_level);
    println!("replica_dir: {}", config.replica_dir().display());
    println!("sync_timeout_ms: {}", config.sync_timeout_ms);
    if let Some(provider) = &config.default_provider {
        println!("default_provider: {provider}");
    }
    match RemoteConfig::resolve() {
        Some(remote) => {
            println!("remote_telemetry: enabled");
            println!("remote_host: {}", remote.remote_host());
        }
        None => println!("remote_telemetry: disabled"),
    }
    Ok(())
}

struct RecordArgs {
    agent_type: String,
    model: String,
    provider: Option<String>,
    session_id: Option<String>,
    metadata: Option<String>,
}

fn record(args: RecordArgs) -> Result<ExitCode> {
    let config = load_config()?;
    let metadata = args
        .metadata
        .as_deref()
        .map(serde_json::from_str::<serde_json::Value>)
        .transpose()
        .context("--metadata must be valid JSON")?;

    let runtime = runtime()?;
    let succeeded = runtime.block_on(record_stream(&config, args, metadata))?;
    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Returns whether the agent run succeeded. Telemetry failures never change
/// the answer.
async fn record_stream(
    config: &RunlogConfig,
    args: RecordArgs,
    metadata: Option<serde_json::Value>,
) -> Result<bool> {
    let manager = ReplicaManager::from_config(config);
    let mut logger = create_conversation_logger(&manager).await;

    if let Some(logger) = logger.as_mut() {
        let session_id = args
            .session_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut info = SessionInfo::new(session_id, args.agent_type, args.model);
        if let Some(provider) = args.provider.or_else(|| config.default_provider.clone()) {
            info = info.with_provider(provider);
        }
        if let Some(metadata) = metadata {
            info = info.with_metadata(metadata);
        }
        logger.start_session(info).await;
    } else {
        info!("telemetry disabled; the run is not recorded");
    }

    let mut recorder = StreamRecorder::with_logger(logger.as_mut());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!("agent stream read failed: {err}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        if let Err(err) = recorder.record_line(&line).await {
            warn!("skipping unparseable stream line: {err}");
        }
    }
    let recorded = recorder.finish().await;

    let (outcome, error_message) = run_outcome(recorded.as_ref());

    if let Some(result) = &recorded {
        println!("{}", serde_json::to_string_pretty(&result.raw)?);
    }

    if let Some(logger) = logger.as_mut() {
        logger.end_session(outcome, error_message.as_deref()).await;
        logger.sync_to_cloud().await;
    }
    manager.close().await;

    Ok(outcome == SessionOutcome::Completed)
}

fn run_outcome(recorded: Option<&RecordedResult>) -> (SessionOutcome, Option<String>) {
    match recorded {
        Some(result) if result.event.is_success() => (SessionOutcome::Completed, None),
        Some(result) => (
            SessionOutcome::Error,
            Some(
                result
                    .event
                    .result
                    .clone()
                    .or_else(|| result.event.subtype.clone())
                    .unwrap_or_else(|| "agent reported an error".to_string()),
            ),
        ),
        None => (
            SessionOutcome::Error,
            Some("agent stream ended without a result".to_string()),
        ),
    }
}

/// A connection opened for reading, either a local file or a synced replica.
struct ReadHandle {
    replica: Replica,
    manager: Option<ReplicaManager>,
}

impl ReadHandle {
    async fn open(db: Option<&Path>, config: &RunlogConfig) -> Result<Self> {
        if let Some(path) = db {
            let replica = Replica::open_local(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            return Ok(Self {
                replica,
                manager: None,
            });
        }

        let manager = ReplicaManager::from_config(config);
        if !manager.is_enabled() {
            return Err(anyhow!(
                "remote telemetry is not configured; set TURSO_DATABASE_URL and TURSO_AUTH_TOKEN or pass --db"
            ));
        }
        let replica = manager
            .get_or_create()
            .await
            .ok_or_else(|| anyhow!("failed to open a replica of the remote database"))?;
        if !manager.sync().await {
            warn!("replica could not be synced; results may be incomplete");
        }
        Ok(Self {
            replica,
            manager: Some(manager),
        })
    }

    fn conn(&self) -> &dyn ReplicaConnection {
        self.replica.connection().as_ref()
    }

    async fn close(self) {
        match self.manager {
            Some(manager) => manager.close().await,
            None => self.replica.connection().close().await,
        }
    }
}

fn sessions(db: Option<PathBuf>, command: SessionsCommand) -> Result<()> {
    let config = load_config()?;
    let runtime = runtime()?;
    runtime.block_on(async {
        let handle = ReadHandle::open(db.as_deref(), &config).await?;
        let result = run_sessions(handle.conn(), command).await;
        handle.close().await;
        result
    })
}

async fn run_sessions(conn: &dyn ReplicaConnection, command: SessionsCommand) -> Result<()> {
    match command {
        SessionsCommand::List {
            limit,
            offset,
            agent_type,
            status,
            after,
            before,
        } => {
            let options = ListSessionsOptions {
                limit,
                offset,
                agent_type,
                status,
                started_after: after,
                started_before: before,
            };
            let sessions = list_sessions(conn, &options).await?;
            print_summaries(&sessions);
        }
        SessionsCommand::Show { session_id, json } => {
            let detail = get_session(conn, &session_id)
                .await?
                .ok_or_else(|| anyhow!("session not found: {session_id}"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&detail)?);
                return Ok(());
            }
            println!("session_id: {}", detail.id);
            println!("agent_type: {}", detail.agent_type);
            println!("model: {}", detail.model);
            println!("provider: {}", detail.provider.as_deref().unwrap_or("-"));
            println!("status: {}", detail.status);
            println!("started_at: {}", detail.started_at);
            println!("ended_at: {}", detail.ended_at.as_deref().unwrap_or("-"));
            if let Some(error) = &detail.error_message {
                println!("error: {error}");
            }
            println!("messages: {}", detail.messages.len());
            for message in &detail.messages {
                let content = message.content.as_deref().unwrap_or("");
                println!(
                    "- #{} [{}] {}{}",
                    message.sequence,
                    message.role,
                    truncate(content, 120),
                    message
                        .tool_name
                        .as_deref()
                        .map(|t| format!(" (tool: {t})"))
                        .unwrap_or_default()
                );
            }
            println!("tool_executions: {}", detail.tool_executions.len());
            for tool in &detail.tool_executions {
                println!(
                    "- {} {} duration_ms={}",
                    tool.tool_name,
                    tool.status,
                    tool.duration_ms
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
        }
        SessionsCommand::Search { query, limit } => {
            let sessions = search_sessions(conn, &query, limit).await?;
            print_summaries(&sessions);
        }
    }
    Ok(())
}

fn stats(db: Option<PathBuf>, agent_type: Option<String>, since: Option<String>) -> Result<()> {
    let config = load_config()?;
    let runtime = runtime()?;
    runtime.block_on(async {
        let handle = ReadHandle::open(db.as_deref(), &config).await?;
        let result = session_stats(handle.conn(), agent_type.as_deref(), since.as_deref()).await;
        handle.close().await;
        let stats = result?;

        println!("total_sessions: {}", stats.total_sessions);
        println!("completed_sessions: {}", stats.completed_sessions);
        println!("error_sessions: {}", stats.error_sessions);
        println!("total_messages: {}", stats.total_messages);
        println!("total_tool_executions: {}", stats.total_tool_executions);
        println!(
            "avg_messages_per_session: {:.2}",
            stats.avg_messages_per_session
        );
        Ok::<(), anyhow::Error>(())
    })
}

fn print_summaries(sessions: &[SessionSummary]) {
    println!("sessions: {}", sessions.len());
    for s in sessions {
        println!(
            "- {} [{}] {}/{} started={} messages={} tools={}",
            s.id, s.status, s.agent_type, s.model, s.started_at, s.message_count, s.tool_count
        );
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    let line = s.lines().next().unwrap_or("");
    if line.chars().count() <= max_chars && !s.contains('\n') {
        return line.to_string();
    }
    let cut: String = line.chars().take(max_chars).collect();
    format!("{cut}...")
}
