//! Local embedded replica of the remote telemetry database. Without a remote
//! configured, [`ReplicaManager`] never touches the filesystem or network.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use libsql::{Builder, Connection, Database, Value};
use runlog_common::{RemoteConfig, RunlogConfig};
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::rows::Row;
use crate::schema::SchemaProvisioner;

const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait ReplicaConnection: Send + Sync {
    async fn execute(&self, sql: &str, args: Vec<Value>) -> Result<u64, StoreError>;

    async fn query(&self, sql: &str, args: Vec<Value>) -> Result<Vec<Row>, StoreError>;

    async fn sync(&self) -> Result<(), StoreError>;

    /// Later calls fail with [`StoreError::Closed`].
    async fn close(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplicaMode {
    Local,
    Remote,
}

struct Handle {
    db: Database,
    conn: Connection,
}

pub struct LibsqlReplica {
    path: PathBuf,
    mode: ReplicaMode,
    handle: Mutex<Option<Arc<Handle>>>,
}

impl LibsqlReplica {
    /// No sync interval is set; replication only happens through
    /// [`ReplicaConnection::sync`].
    pub async fn open_replica(path: &Path, remote: &RemoteConfig) -> Result<Self, StoreError> {
        ensure_parent(path)?;
        let db = Builder::new_remote_replica(path, remote.url.clone(), remote.auth_token.clone())
            .build()
            .await
            .map_err(|e| StoreError::Open {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        Self::from_database(path, ReplicaMode::Remote, db)
    }

    pub async fn open_local(path: &Path) -> Result<Self, StoreError> {
        ensure_parent(path)?;
        let db = Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Open {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        let replica = Self::from_database(path, ReplicaMode::Local, db)?;
        // Readers wait on a writer's lock instead of failing.
        replica.query("PRAGMA busy_timeout = 5000", Vec::new()).await?;
        Ok(replica)
    }

    fn from_database(path: &Path, mode: ReplicaMode, db: Database) -> Result<Self, StoreError> {
        let conn = db.connect().map_err(|e| StoreError::Open {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            mode,
            handle: Mutex::new(Some(Arc::new(Handle { db, conn }))),
        })
    }

    async fn handle(&self) -> Result<Arc<Handle>, StoreError> {
        self.handle.lock().await.clone().ok_or(StoreError::Closed)
    }
}

#[async_trait]
impl ReplicaConnection for LibsqlReplica {
    async fn execute(&self, sql: &str, args: Vec<Value>) -> Result<u64, StoreError> {
        let handle = self.handle().await?;
        let affected = handle
            .conn
            .execute(sql, libsql::params_from_iter(args))
            .await?;
        Ok(affected)
    }

    async fn query(&self, sql: &str, args: Vec<Value>) -> Result<Vec<Row>, StoreError> {
        let handle = self.handle().await?;
        let mut rows = handle
            .conn
            .query(sql, libsql::params_from_iter(args))
            .await?;
        let columns: Arc<[String]> = (0..rows.column_count())
            .map(|idx| rows.column_name(idx).unwrap_or_default().to_string())
            .collect();

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            let mut values = Vec::with_capacity(columns.len());
            for idx in 0..columns.len() {
                values.push(row.get_value(idx as i32)?);
            }
            out.push(Row::new(columns.clone(), values));
        }
        Ok(out)
    }

    async fn sync(&self) -> Result<(), StoreError> {
        if self.mode == ReplicaMode::Local {
            return Err(StoreError::Sync(format!(
                "{} is a local-only database with no remote",
                self.path.display()
            )));
        }
        let handle = self.handle().await?;
        handle
            .db
            .sync()
            .await
            .map_err(|e| StoreError::Sync(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) {
        if self.handle.lock().await.take().is_some() {
            debug!(path = %self.path.display(), "[Replica] connection closed");
        }
    }
}

fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

#[async_trait]
pub trait ReplicaOpener: Send + Sync {
    async fn open(&self, remote: &RemoteConfig) -> Result<Arc<dyn ReplicaConnection>, StoreError>;
}

/// One fresh `turso-session-<uuid>.db` file per open.
#[derive(Debug, Clone)]
pub struct LibsqlOpener {
    dir: PathBuf,
}

impl LibsqlOpener {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn session_path(&self) -> PathBuf {
        self.dir.join(format!("turso-session-{}.db", Uuid::new_v4()))
    }
}

#[async_trait]
impl ReplicaOpener for LibsqlOpener {
    async fn open(&self, remote: &RemoteConfig) -> Result<Arc<dyn ReplicaConnection>, StoreError> {
        let path = self.session_path();
        let replica = LibsqlReplica::open_replica(&path, remote).await?;
        info!(
            path = %path.display(),
            remote = %remote.remote_host(),
            "[Replica] embedded replica opened"
        );
        Ok(Arc::new(replica))
    }
}

#[derive(Clone)]
pub struct Replica {
    conn: Arc<dyn ReplicaConnection>,
    schema: Arc<SchemaProvisioner>,
}

impl Replica {
    pub fn new(conn: Arc<dyn ReplicaConnection>) -> Self {
        Self {
            conn,
            schema: Arc::new(SchemaProvisioner::new()),
        }
    }

    /// Bypasses the manager, for inspecting a replica left by an earlier run.
    pub async fn open_local(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(Arc::new(LibsqlReplica::open_local(path).await?)))
    }

    pub fn connection(&self) -> &Arc<dyn ReplicaConnection> {
        &self.conn
    }

    pub fn schema(&self) -> &SchemaProvisioner {
        &self.schema
    }

    pub async fn ensure_schema(&self) -> bool {
        self.schema.ensure_schema(self.conn.as_ref()).await
    }
}

pub struct ReplicaManager {
    remote: Option<RemoteConfig>,
    opener: Arc<dyn ReplicaOpener>,
    slot: Mutex<Option<Replica>>,
    sync_timeout: Duration,
}

impl ReplicaManager {
    pub fn new(remote: Option<RemoteConfig>, opener: Arc<dyn ReplicaOpener>) -> Self {
        Self {
            remote,
            opener,
            slot: Mutex::new(None),
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
        }
    }

    pub fn from_config(config: &RunlogConfig) -> Self {
        Self::new(
            RemoteConfig::resolve(),
            Arc::new(LibsqlOpener::new(config.replica_dir())),
        )
        .with_sync_timeout(config.sync_timeout())
    }

    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.remote.is_some()
    }

    pub fn sync_timeout(&self) -> Duration {
        self.sync_timeout
    }

    /// `None` when telemetry is disabled or the open failed.
    pub async fn get_or_create(&self) -> Option<Replica> {
        let remote = self.remote.as_ref()?;
        let mut slot = self.slot.lock().await;
        if let Some(replica) = slot.as_ref() {
            return Some(replica.clone());
        }

        match self.opener.open(remote).await {
            Ok(conn) => {
                let replica = Replica::new(conn);
                *slot = Some(replica.clone());
                Some(replica)
            }
            Err(err) => {
                error!("[Replica] Failed to open replica: {err}");
                None
            }
        }
    }

    pub async fn sync(&self) -> bool {
        let replica = self.slot.lock().await.clone();
        let Some(replica) = replica else {
            debug!("[Replica] sync skipped: no open replica");
            return false;
        };
        sync_with_timeout(replica.connection().as_ref(), self.sync_timeout).await
    }

    /// Does not sync first.
    pub async fn close(&self) {
        let replica = self.slot.lock().await.take();
        if let Some(replica) = replica {
            replica.connection().close().await;
            info!("[Replica] replica closed");
        }
    }
}

pub async fn sync_with_timeout(conn: &dyn ReplicaConnection, timeout: Duration) -> bool {
    let result = match tokio::time::timeout(timeout, conn.sync()).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::SyncTimeout(timeout)),
    };
    match result {
        Ok(()) => {
            info!("[Replica] Successfully synced local data to cloud");
            true
        }
        Err(err) => {
            error!("[Replica] Failed to sync to cloud: {err}");
            false
        }
    }
}
