#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use runlog_common::RemoteConfig;
use runlog_store::{LibsqlReplica, ReplicaConnection, ReplicaOpener, Row, StoreError, Value};
use tempfile::TempDir;

#[derive(Debug, Clone)]
pub enum Failure {
    Never,
    Always,
    /// Fails only the n-th execute (1-based), counted from when it was set.
    Nth(usize),
    /// Fails the next execute whose SQL contains the pattern, once.
    NextMatching(String),
}

/// A real local libSQL file behind a connection that counts calls and can be
/// told to fail.
pub struct FakeConnection {
    inner: LibsqlReplica,
    executes: AtomicUsize,
    failure: Mutex<(Failure, usize)>,
    fail_queries: AtomicBool,
    sync_ok: AtomicBool,
    sync_delay: Mutex<Option<Duration>>,
    syncs: AtomicUsize,
    closed: AtomicBool,
}

impl FakeConnection {
    pub async fn open(path: &Path) -> Arc<Self> {
        let inner = LibsqlReplica::open_local(path)
            .await
            .expect("open local libsql file");
        Arc::new(Self {
            inner,
            executes: AtomicUsize::new(0),
            failure: Mutex::new((Failure::Never, 0)),
            fail_queries: AtomicBool::new(false),
            sync_ok: AtomicBool::new(true),
            sync_delay: Mutex::new(None),
            syncs: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn executes(&self) -> usize {
        self.executes.load(Ordering::SeqCst)
    }

    pub fn syncs(&self) -> usize {
        self.syncs.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn set_failure(&self, failure: Failure) {
        *self.failure.lock().expect("failure lock") = (failure, 0);
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    pub fn set_sync_ok(&self, ok: bool) {
        self.sync_ok.store(ok, Ordering::SeqCst);
    }

    pub fn set_sync_delay(&self, delay: Duration) {
        *self.sync_delay.lock().expect("delay lock") = Some(delay);
    }

    fn should_fail(&self, sql: &str) -> bool {
        let mut guard = self.failure.lock().expect("failure lock");
        guard.1 += 1;
        let seen = guard.1;
        match &guard.0 {
            Failure::Never => false,
            Failure::Always => true,
            Failure::Nth(n) => seen == *n,
            Failure::NextMatching(pattern) => {
                if sql.contains(pattern.as_str()) {
                    guard.0 = Failure::Never;
                    true
                } else {
                    false
                }
            }
        }
    }
}

#[async_trait]
impl ReplicaConnection for FakeConnection {
    async fn execute(&self, sql: &str, args: Vec<Value>) -> Result<u64, StoreError> {
        self.executes.fetch_add(1, Ordering::SeqCst);
        if self.should_fail(sql) {
            return Err(StoreError::Query("injected execute failure".to_string()));
        }
        self.inner.execute(sql, args).await
    }

    async fn query(&self, sql: &str, args: Vec<Value>) -> Result<Vec<Row>, StoreError> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(StoreError::Query("injected query failure".to_string()));
        }
        self.inner.query(sql, args).await
    }

    async fn sync(&self) -> Result<(), StoreError> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        let delay = *self.sync_delay.lock().expect("delay lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.sync_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Sync("remote rejected sync".to_string()))
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.inner.close().await;
    }
}

/// Temp directory plus one fake connection inside it.
pub struct TestDb {
    pub dir: TempDir,
    pub conn: Arc<FakeConnection>,
}

impl TestDb {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = FakeConnection::open(&dir.path().join("telemetry.db")).await;
        Self { dir, conn }
    }

    pub fn dyn_conn(&self) -> Arc<dyn ReplicaConnection> {
        self.conn.clone()
    }

    pub async fn count(&self, sql: &str) -> i64 {
        let rows = self
            .conn
            .query(sql, Vec::new())
            .await
            .expect("count query");
        rows[0]
            .columns()
            .first()
            .and_then(|c| rows[0].opt_i64(c))
            .expect("count value")
    }
}

/// Opens fake connections under a directory and records every open.
pub struct CountingOpener {
    dir: PathBuf,
    opens: AtomicUsize,
    fail: AtomicBool,
    opened: Mutex<Vec<Arc<FakeConnection>>>,
}

impl CountingOpener {
    pub fn new(dir: &Path) -> Arc<Self> {
        Arc::new(Self {
            dir: dir.to_path_buf(),
            opens: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            opened: Mutex::new(Vec::new()),
        })
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn opened(&self) -> Vec<Arc<FakeConnection>> {
        self.opened.lock().expect("opened lock").clone()
    }
}

#[async_trait]
impl ReplicaOpener for CountingOpener {
    async fn open(&self, _remote: &RemoteConfig) -> Result<Arc<dyn ReplicaConnection>, StoreError> {
        let n = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Open {
                path: self.dir.clone(),
                message: "remote unreachable".to_string(),
            });
        }
        let conn = FakeConnection::open(&self.dir.join(format!("replica-{n}.db"))).await;
        self.opened.lock().expect("opened lock").push(conn.clone());
        Ok(conn)
    }
}

pub fn remote() -> RemoteConfig {
    RemoteConfig::from_lookup(|key| match key {
        "TURSO_DATABASE_URL" => Some("libsql://telemetry-example.turso.io".to_string()),
        "TURSO_AUTH_TOKEN" => Some("secret-token".to_string()),
        _ => None,
    })
    .expect("remote config")
}
