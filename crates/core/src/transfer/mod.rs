//! Transfer engine
//!
//! Runs uploads, downloads and recursive deletes/renames as background
//! tasks. At most `max_concurrent_tasks` tasks run at once; the rest stay
//! `Pending` until a slot frees up. Each task carries a cancellation token
//! that is checked between chunks and between files, and task state is
//! published through the registry actor.

mod download;
pub mod multipart;
mod registry;
mod sink;
pub mod task;
mod upload;

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{Semaphore, watch};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::keystore::KeyStore;
use crate::lister;
use crate::traits::{CannedAcl, ObjectStore};

pub use download::{STAGING_SUFFIX, staging_path};
pub use registry::TaskSink;
pub use sink::{DirectorySink, FileSink};
pub use task::{ProgressUnit, TaskId, TaskKind, TaskStatus, TransferTask};

/// Default multipart threshold: 100 MiB
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 100 * 1024 * 1024;

/// Default chunk size: 5 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Default number of tasks running at once
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 4;

/// Engine tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// Payloads of at least this many bytes go through multipart/ranged paths
    pub multipart_threshold: u64,
    /// Part size for uploads and range size for downloads
    pub chunk_size: u64,
    pub max_concurrent_tasks: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
        }
    }
}

impl TransferConfig {
    /// Reject sizes the part and range planners cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be positive".into()));
        }
        if self.multipart_threshold < self.chunk_size {
            return Err(Error::Config(
                "multipart_threshold must not be smaller than chunk_size".into(),
            ));
        }
        Ok(())
    }
}

/// Per-upload options
#[derive(Debug, Clone, Default)]
pub struct TransferOptions {
    /// Encrypt client-side under this key alias
    pub encryption_key: Option<String>,
    pub content_type: Option<String>,
    pub acl: Option<CannedAcl>,
}

/// Everything a running task needs
#[derive(Clone)]
pub(crate) struct TaskContext {
    id: TaskId,
    registry: registry::Registry,
    cancel: CancellationToken,
    store: Arc<dyn ObjectStore>,
    keys: Arc<dyn KeyStore>,
    config: TransferConfig,
}

impl TaskContext {
    pub(crate) fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    pub(crate) fn keys(&self) -> &dyn KeyStore {
        self.keys.as_ref()
    }

    pub(crate) fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub(crate) fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    pub(crate) fn progress(&self, completed: u64, total: u64) {
        self.registry.progress(self.id, completed, total);
    }
}

struct EngineInner {
    store: Arc<dyn ObjectStore>,
    keys: Arc<dyn KeyStore>,
    config: TransferConfig,
    registry: registry::Registry,
    tokens: Mutex<HashMap<TaskId, CancellationToken>>,
    next_id: AtomicU64,
    permits: Arc<Semaphore>,
}

/// Background transfer engine
///
/// Must be created inside a tokio runtime. Cloning is cheap; clones share
/// the same tasks.
#[derive(Clone)]
pub struct TransferEngine {
    inner: Arc<EngineInner>,
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn key_name(key: &str) -> String {
    key.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|n| !n.is_empty())
        .unwrap_or(key)
        .to_string()
}

impl TransferEngine {
    /// Fails with [`Error::Config`] when `config` does not validate
    pub fn new(
        store: Arc<dyn ObjectStore>,
        keys: Arc<dyn KeyStore>,
        config: TransferConfig,
    ) -> Result<Self> {
        Self::build(store, keys, config, None)
    }

    /// Engine that also pushes every task snapshot to `sink`
    pub fn with_sink(
        store: Arc<dyn ObjectStore>,
        keys: Arc<dyn KeyStore>,
        config: TransferConfig,
        sink: Arc<dyn TaskSink>,
    ) -> Result<Self> {
        Self::build(store, keys, config, Some(sink))
    }

    fn build(
        store: Arc<dyn ObjectStore>,
        keys: Arc<dyn KeyStore>,
        config: TransferConfig,
        sink: Option<Arc<dyn TaskSink>>,
    ) -> Result<Self> {
        config.validate()?;
        let permits = Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1)));
        Ok(Self {
            inner: Arc::new(EngineInner {
                store,
                keys,
                config,
                registry: registry::Registry::spawn(sink),
                tokens: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                permits,
            }),
        })
    }

    pub fn config(&self) -> &TransferConfig {
        &self.inner.config
    }

    fn tokens(&self) -> std::sync::MutexGuard<'_, HashMap<TaskId, CancellationToken>> {
        // The map holds plain tokens; a poisoned lock leaves it consistent.
        self.inner
            .tokens
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn submit<F, Fut>(&self, kind: TaskKind, name: String, unit: ProgressUnit, work: F) -> TaskId
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let id = TaskId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let cancel = CancellationToken::new();
        self.tokens().insert(id, cancel.clone());

        let registry = self.inner.registry.clone();
        registry.insert(TransferTask::new(id, kind, name.clone(), unit));

        let ctx = TaskContext {
            id,
            registry: registry.clone(),
            cancel: cancel.clone(),
            store: self.inner.store.clone(),
            keys: self.inner.keys.clone(),
            config: self.inner.config.clone(),
        };
        let engine = self.clone();
        let permits = self.inner.permits.clone();

        tokio::spawn(async move {
            let permit = tokio::select! {
                permit = permits.acquire_owned() => permit.ok(),
                _ = cancel.cancelled() => None,
            };

            let outcome = match permit {
                Some(_permit) => {
                    registry.status(id, TaskStatus::InProgress, None);
                    tracing::info!(task = %id, ?kind, %name, "task started");
                    // A panicking task still has to reach a terminal status.
                    match tokio::spawn(work(ctx)).await {
                        Ok(result) => result,
                        Err(e) if e.is_cancelled() => Err(Error::Cancelled),
                        Err(e) => Err(Error::General(format!("task panicked: {e}"))),
                    }
                }
                None => Err(Error::Cancelled),
            };

            engine.tokens().remove(&id);
            match outcome {
                Ok(()) => {
                    tracing::info!(task = %id, %name, "task completed");
                    registry.status(id, TaskStatus::Completed, None);
                }
                Err(Error::Cancelled) => {
                    tracing::info!(task = %id, %name, "task cancelled");
                    registry.status(id, TaskStatus::Cancelled, None);
                }
                Err(e) => {
                    tracing::warn!(task = %id, %name, error = %e, "task failed");
                    registry.status(id, TaskStatus::Failed, Some(e.to_string()));
                }
            }
        });

        id
    }

    /// Upload one local file to `bucket/key`
    pub fn upload_file(
        &self,
        source: impl Into<PathBuf>,
        bucket: impl Into<String>,
        key: impl Into<String>,
        options: TransferOptions,
    ) -> TaskId {
        let source = source.into();
        let (bucket, key) = (bucket.into(), key.into());
        self.submit(TaskKind::Upload, display_name(&source), ProgressUnit::Bytes, move |ctx| async move {
            upload::upload_file(&ctx, &source, &bucket, &key, &options, &|done, total| {
                ctx.progress(done, total)
            })
            .await
        })
    }

    /// Upload a local directory tree under `prefix`, skipping hidden entries
    pub fn upload_tree(
        &self,
        root: impl Into<PathBuf>,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        options: TransferOptions,
    ) -> TaskId {
        let root = root.into();
        let (bucket, prefix) = (bucket.into(), prefix.into());
        self.submit(TaskKind::Upload, display_name(&root), ProgressUnit::Files, move |ctx| async move {
            upload::upload_tree(&ctx, &root, &bucket, &prefix, &options).await
        })
    }

    /// Download `bucket/key` to a local file
    pub fn download_file(
        &self,
        bucket: impl Into<String>,
        key: impl Into<String>,
        destination: impl Into<PathBuf>,
    ) -> TaskId {
        let (bucket, key) = (bucket.into(), key.into());
        let destination = destination.into();
        self.submit(TaskKind::Download, key_name(&key), ProgressUnit::Bytes, move |ctx| async move {
            download::download_file(&ctx, &bucket, &key, &destination, &|done, total| {
                ctx.progress(done, total)
            })
            .await
        })
    }

    /// Download `bucket/key` to wherever `sink` places its file name
    pub fn download_to_sink(
        &self,
        bucket: impl Into<String>,
        key: impl Into<String>,
        sink: &dyn FileSink,
    ) -> Result<TaskId> {
        let key = key.into();
        let destination = sink.choose_destination(&key_name(&key))?;
        Ok(self.download_file(bucket, key, destination))
    }

    /// Download every object under `prefix` into a local directory
    pub fn download_tree(
        &self,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        root: impl Into<PathBuf>,
    ) -> TaskId {
        let (bucket, prefix) = (bucket.into(), prefix.into());
        let root = root.into();
        self.submit(TaskKind::Download, key_name(&prefix), ProgressUnit::Files, move |ctx| async move {
            download::download_tree(&ctx, &bucket, &prefix, &root).await
        })
    }

    /// Delete every object under `prefix`
    pub fn delete_tree(&self, bucket: impl Into<String>, prefix: impl Into<String>) -> TaskId {
        let (bucket, prefix) = (bucket.into(), prefix.into());
        self.submit(TaskKind::Delete, prefix.clone(), ProgressUnit::Objects, move |ctx| async move {
            lister::delete_recursive(ctx.store(), &bucket, &prefix, &ctx.cancel, |p| {
                ctx.progress(p.completed as u64, p.total as u64)
            })
            .await
            .map(|_| ())
        })
    }

    /// Move every object under `old_prefix` to `new_prefix`
    pub fn rename_tree(
        &self,
        bucket: impl Into<String>,
        old_prefix: impl Into<String>,
        new_prefix: impl Into<String>,
    ) -> TaskId {
        let bucket = bucket.into();
        let (old_prefix, new_prefix) = (old_prefix.into(), new_prefix.into());
        let name = format!("{old_prefix} -> {new_prefix}");
        self.submit(TaskKind::Rename, name, ProgressUnit::Objects, move |ctx| async move {
            lister::rename_recursive(ctx.store(), &bucket, &old_prefix, &new_prefix, &ctx.cancel, |p| {
                ctx.progress(p.completed as u64, p.total as u64)
            })
            .await
            .map(|_| ())
        })
    }

    /// Request cancellation; returns false if the task is unknown or finished
    pub fn cancel(&self, id: TaskId) -> bool {
        match self.tokens().get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every live task
    pub fn cancel_all(&self) {
        for token in self.tokens().values() {
            token.cancel();
        }
    }

    /// Watch task snapshots
    pub fn subscribe(&self) -> watch::Receiver<Vec<TransferTask>> {
        self.inner.registry.subscribe()
    }

    /// Last published snapshot of all tasks
    pub fn tasks(&self) -> Vec<TransferTask> {
        self.inner.registry.snapshot()
    }

    /// Current state of one task
    pub async fn task(&self, id: TaskId) -> Option<TransferTask> {
        self.inner.registry.get(id).await
    }

    /// Wait until a task reaches a terminal status
    ///
    /// Returns `None` for unknown or removed tasks.
    pub async fn wait(&self, id: TaskId) -> Option<TransferTask> {
        let mut rx = self.subscribe();
        loop {
            let _ = rx.borrow_and_update();
            let task = self.task(id).await?;
            if task.status.is_terminal() {
                return Some(task);
            }
            if rx.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Drop a finished task from the registry
    pub async fn remove(&self, id: TaskId) -> bool {
        self.inner.registry.remove(id).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::crypto::generate_key;
    use crate::keystore::MemoryKeyStore;
    use crate::testing::{Call, MemoryStore};
    use crate::traits::ByteRange;
    use tempfile::TempDir;

    mockall::mock! {
        Keys {}
        impl KeyStore for Keys {
            fn key(&self, alias: &str) -> Result<Option<Vec<u8>>>;
        }
    }

    fn small_config() -> TransferConfig {
        TransferConfig {
            multipart_threshold: 10,
            chunk_size: 4,
            max_concurrent_tasks: 2,
        }
    }

    fn engine_with(store: &Arc<MemoryStore>, keys: Arc<dyn KeyStore>) -> TransferEngine {
        TransferEngine::new(store.clone(), keys, small_config()).unwrap()
    }

    fn engine(store: &Arc<MemoryStore>) -> TransferEngine {
        engine_with(store, Arc::new(MemoryKeyStore::new()))
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn write_file(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    fn uploaded_parts(store: &MemoryStore) -> Vec<u32> {
        store
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::UploadPart { part_number, .. } => Some(part_number),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_upload_below_threshold_is_single_put() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(&store);
        let dir = TempDir::new().unwrap();
        let src = write_file(&dir, "small.bin", &payload(9));

        let id = engine.upload_file(&src, "b", "small.bin", TransferOptions::default());
        let task = engine.wait(id).await.unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 1.0);
        assert_eq!(store.count_calls(|c| matches!(c, Call::Put { .. })), 1);
        assert_eq!(store.count_calls(|c| matches!(c, Call::CreateMultipart { .. })), 0);
        assert_eq!(store.object("b", "small.bin").unwrap(), payload(9));
    }

    #[tokio::test]
    async fn test_upload_at_threshold_uses_multipart() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(&store);
        let dir = TempDir::new().unwrap();
        let src = write_file(&dir, "edge.bin", &payload(10));

        let id = engine.upload_file(&src, "b", "edge.bin", TransferOptions::default());
        assert_eq!(engine.wait(id).await.unwrap().status, TaskStatus::Completed);

        assert_eq!(store.count_calls(|c| matches!(c, Call::Put { .. })), 0);
        assert_eq!(uploaded_parts(&store), vec![1, 2, 3]);
        assert_eq!(store.object("b", "edge.bin").unwrap(), payload(10));
    }

    #[tokio::test]
    async fn test_upload_resumes_missing_parts_only() {
        let store = Arc::new(MemoryStore::new());
        let data = payload(20);
        store.seed_session("b", "big.bin", vec![data[0..4].to_vec(), data[4..8].to_vec()]);
        let engine = engine(&store);
        let dir = TempDir::new().unwrap();
        let src = write_file(&dir, "big.bin", &data);

        let id = engine.upload_file(&src, "b", "big.bin", TransferOptions::default());
        assert_eq!(engine.wait(id).await.unwrap().status, TaskStatus::Completed);

        assert_eq!(store.count_calls(|c| matches!(c, Call::CreateMultipart { .. })), 0);
        assert_eq!(uploaded_parts(&store), vec![3, 4, 5]);
        let completed: Vec<Vec<u32>> = store
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Complete { parts, .. } => Some(parts),
                _ => None,
            })
            .collect();
        assert_eq!(completed, vec![vec![1, 2, 3, 4, 5]]);
        assert_eq!(store.object("b", "big.bin").unwrap(), data);
    }

    #[tokio::test]
    async fn test_upload_resumes_newest_session_and_aborts_older() {
        let store = Arc::new(MemoryStore::new());
        let data = payload(20);
        let older = store.seed_session("b", "big.bin", vec![data[0..4].to_vec()]);
        let newer = store.seed_session("b", "big.bin", vec![data[0..4].to_vec(), data[4..8].to_vec()]);
        let engine = engine(&store);
        let dir = TempDir::new().unwrap();
        let src = write_file(&dir, "big.bin", &data);

        let id = engine.upload_file(&src, "b", "big.bin", TransferOptions::default());
        assert_eq!(engine.wait(id).await.unwrap().status, TaskStatus::Completed);

        assert!(store.calls().contains(&Call::Abort { upload_id: older }));
        assert!(!store.calls().contains(&Call::Abort { upload_id: newer }));
        assert_eq!(uploaded_parts(&store), vec![3, 4, 5]);
        assert!(store.session_ids().is_empty());
        assert_eq!(store.object("b", "big.bin").unwrap(), data);
    }

    #[tokio::test]
    async fn test_upload_discards_session_with_other_part_size() {
        let store = Arc::new(MemoryStore::new());
        let data = payload(20);
        let stale = store.seed_session("b", "big.bin", vec![data[0..3].to_vec()]);
        let engine = engine(&store);
        let dir = TempDir::new().unwrap();
        let src = write_file(&dir, "big.bin", &data);

        let id = engine.upload_file(&src, "b", "big.bin", TransferOptions::default());
        assert_eq!(engine.wait(id).await.unwrap().status, TaskStatus::Completed);

        assert!(store.calls().contains(&Call::Abort { upload_id: stale }));
        assert_eq!(store.count_calls(|c| matches!(c, Call::CreateMultipart { .. })), 1);
        assert_eq!(uploaded_parts(&store), vec![1, 2, 3, 4, 5]);
        assert_eq!(store.object("b", "big.bin").unwrap(), data);
    }

    #[tokio::test]
    async fn test_cancel_leaves_session_open() {
        let store = Arc::new(MemoryStore::new());
        let gate = store.gate_part(2);
        let engine = engine(&store);
        let dir = TempDir::new().unwrap();
        let src = write_file(&dir, "big.bin", &payload(20));

        let id = engine.upload_file(&src, "b", "big.bin", TransferOptions::default());
        gate.reached.notified().await;
        assert!(engine.cancel(id));
        gate.release.notify_one();

        let task = engine.wait(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.error_message.is_none());
        assert!(!engine.cancel(id));

        let sessions = store.session_ids();
        assert_eq!(sessions.len(), 1);
        assert_eq!(store.session_parts(&sessions[0]), vec![1, 2]);
        assert_eq!(store.count_calls(|c| matches!(c, Call::Abort { .. })), 0);
        assert!(store.object("b", "big.bin").is_none());
    }

    #[tokio::test]
    async fn test_tasks_beyond_limit_stay_pending() {
        let store = Arc::new(MemoryStore::new());
        let gate = store.gate_part(1);
        let engine = TransferEngine::new(
            store.clone(),
            Arc::new(MemoryKeyStore::new()),
            TransferConfig {
                max_concurrent_tasks: 1,
                ..small_config()
            },
        )
        .unwrap();
        let dir = TempDir::new().unwrap();
        let big = write_file(&dir, "big.bin", &payload(12));
        let small = write_file(&dir, "small.bin", &payload(3));

        let first = engine.upload_file(&big, "b", "big.bin", TransferOptions::default());
        gate.reached.notified().await;
        let second = engine.upload_file(&small, "b", "small.bin", TransferOptions::default());

        tokio::task::yield_now().await;
        assert_eq!(engine.task(first).await.unwrap().status, TaskStatus::InProgress);
        assert_eq!(engine.task(second).await.unwrap().status, TaskStatus::Pending);

        gate.release.notify_one();
        assert_eq!(engine.wait(second).await.unwrap().status, TaskStatus::Completed);
        assert_eq!(engine.wait(first).await.unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_failed_upload_reports_message() {
        let store = Arc::new(MemoryStore::new());
        store.fail_put("small.bin");
        let engine = engine(&store);
        let dir = TempDir::new().unwrap();
        let src = write_file(&dir, "small.bin", b"abc");

        let id = engine.upload_file(&src, "b", "small.bin", TransferOptions::default());
        let task = engine.wait(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error_message.unwrap().contains("500"));

        assert!(engine.remove(id).await);
        assert!(engine.wait(id).await.is_none());
    }

    #[tokio::test]
    async fn test_engine_rejects_unusable_chunk_sizes() {
        let store = Arc::new(MemoryStore::new());
        let keys: Arc<dyn KeyStore> = Arc::new(MemoryKeyStore::new());
        for config in [
            TransferConfig {
                multipart_threshold: 4,
                chunk_size: 0,
                ..small_config()
            },
            TransferConfig {
                multipart_threshold: 3,
                chunk_size: 4,
                ..small_config()
            },
        ] {
            let result = TransferEngine::new(store.clone(), keys.clone(), config.clone());
            assert!(
                matches!(result, Err(Error::Config(_))),
                "{config:?} accepted"
            );
        }
    }

    #[tokio::test]
    async fn test_panicking_task_ends_failed() {
        fn explode() -> Result<()> {
            panic!("part planner blew up")
        }

        let store = Arc::new(MemoryStore::new());
        let engine = engine(&store);
        let dir = TempDir::new().unwrap();

        let id = engine.submit(TaskKind::Upload, "boom".into(), ProgressUnit::Bytes, |_ctx| async {
            explode()
        });
        let task = tokio::time::timeout(std::time::Duration::from_secs(5), engine.wait(id))
            .await
            .expect("task never reached a terminal status")
            .unwrap();

        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error_message.unwrap().contains("panicked"));
        assert!(!engine.cancel(id));

        let src = write_file(&dir, "ok.bin", b"ok");
        let after = engine.upload_file(&src, "b", "ok.bin", TransferOptions::default());
        assert_eq!(engine.wait(after).await.unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_ranged_download_resumes_from_staging() {
        let store = Arc::new(MemoryStore::new());
        let data = payload(22);
        store.insert("b", "big.bin", data.clone());
        let engine = engine(&store);
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("out/big.bin");
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
        std::fs::write(staging_path(&dest), &data[..8]).unwrap();

        let id = engine.download_file("b", "big.bin", &dest);
        let task = engine.wait(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.completed_units, 22);

        let ranges: Vec<Option<ByteRange>> = store
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Get { range, .. } => Some(range),
                _ => None,
            })
            .collect();
        assert_eq!(
            ranges,
            vec![
                Some(ByteRange { start: 8, end: 11 }),
                Some(ByteRange { start: 12, end: 15 }),
                Some(ByteRange { start: 16, end: 19 }),
                Some(ByteRange { start: 20, end: 21 }),
            ]
        );
        assert_eq!(std::fs::read(&dest).unwrap(), data);
        assert!(!staging_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_cancelled_ranged_download_keeps_staging() {
        let store = Arc::new(MemoryStore::new());
        let data = payload(22);
        store.insert("b", "big.bin", data.clone());
        let gate = store.gate_range(8);
        let engine = engine(&store);
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("big.bin");

        let id = engine.download_file("b", "big.bin", &dest);
        gate.reached.notified().await;
        assert!(engine.cancel(id));
        gate.release.notify_one();

        let task = engine.wait(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.error_message.is_none());
        assert!(!dest.exists());
        assert_eq!(std::fs::read(staging_path(&dest)).unwrap(), &data[..12]);

        let id = engine.download_file("b", "big.bin", &dest);
        assert_eq!(engine.wait(id).await.unwrap().status, TaskStatus::Completed);
        let resumed = store
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Get { range: Some(r), .. } => Some(r.start),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(resumed, vec![0, 4, 8, 12, 16, 20]);
        assert_eq!(std::fs::read(&dest).unwrap(), data);
    }

    #[tokio::test]
    async fn test_download_restarts_oversized_staging() {
        let store = Arc::new(MemoryStore::new());
        let data = payload(12);
        store.insert("b", "big.bin", data.clone());
        let engine = engine(&store);
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("big.bin");
        std::fs::write(staging_path(&dest), vec![9u8; 30]).unwrap();

        let id = engine.download_file("b", "big.bin", &dest);
        assert_eq!(engine.wait(id).await.unwrap().status, TaskStatus::Completed);
        assert_eq!(std::fs::read(&dest).unwrap(), data);
    }

    #[tokio::test]
    async fn test_download_to_sink_uses_key_file_name() {
        let store = Arc::new(MemoryStore::new());
        store.insert("b", "docs/a.txt", b"abc".to_vec());
        let engine = engine(&store);
        let dir = TempDir::new().unwrap();

        let id = engine
            .download_to_sink("b", "docs/a.txt", &DirectorySink::new(dir.path()))
            .unwrap();
        assert_eq!(engine.wait(id).await.unwrap().status, TaskStatus::Completed);
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_encrypted_round_trip() {
        let store = Arc::new(MemoryStore::new());
        let keys = Arc::new(MemoryKeyStore::new());
        keys.insert("vault", generate_key().to_vec());
        let engine = engine_with(&store, keys);
        let dir = TempDir::new().unwrap();
        let src = write_file(&dir, "secret.txt", b"top secret");

        let options = TransferOptions {
            encryption_key: Some("vault".into()),
            ..Default::default()
        };
        let id = engine.upload_file(&src, "b", "secret.txt", options);
        assert_eq!(engine.wait(id).await.unwrap().status, TaskStatus::Completed);

        let stored = store.object("b", "secret.txt").unwrap();
        assert_ne!(stored, b"top secret");
        let metadata = store.metadata("b", "secret.txt").unwrap();
        assert_eq!(metadata.get("encrypted").map(String::as_str), Some("true"));
        assert_eq!(metadata.get("encryption-key-alias").map(String::as_str), Some("vault"));

        let dest = dir.path().join("plain.txt");
        let id = engine.download_file("b", "secret.txt", &dest);
        assert_eq!(engine.wait(id).await.unwrap().status, TaskStatus::Completed);
        assert_eq!(std::fs::read(&dest).unwrap(), b"top secret");
    }

    #[tokio::test]
    async fn test_encrypted_upload_never_resumes() {
        let store = Arc::new(MemoryStore::new());
        let stale = store.seed_session("b", "secret.txt", vec![vec![0u8; 4]]);
        let keys = Arc::new(MemoryKeyStore::new());
        keys.insert("vault", generate_key().to_vec());
        let engine = engine_with(&store, keys);
        let dir = TempDir::new().unwrap();
        let src = write_file(&dir, "secret.txt", &payload(16));

        let options = TransferOptions {
            encryption_key: Some("vault".into()),
            ..Default::default()
        };
        let id = engine.upload_file(&src, "b", "secret.txt", options);
        assert_eq!(engine.wait(id).await.unwrap().status, TaskStatus::Completed);

        assert!(store.calls().contains(&Call::Abort { upload_id: stale }));
        assert_eq!(store.count_calls(|c| matches!(c, Call::ListParts { .. })), 0);
        assert_eq!(uploaded_parts(&store).first(), Some(&1));
    }

    #[tokio::test]
    async fn test_download_with_unknown_key_alias_fails() {
        let store = Arc::new(MemoryStore::new());
        let metadata = BTreeMap::from([
            ("encrypted".to_string(), "true".to_string()),
            ("encryption-key-alias".to_string(), "gone".to_string()),
        ]);
        store.insert_with_metadata("b", "locked.bin", vec![1, 2, 3], metadata);

        let mut keys = MockKeys::new();
        keys.expect_key().times(1).returning(|alias| {
            assert_eq!(alias, "gone");
            Ok(None)
        });
        let engine = engine_with(&store, Arc::new(keys));
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("locked.bin");

        let id = engine.download_file("b", "locked.bin", &dest);
        let task = engine.wait(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error_message.unwrap().contains("gone"));
        assert!(!dest.exists());
        assert_eq!(store.count_calls(|c| matches!(c, Call::Get { .. })), 0);
    }

    #[tokio::test]
    async fn test_upload_tree_counts_files() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(&store);
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        write_file(&dir, "a.txt", b"a");
        write_file(&dir, ".hidden", b"h");
        write_file(&dir, "sub/b.txt", b"b");

        let id = engine.upload_tree(dir.path(), "b", "backup", TransferOptions::default());
        let task = engine.wait(id).await.unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.unit, ProgressUnit::Files);
        assert_eq!((task.completed_units, task.total_units), (2, 2));
        assert_eq!(store.keys("b"), vec!["backup/a.txt", "backup/sub/b.txt"]);
    }

    #[tokio::test]
    async fn test_download_tree_skips_folders() {
        let store = Arc::new(MemoryStore::new());
        store.insert("b", "docs/", vec![]);
        store.insert("b", "docs/a.txt", b"a".to_vec());
        store.insert("b", "docs/sub/b.txt", b"bb".to_vec());
        let engine = engine(&store);
        let dir = TempDir::new().unwrap();

        let id = engine.download_tree("b", "docs/", dir.path());
        let task = engine.wait(id).await.unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.total_units, 2);
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"a");
        assert_eq!(std::fs::read(dir.path().join("sub/b.txt")).unwrap(), b"bb");
    }

    #[tokio::test]
    async fn test_download_tree_prefix_is_a_folder() {
        let store = Arc::new(MemoryStore::new());
        store.insert("b", "docs/a.txt", b"a".to_vec());
        store.insert("b", "docs-old/x.txt", b"x".to_vec());
        let engine = engine(&store);
        let dir = TempDir::new().unwrap();

        let id = engine.download_tree("b", "docs", dir.path());
        let task = engine.wait(id).await.unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.total_units, 1);
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"a");
        assert!(!dir.path().join("-old").exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_delete_and_rename_tasks() {
        let store = Arc::new(MemoryStore::new());
        for key in ["old/", "old/a", "old/b/c", "gone/x"] {
            store.insert("b", key, vec![1]);
        }
        let engine = engine(&store);

        let renamed = engine.rename_tree("b", "old/", "new/");
        let task = engine.wait(renamed).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.total_units, 3);

        let deleted = engine.delete_tree("b", "gone/");
        assert_eq!(engine.wait(deleted).await.unwrap().status, TaskStatus::Completed);

        assert_eq!(store.keys("b"), vec!["new/", "new/a", "new/b/c"]);
    }
}
