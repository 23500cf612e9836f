//! End-to-end tests for the transfer engine against in-memory fakes

use super::*;
use crate::api::{Dataset, DatasetStatus, RemoteDataset, RemoteFile, RemoteService};
use crate::transfer::core::files::{create_temp_path, ensure_parent_dir};
use crate::transfer::core::http::DownloadedFile;
use crate::transfer::core::{InFlightGauge, StreamingDigest};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

const INFO: &str = r#"{
    "codebase_version": "v3.0",
    "robot_type": "so100",
    "total_episodes": 2,
    "total_frames": 20,
    "fps": 30,
    "data_path": "data/chunk-{chunk_index:03d}/file-{file_index:03d}.parquet",
    "features": {
        "action": {"dtype": "float32", "shape": [6]},
        "observation.images.top": {"dtype": "video", "shape": [480, 640, 3]}
    }
}"#;

type Storage = Arc<Mutex<BTreeMap<String, Vec<u8>>>>;

/// Helper struct to capture progress events during testing
#[derive(Debug, Default)]
struct ProgressCapture {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl ProgressCapture {
    fn new() -> Self {
        Self::default()
    }

    fn get_callback(&self) -> ProgressCallback {
        let events = self.events.clone();
        Arc::new(move |event| {
            events.lock().unwrap().push(event);
        })
    }

    fn count_events_of_type(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| match event {
                ProgressEvent::PhaseStarted { .. } => event_type == "phase_started",
                ProgressEvent::UnitStarted { .. } => event_type == "unit_started",
                ProgressEvent::UnitProgress { .. } => event_type == "unit_progress",
                ProgressEvent::UnitCompleted { .. } => event_type == "unit_completed",
                ProgressEvent::RetryAttempt { .. } => event_type == "retry_attempt",
                ProgressEvent::LocationRenegotiated { .. } => event_type == "location_renegotiated",
                ProgressEvent::ValidationComplete { .. } => event_type == "validation_complete",
                ProgressEvent::UnitFailed { .. } => event_type == "unit_failed",
                ProgressEvent::UnitSkipped { .. } => event_type == "unit_skipped",
                ProgressEvent::Warning { .. } => event_type == "warning",
            })
            .count()
    }
}

/// In-memory dataset service
#[derive(Default)]
struct FakeRemote {
    storage: Storage,
    negotiations: Mutex<HashMap<String, u32>>,
    expire_first: Mutex<HashSet<String>>,
    deny_auth: AtomicBool,
    fail_finalize: AtomicBool,
    finalize_calls: AtomicU32,
    manifest: Mutex<Option<RemoteDataset>>,
}

impl FakeRemote {
    fn new(storage: Storage) -> Self {
        Self { storage, ..Default::default() }
    }

    fn negotiations(&self, path: &str) -> u32 {
        self.negotiations.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    fn total_negotiations(&self) -> u32 {
        self.negotiations.lock().unwrap().values().sum()
    }

    fn negotiate(&self, relative_path: &str, direction: Direction) -> Result<RemoteLocation> {
        if self.deny_auth.load(Ordering::SeqCst) {
            return Err(TransferError::Authentication {
                message: "Session expired. Please login again.".to_string(),
            });
        }
        *self.negotiations.lock().unwrap().entry(relative_path.to_string()).or_default() += 1;

        let location = RemoteLocation::new(relative_path, format!("fake://{}", relative_path), direction);
        if self.expire_first.lock().unwrap().remove(relative_path) {
            return Ok(location.with_expiry(Utc::now() - chrono::Duration::seconds(1)));
        }
        Ok(location.with_expiry(Utc::now() + chrono::Duration::minutes(15)))
    }
}

#[async_trait]
impl RemoteService for FakeRemote {
    async fn negotiate_upload(&self, _dataset_id: &str, unit: &TransferUnit) -> Result<RemoteLocation> {
        self.negotiate(&unit.relative_path, Direction::Upload)
    }

    async fn negotiate_download(&self, _dataset_id: &str, relative_path: &str) -> Result<RemoteLocation> {
        self.negotiate(relative_path, Direction::Download)
    }

    async fn finalize(&self, dataset_id: &str) -> Result<Dataset> {
        self.finalize_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_finalize.load(Ordering::SeqCst) {
            return Err(TransferError::Api { status: 500, message: "finalize unavailable".to_string() });
        }
        Ok(Dataset {
            id: dataset_id.to_string(),
            name: "test".to_string(),
            description: None,
            task_category: None,
            episode_count: Some(2),
            total_frames: Some(20),
            fps: Some(30.0),
            robot_type: None,
            upload_status: DatasetStatus::Ready,
            organization_name: None,
            file_size_bytes: None,
            created_at: None,
        })
    }

    async fn get_manifest(&self, dataset_id: &str) -> Result<RemoteDataset> {
        self.manifest
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| TransferError::NotFound { what: format!("dataset {}", dataset_id) })
    }

    async fn remote_file_info(&self, _dataset_id: &str, relative_path: &str) -> Result<Option<RemoteFile>> {
        Ok(self.storage.lock().unwrap().get(relative_path).map(|bytes| RemoteFile {
            path: relative_path.to_string(),
            size: bytes.len() as u64,
            checksum: Some(Checksum::sha256_of(bytes)),
        }))
    }
}

/// Scripted misbehaviour for one call of the fake backend
#[derive(Debug, Clone, Copy)]
enum Fault {
    Transient,
    Corrupt,
    Hang,
}

/// Moves bytes between local files and [`Storage`]
#[derive(Default)]
struct FakeBackend {
    storage: Storage,
    faults: Mutex<HashMap<String, VecDeque<Fault>>>,
    started: Mutex<Vec<String>>,
    delay: Duration,
    gauge: InFlightGauge,
    hanging: Notify,
}

impl FakeBackend {
    fn new(storage: Storage) -> Self {
        Self { storage, ..Default::default() }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn script(&self, path: &str, faults: &[Fault]) {
        self.faults.lock().unwrap().insert(path.to_string(), faults.iter().copied().collect());
    }

    fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    fn calls(&self, path: &str) -> usize {
        self.started().iter().filter(|p| p.as_str() == path).count()
    }

    fn begin(&self, path: &str) -> Option<Fault> {
        self.started.lock().unwrap().push(path.to_string());
        self.faults.lock().unwrap().get_mut(path).and_then(|queue| queue.pop_front())
    }
}

fn unavailable(path: &str) -> TransferError {
    TransferError::HttpStatus { url: format!("fake://{}", path), status: 503, body: "busy".to_string() }
}

#[async_trait]
impl TransferBackend for FakeBackend {
    async fn upload(
        &self,
        location: &RemoteLocation,
        unit: &TransferUnit,
        _progress: Option<ProgressCallback>,
    ) -> Result<u64> {
        let _in_flight = self.gauge.enter();
        let fault = self.begin(&location.relative_path);
        tokio::time::sleep(self.delay).await;

        if let Some(Fault::Transient) = fault {
            return Err(unavailable(&location.relative_path));
        }

        let mut bytes = tokio::fs::read(&unit.local_path).await?;
        let sent = bytes.len() as u64;
        if let Some(Fault::Corrupt) = fault {
            bytes.pop();
        }
        self.storage.lock().unwrap().insert(location.relative_path.clone(), bytes);
        Ok(sent)
    }

    async fn download(
        &self,
        location: &RemoteLocation,
        unit: &TransferUnit,
        cancel: &CancellationToken,
        _progress: Option<ProgressCallback>,
    ) -> Result<DownloadedFile> {
        let _in_flight = self.gauge.enter();
        let fault = self.begin(&location.relative_path);
        tokio::time::sleep(self.delay).await;

        let temp_path = create_temp_path(&unit.local_path);
        ensure_parent_dir(&temp_path).await?;

        match fault {
            Some(Fault::Transient) => return Err(unavailable(&location.relative_path)),
            Some(Fault::Hang) => {
                tokio::fs::write(&temp_path, b"partial").await?;
                self.hanging.notify_one();
                cancel.cancelled().await;
                tokio::fs::remove_file(&temp_path).await?;
                return Err(TransferError::cancelled(Some(&unit.relative_path)));
            }
            _ => {}
        }

        let stored = self.storage.lock().unwrap().get(&location.relative_path).cloned();
        let mut bytes = stored.ok_or_else(|| unavailable(&location.relative_path))?;
        if let Some(Fault::Corrupt) = fault {
            if let Some(first) = bytes.first_mut() {
                *first ^= 0xff;
            }
        }
        tokio::fs::write(&temp_path, &bytes).await?;

        let digest = unit.checksum.as_ref().map(|expected| {
            let mut digest = StreamingDigest::like(expected);
            digest.update(&bytes);
            digest.finalize()
        });
        Ok(DownloadedFile { temp_path, bytes: bytes.len() as u64, digest })
    }
}

fn write(root: &Path, relative: &str, contents: &[u8]) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

/// A small v3 dataset: info, stats, tasks, three chunks and one video
fn local_dataset() -> TempDir {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(root, "meta/info.json", INFO.as_bytes());
    write(root, "meta/stats.json", br#"{"action": {"mean": [0.0]}}"#);
    write(root, "meta/tasks.jsonl", b"{\"task_index\": 0, \"task\": \"pick\"}\n");
    write(root, "data/chunk-000/file-000.parquet", b"chunk zero");
    write(root, "data/chunk-000/file-001.parquet", b"chunk one!");
    write(root, "data/chunk-000/file-002.parquet", b"chunk two!!");
    write(root, "videos/observation.images.top/chunk-000/file-000.mp4", b"not really a video");
    dir
}

/// One metadata file and three data chunks
fn small_units(root: &Path) -> Vec<TransferUnit> {
    write(root, "meta/info.json", INFO.as_bytes());
    write(root, "data/a.parquet", b"aaaa");
    write(root, "data/b.parquet", b"bbbbbb");
    write(root, "data/c.parquet", b"cc");
    vec![
        TransferUnit::new("meta/info.json", root.join("meta/info.json"), INFO.len() as u64, UnitRole::Metadata),
        TransferUnit::new("data/a.parquet", root.join("data/a.parquet"), 4, UnitRole::DataChunk),
        TransferUnit::new("data/b.parquet", root.join("data/b.parquet"), 6, UnitRole::DataChunk),
        TransferUnit::new("data/c.parquet", root.join("data/c.parquet"), 2, UnitRole::DataChunk),
    ]
}

fn fast_config() -> TransferConfig {
    TransferConfig {
        retry_delay: Duration::from_millis(1),
        max_retry_delay: Duration::from_millis(5),
        jitter: false,
        ..TransferConfig::default()
    }
}

struct Harness {
    storage: Storage,
    remote: Arc<FakeRemote>,
    backend: Arc<FakeBackend>,
}

impl Harness {
    fn new() -> Self {
        Self::with_backend(|storage| FakeBackend::new(storage))
    }

    fn with_backend(build: impl FnOnce(Storage) -> FakeBackend) -> Self {
        let storage: Storage = Arc::new(Mutex::new(BTreeMap::new()));
        Self {
            remote: Arc::new(FakeRemote::new(storage.clone())),
            backend: Arc::new(build(storage.clone())),
            storage,
        }
    }

    fn coordinator(&self, config: TransferConfig, direction: Direction) -> TransferCoordinator {
        TransferCoordinator::new(self.remote.clone(), self.backend.clone(), config, "ds_test", direction)
    }

    /// Publish what was uploaded so far as a downloadable dataset
    fn publish(&self) -> RemoteDataset {
        let storage = self.storage.lock().unwrap();
        let info = storage.get("meta/info.json").expect("info.json was uploaded");
        let manifest = DatasetManifest::parse(Path::new("remote"), std::str::from_utf8(info).unwrap()).unwrap();
        let files = storage
            .iter()
            .map(|(path, bytes)| RemoteFile {
                path: path.clone(),
                size: bytes.len() as u64,
                checksum: Some(Checksum::sha256_of(bytes)),
            })
            .collect();
        let remote = RemoteDataset { manifest, files };
        *self.remote.manifest.lock().unwrap() = Some(remote.clone());
        remote
    }
}

fn list_part_files(root: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "part"))
        .map(|entry| entry.into_path())
        .collect()
}

#[cfg(test)]
mod coordinator_tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_then_download_round_trip() {
        let source = local_dataset();
        let scanned = scan_local(source.path(), true, true).await.unwrap();
        let harness = Harness::new();

        let report = harness
            .coordinator(fast_config(), Direction::Upload)
            .run(scanned.units.clone())
            .await
            .unwrap();

        assert_eq!(report.status, ReportStatus::Complete);
        assert_eq!(report.succeeded, 7);
        assert!(report.finalized);
        assert_eq!(harness.remote.finalize_calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.bytes_transferred, scanned.total_bytes);

        let remote = harness.publish();
        let target = tempdir().unwrap();
        let units = plan_download(&remote, target.path()).unwrap();
        let report = harness
            .coordinator(fast_config(), Direction::Download)
            .run(units)
            .await
            .unwrap();

        assert_eq!(report.status, ReportStatus::Complete);
        assert!(!report.finalized);
        for unit in &scanned.units {
            let original = std::fs::read(&unit.local_path).unwrap();
            let copied = std::fs::read(target.path().join(&unit.relative_path)).unwrap();
            assert_eq!(original, copied, "{} differs after round trip", unit.relative_path);
        }
        assert!(list_part_files(target.path()).is_empty());
    }

    #[tokio::test]
    async fn test_metadata_phase_finishes_before_bulk_starts() {
        let source = local_dataset();
        let scanned = scan_local(source.path(), true, false).await.unwrap();
        let harness = Harness::new();
        let progress = ProgressCapture::new();

        harness
            .coordinator(fast_config(), Direction::Upload)
            .with_progress(progress.get_callback())
            .run(scanned.units)
            .await
            .unwrap();

        let started = harness.backend.started();
        assert_eq!(started[0], "meta/info.json");
        let last_phase_one = started.iter().rposition(|p| scanner::role_for(p).is_phase_one()).unwrap();
        let first_bulk = started.iter().position(|p| !scanner::role_for(p).is_phase_one()).unwrap();
        assert!(last_phase_one < first_bulk);
        assert_eq!(progress.count_events_of_type("phase_started"), 2);
        assert_eq!(progress.count_events_of_type("unit_completed"), 7);
    }

    #[tokio::test]
    async fn test_chunk_failing_twice_then_succeeding() {
        let dir = tempdir().unwrap();
        let units = small_units(dir.path());
        let harness = Harness::new();
        harness.backend.script("data/b.parquet", &[Fault::Transient, Fault::Transient]);
        let progress = ProgressCapture::new();

        let report = harness
            .coordinator(fast_config(), Direction::Upload)
            .with_progress(progress.get_callback())
            .run(units)
            .await
            .unwrap();

        assert_eq!(report.status, ReportStatus::Complete);
        assert_eq!(report.total_units, 4);
        assert_eq!(report.succeeded, 4);
        assert_eq!(report.attempts("data/b.parquet"), Some(3));
        assert_eq!(report.attempts("data/a.parquet"), Some(1));
        assert_eq!(report.metrics.retries_attempted, 2);
        assert_eq!(progress.count_events_of_type("retry_attempt"), 2);
    }

    #[tokio::test]
    async fn test_exhausted_unit_is_requeued_once() {
        let dir = tempdir().unwrap();
        let units = small_units(dir.path());
        let harness = Harness::new();
        harness
            .backend
            .script("data/c.parquet", &[Fault::Transient, Fault::Transient, Fault::Transient]);

        let report = harness
            .coordinator(fast_config(), Direction::Upload)
            .run(units)
            .await
            .unwrap();

        assert_eq!(report.status, ReportStatus::Complete);
        assert_eq!(report.attempts("data/c.parquet"), Some(4));
        assert_eq!(report.metrics.requeues, 1);
    }

    #[tokio::test]
    async fn test_bulk_failure_is_partial_and_retryable() {
        let dir = tempdir().unwrap();
        let units = small_units(dir.path());
        let harness = Harness::new();
        harness
            .backend
            .script("data/a.parquet", &[Fault::Transient, Fault::Transient, Fault::Transient]);
        let config = TransferConfig { requeue_on_exhaustion: false, strict: true, ..fast_config() };

        let report = harness
            .coordinator(config.clone(), Direction::Upload)
            .run(units.clone())
            .await
            .unwrap();

        assert_eq!(report.status, ReportStatus::Partial);
        assert_eq!(report.retry_paths(), vec!["data/a.parquet".to_string()]);
        assert!(matches!(report.failed[0].reason, FailureReason::Transport(_)));
        assert_eq!(report.failed[0].attempts, 3);
        assert!(!report.finalized);
        assert_eq!(harness.remote.finalize_calls.load(Ordering::SeqCst), 0);

        let retry = report.select_retry_units(&units);
        let report = harness
            .coordinator(config, Direction::Upload)
            .run(retry)
            .await
            .unwrap();

        assert_eq!(report.status, ReportStatus::Complete);
        assert_eq!(report.total_units, 1);
        assert!(report.finalized);
    }

    #[tokio::test]
    async fn test_metadata_failure_stops_before_bulk() {
        let dir = tempdir().unwrap();
        let units = small_units(dir.path());
        let harness = Harness::new();
        harness
            .backend
            .script("meta/info.json", &[Fault::Transient, Fault::Transient, Fault::Transient]);
        let config = TransferConfig { requeue_on_exhaustion: false, ..fast_config() };

        let err = harness
            .coordinator(config, Direction::Upload)
            .run(units)
            .await
            .unwrap_err();

        let report = match err {
            TransferError::MetadataPhaseFailed { report } => report,
            other => panic!("expected a metadata phase failure, got {other:?}"),
        };
        assert_eq!(report.status, ReportStatus::Failed);
        assert_eq!(report.skipped, 3);
        assert_eq!(report.retry_paths(), vec!["meta/info.json".to_string()]);
        assert!(harness.backend.started().iter().all(|p| p == "meta/info.json"));
        assert_eq!(harness.remote.finalize_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_authentication_failure_aborts_operation() {
        let dir = tempdir().unwrap();
        let units = small_units(dir.path());
        let harness = Harness::new();
        harness.remote.deny_auth.store(true, Ordering::SeqCst);

        let err = harness
            .coordinator(fast_config(), Direction::Upload)
            .run(units)
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Authentication { .. }));
        assert!(harness.backend.started().is_empty());
        assert_eq!(harness.remote.finalize_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_location_is_renegotiated_without_new_attempt() {
        let dir = tempdir().unwrap();
        let units = small_units(dir.path());
        let harness = Harness::new();
        harness.remote.expire_first.lock().unwrap().insert("data/b.parquet".to_string());
        let progress = ProgressCapture::new();

        let report = harness
            .coordinator(fast_config(), Direction::Upload)
            .with_progress(progress.get_callback())
            .run(units)
            .await
            .unwrap();

        assert_eq!(report.status, ReportStatus::Complete);
        assert_eq!(report.attempts("data/b.parquet"), Some(1));
        assert_eq!(harness.remote.negotiations("data/b.parquet"), 2);
        assert_eq!(harness.backend.calls("data/b.parquet"), 1);
        assert_eq!(report.metrics.renegotiations, 1);
        assert_eq!(progress.count_events_of_type("location_renegotiated"), 1);
    }

    #[tokio::test]
    async fn test_corrupted_upload_is_sent_again() {
        let dir = tempdir().unwrap();
        let units = small_units(dir.path());
        let harness = Harness::new();
        harness.backend.script("data/a.parquet", &[Fault::Corrupt]);

        let report = harness
            .coordinator(fast_config(), Direction::Upload)
            .run(units)
            .await
            .unwrap();

        assert_eq!(report.status, ReportStatus::Complete);
        assert_eq!(report.attempts("data/a.parquet"), Some(2));
        assert_eq!(report.metrics.integrity_failures, 1);
        assert_eq!(harness.storage.lock().unwrap()["data/a.parquet"], b"aaaa".to_vec());
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_worker_count() {
        let dir = tempdir().unwrap();
        let mut units = small_units(dir.path());
        for i in 0..12 {
            let relative = format!("data/extra-{:02}.parquet", i);
            write(dir.path(), &relative, b"xyz");
            units.push(TransferUnit::new(&relative, dir.path().join(&relative), 3, UnitRole::DataChunk));
        }
        let harness = Harness::with_backend(|storage| FakeBackend::new(storage).with_delay(Duration::from_millis(20)));
        let config = TransferConfig { max_workers: 3, ..fast_config() };

        let report = harness
            .coordinator(config, Direction::Upload)
            .run(units)
            .await
            .unwrap();

        assert_eq!(report.succeeded, 16);
        assert!(harness.backend.gauge.peak() <= 3);
        assert!(report.metrics.peak_in_flight <= 3);
        assert!(report.metrics.peak_in_flight >= 2);
    }

    #[tokio::test]
    async fn test_identical_runs_produce_identical_reports() {
        let source = local_dataset();
        let mut outcomes = Vec::new();
        for _ in 0..2 {
            let scanned = scan_local(source.path(), true, true).await.unwrap();
            let report = Harness::new()
                .coordinator(fast_config(), Direction::Upload)
                .run(scanned.units)
                .await
                .unwrap();
            outcomes.push(report.outcomes);
        }
        assert_eq!(outcomes[0], outcomes[1]);
    }

    #[tokio::test]
    async fn test_invalid_input_is_rejected_before_any_network_call() {
        let dir = tempdir().unwrap();
        let mut units = small_units(dir.path());
        units.push(units[1].clone());
        let harness = Harness::new();

        let err = harness
            .coordinator(fast_config(), Direction::Upload)
            .run(units)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Validation { .. }));

        let mut units = small_units(dir.path());
        let mut alias = units[1].clone();
        alias.relative_path = "data/./a.parquet".to_string();
        units.push(alias);
        let err = harness
            .coordinator(fast_config(), Direction::Download)
            .run(units)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Validation { .. }));

        let err = harness
            .coordinator(fast_config(), Direction::Upload)
            .run(Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Validation { .. }));

        let config = TransferConfig { max_workers: 0, ..fast_config() };
        let err = harness
            .coordinator(config, Direction::Upload)
            .run(small_units(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Configuration { .. }));

        assert_eq!(harness.remote.total_negotiations(), 0);
        assert!(harness.backend.started().is_empty());
    }
}

#[cfg(test)]
mod finalize_tests {
    use super::*;

    async fn partial_upload(config: TransferConfig) -> (Harness, TransferReport) {
        let dir = tempdir().unwrap();
        let units = small_units(dir.path());
        let harness = Harness::new();
        harness
            .backend
            .script("data/b.parquet", &[Fault::Transient, Fault::Transient, Fault::Transient]);
        let config = TransferConfig { requeue_on_exhaustion: false, ..config };
        let report = harness
            .coordinator(config, Direction::Upload)
            .run(units)
            .await
            .unwrap();
        (harness, report)
    }

    #[tokio::test]
    async fn test_lenient_partial_upload_is_finalized() {
        let (harness, report) = partial_upload(TransferConfig { strict: false, ..fast_config() }).await;
        assert_eq!(report.status, ReportStatus::Partial);
        assert!(report.finalized);
        assert_eq!(report.dataset.as_ref().map(|d| d.id.as_str()), Some("ds_test"));
        assert_eq!(harness.remote.finalize_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_or_nothing_skips_finalize() {
        let config = TransferConfig { strict: false, all_or_nothing: true, ..fast_config() };
        let (harness, report) = partial_upload(config).await;
        assert_eq!(report.status, ReportStatus::Partial);
        assert!(!report.finalized);
        assert_eq!(harness.remote.finalize_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_finalize_error_is_reported_not_raised() {
        let dir = tempdir().unwrap();
        let harness = Harness::new();
        harness.remote.fail_finalize.store(true, Ordering::SeqCst);

        let report = harness
            .coordinator(fast_config(), Direction::Upload)
            .run(small_units(dir.path()))
            .await
            .unwrap();

        assert_eq!(report.status, ReportStatus::Complete);
        assert!(!report.finalized);
        assert!(report.finalize_error.as_deref().is_some_and(|e| e.contains("finalize unavailable")));
    }
}

#[cfg(test)]
mod download_tests {
    use super::*;

    async fn uploaded() -> (TempDir, Harness, Vec<TransferUnit>) {
        let source = local_dataset();
        let scanned = scan_local(source.path(), true, true).await.unwrap();
        let harness = Harness::new();
        harness
            .coordinator(fast_config(), Direction::Upload)
            .run(scanned.units)
            .await
            .unwrap();

        let target = tempdir().unwrap();
        let units = plan_download(&harness.publish(), target.path()).unwrap();
        (target, harness, units)
    }

    #[tokio::test]
    async fn test_corrupted_download_is_fetched_again() {
        let (target, harness, units) = uploaded().await;
        harness.backend.script("data/chunk-000/file-001.parquet", &[Fault::Corrupt]);

        let report = harness
            .coordinator(fast_config(), Direction::Download)
            .run(units)
            .await
            .unwrap();

        assert_eq!(report.status, ReportStatus::Complete);
        assert_eq!(report.attempts("data/chunk-000/file-001.parquet"), Some(2));
        let written = std::fs::read(target.path().join("data/chunk-000/file-001.parquet")).unwrap();
        assert_eq!(written, b"chunk one!".to_vec());
    }

    #[tokio::test]
    async fn test_persistent_corruption_leaves_nothing_behind() {
        let (target, harness, units) = uploaded().await;
        harness
            .backend
            .script("data/chunk-000/file-002.parquet", &[Fault::Corrupt, Fault::Corrupt]);

        let report = harness
            .coordinator(fast_config(), Direction::Download)
            .run(units)
            .await
            .unwrap();

        assert_eq!(report.status, ReportStatus::Partial);
        assert!(matches!(report.failed[0].reason, FailureReason::IntegrityMismatch(_)));
        assert!(!target.path().join("data/chunk-000/file-002.parquet").exists());
        assert!(list_part_files(target.path()).is_empty());
    }

    #[tokio::test]
    async fn test_existing_files_are_skipped() {
        let (target, harness, units) = uploaded().await;
        write(target.path(), "data/chunk-000/file-000.parquet", b"chunk zero");

        let report = harness
            .coordinator(fast_config(), Direction::Download)
            .run(units)
            .await
            .unwrap();

        assert_eq!(report.status, ReportStatus::Complete);
        assert_eq!(report.skipped, 1);
        assert!(!harness.backend.started().iter().any(|p| p == "data/chunk-000/file-000.parquet"));
    }

    #[tokio::test]
    async fn test_cancellation_marks_unfinished_units_and_cleans_up() {
        let (target, harness, units) = uploaded().await;
        let bulk: Vec<String> = units
            .iter()
            .filter(|u| !u.role.is_phase_one())
            .map(|u| u.relative_path.clone())
            .collect();
        for path in &bulk {
            harness.backend.script(path, &[Fault::Hang]);
        }

        let cancel = CancellationToken::new();
        let config = TransferConfig { max_workers: 2, ..fast_config() };
        let coordinator = harness
            .coordinator(config, Direction::Download)
            .with_cancellation(cancel.clone());

        let backend = harness.backend.clone();
        let canceller = tokio::spawn(async move {
            backend.hanging.notified().await;
            cancel.cancel();
        });

        let report = tokio::time::timeout(Duration::from_secs(10), coordinator.run(units))
            .await
            .expect("run returns after cancellation")
            .unwrap();
        canceller.await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.status, ReportStatus::Partial);
        assert_eq!(report.failed.len(), bulk.len());
        assert!(report.failed.iter().all(|f| f.reason == FailureReason::Cancelled));
        assert_eq!(report.outcomes.len(), report.total_units);
        assert!(list_part_files(target.path()).is_empty());
        assert!(target.path().join("meta/info.json").exists());
    }

    #[tokio::test]
    async fn test_cancellation_during_metadata_phase_skips_bulk_work() {
        let (target, harness, units) = uploaded().await;
        harness.backend.script("meta/info.json", &[Fault::Hang]);
        let bulk: Vec<String> = units
            .iter()
            .filter(|u| !u.role.is_phase_one())
            .map(|u| u.relative_path.clone())
            .collect();

        let cancel = CancellationToken::new();
        let coordinator = harness
            .coordinator(fast_config(), Direction::Download)
            .with_cancellation(cancel.clone());

        let backend = harness.backend.clone();
        let canceller = tokio::spawn(async move {
            backend.hanging.notified().await;
            cancel.cancel();
        });

        let report = tokio::time::timeout(Duration::from_secs(10), coordinator.run(units))
            .await
            .expect("run returns after cancellation")
            .expect("cancellation is reported, not raised");
        canceller.await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.status, ReportStatus::Failed);
        assert_eq!(report.outcomes.len(), report.total_units);
        for path in &bulk {
            assert_eq!(
                report.outcomes.get(path),
                Some(&TransferOutcome::Failed { reason: FailureReason::Cancelled, attempts: 0 }),
                "{} should be cancelled",
                path
            );
        }
        assert!(!harness.backend.started().iter().any(|p| bulk.contains(p)));
        assert!(list_part_files(target.path()).is_empty());
        assert!(!target.path().join("meta/info.json").exists());
    }
}
