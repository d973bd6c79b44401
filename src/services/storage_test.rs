use super::*;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

const MIB: usize = 1024 * 1024;

#[derive(Default)]
struct MockRemote {
    head_calls: AtomicUsize,
    fail_handshake: bool,
    fail_part: Option<i32>,
    put_keys: Mutex<Vec<String>>,
    created: AtomicUsize,
    parts: Mutex<Vec<(i32, usize)>>,
    completed: Mutex<Option<Vec<(i32, String)>>>,
    aborts: AtomicUsize,
    objects: Mutex<std::collections::HashMap<String, Bytes>>,
}

impl MockRemote {
    fn failing_handshake() -> Self {
        Self { fail_handshake: true, ..Self::default() }
    }

    fn failing_part(part: i32) -> Self {
        Self { fail_part: Some(part), ..Self::default() }
    }
}

#[async_trait::async_trait]
impl RemoteStore for MockRemote {
    fn bucket(&self) -> &str {
        "bucket"
    }

    async fn head_bucket(&self) -> Result<(), StorageError> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_handshake {
            Err(StorageError::Remote("handshake refused".into()))
        } else {
            Ok(())
        }
    }

    async fn put_object(&self, key: &str, body: Bytes) -> Result<(), StorageError> {
        self.put_keys.lock().unwrap().push(key.to_owned());
        self.objects.lock().unwrap().insert(key.to_owned(), body);
        Ok(())
    }

    async fn create_multipart(&self, _key: &str) -> Result<String, StorageError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok("upload-1".into())
    }

    async fn upload_part(
        &self,
        _key: &str,
        _upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, StorageError> {
        if self.fail_part == Some(part_number) {
            return Err(StorageError::Remote(format!("part {part_number} rejected")));
        }
        self.parts.lock().unwrap().push((part_number, body.len()));
        Ok(format!("etag-{part_number}"))
    }

    async fn complete_multipart(
        &self,
        _key: &str,
        _upload_id: &str,
        parts: Vec<(i32, String)>,
    ) -> Result<(), StorageError> {
        *self.completed.lock().unwrap() = Some(parts);
        Ok(())
    }

    async fn abort_multipart(&self, _key: &str, _upload_id: &str) -> Result<(), StorageError> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn download(&self, key: &str, dest: &std::path::Path) -> Result<(), StorageError> {
        let data = self
            .objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_owned()))?;
        std::fs::write(dest, &data)?;
        Ok(())
    }
}

fn remote_service(remote: Arc<MockRemote>, threshold: usize, chunk: usize) -> StorageService {
    StorageService::with_remote(remote, tempfile::tempdir().unwrap().keep(), threshold, chunk)
}

fn capture_progress() -> (ProgressCallback, Arc<Mutex<Vec<UploadProgress>>>) {
    let snapshots: Arc<Mutex<Vec<UploadProgress>>> = Arc::default();
    let sink = snapshots.clone();
    let callback: ProgressCallback = Arc::new(move |p: &UploadProgress| {
        sink.lock().unwrap().push(p.clone());
    });
    (callback, snapshots)
}

// =============================================================================
// helpers
// =============================================================================

#[test]
fn floor_ts_truncates() {
    assert_eq!(floor_ts(1_700_000_000.9), 1_700_000_000);
    assert_eq!(floor_ts(12.0), 12);
}

#[test]
fn parse_s3_uri_happy_path() {
    let (bucket, key) = parse_s3_uri("s3://bucket/sessions/1/laptop_12.mp4").unwrap();
    assert_eq!(bucket, "bucket");
    assert_eq!(key, "sessions/1/laptop_12.mp4");
}

#[test]
fn parse_s3_uri_rejects_non_s3_and_empty() {
    assert!(parse_s3_uri("/var/data/video.mp4").is_none());
    assert!(parse_s3_uri("s3://bucket-only").is_none());
    assert!(parse_s3_uri("s3:///key").is_none());
}

// =============================================================================
// single PUT
// =============================================================================

#[tokio::test]
async fn below_threshold_is_one_single_put() {
    let remote = Arc::new(MockRemote::default());
    let service = remote_service(remote.clone(), 8 * MIB, 8 * MIB);
    let (callback, snapshots) = capture_progress();

    let outcome = service
        .upload(Bytes::from(vec![0u8; MIB]), 7, "cam", 1234.9, Some(callback))
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.kind, StorageKind::S3);
    assert_eq!(outcome.uri, "s3://bucket/sessions/7/cam_1234.mp4");
    assert_eq!(outcome.size, MIB);

    assert_eq!(remote.put_keys.lock().unwrap().as_slice(), ["sessions/7/cam_1234.mp4"]);
    assert_eq!(remote.created.load(Ordering::SeqCst), 0);
    assert!(remote.parts.lock().unwrap().is_empty());

    let snapshots = snapshots.lock().unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].status, ProgressStatus::Completed);
    assert_eq!(snapshots[0].uploaded_bytes, MIB);
}

// =============================================================================
// multipart
// =============================================================================

#[tokio::test]
async fn ten_mib_with_four_mib_chunks_is_three_parts() {
    let remote = Arc::new(MockRemote::default());
    let service = remote_service(remote.clone(), 8 * MIB, 4 * MIB);
    let (callback, snapshots) = capture_progress();

    let outcome = service
        .upload(Bytes::from(vec![0u8; 10 * MIB]), 1, "cam", 99.0, Some(callback))
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.uri, "s3://bucket/sessions/1/cam_99.mp4");

    assert_eq!(remote.created.load(Ordering::SeqCst), 1);
    assert_eq!(
        remote.parts.lock().unwrap().as_slice(),
        [(1, 4 * MIB), (2, 4 * MIB), (3, 2 * MIB)]
    );
    let completed = remote.completed.lock().unwrap().clone().expect("complete called");
    assert_eq!(
        completed,
        vec![(1, "etag-1".into()), (2, "etag-2".into()), (3, "etag-3".into())]
    );
    assert_eq!(remote.aborts.load(Ordering::SeqCst), 0);

    let snapshots = snapshots.lock().unwrap();
    // One snapshot per part plus the terminal completed one.
    assert_eq!(snapshots.len(), 4);
    assert_eq!(snapshots[0].parts_completed, 1);
    assert_eq!(snapshots[0].total_parts, 3);
    assert_eq!(snapshots[2].uploaded_bytes, 10 * MIB);
    assert_eq!(snapshots[3].status, ProgressStatus::Completed);
}

#[tokio::test]
async fn exactly_threshold_payload_goes_multipart() {
    let remote = Arc::new(MockRemote::default());
    let service = remote_service(remote.clone(), 8 * MIB, 8 * MIB);

    let outcome = service.upload(Bytes::from(vec![0u8; 8 * MIB]), 1, "cam", 0.0, None).await;

    assert!(outcome.success);
    assert_eq!(remote.created.load(Ordering::SeqCst), 1);
    assert_eq!(remote.parts.lock().unwrap().len(), 1);
    assert!(remote.put_keys.lock().unwrap().is_empty());
}

#[tokio::test]
async fn part_failure_aborts_and_surfaces_error() {
    let remote = Arc::new(MockRemote::failing_part(2));
    let service = remote_service(remote.clone(), 8 * MIB, 4 * MIB);
    let (callback, snapshots) = capture_progress();

    let outcome = service
        .upload(Bytes::from(vec![0u8; 10 * MIB]), 1, "cam", 0.0, Some(callback))
        .await;

    assert!(!outcome.success);
    assert!(outcome.error.as_deref().unwrap().contains("part 2"));
    assert!(outcome.uri.is_empty());
    assert_eq!(remote.aborts.load(Ordering::SeqCst), 1);
    assert!(remote.completed.lock().unwrap().is_none());

    let snapshots = snapshots.lock().unwrap();
    assert_eq!(snapshots.last().unwrap().status, ProgressStatus::Failed);
}

// =============================================================================
// backend selection
// =============================================================================

#[tokio::test]
async fn handshake_failure_demotes_to_local_permanently() {
    let remote = Arc::new(MockRemote::failing_handshake());
    let dir = tempfile::tempdir().unwrap();
    let service =
        StorageService::with_remote(remote.clone(), dir.path().to_path_buf(), 8 * MIB, 8 * MIB);

    let first = service.upload(Bytes::from_static(b"a"), 1, "cam", 5.0, None).await;
    let second = service.upload(Bytes::from_static(b"b"), 1, "cam", 6.0, None).await;

    assert_eq!(first.kind, StorageKind::Local);
    assert_eq!(second.kind, StorageKind::Local);
    // The SDK seam is touched exactly once for the failed handshake.
    assert_eq!(remote.head_calls.load(Ordering::SeqCst), 1);
    assert!(remote.put_keys.lock().unwrap().is_empty());
}

#[tokio::test]
async fn local_upload_writes_expected_path() {
    let dir = tempfile::tempdir().unwrap();
    let service = StorageService::local_only(dir.path());
    let (callback, snapshots) = capture_progress();

    let outcome = service
        .upload(Bytes::from_static(b"video-bytes"), 42, "laptop", 1234.7, Some(callback))
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.kind, StorageKind::Local);
    let expected = dir.path().join("videos").join("42_laptop_1234.mp4");
    assert_eq!(outcome.uri, expected.to_string_lossy());
    assert_eq!(std::fs::read(&expected).unwrap(), b"video-bytes");

    let snapshots = snapshots.lock().unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].status, ProgressStatus::Completed);
}

#[tokio::test]
async fn status_reflects_lazy_selection() {
    let dir = tempfile::tempdir().unwrap();
    let service = StorageService::local_only(dir.path());

    let before = service.status().await;
    assert!(!before.s3_configured);
    assert!(before.active_backend.is_none());

    service.upload(Bytes::from_static(b"x"), 1, "cam", 0.0, None).await;
    let after = service.status().await;
    assert_eq!(after.active_backend, Some(StorageKind::Local));
}

// =============================================================================
// resolve_to_local
// =============================================================================

#[tokio::test]
async fn resolve_local_path_passthrough() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("clip.mp4");
    std::fs::write(&file, b"clip").unwrap();

    let service = StorageService::local_only(dir.path());
    let resolved = service
        .resolve_to_local(file.to_str().unwrap(), dir.path())
        .await
        .unwrap();
    assert_eq!(resolved, file);
}

#[tokio::test]
async fn resolve_missing_local_path_fails() {
    let dir = tempfile::tempdir().unwrap();
    let service = StorageService::local_only(dir.path());
    let err = service.resolve_to_local("/no/such/file.mp4", dir.path()).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));
}

#[tokio::test]
async fn resolve_s3_uri_downloads_through_remote() {
    let remote = Arc::new(MockRemote::default());
    remote
        .objects
        .lock()
        .unwrap()
        .insert("sessions/1/cam_5.mp4".into(), Bytes::from_static(b"remote-bytes"));

    let dir = tempfile::tempdir().unwrap();
    let service = StorageService::with_remote(remote, dir.path().to_path_buf(), 8 * MIB, 8 * MIB);

    let resolved = service
        .resolve_to_local("s3://bucket/sessions/1/cam_5.mp4", dir.path())
        .await
        .unwrap();
    assert_eq!(resolved, dir.path().join("cam_5.mp4"));
    assert_eq!(std::fs::read(&resolved).unwrap(), b"remote-bytes");
}
