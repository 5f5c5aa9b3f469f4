//! Failure-path tests: lifecycle misuse, bad options, misbehaving streams,
//! and task timeouts.

use std::time::Duration;

use riptide_core::{HashError, HasherConfig, MemoryStream, ParallelHasher};

const MIB: usize = 1024 * 1024;

fn pattern_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_hash_before_init_fails() {
    let mut hasher = ParallelHasher::new(HasherConfig::default()).unwrap();
    let mut stream = MemoryStream::new(vec![0u8; 100]);
    let err = hasher.hash_file(&mut stream, 100).await.unwrap_err();
    assert!(matches!(err, HashError::NotInitialized));
}

#[tokio::test]
async fn test_hash_after_terminate_fails() {
    let mut hasher = ParallelHasher::new(HasherConfig::default()).unwrap();
    hasher.init().await.unwrap();
    hasher.terminate();

    let mut stream = MemoryStream::new(vec![0u8; 100]);
    let err = hasher.hash_file(&mut stream, 100).await.unwrap_err();
    assert!(matches!(err, HashError::Terminated));
}

#[tokio::test]
async fn test_terminate_is_idempotent() {
    let mut hasher = ParallelHasher::new(HasherConfig::default()).unwrap();
    hasher.init().await.unwrap();
    hasher.terminate();
    hasher.terminate();
    // Terminating a never-initialized hasher is also fine.
    let mut fresh = ParallelHasher::new(HasherConfig::default()).unwrap();
    fresh.terminate();
}

#[tokio::test]
async fn test_init_is_idempotent() {
    let mut hasher = ParallelHasher::new(HasherConfig::default()).unwrap();
    hasher.init().await.unwrap();
    hasher.init().await.unwrap();

    let data = pattern_bytes(1000);
    let mut stream = MemoryStream::new(data.clone());
    let output = hasher.hash_file(&mut stream, 1000).await.unwrap();
    assert_eq!(output.digest.to_hex(), blake3::hash(&data).to_hex().as_str());
    hasher.terminate();
}

#[tokio::test]
async fn test_reinit_after_terminate() {
    let mut hasher = ParallelHasher::new(HasherConfig::default()).unwrap();
    hasher.init().await.unwrap();
    hasher.terminate();
    hasher.init().await.unwrap();

    let data = pattern_bytes(2 * MIB);
    let mut stream = MemoryStream::new(data.clone());
    let output = hasher.hash_file(&mut stream, data.len() as u64).await.unwrap();
    assert_eq!(output.digest.to_hex(), blake3::hash(&data).to_hex().as_str());
    hasher.terminate();
}

// ---------------------------------------------------------------------------
// Options validation
// ---------------------------------------------------------------------------

#[test]
fn test_invalid_options_rejected_at_construction() {
    for config in [
        HasherConfig::default().with_worker_count(0),
        HasherConfig::default().with_max_inflight_per_worker(0),
        HasherConfig::default().with_max_leaf_size(0),
        HasherConfig::default().with_max_leaf_size(1000),
        HasherConfig::default().with_max_leaf_size(MIB as u64 + 1),
    ] {
        assert!(matches!(
            ParallelHasher::new(config),
            Err(HashError::InvalidOptions(_))
        ));
    }
}

// ---------------------------------------------------------------------------
// Misbehaving streams
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_short_stream_small_input() {
    let mut hasher = ParallelHasher::new(HasherConfig::default()).unwrap();
    hasher.init().await.unwrap();

    // Declares 2000 bytes, delivers 1000; shortcut path.
    let mut stream = MemoryStream::new(vec![1u8; 1000]);
    let err = hasher.hash_file(&mut stream, 2000).await.unwrap_err();
    assert!(matches!(err, HashError::Stream(_)));
    hasher.terminate();
}

#[tokio::test]
async fn test_long_stream_small_input() {
    let mut hasher = ParallelHasher::new(HasherConfig::default()).unwrap();
    hasher.init().await.unwrap();

    let mut stream = MemoryStream::new(vec![1u8; 2000]);
    let err = hasher.hash_file(&mut stream, 1000).await.unwrap_err();
    assert!(matches!(err, HashError::Stream(_)));
    hasher.terminate();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_short_stream_pipeline() {
    let mut hasher = ParallelHasher::new(HasherConfig::default()).unwrap();
    hasher.init().await.unwrap();

    // Declares 5 MiB, delivers 1 MiB: EOF lands mid-leaf.
    let mut stream = MemoryStream::new(vec![7u8; MIB]);
    let err = hasher
        .hash_file(&mut stream, 5 * MIB as u64)
        .await
        .unwrap_err();
    assert!(matches!(err, HashError::Stream(_)));
    hasher.terminate();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_long_stream_pipeline() {
    let config = HasherConfig::default().with_max_leaf_size(65536);
    let mut hasher = ParallelHasher::new(config).unwrap();
    hasher.init().await.unwrap();

    // Declares 128 KiB (two leaves), delivers 192 KiB. The 48 KiB chunking
    // makes a chunk straddle the declared end, so the excess is observed.
    let mut stream = MemoryStream::with_chunk_size(vec![7u8; 192 * 1024], 48 * 1024);
    let err = hasher
        .hash_file(&mut stream, 128 * 1024)
        .await
        .unwrap_err();
    assert!(matches!(err, HashError::Stream(_)));
    hasher.terminate();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_hasher_survives_failed_call() {
    let mut hasher = ParallelHasher::new(HasherConfig::default()).unwrap();
    hasher.init().await.unwrap();

    // First call fails mid-pipeline; the pool must recover every slot.
    let mut short = MemoryStream::new(vec![7u8; MIB + 1000]);
    let err = hasher
        .hash_file(&mut short, 20 * MIB as u64)
        .await
        .unwrap_err();
    assert!(matches!(err, HashError::Stream(_)));

    // Second call over more leaves than there are slots proves the pool is
    // intact after the failure.
    let data = pattern_bytes(20 * MIB);
    let mut stream = MemoryStream::new(data.clone());
    let output = hasher
        .hash_file(&mut stream, data.len() as u64)
        .await
        .unwrap();
    assert_eq!(output.digest.to_hex(), blake3::hash(&data).to_hex().as_str());
    hasher.terminate();
}

// ---------------------------------------------------------------------------
// Worker failures
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn test_worker_crash_mid_job_surfaces_worker_failure() {
    let config = HasherConfig::default()
        .with_worker_count(2)
        .with_max_leaf_size(65536);
    let mut hasher = ParallelHasher::new(config).unwrap();
    hasher.init().await.unwrap();

    // Worker 0 dies on its first request; worker 1 keeps completing leaves
    // normally. The tasks routed to worker 0 must be rejected with its index,
    // whether the death is seen at dispatch or by the liveness probe.
    hasher.crash_worker(0);

    let mut stream = MemoryStream::new(vec![5u8; 512 * 1024]);
    let err = hasher
        .hash_file(&mut stream, 512 * 1024)
        .await
        .unwrap_err();
    assert!(
        matches!(err, HashError::WorkerFailure { worker_index: 0, .. }),
        "expected WorkerFailure for worker 0, got {err:?}"
    );

    // Terminate still succeeds with one worker dead.
    hasher.terminate();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_slow_worker_times_out_others_release_slots() {
    let config = HasherConfig::default()
        .with_worker_count(2)
        .with_max_leaf_size(65536)
        .with_task_timeout(Duration::from_millis(300));
    let mut hasher = ParallelHasher::new(config).unwrap();
    hasher.init().await.unwrap();

    // Worker 0 sleeps through its first task's deadline; worker 1 completes
    // its share normally. The stalled task must surface as a timeout, not a
    // worker failure (the thread is alive, just slow).
    hasher.stall_worker(0, Duration::from_millis(1500));

    let mut stream = MemoryStream::new(vec![9u8; 256 * 1024]);
    let err = hasher
        .hash_file(&mut stream, 256 * 1024)
        .await
        .unwrap_err();
    assert!(
        matches!(err, HashError::TaskTimeout { .. }),
        "expected TaskTimeout, got {err:?}"
    );

    // Once the stall drains, every slot is back in the pool: a full-size
    // follow-up hash succeeds on the same hasher.
    tokio::time::sleep(Duration::from_millis(2000)).await;
    let data = pattern_bytes(512 * 1024);
    let mut stream = MemoryStream::new(data.clone());
    let output = hasher
        .hash_file(&mut stream, data.len() as u64)
        .await
        .unwrap();
    assert_eq!(output.digest.to_hex(), blake3::hash(&data).to_hex().as_str());
    hasher.terminate();
}

// ---------------------------------------------------------------------------
// Task timeouts
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn test_task_timeout_surfaces() {
    // A zero deadline expires every task before its reply can be taken.
    let config = HasherConfig::default()
        .with_max_leaf_size(65536)
        .with_task_timeout(Duration::ZERO);
    let mut hasher = ParallelHasher::new(config).unwrap();
    hasher.init().await.unwrap();

    let mut stream = MemoryStream::new(vec![3u8; 256 * 1024]);
    let err = hasher
        .hash_file(&mut stream, 256 * 1024)
        .await
        .unwrap_err();
    assert!(matches!(err, HashError::TaskTimeout { .. }));

    // Workers were not terminated by the timeout; shutdown still works.
    hasher.terminate();
}
