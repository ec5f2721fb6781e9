//! Chunked job runner behaviour over a memory store

use mci_checkpoint::{
    ChunkStatus, ChunkedJob, ChunkedJobRunner, ChunkedJobStatus, ChunkedJobStore, ChunkingConfig, TickStatus,
    VolumeObservation,
};
use mci_storage::Namespace;
use mci_test_utils::{memory_storage, ScriptedFetcher};
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn keys(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("kw {i:02}")).collect()
}

fn runner(delay_ms: u64) -> ChunkedJobRunner {
    let config = ChunkingConfig::new().with_inter_chunk_delay_ms(delay_ms);
    ChunkedJobRunner::new(ChunkedJobStore::with_config(memory_storage(), config))
}

async fn init(runner: &ChunkedJobRunner, n: usize) -> ChunkedJob {
    runner
        .store()
        .initialize_job("v1", "tea", keys(n))
        .await
        .unwrap()
        .into_value()
}

#[tokio::test]
async fn runs_every_chunk_and_records_volumes() {
    let runner = runner(0);
    let mut job = init(&runner, 45).await;
    let fetcher = ScriptedFetcher::new().omit("kw 44");

    let summary = runner
        .run_to_completion(&mut job, &fetcher, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.processed_keys, 45);
    assert_eq!(summary.failed_keys, 0);
    assert_eq!(summary.ticks, 4);
    assert_eq!(job.status, ChunkedJobStatus::Complete);
    assert!(job.frozen_chunks.iter().all(|c| c.status == ChunkStatus::Success));

    let storage = runner.store().storage();
    let observed: VolumeObservation = storage
        .load(Namespace::VOLUMES, &VolumeObservation::storage_key("v1", "kw 03"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(observed.volume, ScriptedFetcher::volume_for("kw 03"));

    let missing: VolumeObservation = storage
        .load(Namespace::VOLUMES, &VolumeObservation::storage_key("v1", "kw 44"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(missing.volume, 0);

    let stored = runner.store().require_job("v1", "tea").await.unwrap();
    assert_eq!(stored.status, ChunkedJobStatus::Complete);
}

#[tokio::test]
async fn chunk_failing_three_times_is_skipped() {
    let runner = runner(0);
    let mut job = init(&runner, 30).await;
    let fetcher = ScriptedFetcher::new().always_fail("kw 05");

    for attempt in 1..=2 {
        let outcome = runner.run_tick(&mut job, &fetcher).await;
        assert_eq!(outcome.status, TickStatus::Continue);
        assert_eq!(outcome.chunk_index, Some(0));
        assert_eq!(job.current_chunk_index, 0);
        assert_eq!(job.frozen_chunks[0].attempt_count, attempt);
    }

    runner.run_tick(&mut job, &fetcher).await;
    assert_eq!(job.frozen_chunks[0].status, ChunkStatus::Failed);
    assert_eq!(job.frozen_chunks[0].attempt_count, 3);
    assert_eq!(job.current_chunk_index, 1);
    assert_eq!(job.failed_keys, keys(20));

    let summary = runner
        .run_to_completion(&mut job, &fetcher, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.failed_keys, 20);
    assert_eq!(job.processed_keys, keys(30)[20..].to_vec());
    assert_eq!(job.status, ChunkedJobStatus::Complete);
}

#[tokio::test]
async fn transient_failures_are_retried_in_place() {
    let runner = runner(0);
    let mut job = init(&runner, 10).await;
    let fetcher = ScriptedFetcher::new().fail_times("kw 01", 2);

    runner
        .run_to_completion(&mut job, &fetcher, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(fetcher.calls().len(), 3);
    assert_eq!(job.frozen_chunks[0].status, ChunkStatus::Success);
    assert_eq!(job.frozen_chunks[0].attempt_count, 2);
    assert!(job.failed_keys.is_empty());
}

#[tokio::test]
async fn failed_attempt_count_survives_reload() {
    let runner = runner(0);
    let mut job = init(&runner, 5).await;
    let fetcher = ScriptedFetcher::new().fail_times("kw 00", 1);

    runner.run_tick(&mut job, &fetcher).await;

    let reloaded = runner.store().require_job("v1", "tea").await.unwrap();
    assert_eq!(reloaded.frozen_chunks[0].attempt_count, 1);
    assert_eq!(reloaded.current_chunk_index, 0);
}

#[tokio::test]
async fn resume_starts_after_last_finished_chunk() {
    let runner = runner(0);
    let mut job = init(&runner, 60).await;
    let first = ScriptedFetcher::new();
    runner.run_tick(&mut job, &first).await;
    runner.run_tick(&mut job, &first).await;

    // Simulated restart: a new initialize call returns the stored job.
    let mut resumed = runner
        .store()
        .initialize_job("v1", "tea", keys(60))
        .await
        .unwrap()
        .into_value();
    assert_eq!(resumed.current_chunk_index, 2);
    assert_eq!(resumed.frozen_chunks, job.frozen_chunks);

    let second = ScriptedFetcher::new();
    runner
        .run_to_completion(&mut resumed, &second, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(second.calls(), vec![keys(60)[40..].to_vec()]);
    assert_eq!(resumed.processed_keys, keys(60));
}

#[tokio::test]
async fn tripped_token_stops_before_first_chunk() {
    let runner = runner(0);
    let mut job = init(&runner, 25).await;
    let fetcher = ScriptedFetcher::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = runner.run_to_completion(&mut job, &fetcher, &cancel).await.unwrap_err();
    assert!(err.is_cancellation());
    assert!(fetcher.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_inter_chunk_delay() {
    let runner = runner(1_000);
    let mut job = init(&runner, 50).await;
    let fetcher = ScriptedFetcher::new();
    let cancel = CancellationToken::new();

    let canceller = async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        cancel.cancel();
    };
    let (result, ()) = tokio::join!(runner.run_to_completion(&mut job, &fetcher, &cancel), canceller);

    assert!(result.unwrap_err().is_cancellation());
    assert_eq!(fetcher.calls().len(), 1);
    assert_eq!(job.current_chunk_index, 1);
    assert_eq!(job.status, ChunkedJobStatus::InProgress);
}
