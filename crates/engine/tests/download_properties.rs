//! Worker-pool, retry and authentication behaviour of downloads.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Env, key, labels, payload, recorder, small_config};
use relaydrive_engine::{EngineError, download_file};
use relaydrive_remote::Fault;
use relaydrive_protocol::TransferProgress;
use relaydrive_transfer::{FileSink, MemorySink, ShardSink, SinkOutput, SinkState};
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn never_more_than_k_concurrent_fetches() {
    let env = Env::new(small_config(100, 3));
    let data = payload(1200);
    let record = env.upload("many.bin", data.clone()).await;
    assert_eq!(record.parts.len(), 12);
    env.remote.set_fetch_latency(Duration::from_millis(250));

    let out = download_file(
        &env.session,
        &record,
        Arc::new(MemorySink::new(12)),
        Arc::new(|_| {}),
        None,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(out, SinkOutput::Memory(data));
    assert_eq!(env.remote.max_in_flight(), 3);
}

#[tokio::test(start_paused = true)]
async fn fewer_shards_than_workers() {
    let env = Env::new(small_config(100, 5));
    let record = env.upload("two.bin", payload(150)).await;
    env.remote.set_fetch_latency(Duration::from_millis(50));

    download_file(
        &env.session,
        &record,
        Arc::new(MemorySink::new(2)),
        Arc::new(|_| {}),
        None,
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(env.remote.max_in_flight(), 2);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_fetch_waits_for_server_delay() {
    let env = Env::new(small_config(100, 1));
    let record = env.upload("r.bin", payload(250)).await;
    let limited = record.parts[1].remote_id.clone();
    env.remote
        .script_fetch(&limited, Fault::RateLimited(Duration::from_secs(3)));
    let (cb, seen) = recorder();

    download_file(
        &env.session,
        &record,
        Arc::new(MemorySink::new(3)),
        cb,
        None,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let calls: Vec<_> = env
        .remote
        .fetch_calls()
        .into_iter()
        .filter(|(id, _)| *id == limited)
        .collect();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].1 - calls[0].1 >= Duration::from_millis(3500));
    assert!(labels(&seen).contains(&"Rate limited. Waiting 3.5s...".to_string()));
}

#[tokio::test(start_paused = true)]
async fn wrong_password_fails_authentication_without_retry() {
    let env = Env::new(small_config(100, 1));
    env.session.unlock(key("right"));
    let record = env.upload("secret.bin", payload(300)).await;

    let intruder = env.another_session();
    intruder.unlock(key("wrong"));
    let sink = Arc::new(MemorySink::new(3));

    let err = download_file(
        &intruder,
        &record,
        sink.clone(),
        Arc::new(|_| {}),
        None,
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, EngineError::AuthenticationFailure { sequence: 0 }));
    assert_eq!(env.remote.fetch_calls().len(), 1);
    assert_eq!(sink.state(), SinkState::Aborted);
}

#[tokio::test(start_paused = true)]
async fn tampered_shard_is_detected() {
    let env = Env::new(small_config(100, 1));
    env.session.unlock(key("pw"));
    let record = env.upload("t.bin", payload(300)).await;

    let target = &record.parts[1].remote_id;
    let mut frame = env.remote.object(target).unwrap();
    frame[20] ^= 0x01;
    env.remote.corrupt(target, frame);

    let err = download_file(
        &env.session,
        &record,
        Arc::new(MemorySink::new(3)),
        Arc::new(|_| {}),
        None,
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, EngineError::AuthenticationFailure { sequence: 1 }));
}

#[tokio::test(start_paused = true)]
async fn encrypted_record_without_key_is_refused() {
    let env = Env::new(small_config(100, 1));
    env.session.unlock(key("pw"));
    let record = env.upload("k.bin", payload(50)).await;
    env.session.end();

    let err = download_file(
        &env.session,
        &record,
        Arc::new(MemorySink::new(1)),
        Arc::new(|_| {}),
        None,
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, EngineError::KeyRequired));
    assert!(env.remote.fetch_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn declined_size_guard_touches_no_network() {
    let mut config = small_config(100, 2);
    config.memory_confirm_threshold = 100;
    let env = Env::new(config);
    let record = env.upload("big.bin", payload(250)).await;

    let sink = Arc::new(MemorySink::new(3));
    let err = download_file(
        &env.session,
        &record,
        sink.clone(),
        Arc::new(|_| {}),
        Some(Arc::new(|size: u64| size < 200)),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(err.is_cancelled());
    assert!(env.remote.fetch_calls().is_empty());
    assert_eq!(sink.state(), SinkState::Aborted);
}

#[tokio::test(start_paused = true)]
async fn progress_reported_for_every_shard() {
    let env = Env::new(small_config(100, 2));
    let record = env.upload("p.bin", payload(450)).await;
    let (cb, seen) = recorder();

    download_file(
        &env.session,
        &record,
        Arc::new(MemorySink::new(5)),
        cb,
        None,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let labels = labels(&seen);
    for i in 1..=5 {
        assert!(labels.contains(&format!("Downloaded part {i}/5")), "missing part {i}");
    }
    let last = seen.lock().unwrap().last().cloned().unwrap();
    assert_eq!(last.percent, 100.0);
    assert_eq!(last.transferred_bytes, 450);
}

#[tokio::test(start_paused = true)]
async fn out_of_order_completion_is_byte_identical() {
    let env = Env::new(small_config(100, 4));
    env.session.unlock(key("pw"));
    let data = payload(370);
    let record = env.upload("scrambled.bin", data.clone()).await;
    assert_eq!(record.parts.len(), 4);

    // Shard 0 lands last, shard 1 next to last; 2 and 3 finish first.
    let id = |seq: usize| record.parts[seq].remote_id.clone();
    env.remote.script_fetch(&id(0), Fault::Transient("reset".into()));
    env.remote.script_fetch(&id(0), Fault::Transient("reset".into()));
    env.remote.script_fetch(&id(1), Fault::Transient("reset".into()));

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("scrambled.bin");
    let file_out = download_file(
        &env.session,
        &record,
        Arc::new(FileSink::create(&dest, 4).unwrap()),
        Arc::new(|_| {}),
        None,
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(file_out, SinkOutput::File(dest.clone()));
    assert_eq!(std::fs::read(&dest).unwrap(), data);

    let calls = env.remote.fetch_calls();
    assert_eq!(calls.len(), 7);
    let settled = |seq: usize| {
        calls
            .iter()
            .filter(|(remote_id, _)| *remote_id == id(seq))
            .map(|(_, at)| *at)
            .max()
            .unwrap()
    };
    assert!(settled(2) < settled(1));
    assert!(settled(3) < settled(1));
    assert!(settled(1) < settled(0));

    for seq in [0, 0, 1] {
        env.remote.script_fetch(&id(seq), Fault::Transient("reset".into()));
    }
    let memory_out = download_file(
        &env.session,
        &record,
        Arc::new(MemorySink::new(4)),
        Arc::new(|_| {}),
        None,
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(memory_out, SinkOutput::Memory(data));
}

#[tokio::test(start_paused = true)]
async fn dropped_download_leaves_no_partial_file() {
    let env = Env::new(small_config(100, 2));
    let record = env.upload("dropped.bin", payload(500)).await;
    env.remote.set_fetch_latency(Duration::from_millis(200));

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("dropped.bin");
    let sink = FileSink::create(&dest, 5).unwrap();
    let temp = sink.temp_path().to_path_buf();

    let first_shard = CancellationToken::new();
    let signal = first_shard.clone();
    let session = env.session.clone();
    let task = tokio::spawn(async move {
        download_file(
            &session,
            &record,
            Arc::new(sink),
            Arc::new(move |p: TransferProgress| {
                if p.status_label.starts_with("Downloaded part") {
                    signal.cancel();
                }
            }),
            None,
            &CancellationToken::new(),
        )
        .await
    });

    first_shard.cancelled().await;
    assert!(temp.exists());
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    // Let the aborted workers unwind and release the sink.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!temp.exists());
    assert!(!dest.exists());
}
