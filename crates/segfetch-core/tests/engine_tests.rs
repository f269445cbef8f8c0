//! End-to-end engine tests against a local stub HTTP server.
//!
//! The stub speaks just enough HTTP/1.1 to serve range requests, and can be
//! told to misbehave: oversend past the requested range, truncate the body,
//! fail one range with a 500, or trickle bytes slowly.

use reqwest::Client;
use segfetch_core::types::{DownloadTask, TaskEvent, TaskStatus, WorkerStatus};
use segfetch_core::{CoreError, DownloadEngine, DownloadWorkerPool, SiblingPolicy, StartOptions};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

#[derive(Clone, Copy)]
enum ServerMode {
    /// Serve exactly the requested range
    Exact,
    /// Append this many zero bytes after the requested range
    Oversend(usize),
    /// Respond 500 to the range starting at this offset
    FailRangeStartingAt(u64),
    /// Promise the full range but send only half of it
    Truncate,
    /// Serve the range in 1 KiB chunks with a small delay between them
    Trickle,
}

async fn spawn_server(body: Vec<u8>, mode: ServerMode) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let body = Arc::new(body);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(handle_connection(stream, body.clone(), mode));
        }
    });
    addr
}

async fn handle_connection(mut stream: TcpStream, body: Arc<Vec<u8>>, mode: ServerMode) {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        request.extend_from_slice(&buf[..n]);
        if request.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let request = String::from_utf8_lossy(&request).to_string();

    if request.starts_with("HEAD") {
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nAccept-Ranges: bytes\r\nConnection: close\r\n\r\n",
            body.len()
        );
        let _ = stream.write_all(response.as_bytes()).await;
        return;
    }

    let (start, end) = parse_range(&request).unwrap_or((0, body.len() as u64 - 1));

    if let ServerMode::FailRangeStartingAt(failing_start) = mode {
        if start == failing_start {
            let _ = stream
                .write_all(
                    b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                )
                .await;
            return;
        }
    }

    let slice = &body[start as usize..=end as usize];
    let payload: Vec<u8> = match mode {
        ServerMode::Oversend(extra) => {
            let mut padded = slice.to_vec();
            padded.extend(std::iter::repeat(0u8).take(extra));
            padded
        }
        ServerMode::Truncate => slice[..slice.len() / 2].to_vec(),
        _ => slice.to_vec(),
    };

    let header = format!(
        "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\nConnection: close\r\n\r\n",
        payload.len(),
        start,
        end,
        body.len()
    );
    if stream.write_all(header.as_bytes()).await.is_err() {
        return;
    }

    match mode {
        ServerMode::Trickle => {
            for chunk in payload.chunks(1024) {
                if stream.write_all(chunk).await.is_err() {
                    return;
                }
                let _ = stream.flush().await;
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        }
        _ => {
            let _ = stream.write_all(&payload).await;
        }
    }
    let _ = stream.flush().await;
}

fn parse_range(request: &str) -> Option<(u64, u64)> {
    for line in request.lines() {
        let lower = line.to_ascii_lowercase();
        if let Some(rest) = lower.strip_prefix("range: bytes=") {
            let mut parts = rest.trim().split('-');
            let start = parts.next()?.parse().ok()?;
            let end = parts.next()?.parse().ok()?;
            return Some((start, end));
        }
    }
    None
}

fn test_body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn temp_destination(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("segfetch-{}-{}", tag, uuid::Uuid::new_v4()))
}

fn task_for(addr: SocketAddr, destination: PathBuf, total_size: u64) -> DownloadTask {
    DownloadTask::new(
        format!("http://{}/file.bin", addr),
        "file.bin".to_string(),
        destination,
        total_size,
    )
}

#[tokio::test]
async fn multi_segment_download_reassembles_the_file() {
    let body = test_body(100_000);
    let addr = spawn_server(body.clone(), ServerMode::Exact).await;
    let destination = temp_destination("multi");

    let pool = DownloadWorkerPool::new(Client::new());
    let handle = pool
        .start(
            task_for(addr, destination.clone(), body.len() as u64),
            StartOptions {
                segment_count: 4,
                ..Default::default()
            },
        )
        .unwrap();

    let parts = handle.wait().await.unwrap();
    assert_eq!(parts.len(), 4);
    let ids: Vec<u32> = parts.iter().map(|p| p.worker_id).collect();
    assert_eq!(ids, vec![0, 1, 2, 3]);

    // Concatenating the parts in worker-id order reconstructs the file
    let mut merged = Vec::new();
    for part in &parts {
        merged.extend(std::fs::read(&part.file_path).unwrap());
    }
    assert_eq!(merged, body);

    std::fs::remove_dir_all(&destination).unwrap();
}

#[tokio::test]
async fn oversized_server_response_is_clamped() {
    let body = test_body(10_000);
    let addr = spawn_server(body.clone(), ServerMode::Oversend(500)).await;
    let destination = temp_destination("clamp");

    let pool = DownloadWorkerPool::new(Client::new());
    let handle = pool
        .start(
            task_for(addr, destination.clone(), body.len() as u64),
            StartOptions {
                segment_count: 1,
                ..Default::default()
            },
        )
        .unwrap();

    let parts = handle.wait().await.unwrap();
    assert_eq!(parts.len(), 1);

    // The extra 500 bytes never reach the segment file
    let content = std::fs::read(&parts[0].file_path).unwrap();
    assert_eq!(content, body);

    std::fs::remove_dir_all(&destination).unwrap();
}

#[tokio::test]
async fn full_progress_is_observed_before_completion() {
    let body = test_body(8_192);
    let addr = spawn_server(body.clone(), ServerMode::Trickle).await;
    let destination = temp_destination("order");

    let pool = DownloadWorkerPool::new(Client::new());
    let handle = pool
        .start(
            task_for(addr, destination.clone(), body.len() as u64),
            StartOptions {
                segment_count: 2,
                ..Default::default()
            },
        )
        .unwrap();

    let mut rx = handle.subscribe();
    let collector = tokio::spawn(async move {
        let mut events = Vec::new();
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let done = matches!(event, TaskEvent::Completed { .. });
                    events.push(event);
                    if done {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        events
    });

    handle.wait().await.unwrap();
    let events = collector.await.unwrap();

    let completed_at = events
        .iter()
        .position(|e| matches!(e, TaskEvent::Completed { .. }))
        .expect("completed event observed");
    let full_progress_at = events
        .iter()
        .position(|e| {
            matches!(e, TaskEvent::Progress(p) if p.bytes_received == body.len() as u64)
        })
        .expect("a 100% progress event was published");
    assert!(full_progress_at < completed_at);

    // Worker status transitions arrive in their canonical order
    let ranks: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            TaskEvent::WorkerStatusChanged {
                worker_id: 0,
                status,
                ..
            } => Some(match status {
                WorkerStatus::Initialized => 0,
                WorkerStatus::Starting => 1,
                WorkerStatus::Downloading => 2,
                _ => 3,
            }),
            _ => None,
        })
        .collect();
    assert!(ranks.windows(2).all(|w| w[0] <= w[1]));

    std::fs::remove_dir_all(&destination).unwrap();
}

#[tokio::test]
async fn one_failed_worker_fails_the_task() {
    let body = test_body(40_000);
    // Worker 1 owns the range starting at 10_000 when split four ways
    let addr = spawn_server(body.clone(), ServerMode::FailRangeStartingAt(10_000)).await;
    let destination = temp_destination("fail");

    let pool = DownloadWorkerPool::new(Client::new());
    let handle = pool
        .start(
            task_for(addr, destination.clone(), body.len() as u64),
            StartOptions {
                segment_count: 4,
                on_worker_error: SiblingPolicy::ContinueSiblings,
            },
        )
        .unwrap();

    match handle.wait().await {
        Err(CoreError::TaskFailed { worker_id, .. }) => assert_eq!(worker_id, 1),
        other => panic!("expected TaskFailed, got {:?}", other.map(|_| ())),
    }

    // Healthy siblings ran to completion and their segment files remain
    for id in [0u32, 2, 3] {
        let path = destination.join(format!("{}-file.bin", id));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 10_000);
    }

    std::fs::remove_dir_all(&destination).unwrap();
}

#[tokio::test]
async fn premature_stream_end_fails_the_worker() {
    let body = test_body(20_000);
    let addr = spawn_server(body.clone(), ServerMode::Truncate).await;
    let destination = temp_destination("truncate");

    let pool = DownloadWorkerPool::new(Client::new());
    let handle = pool
        .start(
            task_for(addr, destination.clone(), body.len() as u64),
            StartOptions {
                segment_count: 1,
                ..Default::default()
            },
        )
        .unwrap();

    match handle.wait().await {
        Err(CoreError::TaskFailed { worker_id, cause }) => {
            assert_eq!(worker_id, 0);
            assert!(cause.contains("10000"), "cause: {}", cause);
        }
        other => panic!("expected TaskFailed, got {:?}", other.map(|_| ())),
    }

    std::fs::remove_dir_all(&destination).unwrap();
}

#[tokio::test]
async fn invalid_configuration_starts_nothing() {
    let destination = temp_destination("invalid");
    let pool = DownloadWorkerPool::new(Client::new());

    let task = DownloadTask::new(
        "http://127.0.0.1:9/file.bin".to_string(),
        "file.bin".to_string(),
        destination.clone(),
        1000,
    );
    assert!(matches!(
        pool.start(
            task.clone(),
            StartOptions {
                segment_count: 0,
                ..Default::default()
            }
        ),
        Err(CoreError::InvalidConfiguration(_))
    ));

    let empty = DownloadTask::new(task.url.clone(), task.file_name.clone(), destination.clone(), 0);
    assert!(matches!(
        pool.start(empty, StartOptions::default()),
        Err(CoreError::InvalidConfiguration(_))
    ));

    // No worker ever ran, so no destination directory was created
    assert!(!destination.exists());
}

#[tokio::test]
async fn cancel_stops_all_workers() {
    let body = test_body(200_000);
    let addr = spawn_server(body.clone(), ServerMode::Trickle).await;
    let destination = temp_destination("cancel");

    let pool = DownloadWorkerPool::new(Client::new());
    let handle = pool
        .start(
            task_for(addr, destination.clone(), body.len() as u64),
            StartOptions {
                segment_count: 2,
                ..Default::default()
            },
        )
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.cancel();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let snapshot = handle.snapshot();
    assert!(snapshot
        .workers
        .iter()
        .all(|w| w.status == WorkerStatus::Stopped));

    assert!(matches!(handle.wait().await, Err(CoreError::Cancelled)));

    std::fs::remove_dir_all(&destination).unwrap();
}

#[tokio::test]
async fn pause_suspends_all_workers() {
    let body = test_body(200_000);
    let addr = spawn_server(body.clone(), ServerMode::Trickle).await;
    let destination = temp_destination("pause");

    let pool = DownloadWorkerPool::new(Client::new());
    let handle = pool
        .start(
            task_for(addr, destination.clone(), body.len() as u64),
            StartOptions {
                segment_count: 2,
                ..Default::default()
            },
        )
        .unwrap();

    // The initial status lives in the snapshot, not the event stream
    assert_eq!(handle.snapshot().status, TaskStatus::Downloading);

    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.pause();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.status, TaskStatus::Paused);
    assert!(snapshot
        .workers
        .iter()
        .all(|w| w.status == WorkerStatus::Paused));

    assert!(matches!(handle.wait().await, Err(CoreError::Paused)));

    // The partial segment files survive for a caller-driven resume
    for id in [0u32, 1] {
        assert!(destination.join(format!("{}-file.bin", id)).exists());
    }

    std::fs::remove_dir_all(&destination).unwrap();
}

#[tokio::test]
async fn engine_tracks_and_cancels_active_tasks() {
    let body = test_body(200_000);
    let addr = spawn_server(body.clone(), ServerMode::Trickle).await;
    let destination = temp_destination("engine");

    let engine = DownloadEngine::with_client(Client::new());
    let (id, handle) = engine
        .start(
            task_for(addr, destination.clone(), body.len() as u64),
            StartOptions {
                segment_count: 2,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(engine.is_active(id).await);
    assert_eq!(engine.active_count().await, 1);

    assert!(engine.cancel(id).await);
    assert!(matches!(handle.wait().await, Err(CoreError::Cancelled)));
    assert!(!engine.is_active(id).await);

    std::fs::remove_dir_all(&destination).unwrap();
}

#[tokio::test]
async fn probe_reports_size_and_range_support() {
    let body = test_body(5_000);
    let addr = spawn_server(body.clone(), ServerMode::Exact).await;

    let engine = DownloadEngine::with_client(Client::new());
    let url = url::Url::parse(&format!("http://{}/archive/file.bin", addr)).unwrap();
    let info = engine.probe(&url).await.unwrap();

    assert_eq!(info.size, Some(5_000));
    assert!(info.resumable);
    assert_eq!(info.file_name, "file.bin");
}
