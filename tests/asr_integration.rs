//! Integration tests for the ASR client and connection pool against an
//! in-process mock backend.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{spawn_mock_asr, unreachable_asr_config};

use voxrelay::core::asr::{
    AsrConnection, AsrMode, AsrPool, ControlFrame, PoolAcquire, PoolConfig, RecognitionEvent,
    SegmentProgress, SegmentUpdate,
};

fn pool_config(min: usize, max: usize) -> PoolConfig {
    PoolConfig {
        min,
        max,
        max_idle: Duration::from_secs(300),
    }
}

#[tokio::test]
async fn test_streaming_connection_roundtrip() {
    let server = spawn_mock_asr(Vec::new()).await;

    let conn = AsrConnection::connect(&server.config()).await.unwrap();
    conn.send_config(&ControlFrame::stream_start(&AsrMode::two_pass(), "stream"))
        .await
        .unwrap();
    conn.send_audio(&[0u8; 320]).await.unwrap();

    server.send_frame(r#"{"text": "hel", "mode": "2pass-online"}"#);
    let event = conn.receive(Duration::from_secs(5)).await;
    assert_eq!(event, RecognitionEvent::Partial("hel".to_string()));

    server.send_frame(r#"{"text": "hello", "mode": "2pass-offline"}"#);
    let event = conn.receive(Duration::from_secs(5)).await;
    assert_eq!(event, RecognitionEvent::Final("hello".to_string()));

    conn.disconnect();
}

#[tokio::test]
async fn test_receive_timeout_is_no_event() {
    let server = spawn_mock_asr(Vec::new()).await;
    let conn = AsrConnection::connect(&server.config()).await.unwrap();

    let event = conn.receive(Duration::from_millis(100)).await;
    assert_eq!(event, RecognitionEvent::NoEvent);
    assert!(conn.is_connected());
}

#[tokio::test]
async fn test_audio_before_config_is_rejected() {
    let server = spawn_mock_asr(Vec::new()).await;
    let conn = AsrConnection::connect(&server.config()).await.unwrap();

    assert!(conn.send_audio(&[0u8; 32]).await.is_err());
}

#[tokio::test]
async fn test_disconnect_is_idempotent_and_drains_to_no_event() {
    let server = spawn_mock_asr(Vec::new()).await;
    let conn = AsrConnection::connect(&server.config()).await.unwrap();

    conn.disconnect();
    conn.disconnect();

    assert!(!conn.is_connected());
    let event = conn.receive(Duration::from_millis(50)).await;
    assert_eq!(event, RecognitionEvent::NoEvent);
}

#[tokio::test]
async fn test_malformed_frames_are_dropped() {
    let server = spawn_mock_asr(Vec::new()).await;
    let conn = AsrConnection::connect(&server.config()).await.unwrap();

    server.send_frame("this is not json");
    server.send_frame(r#"{"text": "ok", "mode": "offline"}"#);

    // The malformed frame is skipped, the next valid one comes through
    let event = conn.receive(Duration::from_secs(5)).await;
    assert_eq!(event, RecognitionEvent::Final("ok".to_string()));
}

#[tokio::test]
async fn test_batch_recognition_accumulates_segments() {
    let server = spawn_mock_asr(vec![
        r#"{"text": "hello", "mode": "offline", "is_final": false}"#.to_string(),
        r#"{"text": "world", "mode": "offline", "is_final": true}"#.to_string(),
    ])
    .await;

    let segments = Arc::new(AtomicUsize::new(0));
    let counter = segments.clone();
    let progress: SegmentProgress = Arc::new(move |_update: SegmentUpdate| {
        let counter = counter.clone();
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
    });

    let text = AsrConnection::recognize_offline(
        &server.config(),
        &[0u8; 4800],
        16000,
        Some(progress),
    )
    .await
    .unwrap();

    assert_eq!(text, "hello world");
    assert_eq!(segments.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_pool_serves_max_distinct_owners_then_exhausts() {
    let server = spawn_mock_asr(Vec::new()).await;
    let pool = AsrPool::new(server.config(), pool_config(0, 3));

    for owner in ["a", "b", "c"] {
        match pool.acquire(owner).await.unwrap() {
            PoolAcquire::Connection(_) => {}
            PoolAcquire::Exhausted => panic!("pool exhausted before max for owner {owner}"),
        }
    }

    match pool.acquire("d").await.unwrap() {
        PoolAcquire::Exhausted => {}
        PoolAcquire::Connection(_) => panic!("expected exhaustion past max owners"),
    }

    let stats = pool.stats().await;
    assert_eq!(stats.total, 3);
    assert_eq!(stats.active, 3);
    assert_eq!(stats.active_owners, 3);

    pool.shutdown().await;
}

#[tokio::test]
async fn test_acquire_twice_returns_same_connection() {
    let server = spawn_mock_asr(Vec::new()).await;
    let pool = AsrPool::new(server.config(), pool_config(0, 2));

    let first = match pool.acquire("owner").await.unwrap() {
        PoolAcquire::Connection(conn) => conn,
        PoolAcquire::Exhausted => panic!("unexpected exhaustion"),
    };
    let second = match pool.acquire("owner").await.unwrap() {
        PoolAcquire::Connection(conn) => conn,
        PoolAcquire::Exhausted => panic!("unexpected exhaustion"),
    };

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(pool.stats().await.total, 1);

    pool.shutdown().await;
}

#[tokio::test]
async fn test_release_makes_connection_reusable() {
    let server = spawn_mock_asr(Vec::new()).await;
    let pool = AsrPool::new(server.config(), pool_config(0, 1));

    let first = match pool.acquire("a").await.unwrap() {
        PoolAcquire::Connection(conn) => conn,
        PoolAcquire::Exhausted => panic!("unexpected exhaustion"),
    };
    pool.release("a").await;

    let second = match pool.acquire("b").await.unwrap() {
        PoolAcquire::Connection(conn) => conn,
        PoolAcquire::Exhausted => panic!("released connection was not reused"),
    };

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(pool.stats().await.total, 1);

    pool.shutdown().await;
}

#[tokio::test]
async fn test_sweep_never_drops_below_min() {
    let server = spawn_mock_asr(Vec::new()).await;
    let pool = AsrPool::new(
        server.config(),
        PoolConfig {
            min: 1,
            max: 3,
            max_idle: Duration::ZERO,
        },
    );

    for owner in ["a", "b", "c"] {
        assert!(matches!(
            pool.acquire(owner).await.unwrap(),
            PoolAcquire::Connection(_)
        ));
    }
    for owner in ["a", "b", "c"] {
        pool.release(owner).await;
    }

    // Everything is free and instantly idle-expired, but min must survive
    pool.sweep_idle().await;

    let stats = pool.stats().await;
    assert_eq!(stats.total, 1);
    assert_eq!(stats.idle, 1);

    pool.shutdown().await;
}

#[tokio::test]
async fn test_sweep_keeps_connections_in_use() {
    let server = spawn_mock_asr(Vec::new()).await;
    let pool = AsrPool::new(
        server.config(),
        PoolConfig {
            min: 0,
            max: 2,
            max_idle: Duration::ZERO,
        },
    );

    assert!(matches!(
        pool.acquire("busy").await.unwrap(),
        PoolAcquire::Connection(_)
    ));

    pool.sweep_idle().await;

    let stats = pool.stats().await;
    assert_eq!(stats.total, 1);
    assert_eq!(stats.active, 1);

    pool.shutdown().await;
}

#[tokio::test]
async fn test_failed_creation_leaves_pool_unchanged() {
    let pool = AsrPool::new(unreachable_asr_config(), pool_config(0, 2));

    assert!(pool.acquire("owner").await.is_err());

    let stats = pool.stats().await;
    assert_eq!(stats.total, 0);
    assert_eq!(stats.active_owners, 0);

    pool.shutdown().await;
}
