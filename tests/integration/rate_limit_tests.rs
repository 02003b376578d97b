use std::time::Duration;

use gatehouse_common::{BucketConfig, FlowRate, RateLimitConfig};
use gatehouse_rate_limit::{RateLimiter, TokenBucket};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;

fn config(per_second: f64, burst: f64) -> BucketConfig {
    BucketConfig::new(FlowRate::per_second(per_second).unwrap(), burst)
}

#[tokio::test(start_paused = true)]
async fn test_burst_then_refill() {
    let bucket = TokenBucket::new(&config(10.0, 5.0)).unwrap();

    for _ in 0..5 {
        assert!(bucket.take_now(1.0));
    }
    assert!(!bucket.take_now(1.0));

    tokio::time::advance(Duration::from_millis(100)).await;
    assert!(bucket.take_now(1.0));
    assert!(!bucket.take_now(1.0));

    // Refill never exceeds the burst size.
    tokio::time::advance(Duration::from_secs(60)).await;
    let snapshot = bucket.snapshot_now();
    assert!((snapshot.available_burst - 5.0).abs() < 1e-6);
}

#[tokio::test(start_paused = true)]
async fn test_rate_parsed_from_config_text() {
    let rate = FlowRate::try_from("120/min".to_string()).unwrap();
    let bucket = TokenBucket::new(&BucketConfig::new(rate, 1.0)).unwrap();

    assert!(bucket.request_grant(1.0).await.granted);
    let started = Instant::now();
    let grant = bucket.request_grant(1.0).await;
    assert!(grant.granted);
    // Two units per second.
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(500) && waited < Duration::from_millis(600));
}

#[tokio::test(start_paused = true)]
async fn test_waiters_served_in_arrival_order() {
    let bucket = TokenBucket::new(&config(1.0, 1.0)).unwrap();
    assert!(bucket.take_now(1.0));

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    for id in 0..3 {
        let bucket = bucket.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let grant = bucket.request_grant(1.0).await;
            tx.send((id, grant.granted)).unwrap();
        });
        // Let each waiter enqueue before the next one starts.
        tokio::task::yield_now().await;
    }
    drop(tx);

    let mut order = Vec::new();
    while let Some((id, granted)) = rx.recv().await {
        assert!(granted);
        order.push(id);
    }
    assert_eq!(order, vec![0, 1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_limiter_from_yaml_config() {
    let yaml = r#"
connections:
  flow_rate: 1/s
  max_burst_size: 2
  max_queue_size: 0
data:
  flow_rate: 4/s
  max_burst_size: 4
"#;
    let limits: RateLimitConfig = serde_yaml::from_str(yaml).unwrap();
    let limiter = RateLimiter::new(&limits).unwrap();

    assert!(limiter.admit_connection().await);
    assert!(limiter.admit_connection().await);
    assert!(!limiter.admit_connection().await);
    assert!(limiter.admit_request().await);

    let (client, mut server) = tokio::io::duplex(1024);
    let mut stream = limiter.wrap_outbound_stream(client);
    assert!(stream.is_throttled());

    let started = Instant::now();
    stream.write_all(&[7u8; 12]).await.unwrap();
    // Four bytes of burst, then eight more at four per second.
    assert!(started.elapsed() >= Duration::from_secs(2));

    let mut received = [0u8; 12];
    server.read_exact(&mut received).await.unwrap();
    assert_eq!(received, [7u8; 12]);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_fails_throttled_writes() {
    let limiter = RateLimiter::new(&RateLimitConfig {
        data: Some(config(1.0, 1.0)),
        ..Default::default()
    })
    .unwrap();

    let (client, _server) = tokio::io::duplex(1024);
    let mut stream = limiter.wrap_outbound_stream(client);

    let writer = tokio::spawn(async move { stream.write_all(b"slow bytes").await });
    tokio::time::sleep(Duration::from_millis(1500)).await;

    limiter.shutdown();
    let err = writer.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::ConnectionAborted);
}
