//! Scenario: per-owner fairness under a shared worker pool.
//!
//! # Invariants under test
//!
//! 1. The per-owner cap bounds a large owner's round share; a small owner's
//!    links are all checked in the same round (no starvation).
//! 2. With one owner and several workers, at most one probe is ever in
//!    flight against that owner's server (owner lock), and surplus workers
//!    observe WAIT sleeps.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use httpmock::prelude::*;

use lc_config::CheckerConfig;
use lc_testkit::{quick_config, unvisited_row, TestHarness};

#[tokio::test]
async fn large_owner_is_capped_and_small_owner_fully_served() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET);
            then.status(200).body("ok");
        })
        .await;

    let h = TestHarness::new();
    for i in 0..50 {
        h.store.seed([unvisited_row(
            &format!("id:a{i:02}"),
            "owner-a",
            &server.url(&format!("/a/{i}")),
        )]);
    }
    for i in 0..2 {
        h.store.seed([unvisited_row(
            &format!("id:b{i}"),
            "owner-b",
            &server.url(&format!("/b/{i}")),
        )]);
    }

    let checker = h.checker(quick_config()); // W = 10, 4 workers
    let round = checker
        .run_round(true, Instant::now(), Duration::from_secs(3600))
        .await
        .unwrap()
        .expect("workset must not be empty");

    assert_eq!(round.checked, 12, "10 capped A-links + both B-links");

    let checked_a = h
        .store
        .snapshot()
        .iter()
        .filter(|r| r.owner_id == "owner-a" && r.is_visited())
        .count();
    let checked_b = h
        .store
        .snapshot()
        .iter()
        .filter(|r| r.owner_id == "owner-b" && r.is_visited())
        .count();
    assert_eq!(checked_a, 10);
    assert_eq!(checked_b, 2);
}

/// One-owner server that records its peak connection concurrency.
async fn concurrency_probe_server(active: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                return;
            };
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            tokio::spawn(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                // Hold the connection long enough for overlap to show up.
                tokio::time::sleep(Duration::from_millis(80)).await;

                let mut buf = [0u8; 2048];
                let _ = sock.read(&mut buf).await;
                let body = b"ok";
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n",
                    body.len()
                );
                let _ = sock.write_all(head.as_bytes()).await;
                let _ = sock.write_all(body).await;
                let _ = sock.flush().await;
                active.fetch_sub(1, Ordering::SeqCst);
            });
        }
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn single_owner_never_sees_concurrent_probes() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let base = concurrency_probe_server(Arc::clone(&active), Arc::clone(&peak)).await;

    let h = TestHarness::new();
    for i in 0..6 {
        h.store
            .seed([unvisited_row(&format!("id:x{i}"), "only-owner", &format!("{base}/{i}"))]);
    }

    let config = CheckerConfig {
        workset_owner_max_links: 6,
        num_workers: 4,
        ..quick_config()
    };
    let checker = h.checker(config);
    let round = checker
        .run_round(true, Instant::now(), Duration::from_secs(3600))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(round.checked, 6);
    assert_eq!(
        peak.load(Ordering::SeqCst),
        1,
        "owner lock must serialize probes of one owner"
    );
    assert!(
        round.wait_sleep_secs > 0,
        "surplus workers must have observed WAIT"
    );
}
