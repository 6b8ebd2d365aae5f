//! Scenario: probe classification against live sockets.
//!
//! # Invariants under test
//!
//! 1. 200 is success with the MIME type as detail and the body retained.
//! 2. 401 and 403 are success (deliberate policy).
//! 3. Any other status is failure carrying that status.
//! 4. Redirects are followed to the final status.
//! 5. Connection failure → return code −1 with an exception string.
//! 6. Timeout → return code −1 with "timeout".
//! 7. The body is retained only up to max_read, without failing the probe.
//! 8. Truncated text/html body ending `</HTML >` → success, body kept.
//! 9. Truncated body without the HTML shape → failure with −1.
//! 10. Two probes of one URL classify identically (deterministic server).
//! 11. Recording a probe persists the updated row; a persistence failure
//!     does not propagate.

use httpmock::prelude::*;

use lc_db::mem::MemLinkStore;
use lc_db::LinkStore;
use lc_fetcher::{check_and_record, probe, FetchConfig};
use lc_schemas::{LinkRow, EXCEPTION_RETURN_CODE};

fn config() -> FetchConfig {
    FetchConfig {
        user_agent: "linkcheck-test/0".to_string(),
        check_timeout: 5,
        max_read: 64 * 1024,
    }
}

#[tokio::test]
async fn ok_response_is_success_with_mime_and_body() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/doc");
            then.status(200)
                .header("Content-Type", "text/html; charset=utf-8")
                .body("<html><body>hi</body></html>");
        })
        .await;

    let report = probe(&config(), &server.url("/doc")).await;
    assert!(report.is_success());
    assert_eq!(report.return_code, 200);
    assert_eq!(report.detail, "text/html; charset=utf-8");
    assert_eq!(report.body, b"<html><body>hi</body></html>");
}

#[tokio::test]
async fn auth_walls_count_as_success() {
    let server = MockServer::start_async().await;
    for (path, status) in [("/401", 401u16), ("/403", 403u16)] {
        server
            .mock_async(|when, then| {
                when.method(GET).path(path);
                then.status(status).body("denied");
            })
            .await;

        let report = probe(&config(), &server.url(path)).await;
        assert!(report.is_success(), "{status} must classify as success");
        assert_eq!(report.return_code, i32::from(status));
    }
}

#[tokio::test]
async fn server_error_is_failure_with_status_code() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/boom");
            then.status(500).body("oops");
        })
        .await;

    let report = probe(&config(), &server.url("/boom")).await;
    assert!(!report.is_success());
    assert_eq!(report.return_code, 500);
}

#[tokio::test]
async fn redirects_are_followed_to_final_status() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/start");
            then.status(302).header("Location", "/end");
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/end");
            then.status(200).header("Content-Type", "text/plain").body("landed");
        })
        .await;

    let report = probe(&config(), &server.url("/start")).await;
    assert!(report.is_success());
    assert_eq!(report.return_code, 200);
    assert_eq!(report.body, b"landed");
}

#[tokio::test]
async fn connection_failure_is_exception() {
    // Bind-then-drop guarantees a port nothing is listening on.
    let port = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };

    let report = probe(&config(), &format!("http://127.0.0.1:{port}/")).await;
    assert_eq!(report.return_code, EXCEPTION_RETURN_CODE);
    assert!(!report.detail.is_empty(), "exception string must be captured");
    assert!(report.body.is_empty());
}

#[tokio::test]
async fn slow_server_times_out_as_exception() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/slow");
            then.status(200).delay(std::time::Duration::from_secs(10)).body("late");
        })
        .await;

    let cfg = FetchConfig {
        check_timeout: 1,
        ..config()
    };
    let report = probe(&cfg, &server.url("/slow")).await;
    assert_eq!(report.return_code, EXCEPTION_RETURN_CODE);
    assert_eq!(report.detail, "timeout");
}

#[tokio::test]
async fn body_is_capped_at_max_read() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/big");
            then.status(200).body("x".repeat(10_000));
        })
        .await;

    let cfg = FetchConfig {
        max_read: 100,
        ..config()
    };
    let report = probe(&cfg, &server.url("/big")).await;
    assert!(report.is_success());
    assert_eq!(report.body.len(), 100);
}

#[tokio::test]
async fn probe_classification_is_deterministic() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/stable");
            then.status(404).body("gone");
        })
        .await;

    let a = probe(&config(), &server.url("/stable")).await;
    let b = probe(&config(), &server.url("/stable")).await;
    assert_eq!(a, b);
}

// ---------------------------------------------------------------------------
// Truncated reads (raw listener; httpmock always completes its bodies)
// ---------------------------------------------------------------------------

/// One-shot server that declares a longer Content-Length than it delivers,
/// then closes, forcing a mid-body read error in the client.
async fn truncating_server(content_type: &'static str, body: &'static [u8]) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((mut sock, _)) = listener.accept().await {
            let mut buf = [0u8; 2048];
            let _ = sock.read(&mut buf).await;
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\r\n",
                body.len() + 1000
            );
            let _ = sock.write_all(head.as_bytes()).await;
            let _ = sock.write_all(body).await;
            let _ = sock.flush().await;
            // Socket drops here, short of the declared length.
        }
    });
    format!("http://{addr}/")
}

#[tokio::test]
async fn truncated_html_with_closing_tag_is_reclassified_success() {
    let url = truncating_server("text/html", b"<html><body>done</body></HTML >\n").await;

    let report = probe(&config(), &url).await;
    assert!(report.is_success(), "complete-looking HTML must classify as success");
    assert_eq!(report.return_code, 200);
    assert_eq!(report.body, b"<html><body>done</body></HTML >\n");
}

#[tokio::test]
async fn truncated_plain_text_stays_a_failure() {
    let url = truncating_server("text/plain", b"looks like </html>").await;

    let report = probe(&config(), &url).await;
    assert!(!report.is_success());
    assert_eq!(report.return_code, EXCEPTION_RETURN_CODE);
    assert!(!report.detail.is_empty());
}

#[tokio::test]
async fn truncated_html_without_closing_tag_stays_a_failure() {
    let url = truncating_server("text/html", b"<html><body>half a page").await;

    let report = probe(&config(), &url).await;
    assert_eq!(report.return_code, EXCEPTION_RETURN_CODE);
}

// ---------------------------------------------------------------------------
// Recording
// ---------------------------------------------------------------------------

#[tokio::test]
async fn check_and_record_persists_verdict_and_history() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/doc");
            then.status(200).header("Content-Type", "text/html").body("<html></html>");
        })
        .await;

    let store = MemLinkStore::new();
    let mut row = LinkRow::new("id:a", "o1", &server.url("/doc"));
    store.seed([row.clone()]);

    let report = check_and_record(&store, &config(), &mut row, 8, 1_700_000_000).await;
    assert!(report.is_success());

    let persisted = store.get_row("id:a").await.unwrap().unwrap();
    assert!(persisted.is_good());
    assert_eq!(persisted.last_check_time, 1_700_000_000);
    assert_eq!(persisted.history.len(), 1);
    assert_eq!(persisted.history[0].detail, "text/html");
}

#[tokio::test]
async fn persistence_failure_does_not_propagate() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/doc");
            then.status(200).body("ok");
        })
        .await;

    let store = MemLinkStore::new();
    let mut row = LinkRow::new("id:a", "o1", &server.url("/doc"));
    store.seed([row.clone()]);
    store.fail_writes_for("id:a");

    // The report still comes back; the row keeps its in-memory update.
    let report = check_and_record(&store, &config(), &mut row, 8, 1_700_000_000).await;
    assert!(report.is_success());
    assert!(row.is_good());

    let persisted = store.get_row("id:a").await.unwrap().unwrap();
    assert!(!persisted.is_visited(), "failed write must leave the stored row untouched");
}
