use reqwest::header::HeaderMap;
use std::sync::Arc;
use std::time::Duration;
use subscout::config::Config;
use subscout::fetcher::{
    Backoff, BoundedFetcher, ContentFetcher, FetchError, FetchFailure, FetchOutcome, HttpFetcher,
    RetryPolicy,
};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path},
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn http_fetcher() -> HttpFetcher {
    HttpFetcher::new(&Config::default()).unwrap()
}

fn bounded(inner: HttpFetcher) -> BoundedFetcher {
    BoundedFetcher::new(
        Arc::new(inner),
        4,
        RetryPolicy::new(2, Backoff::Fixed(Duration::from_millis(20))),
        TIMEOUT,
    )
}

#[tokio::test]
async fn test_fetch_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/sub"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("proxies:\n  - name: a\n    server: a.example\n")
                .insert_header("Content-Type", "text/plain; charset=utf-8")
                .insert_header(
                    "subscription-userinfo",
                    "upload=1; download=2; total=1073741824",
                ),
        )
        .mount(&mock_server)
        .await;

    let url = format!("{}/sub", mock_server.uri());
    let result = http_fetcher()
        .get(&url, &HeaderMap::new(), TIMEOUT)
        .await
        .unwrap();

    assert!(result.status.is_success());
    assert!(result.body.contains("- name: a"));
    assert_eq!(result.url, url);
    assert!(result.headers.contains_key("subscription-userinfo"));
}

#[tokio::test]
async fn test_fetch_404_is_terminal() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/notfound"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let url = format!("{}/notfound", mock_server.uri());
    let result = http_fetcher().get(&url, &HeaderMap::new(), TIMEOUT).await;

    match result {
        Err(FetchError::Http { status, retriable }) => {
            assert_eq!(status.as_u16(), 404);
            assert!(!retriable);
        }
        _ => panic!("Expected HTTP 404 error"),
    }
}

#[tokio::test]
async fn test_fetch_500_is_terminal() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/error"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let url = format!("{}/error", mock_server.uri());
    let result = http_fetcher().get(&url, &HeaderMap::new(), TIMEOUT).await;

    match result {
        Err(FetchError::Http { status, retriable }) => {
            assert_eq!(status.as_u16(), 500);
            assert!(!retriable);
        }
        _ => panic!("Expected HTTP 500 error"),
    }
}

#[tokio::test]
async fn test_fetch_503_is_retryable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let url = format!("{}/busy", mock_server.uri());
    let result = http_fetcher().get(&url, &HeaderMap::new(), TIMEOUT).await;

    assert!(matches!(result, Err(ref e) if e.should_retry()));
}

#[tokio::test]
async fn test_fetch_redirect() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/redirect"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/final"))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/final"))
        .respond_with(ResponseTemplate::new(200).set_body_string("vmess://final-node-payload"))
        .mount(&mock_server)
        .await;

    let url = format!("{}/redirect", mock_server.uri());
    let result = http_fetcher()
        .get(&url, &HeaderMap::new(), TIMEOUT)
        .await
        .unwrap();

    assert!(result.body.contains("vmess://final-node-payload"));
}

#[tokio::test]
async fn test_fetch_gzip_compression() {
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    let original_content = "ss://YWVzLTI1Ni1nY206c2VjcmV0@hk.example.net:8388#HK\n";

    // Served with Content-Encoding: gzip, decoded by reqwest
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(original_content.as_bytes()).unwrap();
    let compressed_data = encoder.finish().unwrap();

    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/gzipped"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(compressed_data)
                .insert_header("Content-Type", "text/plain; charset=utf-8")
                .insert_header("Content-Encoding", "gzip"),
        )
        .mount(&mock_server)
        .await;

    let url = format!("{}/gzipped", mock_server.uri());
    let result = http_fetcher()
        .get(&url, &HeaderMap::new(), TIMEOUT)
        .await
        .unwrap();

    assert_eq!(result.body, original_content);
}

#[tokio::test]
async fn test_fetch_body_too_large() {
    let mock_server = MockServer::start().await;

    // One MiB over the body limit
    let large_body = "x".repeat(6 * 1024 * 1024);

    Mock::given(method("GET"))
        .and(path("/large"))
        .respond_with(ResponseTemplate::new(200).set_body_string(large_body))
        .mount(&mock_server)
        .await;

    let url = format!("{}/large", mock_server.uri());
    let result = http_fetcher().get(&url, &HeaderMap::new(), TIMEOUT).await;

    match result {
        Err(FetchError::BodyTooLarge(size)) => {
            assert_eq!(size, 6 * 1024 * 1024);
        }
        _ => panic!("Expected BodyTooLarge error"),
    }
}

#[tokio::test]
async fn test_fetch_timeout() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("too late")
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&mock_server)
        .await;

    let url = format!("{}/slow", mock_server.uri());
    let result = http_fetcher()
        .get(&url, &HeaderMap::new(), Duration::from_millis(100))
        .await;

    match result {
        Err(e) => assert!(e.is_timeout(), "expected timeout, got {e}"),
        Ok(_) => panic!("Expected timeout"),
    }
}

#[tokio::test]
async fn test_fetch_invalid_url() {
    let result = http_fetcher()
        .get("not-a-valid-url", &HeaderMap::new(), TIMEOUT)
        .await;

    match result {
        Err(FetchError::InvalidUrl(_)) => {}
        _ => panic!("Expected InvalidUrl error"),
    }
}

#[tokio::test]
async fn test_bounded_retries_transient_status_once() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("trojan://recovered@x:443"))
        .mount(&mock_server)
        .await;

    let url = format!("{}/flaky", mock_server.uri());
    let outcome = bounded(http_fetcher()).fetch(&url).await;

    assert!(outcome.is_success());
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_bounded_does_not_retry_terminal_status() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&mock_server)
        .await;

    let url = format!("{}/gone", mock_server.uri());
    let outcome = bounded(http_fetcher()).fetch(&url).await;

    assert!(matches!(
        outcome,
        FetchOutcome::Failure(FetchFailure::Terminal(_))
    ));
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_bounded_gives_up_after_second_transient_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&mock_server)
        .await;

    let url = format!("{}/down", mock_server.uri());
    let outcome = bounded(http_fetcher()).fetch(&url).await;

    assert!(matches!(
        outcome,
        FetchOutcome::Failure(FetchFailure::TransientExhausted { attempts: 2, .. })
    ));
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_bounded_sends_user_agent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ua"))
        .and(header("user-agent", "ClashforWindows/0.18.1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&mock_server)
        .await;

    let url = format!("{}/ua", mock_server.uri());
    let outcome = bounded(http_fetcher())
        .with_user_agent("ClashforWindows/0.18.1")
        .fetch(&url)
        .await;

    assert!(outcome.is_success());
}
