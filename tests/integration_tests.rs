//! Integration tests using wiremock to simulate HTTP servers.

use callkit::{handler_fn, CallContext, Client, Error, FaultKind, JsonMap};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Serialize, Deserialize, PartialEq, Default)]
struct TestData {
    id: u32,
    name: String,
}

/// Accepts one connection, answers it with `response` verbatim, then keeps
/// the socket open for `linger` before closing it.
///
/// wiremock always sends complete, well-formed responses; this is for the
/// ones it cannot produce.
async fn serve_raw(response: &'static str, linger: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
        }
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.flush().await.unwrap();
        tokio::time::sleep(linger).await;
    });
    format!("http://{addr}")
}

const TRUNCATED_BODY: &str =
    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 100\r\n\r\n{\"id\":";

fn client_for(server: &MockServer) -> Client {
    Client::builder()
        .base_url(server.uri())
        .unwrap()
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_successful_get_request() {
    let mock_server = MockServer::start().await;

    let response_data = TestData {
        id: 1,
        name: "Test".to_string(),
    };

    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(&response_data)
                .insert_header("x-custom-header", "custom-value"),
        )
        .mount(&mock_server)
        .await;

    let response = client_for(&mock_server).get("/test").send().await.unwrap();

    assert_eq!(response.status().unwrap().as_u16(), 200);
    assert_eq!(response.header("x-custom-header"), Some("custom-value"));
    assert!(response.call().succeeded());
    assert_eq!(response.call().url(), format!("{}/test", mock_server.uri()));
    assert_eq!(response.receive_json::<TestData>().await.unwrap(), response_data);
}

#[tokio::test]
async fn test_post_json_body_is_sent_and_recorded() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/test"))
        .and(header("content-type", "application/json"))
        .and(body_string(r#"{"id":0,"name":"New"}"#))
        .respond_with(ResponseTemplate::new(201).set_body_json(TestData {
            id: 1,
            name: "New".to_string(),
        }))
        .mount(&mock_server)
        .await;

    let response = client_for(&mock_server)
        .post("/test")
        .json(&TestData {
            id: 0,
            name: "New".to_string(),
        })
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().unwrap().as_u16(), 201);
    assert_eq!(response.call().request_body(), Some(r#"{"id":0,"name":"New"}"#));
    assert_eq!(response.receive_json::<TestData>().await.unwrap().id, 1);
}

#[tokio::test]
async fn test_error_status_message_excludes_json_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"message":"bad data!"}"#))
        .mount(&mock_server)
        .await;

    let result = client_for(&mock_server)
        .post("")
        .json(&serde_json::json!({"a": 1}))
        .send()
        .await;

    match result {
        Err(Error::Http(e)) => {
            assert_eq!(
                e.to_string(),
                format!(
                    "Call failed with status code 400 (Bad Request): POST {}",
                    mock_server.uri()
                )
            );
            assert_eq!(e.status().unwrap().as_u16(), 400);
            assert_eq!(e.call().fault().unwrap().kind, FaultKind::Status);
            assert_eq!(e.response_string().await.unwrap(), r#"{"message":"bad data!"}"#);

            #[derive(Deserialize)]
            struct ApiError {
                message: String,
            }
            let payload: ApiError = e.response_json().await.unwrap();
            assert_eq!(payload.message, "bad data!");

            assert_eq!(
                e.diagnostics().await.unwrap(),
                format!(
                    "Call failed with status code 400 (Bad Request): POST {}\nRequest body: {{\"a\":1}}\nResponse body: {{\"message\":\"bad data!\"}}",
                    mock_server.uri()
                )
            );
        }
        other => panic!("Expected Http error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_error_status_with_empty_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&mock_server)
        .await;

    let err = client_for(&mock_server).get("").send().await.unwrap_err();

    let expected = format!(
        "Call failed with status code 400 (Bad Request): GET {}",
        mock_server.uri()
    );
    assert_eq!(err.to_string(), expected);
    let http = err.http().unwrap();
    assert_eq!(http.response_string().await.unwrap(), "");
    assert_eq!(http.diagnostics().await.unwrap(), expected);
}

#[tokio::test]
async fn test_invalid_json_is_parsing_error_with_raw_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("I'm not JSON!"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let result = client_for(&mock_server).get("").receive_json::<TestData>().await;

    match result {
        Err(Error::Parsing(e)) => {
            assert_eq!(
                e.to_string(),
                format!(
                    "Response could not be deserialized to JSON: GET {}",
                    mock_server.uri()
                )
            );
            assert_eq!(e.data_format(), "JSON");
            let source = std::error::Error::source(&e).unwrap();
            assert!(source.downcast_ref::<serde_json::Error>().is_some());

            let first = e.response_string().await.unwrap();
            let second = e.response_string().await.unwrap();
            assert_eq!(first, "I'm not JSON!");
            assert_eq!(first, second);
        }
        other => panic!("Expected Parsing error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_error_body_is_read_once() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("down for maintenance"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let err = client_for(&mock_server).get("/status").send().await.unwrap_err();
    let http = err.http().unwrap();
    assert_eq!(http.response_string().await.unwrap(), "down for maintenance");
    assert_eq!(http.response_string().await.unwrap(), "down for maintenance");
    assert_eq!(http.response_bytes().await.unwrap(), "down for maintenance".as_bytes());
}

#[tokio::test]
async fn test_handler_suppresses_status_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
        .mount(&mock_server)
        .await;

    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = invocations.clone();
    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .error_handler(handler_fn(move |call: &CallContext, error: &Error| {
            counter.fetch_add(1, Ordering::SeqCst);
            call.status().map(|s| s.as_u16()) == Some(500) && !error.is_parsing()
        }))
        .build()
        .unwrap();

    let response = client.get("/flaky").send().await.unwrap();
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(response.status().unwrap().as_u16(), 500);
    assert_eq!(response.call().fault().unwrap().kind, FaultKind::Status);
    assert_eq!(response.receive_string().await.unwrap().as_deref(), Some("oops"));

    // The body fails to parse too: a second fault, offered to the handler,
    // which does not handle parse failures.
    let err = response.receive_json::<TestData>().await.unwrap_err();
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
    let context = err.call().unwrap();
    assert_eq!(context.fault().unwrap().kind, FaultKind::Status);
    assert_eq!(context.subsequent_faults().len(), 1);
    assert_eq!(context.subsequent_faults()[0].kind, FaultKind::Parse);
}

#[tokio::test]
async fn test_handler_suppresses_transport_failure() {
    let client = Client::builder()
        .error_handler(handler_fn(|call: &CallContext, _error: &Error| {
            call.fault().map(|f| f.kind) == Some(FaultKind::Transport)
        }))
        .build()
        .unwrap();

    let response = client.get("http://127.0.0.1:1/nothing").send().await.unwrap();
    assert!(!response.has_response());
    assert_eq!(response.status(), None);
    assert_eq!(response.receive_string().await.unwrap(), None);
    assert_eq!(response.receive_bytes().await.unwrap(), None);
    assert_eq!(response.receive_json::<TestData>().await.unwrap(), TestData::default());
    assert_eq!(response.try_receive_json::<TestData>().await.unwrap(), None);
}

#[tokio::test]
async fn test_transport_failure_message_omits_status() {
    let client = Client::builder().build().unwrap();

    let err = client.get("http://127.0.0.1:1/nothing").send().await.unwrap_err();
    assert_eq!(err.to_string(), "Call failed: GET http://127.0.0.1:1/nothing");
    assert_eq!(err.status(), None);
    assert!(std::error::Error::source(err.http().unwrap()).is_some());
    assert_eq!(err.http().unwrap().response_string().await.unwrap(), "");
}

#[tokio::test]
async fn test_timeout() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&mock_server)
        .await;

    let err = client_for(&mock_server)
        .get("/slow")
        .timeout(Duration::from_millis(50))
        .send()
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(
        err.to_string(),
        format!("Call timed out: GET {}/slow", mock_server.uri())
    );
}

#[tokio::test]
async fn test_allowed_status_does_not_fail() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({"missing": true})))
        .mount(&mock_server)
        .await;

    let response = client_for(&mock_server)
        .get("/gone")
        .allow_status("4xx")
        .send()
        .await
        .unwrap();
    assert!(response.call().succeeded());
    let map = response.receive_map().await.unwrap();
    assert_eq!(map["missing"], serde_json::Value::Bool(true));

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .allow_any_status()
        .build()
        .unwrap();
    assert!(client.get("/gone").send().await.is_ok());
}

#[tokio::test]
async fn test_per_call_handler_overrides_client_handler() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .error_handler(handler_fn(|_call: &CallContext, _error: &Error| true))
        .build()
        .unwrap();

    assert!(client.get("/a").send().await.is_ok());

    let result = client
        .get("/a")
        .error_handler(callkit::Propagate)
        .send()
        .await;
    assert_eq!(result.unwrap_err().status().unwrap().as_u16(), 502);
}

#[tokio::test]
async fn test_quoted_charset_is_decoded() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"caf\xe9".to_vec())
                .insert_header("content-type", "text/plain; charset=\"iso-8859-1\""),
        )
        .mount(&mock_server)
        .await;

    let text = client_for(&mock_server).get("/menu").receive_string().await.unwrap();
    assert_eq!(text.as_deref(), Some("café"));
}

#[tokio::test]
async fn test_receive_map_list_keeps_order() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(r#"[{"b":1,"a":2},{"z":true}]"#, "application/json"),
        )
        .mount(&mock_server)
        .await;

    let list: Vec<JsonMap> = client_for(&mock_server)
        .get("/items")
        .send()
        .await
        .unwrap()
        .receive_map_list()
        .await
        .unwrap();
    assert_eq!(list.len(), 2);
    let keys: Vec<_> = list[0].keys().cloned().collect();
    assert_eq!(keys, ["b", "a"]);
}

#[tokio::test]
async fn test_stream_body() {
    use futures::StreamExt;

    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("chunked data"))
        .mount(&mock_server)
        .await;

    let response = client_for(&mock_server).get("/file").send().await.unwrap();
    let mut stream = response.receive_stream().await.unwrap().unwrap();
    let mut collected = Vec::new();
    while let Some(chunk) = stream.next().await {
        collected.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(collected, b"chunked data");
}

#[tokio::test]
async fn test_default_headers_and_query() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(header("user-agent", "callkit-tests"))
        .and(query_param("q", "rust lang"))
        .respond_with(ResponseTemplate::new(200).set_body_json(TestData {
            id: 7,
            name: "found".to_string(),
        }))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .default_header("user-agent", "callkit-tests")
        .unwrap()
        .build()
        .unwrap();

    let data: TestData = client
        .get("/search")
        .query("q", "rust lang")
        .receive_json()
        .await
        .unwrap();
    assert_eq!(data.id, 7);
}

#[tokio::test]
async fn test_form_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string("id=3&name=form+user"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&mock_server)
        .await;

    let response = client_for(&mock_server)
        .post("/login")
        .form(&TestData {
            id: 3,
            name: "form user".to_string(),
        })
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().unwrap().as_u16(), 204);
    assert_eq!(response.receive_json::<TestData>().await.unwrap(), TestData::default());
}

#[tokio::test]
async fn test_truncated_body_is_offered_to_handler() {
    let base = serve_raw(TRUNCATED_BODY, Duration::ZERO).await;

    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = invocations.clone();
    let seen = Arc::new(std::sync::Mutex::new(None));
    let recorded = seen.clone();
    let client = Client::builder()
        .base_url(&base)
        .unwrap()
        .error_handler(handler_fn(move |call: &CallContext, error: &Error| {
            counter.fetch_add(1, Ordering::SeqCst);
            *recorded.lock().unwrap() = Some((
                call.fault().map(|f| f.kind),
                error.call().is_some(),
                error.status().map(|s| s.as_u16()),
            ));
            true
        }))
        .build()
        .unwrap();

    let response = client.get("/truncated").send().await.unwrap();
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
    assert_eq!(response.receive_json::<TestData>().await.unwrap(), TestData::default());
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(
        *seen.lock().unwrap(),
        Some((Some(FaultKind::Transport), true, Some(200)))
    );
    // The frozen context of the response is untouched.
    assert!(response.call().fault().is_none());
}

#[tokio::test]
async fn test_truncated_body_error_keeps_call_context() {
    let base = serve_raw(TRUNCATED_BODY, Duration::ZERO).await;
    let client = Client::builder().base_url(&base).unwrap().build().unwrap();

    let response = client.get("/truncated").send().await.unwrap();
    let err = response.receive_json::<TestData>().await.unwrap_err();
    assert!(matches!(err, Error::Http(_)));
    assert_eq!(err.to_string(), format!("Call failed: GET {base}/truncated"));
    assert!(!err.is_timeout());
    let context = err.call().unwrap();
    assert_eq!(context.status().map(|s| s.as_u16()), Some(200));
    let fault = context.fault().unwrap();
    assert_eq!(fault.kind, FaultKind::Transport);
    assert!(fault.message.starts_with("Failed to read response body"));
    assert!(std::error::Error::source(err.http().unwrap()).is_some());

    // Reading again reports the same failure, not a consumed body.
    let again = response.receive_string().await.unwrap_err();
    assert!(matches!(again, Error::Http(_)));
    assert_eq!(again.call().unwrap().fault().unwrap().kind, FaultKind::Transport);
    let again = err.http().unwrap().response_string().await.unwrap_err();
    assert!(matches!(again, Error::Http(_)));
}

#[tokio::test]
async fn test_timeout_while_reading_body() {
    let base = serve_raw(TRUNCATED_BODY, Duration::from_secs(2)).await;

    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = invocations.clone();
    let client = Client::builder()
        .base_url(&base)
        .unwrap()
        .timeout(Duration::from_millis(300))
        .error_handler(handler_fn(move |_call: &CallContext, error: &Error| {
            counter.fetch_add(1, Ordering::SeqCst);
            !error.is_timeout()
        }))
        .build()
        .unwrap();

    let response = client.get("/stalled").send().await.unwrap();
    let err = response.receive_bytes().await.unwrap_err();
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert!(err.is_timeout());
    assert_eq!(err.call().unwrap().fault().unwrap().kind, FaultKind::Timeout);
    assert_eq!(err.to_string(), format!("Call timed out: GET {base}/stalled"));
}

#[tokio::test]
async fn test_reason_phrase_sent_by_server() {
    let base = serve_raw(
        "HTTP/1.1 422 Widget Rejected\r\ncontent-length: 0\r\n\r\n",
        Duration::ZERO,
    )
    .await;
    let client = Client::builder().base_url(&base).unwrap().build().unwrap();

    let err = client.get("/widgets").send().await.unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("Call failed with status code 422 (Widget Rejected): GET {base}/widgets")
    );
    let context = err.call().unwrap();
    assert_eq!(context.reason_phrase(), Some("Widget Rejected"));
    assert_eq!(context.fault().unwrap().message, "422 Widget Rejected");
}
