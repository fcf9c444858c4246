use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flate2::Compression;
use flate2::write::{GzEncoder, ZlibEncoder};
use http::Method;
use reqshot::prelude::{Protocol, Query, RequestOptions};
use serde::Deserialize;

#[derive(Clone)]
struct MockResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl MockResponse {
    fn new(status: u16, headers: Vec<(&str, &str)>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.to_owned(), value.to_owned()))
                .collect(),
            body: body.into(),
        }
    }
}

#[derive(Clone, Debug)]
struct CapturedRequest {
    method: String,
    path: String,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

struct MockServer {
    port: u16,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
    join: Option<JoinHandle<()>>,
}

impl MockServer {
    fn start(responses: Vec<MockResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let port = listener.local_addr().expect("read local address").port();
        listener
            .set_nonblocking(true)
            .expect("set listener nonblocking");

        let captured = Arc::new(Mutex::new(Vec::new()));
        let captured_clone = Arc::clone(&captured);

        let join = thread::spawn(move || {
            let deadline = std::time::Instant::now() + Duration::from_secs(2);
            let mut response_index = 0;

            while response_index < responses.len() && std::time::Instant::now() < deadline {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        let _ = stream.set_nonblocking(false);
                        if let Ok(request) = read_request(&mut stream) {
                            captured_clone
                                .lock()
                                .expect("lock captured requests")
                                .push(request);
                        }
                        let response = &responses[response_index];
                        response_index += 1;
                        let _ = write_response(&mut stream, response);
                    }
                    Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            port,
            captured,
            join: Some(join),
        }
    }

    fn options(&self) -> RequestOptions {
        RequestOptions::new()
            .with_protocol(Protocol::Http)
            .with_host("127.0.0.1")
            .with_port(self.port)
    }

    fn requests(&self) -> Vec<CapturedRequest> {
        self.captured
            .lock()
            .expect("lock captured requests")
            .clone()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn read_request(stream: &mut TcpStream) -> std::io::Result<CapturedRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(1)))?;

    let mut raw = Vec::new();
    loop {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        raw.extend_from_slice(&chunk[..read]);
        if find_header_end(&raw).is_some() {
            break;
        }
    }

    let header_end = find_header_end(&raw).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "malformed request without header terminator",
        )
    })?;

    let header_text = String::from_utf8_lossy(&raw[..header_end]);
    let mut lines = header_text.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut request_line_parts = request_line.split_whitespace();
    let method = request_line_parts.next().unwrap_or_default().to_owned();
    let path = request_line_parts.next().unwrap_or_default().to_owned();

    let mut headers = BTreeMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_owned());
        }
    }

    let content_length = headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = raw[header_end + 4..].to_vec();
    while body.len() < content_length {
        let mut chunk = vec![0_u8; content_length - body.len()];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }

    Ok(CapturedRequest {
        method,
        path,
        headers,
        body,
    })
}

fn write_response(stream: &mut TcpStream, response: &MockResponse) -> std::io::Result<()> {
    let body = &response.body;
    let mut raw = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        status_text(response.status),
        body.len()
    );
    for (name, value) in &response.headers {
        raw.push_str(name);
        raw.push_str(": ");
        raw.push_str(value);
        raw.push_str("\r\n");
    }
    raw.push_str("\r\n");

    stream.write_all(raw.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|window| window == b"\r\n\r\n")
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

fn gzip_bytes(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .expect("write gzip source bytes should succeed");
    encoder.finish().expect("finish gzip stream should succeed")
}

fn zlib_bytes(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .expect("write zlib source bytes should succeed");
    encoder.finish().expect("finish zlib stream should succeed")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn get_returns_status_headers_and_text_body() {
    let server = MockServer::start(vec![MockResponse::new(
        200,
        vec![("Content-Type", "text/plain"), ("X-Trace", "abc")],
        "hello world",
    )]);

    let response = reqshot::request(server.options().with_path("/hello"))
        .await
        .expect("request should succeed");

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.headers()["x-trace"], "abc");
    assert_eq!(response.body(), "hello world");
    assert_eq!(response.request().path(), "/hello");
    assert!(response.timings().is_none());
    assert!(response.timing_phases().is_none());
    assert!(!response.socket().reused);
    assert_eq!(response.socket().idle_timeout_listeners, 0);

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path, "/hello");
    assert_eq!(
        requests[0].headers.get("host").map(String::as_str),
        Some(format!("127.0.0.1:{}", server.port).as_str())
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn derives_request_target_from_pathname_and_query() {
    let server = MockServer::start(vec![MockResponse::new(200, vec![], "found")]);

    let response = reqshot::request(
        server
            .options()
            .with_pathname("/search")
            .with_query(Query::new().set("q", "a b").set_all("tag", ["x", "y"])),
    )
    .await
    .expect("request should succeed");

    assert_eq!(response.request().path(), "/search?q=a%20b&tag=x&tag=y");
    let requests = server.requests();
    assert_eq!(requests[0].path, "/search?q=a%20b&tag=x&tag=y");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn writes_request_body_before_ending_request() {
    let server = MockServer::start(vec![MockResponse::new(201, vec![], "created")]);

    let response = reqshot::request(
        server
            .options()
            .with_method(Method::POST)
            .with_path("/v1/items")
            .try_with_header("content-type", "application/json")
            .expect("valid header")
            .with_body(r#"{"name":"demo"}"#),
    )
    .await
    .expect("request should succeed");

    assert_eq!(response.status().as_u16(), 201);
    let requests = server.requests();
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].body, br#"{"name":"demo"}"#);
    assert_eq!(
        requests[0].headers.get("content-length").map(String::as_str),
        Some("15")
    );
    assert_eq!(
        requests[0].headers.get("content-type").map(String::as_str),
        Some("application/json")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn decompresses_gzip_body() {
    let plain = "compressed payload ".repeat(200);
    let server = MockServer::start(vec![MockResponse::new(
        200,
        vec![("Content-Encoding", "gzip")],
        gzip_bytes(plain.as_bytes()),
    )]);

    let response = reqshot::request(server.options())
        .await
        .expect("request should succeed");

    assert_eq!(response.body(), plain);
    assert_eq!(response.headers()["content-encoding"], "gzip");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn decompresses_deflate_body_and_parses_json() {
    #[derive(Debug, Deserialize)]
    struct Payload {
        ok: bool,
    }

    let server = MockServer::start(vec![MockResponse::new(
        200,
        vec![
            ("Content-Encoding", "deflate"),
            ("Content-Type", "application/json"),
        ],
        zlib_bytes(br#"{"ok":true}"#),
    )]);

    let response = reqshot::request(server.options())
        .await
        .expect("request should succeed");

    let payload: Payload = response.json().expect("body should be json");
    assert!(payload.ok);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn leaves_unsupported_encoding_untouched() {
    let server = MockServer::start(vec![MockResponse::new(
        200,
        vec![("Content-Encoding", "identity")],
        "as is",
    )]);

    let response = reqshot::request(server.options())
        .await
        .expect("request should succeed");

    assert_eq!(response.body(), "as is");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn replaces_invalid_utf8_in_body() {
    let server = MockServer::start(vec![MockResponse::new(
        200,
        vec![],
        vec![b'o', b'k', 0xff, b'!'],
    )]);

    let response = reqshot::request(server.options())
        .await
        .expect("request should succeed");

    assert_eq!(response.body(), "ok\u{fffd}!");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn non_success_status_still_resolves() {
    let server = MockServer::start(vec![MockResponse::new(404, vec![], "missing")]);

    let response = reqshot::request(server.options())
        .await
        .expect("http status errors are not request failures");

    assert_eq!(response.status().as_u16(), 404);
    assert_eq!(response.body(), "missing");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timing_on_fresh_connection_is_monotonic() {
    let server = MockServer::start(vec![MockResponse::new(200, vec![], "timed")]);

    let response = reqshot::request(server.options().with_timing(true))
        .await
        .expect("request should succeed");

    let timings = response.timings().expect("timings should be recorded");
    assert!(timings.socket <= timings.lookup);
    assert!(timings.lookup <= timings.connect);
    assert!(timings.connect <= timings.response);
    assert!(timings.response <= timings.end);

    let phases = response
        .timing_phases()
        .expect("timing phases should be recorded");
    assert_eq!(phases.wait, timings.socket);
    assert_eq!(phases.total, timings.end);
    assert_eq!(
        phases.wait + phases.dns + phases.tcp + phases.first_byte + phases.download,
        phases.total
    );
}
