use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use httpexec_rs::{
    EngineError, EngineEvent, EventHandler, FileUpload, HttpEngine, OptionsTable, RequestOptions,
    StaticResolver, TransportErrorKind,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use url::Url;

/// A request as the test server saw it on the wire.
#[derive(Debug, Clone)]
struct Received {
    method: String,
    target: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Received {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn response(status: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut out = format!("HTTP/1.1 {status}\r\nConnection: close\r\nContent-Length: {}\r\n", body.len());
    for (name, value) in headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str("\r\n");
    let mut out = out.into_bytes();
    out.extend_from_slice(body);
    out
}

async fn read_request(stream: &mut TcpStream) -> Option<Received> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split(' ');
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
        .collect();

    let length: usize = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(0);
    let mut body = buf[head_end..].to_vec();
    while body.len() < length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    Some(Received {
        method,
        target,
        headers,
        body,
    })
}

/// Serves one request per connection with `handler`, reporting every
/// request it sees.
async fn serve<F>(handler: F) -> (SocketAddr, mpsc::UnboundedReceiver<Received>)
where
    F: Fn(&Received, SocketAddr) -> Vec<u8> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let handler = handler.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Some(request) = read_request(&mut stream).await {
                    let reply = handler(&request, addr);
                    let _ = tx.send(request);
                    let _ = stream.write_all(&reply).await;
                    let _ = stream.shutdown().await;
                }
            });
        }
    });

    (addr, rx)
}

/// Like [`serve`], but waits `delay` before answering and then writes the
/// reply body one byte every `gap`.
async fn serve_slowly<F>(delay: Duration, gap: Duration, handler: F) -> SocketAddr
where
    F: Fn(&Received, SocketAddr) -> Vec<u8> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let handler = handler.clone();
            tokio::spawn(async move {
                let _ = stream.set_nodelay(true);
                let Some(request) = read_request(&mut stream).await else {
                    return;
                };
                let reply = handler(&request, addr);
                let head_end = reply
                    .windows(4)
                    .position(|w| w == b"\r\n\r\n")
                    .map_or(reply.len(), |pos| pos + 4);

                tokio::time::sleep(delay).await;
                if stream.write_all(&reply[..head_end]).await.is_err() {
                    return;
                }
                for byte in &reply[head_end..] {
                    tokio::time::sleep(gap).await;
                    if stream.write_all(&[*byte]).await.is_err() {
                        return;
                    }
                }
                let _ = stream.shutdown().await;
            });
        }
    });

    addr
}

fn engine() -> HttpEngine {
    HttpEngine::builder().disable_logging().build()
}

#[tokio::test]
async fn follows_redirect_chain_and_records_history() {
    let (addr, _seen) = serve(|req, addr| match req.target.as_str() {
        "/a" => response("302 Found", &[("Location", "/b")], b""),
        "/b" => response("301 Moved Permanently", &[("Location", &format!("http://{addr}/c"))], b""),
        _ => response("200 OK", &[("Content-Type", "text/plain")], b"done"),
    })
    .await;

    let result = engine().execute("GET", &format!("http://{addr}/a"), None).await.unwrap();

    assert_eq!(result.status_code, 200);
    assert_eq!(result.text(), "done");
    assert_eq!(result.body_size, 4);
    assert_eq!(result.url, format!("http://{addr}/c"));
    let hops: Vec<(u16, String)> = result
        .history
        .iter()
        .map(|h| (h.status_code, h.url.clone()))
        .collect();
    assert_eq!(
        hops,
        [
            (302, format!("http://{addr}/a")),
            (301, format!("http://{addr}/b")),
        ]
    );
    assert_eq!(result.request.headers["Referer"], format!("http://{addr}/b"));
}

#[tokio::test]
async fn disabled_redirect_returns_the_redirect_itself() {
    let (addr, mut seen) = serve(|_, _| response("302 Found", &[("Location", "/elsewhere")], b"")).await;

    let options = RequestOptions::new().without_redirects();
    let result = engine()
        .execute("GET", &format!("http://{addr}/start"), Some(options))
        .await
        .unwrap();

    assert_eq!(result.status_code, 302);
    assert!(result.history.is_empty());
    assert_eq!(result.headers["Location"], "/elsewhere");
    assert_eq!(seen.recv().await.unwrap().target, "/start");
    assert!(seen.try_recv().is_err());
}

#[tokio::test]
async fn too_many_redirects_keeps_completed_hops() {
    let (addr, _seen) = serve(|_, _| response("302 Found", &[("Location", "/loop")], b"")).await;

    let engine = HttpEngine::builder().disable_logging().with_max_redirects(2).build();
    let err = engine
        .execute("GET", &format!("http://{addr}/loop"), None)
        .await
        .unwrap_err();

    assert_eq!(err.transport_kind(), Some(TransportErrorKind::TooManyRedirects));
    assert_eq!(err.history().len(), 3);
    assert!(err.history().iter().all(|h| h.status_code == 302));
}

#[tokio::test]
async fn post_redirect_switches_to_get_but_307_replays() {
    let (addr, mut seen) = serve(|req, _| match req.target.as_str() {
        "/found" => response("302 Found", &[("Location", "/landing")], b""),
        "/temp" => response("307 Temporary Redirect", &[("Location", "/landing")], b""),
        _ => response("200 OK", &[], b"ok"),
    })
    .await;
    let engine = engine();

    let options = RequestOptions::new().with_raw_data("payload");
    engine.execute("POST", &format!("http://{addr}/found"), Some(options)).await.unwrap();
    let _ = seen.recv().await.unwrap();
    let landing = seen.recv().await.unwrap();
    assert_eq!(landing.method, "GET");
    assert!(landing.body.is_empty());

    let options = RequestOptions::new().with_raw_data("payload");
    engine.execute("POST", &format!("http://{addr}/temp"), Some(options)).await.unwrap();
    let _ = seen.recv().await.unwrap();
    let landing = seen.recv().await.unwrap();
    assert_eq!(landing.method, "POST");
    assert_eq!(landing.body_text(), "payload");
}

#[tokio::test]
async fn multipart_upload_reaches_the_server() {
    let (addr, mut seen) = serve(|_, _| response("200 OK", &[], b"stored")).await;

    let options = RequestOptions::new()
        .with_file(FileUpload::from_bytes("notes.txt", "hello file").with_field_name("upload"))
        .with_data("title", "Quarterly \"numbers\"");
    let result = engine()
        .execute("POST", &format!("http://{addr}/upload"), Some(options))
        .await
        .unwrap();

    let received = seen.recv().await.unwrap();
    let content_type = received.header("content-type").unwrap();
    assert!(content_type.starts_with("multipart/form-data; boundary="));
    let body = received.body_text();
    assert!(body.contains("Content-Disposition: form-data; name=\"upload\"; filename=\"notes.txt\""));
    assert!(body.contains("Content-Type: text/plain"));
    assert!(body.contains("hello file"));
    assert!(body.contains("name=\"title\"\r\n\r\nQuarterly \"numbers\""));
    assert!(body.find("hello file").unwrap() < body.find("Quarterly").unwrap());

    assert_eq!(result.request.body, body);
    assert!(result.request.raw.ends_with(&format!("\r\n\r\n{body}")));
}

#[tokio::test]
async fn single_file_upload_for_non_post_methods() {
    let (addr, mut seen) = serve(|_, _| response("201 Created", &[], b"")).await;

    let options = RequestOptions::new().with_file(FileUpload::from_bytes("data.json", "{\"k\":1}"));
    let result = engine()
        .execute("PUT", &format!("http://{addr}/blob"), Some(options))
        .await
        .unwrap();

    assert_eq!(result.status_code, 201);
    let received = seen.recv().await.unwrap();
    assert_eq!(received.method, "PUT");
    assert_eq!(received.header("content-type"), Some("application/json"));
    assert_eq!(received.body_text(), "{\"k\":1}");
}

#[tokio::test]
async fn body_precedence_prefers_raw_data() {
    let (addr, mut seen) = serve(|_, _| response("200 OK", &[], b"")).await;

    let options = RequestOptions::new()
        .with_raw_data("raw-wins")
        .with_json("{\"a\":1}")
        .with_data("field", "value");
    engine()
        .execute("POST", &format!("http://{addr}/"), Some(options))
        .await
        .unwrap();

    let received = seen.recv().await.unwrap();
    assert_eq!(received.body_text(), "raw-wins");
    assert!(received.header("content-type").is_none());
}

#[tokio::test]
async fn form_data_is_urlencoded() {
    let (addr, mut seen) = serve(|_, _| response("200 OK", &[], b"")).await;

    let options = RequestOptions::new().with_data("b", "two words").with_data("a", "1&2");
    engine()
        .execute("POST", &format!("http://{addr}/form"), Some(options))
        .await
        .unwrap();

    let received = seen.recv().await.unwrap();
    assert_eq!(received.header("content-type"), Some("application/x-www-form-urlencoded"));
    assert_eq!(received.body_text(), "a=1%262&b=two+words");
}

#[tokio::test]
async fn query_params_merge_and_raw_query_overrides() {
    let (addr, mut seen) = serve(|_, _| response("200 OK", &[], b"")).await;
    let engine = engine();

    let options = RequestOptions::new().with_param("b", "3").with_param("c", "x y");
    engine
        .execute("GET", &format!("http://{addr}/p?a=1&b=2"), Some(options))
        .await
        .unwrap();
    assert_eq!(seen.recv().await.unwrap().target, "/p?a=1&b=3&c=x%20y");

    let options = RequestOptions::new()
        .with_raw_query("raw=1&keep=a+b")
        .with_param("ignored", "yes");
    engine
        .execute("GET", &format!("http://{addr}/p?a=1"), Some(options))
        .await
        .unwrap();
    assert_eq!(seen.recv().await.unwrap().target, "/p?raw=1&keep=a+b");
}

#[tokio::test]
async fn decorates_headers_auth_ajax_and_host() {
    let (addr, mut seen) = serve(|_, _| response("200 OK", &[], b"")).await;

    let options = RequestOptions::new()
        .with_header("X-Custom", "yes")
        .with_cookie("a", "1")
        .with_cookie("b", "2")
        .with_basic_auth("alice", "secret")
        .with_host("vhost.test")
        .ajax();
    let result = engine()
        .execute("GET", &format!("http://{addr}/whoami"), Some(options))
        .await
        .unwrap();

    let received = seen.recv().await.unwrap();
    assert_eq!(received.header("x-scanner"), Some("ZERO"));
    assert_eq!(received.header("x-custom"), Some("yes"));
    assert_eq!(received.header("x-requested-with"), Some("XMLHttpRequest"));
    assert_eq!(received.header("cookie"), Some("a=1; b=2"));
    assert_eq!(received.header("authorization"), Some("Basic YWxpY2U6c2VjcmV0"));
    assert_eq!(received.header("host"), Some("vhost.test"));

    assert_eq!(result.request.host, "vhost.test");
    assert_eq!(result.request.cookies["b"], "2");
    assert_eq!(result.request.raw_cookies, "a=1;b=2");
    assert!(result.request.raw.starts_with("GET /whoami HTTP/1.1\r\nHost: vhost.test\r\n"));
    assert!(result.request.raw.contains("X-Custom: yes\r\n"));
    assert!(!result.request.headers.contains_key("Accept-Encoding"));
}

#[tokio::test]
async fn cookies_from_one_hop_are_sent_on_the_next() {
    let (addr, mut seen) = serve(|req, _| match req.target.as_str() {
        "/login" => response(
            "302 Found",
            &[("Set-Cookie", "sid=abc; Path=/"), ("Location", "/home")],
            b"",
        ),
        _ => response("200 OK", &[("Set-Cookie", "theme=dark")], b"welcome"),
    })
    .await;

    let result = engine()
        .execute("GET", &format!("http://{addr}/login"), None)
        .await
        .unwrap();

    let _ = seen.recv().await.unwrap();
    let home = seen.recv().await.unwrap();
    assert_eq!(home.header("cookie"), Some("sid=abc"));
    assert_eq!(result.cookies["theme"], "dark");
    assert_eq!(result.history[0].cookies["sid"], "abc");
    assert_eq!(result.request.cookies["sid"], "abc");
}

#[tokio::test]
async fn gzip_bodies_are_decoded_transparently() {
    let (addr, mut seen) = serve(|req, _| {
        if req.header("accept-encoding") == Some("gzip") {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(b"squeezed").unwrap();
            let body = encoder.finish().unwrap();
            response("200 OK", &[("Content-Encoding", "gzip")], &body)
        } else {
            response("200 OK", &[], b"plain")
        }
    })
    .await;
    let engine = engine();

    let result = engine.execute("GET", &format!("http://{addr}/"), None).await.unwrap();
    assert_eq!(result.text(), "squeezed");
    assert!(!result.headers.contains_key("Content-Encoding"));
    assert!(!result.request.headers.contains_key("Accept-Encoding"));
    let _ = seen.recv().await.unwrap();

    let options = RequestOptions::new().without_compression();
    let result = engine.execute("GET", &format!("http://{addr}/"), Some(options)).await.unwrap();
    assert_eq!(result.text(), "plain");
    assert!(seen.recv().await.unwrap().header("accept-encoding").is_none());
}

#[tokio::test]
async fn stalled_server_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let options = RequestOptions::new().with_timeout(Duration::from_secs(1));
    let started = std::time::Instant::now();
    let err = engine()
        .execute("GET", &format!("http://{addr}/slow"), Some(options))
        .await
        .unwrap_err();

    assert_eq!(err.transport_kind(), Some(TransportErrorKind::Timeout));
    assert!(err.history().is_empty());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn trickled_body_within_the_call_timeout_completes() {
    let addr = serve_slowly(Duration::ZERO, Duration::from_millis(100), |_, _| {
        response("200 OK", &[], b"drip")
    })
    .await;

    let options = RequestOptions::new().with_timeout(Duration::from_secs(2));
    let result = engine()
        .execute("GET", &format!("http://{addr}/"), Some(options))
        .await
        .unwrap();
    assert_eq!(result.text(), "drip");
}

#[tokio::test]
async fn steady_trickle_still_hits_the_call_deadline() {
    // Every gap is well under the timeout; only the whole-call deadline can fire.
    let addr = serve_slowly(Duration::ZERO, Duration::from_millis(200), |_, _| {
        response("200 OK", &[], &[b'.'; 40])
    })
    .await;

    let options = RequestOptions::new().with_timeout(Duration::from_secs(1));
    let started = std::time::Instant::now();
    let err = engine()
        .execute("GET", &format!("http://{addr}/"), Some(options))
        .await
        .unwrap_err();

    assert_eq!(err.transport_kind(), Some(TransportErrorKind::Timeout));
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn call_deadline_spans_every_redirect_hop() {
    let addr = serve_slowly(Duration::from_millis(600), Duration::ZERO, |req, _| {
        match req.target.as_str() {
            "/a" => response("302 Found", &[("Location", "/b")], b""),
            "/b" => response("302 Found", &[("Location", "/c")], b""),
            "/c" => response("302 Found", &[("Location", "/d")], b""),
            _ => response("200 OK", &[], b"late"),
        }
    })
    .await;

    let options = RequestOptions::new().with_timeout(Duration::from_millis(1500));
    let err = engine()
        .execute("GET", &format!("http://{addr}/a"), Some(options))
        .await
        .unwrap_err();

    assert_eq!(err.transport_kind(), Some(TransportErrorKind::Timeout));
    let hops: Vec<&str> = err.history().iter().map(|hop| hop.url.as_str()).collect();
    assert_eq!(hops, [format!("http://{addr}/a"), format!("http://{addr}/b")]);
}

#[tokio::test]
async fn oversized_timeouts_leave_the_call_unbounded() {
    let (addr, _seen) = serve(|_, _| response("200 OK", &[], b"patient")).await;
    let url = format!("http://{addr}/");

    let table = OptionsTable::from_value(serde_json::json!({ "timeout": 1e20 })).unwrap();
    let options = table.into_options().await.unwrap();
    let result = engine().execute("get", &url, Some(options)).await.unwrap();
    assert_eq!(result.text(), "patient");

    let options = RequestOptions::new().with_timeout(Duration::MAX);
    let result = engine().get(&url, Some(options)).await.unwrap();
    assert_eq!(result.text(), "patient");
}

#[tokio::test]
async fn plain_http_goes_through_the_scheme_proxy() {
    let (proxy, mut seen) = serve(|_, _| response("200 OK", &[], b"via proxy")).await;

    let options = RequestOptions::new()
        .with_proxy("HTTP", Url::parse(&format!("http://user:pw@{proxy}")).unwrap());
    let result = engine()
        .execute("GET", "http://origin.invalid/path?x=1", Some(options))
        .await
        .unwrap();

    assert_eq!(result.text(), "via proxy");
    assert_eq!(result.url, "http://origin.invalid/path?x=1");
    let received = seen.recv().await.unwrap();
    assert_eq!(received.target, "http://origin.invalid/path?x=1");
    assert_eq!(received.header("host"), Some("origin.invalid"));
    assert_eq!(received.header("proxy-authorization"), Some("Basic dXNlcjpwdw=="));
    assert!(!result.request.headers.contains_key("Proxy-Authorization"));
}

#[tokio::test]
async fn unmatched_scheme_falls_back_to_the_default_route() {
    let (origin, mut origin_seen) = serve(|_, _| response("200 OK", &[], b"direct")).await;
    let (proxy, mut proxy_seen) = serve(|_, _| response("502 Bad Gateway", &[], b"")).await;

    // Only an https proxy is registered; loopback targets are never proxied
    // by the environment default.
    let options = RequestOptions::new()
        .with_proxy("https", Url::parse(&format!("http://{proxy}")).unwrap());
    let result = engine()
        .execute("GET", &format!("http://{origin}/direct"), Some(options))
        .await
        .unwrap();

    assert_eq!(result.text(), "direct");
    assert_eq!(origin_seen.recv().await.unwrap().target, "/direct");
    assert!(proxy_seen.try_recv().is_err());
}

#[tokio::test]
async fn method_helpers_send_their_verb() {
    let (addr, mut seen) = serve(|_, _| response("204 No Content", &[], b"")).await;
    let url = format!("http://{addr}/");
    let engine = engine();

    engine.get(&url, None).await.unwrap();
    engine.delete(&url, None).await.unwrap();
    engine.head(&url, None).await.unwrap();
    engine.patch(&url, None).await.unwrap();
    engine.post(&url, Some(RequestOptions::new().with_data("k", "v"))).await.unwrap();
    engine.put(&url, None).await.unwrap();
    engine.options(&url, None).await.unwrap();

    let mut methods = Vec::new();
    for _ in 0..7 {
        methods.push(seen.recv().await.unwrap().method);
    }
    assert_eq!(methods, ["GET", "DELETE", "HEAD", "PATCH", "POST", "PUT", "OPTIONS"]);
}

#[tokio::test]
async fn host_header_is_sent_as_the_host_override() {
    let (addr, mut seen) = serve(|_, _| response("200 OK", &[], b"")).await;

    let options = RequestOptions::new().with_header("Host", "named.test");
    let result = engine()
        .execute("GET", &format!("http://{addr}/"), Some(options))
        .await
        .unwrap();

    assert_eq!(seen.recv().await.unwrap().header("host"), Some("named.test"));
    assert_eq!(result.request.host, "named.test");
    assert_eq!(result.request.raw.matches("Host: ").count(), 1);
    assert!(!result.request.headers.contains_key("Host"));
}

#[tokio::test]
async fn refused_connection_is_a_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = engine()
        .execute("GET", &format!("http://{addr}/"), None)
        .await
        .unwrap_err();
    assert_eq!(err.transport_kind(), Some(TransportErrorKind::Connect));
}

#[tokio::test]
async fn custom_resolver_maps_names() {
    let (addr, mut seen) = serve(|_, _| response("200 OK", &[], b"resolved")).await;

    let resolver = StaticResolver::new().with_host("service.internal", [IpAddr::V4(Ipv4Addr::LOCALHOST)]);
    let engine = HttpEngine::builder()
        .disable_logging()
        .with_resolver(Arc::new(resolver))
        .build();
    let url = format!("http://service.internal:{}/", addr.port());
    let result = engine.execute("GET", &url, None).await.unwrap();

    assert_eq!(result.text(), "resolved");
    let received = seen.recv().await.unwrap();
    assert_eq!(received.header("host"), Some(format!("service.internal:{}", addr.port()).as_str()));
}

#[tokio::test]
async fn unknown_host_is_a_dns_error() {
    let engine = HttpEngine::builder()
        .disable_logging()
        .with_resolver(Arc::new(StaticResolver::new()))
        .build();
    let err = engine.execute("GET", "http://nowhere.internal/", None).await.unwrap_err();
    assert_eq!(err.transport_kind(), Some(TransportErrorKind::Dns));
}

#[derive(Default)]
struct Recorder(Mutex<Vec<String>>);

impl EventHandler for Recorder {
    fn handle(&self, event: &EngineEvent) {
        let label = match event {
            EngineEvent::PreRequest(e) => format!("pre {}", e.url.path()),
            EngineEvent::PostResponse(e) => format!("post {}", e.status),
            EngineEvent::Redirect(e) => format!("redirect {}", e.to.path()),
            EngineEvent::Error(e) => format!("error {}", e.kind),
        };
        self.0.lock().unwrap().push(label);
    }
}

#[tokio::test]
async fn events_trace_every_hop() {
    let (addr, _seen) = serve(|req, _| match req.target.as_str() {
        "/a" => response("302 Found", &[("Location", "/b")], b""),
        _ => response("200 OK", &[], b""),
    })
    .await;

    let recorder = Arc::new(Recorder::default());
    let engine = HttpEngine::builder()
        .disable_logging()
        .with_event_handler(recorder.clone())
        .build();
    engine.execute("GET", &format!("http://{addr}/a"), None).await.unwrap();

    assert_eq!(
        *recorder.0.lock().unwrap(),
        ["pre /a", "post 302", "redirect /b", "pre /b", "post 200"]
    );
}

#[tokio::test]
async fn spawned_execution_delivers_one_result() {
    let (addr, _seen) = serve(|_, _| response("200 OK", &[], b"async")).await;

    let pending = engine().spawn_execute("GET", format!("http://{addr}/"), None);
    let result = pending.await.unwrap();
    assert_eq!(result.text(), "async");

    let pending = engine().spawn_execute("BAD METHOD", format!("http://{addr}/"), None);
    assert!(matches!(pending.await, Err(EngineError::InvalidMethod(_))));
}

#[test]
fn blocking_execution_outside_a_runtime() {
    let server = tokio::runtime::Runtime::new().unwrap();
    let (addr, _seen) = server.block_on(serve(|_, _| response("200 OK", &[], b"blocking")));

    let result = engine()
        .execute_blocking("GET", &format!("http://{addr}/"), None)
        .unwrap();
    assert_eq!(result.text(), "blocking");
}

#[tokio::test]
async fn option_tables_drive_the_engine() {
    let (addr, mut seen) = serve(|_, _| response("302 Found", &[("Location", "/next")], b"")).await;

    let table = OptionsTable::from_value(serde_json::json!({
        "json": "{\"q\":1}",
        "headers": {"X-Request-Id": 42},
        "redirect": false,
        "timeout": 5,
    }))
    .unwrap();
    let options = table.into_options().await.unwrap();
    let result = engine()
        .execute("post", &format!("http://{addr}/api"), Some(options))
        .await
        .unwrap();

    assert_eq!(result.status_code, 302);
    let received = seen.recv().await.unwrap();
    assert_eq!(received.method, "POST");
    assert_eq!(received.header("content-type"), Some("application/json"));
    assert_eq!(received.header("x-request-id"), Some("42"));
    assert_eq!(received.body_text(), "{\"q\":1}");
}
