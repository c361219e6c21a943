//! End-to-end forward-path tests (spec.md §4.2, §8): a real client connects to a real `Server`,
//! which dials a real origin listener directly (no upstream). Exercises the plain-HTTP forward
//! path, hop-by-hop header stripping, and the `srcTx == trgRx` / `srcRx == trgTx` byte-accounting
//! invariant for an HTTP listener forwarding to an HTTP target.

use chainproxy::statistic::Event;
use chainproxy::{Server, ServerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// A minimal origin server: accepts one connection, reads the request up to the blank line,
/// then writes a fixed response. Returns the headers it saw, lowercased, for assertions.
async fn spawn_origin_once(response: &'static str) -> (std::net::SocketAddr, tokio::task::JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
            if buf.windows(4).any(|w| w == b"\r\n\r\n") || n == 0 {
                break;
            }
        }
        let request_text = String::from_utf8_lossy(&buf).to_lowercase();
        let headers: Vec<String> = request_text.lines().skip(1).map(|l| l.to_string()).collect();
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.flush().await.unwrap();
        headers
    });
    (addr, handle)
}

async fn start_http_proxy() -> Server {
    let server = Server::new(ServerConfig { port: 0, host: "127.0.0.1".to_string(), ..Default::default() });
    server.listen().await.unwrap();
    server
}

#[tokio::test]
async fn forwards_a_direct_get_and_strips_hop_by_hop_headers() {
    let (origin_addr, origin) = spawn_origin_once(
        "HTTP/1.1 200 OK\r\nContent-Length: 12\r\nConnection: close\r\n\r\nHello world!",
    )
    .await;
    let server = start_http_proxy().await;
    let mut events = server.subscribe_events();

    let mut client = TcpStream::connect(("127.0.0.1", server.port())).await.unwrap();
    let request = format!(
        "GET http://{origin_addr}/hello-world HTTP/1.1\r\nHost: {origin_addr}\r\nConnection: close, X-Drop-Me\r\nX-Drop-Me: gone\r\nProxy-Authorization: Basic dXNlcjpwYXNz\r\n\r\n"
    );
    client.write_all(request.as_bytes()).await.unwrap();
    client.flush().await.unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    let response_text = String::from_utf8_lossy(&response);
    assert!(response_text.starts_with("HTTP/1.1 200 OK"));
    assert!(response_text.ends_with("Hello world!"));

    let seen_headers = origin.await.unwrap();
    assert!(!seen_headers.iter().any(|h| h.starts_with("proxy-authorization")), "Proxy-Authorization must be stripped");
    assert!(!seen_headers.iter().any(|h| h.starts_with("connection")), "Connection is hop-by-hop");
    assert!(!seen_headers.iter().any(|h| h.starts_with("x-drop-me")), "names nominated by Connection must be dropped too");
    assert!(seen_headers.iter().any(|h| h.starts_with("host")), "Host must be preserved");

    let closed = loop {
        match events.recv().await.unwrap() {
            Event::ConnectionClosed { stats, .. } => break stats,
            _ => continue,
        }
    };
    assert_eq!(closed.src_tx_bytes, closed.trg_rx_bytes.unwrap(), "HTTP listener, HTTP target: srcTx == trgRx");
    assert_eq!(closed.src_rx_bytes, closed.trg_tx_bytes.unwrap(), "HTTP listener, HTTP target: srcRx == trgTx");
    assert!(closed.src_tx_bytes > 0);

    server.close(true).await;
}

#[tokio::test]
async fn rejects_a_relative_uri_request_with_400() {
    let server = start_http_proxy().await;
    let mut client = TcpStream::connect(("127.0.0.1", server.port())).await.unwrap();
    client.write_all(b"GET /just-a-path HTTP/1.1\r\nHost: example.com\r\n\r\n").await.unwrap();
    client.flush().await.unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 400"));

    server.close(true).await;
}

#[tokio::test]
async fn surfaces_502_when_the_origin_is_unreachable() {
    let server = start_http_proxy().await;
    // Bind and immediately drop a listener to get a port nothing is listening on.
    let dead_port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let mut client = TcpStream::connect(("127.0.0.1", server.port())).await.unwrap();
    let request = format!("GET http://127.0.0.1:{dead_port}/ HTTP/1.1\r\nHost: 127.0.0.1:{dead_port}\r\n\r\n");
    client.write_all(request.as_bytes()).await.unwrap();
    client.flush().await.unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 502"));

    server.close(true).await;
}
