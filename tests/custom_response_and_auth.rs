//! Custom-response emitter (spec.md §4.4) and Basic-auth decode (spec.md §4.8) end-to-end.

use chainproxy::policy::{
    BoxedPolicyFuture, BoxedResponseFuture, CustomResponse, CustomResponseFn, PolicyCallback, PolicyFn, PolicyOutcome,
    PolicyRequest, ResponseBody,
};
use chainproxy::{Server, ServerConfig};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[tokio::test]
async fn writes_a_synthesized_response_for_the_forward_path() {
    let policy: Arc<dyn PolicyCallback> = Arc::new(PolicyFn(|_req: &PolicyRequest| -> BoxedPolicyFuture {
        Box::pin(async {
            Ok(PolicyOutcome {
                custom_response: Some(Arc::new(CustomResponseFn(|| -> BoxedResponseFuture {
                    Box::pin(async {
                        Ok(CustomResponse {
                            status_code: 418,
                            headers: vec![("X-Teapot".to_string(), "yes".to_string())],
                            body: ResponseBody::Bytes(b"short and stout".to_vec()),
                        })
                    })
                }))),
                ..Default::default()
            })
        })
    }));
    let server = Server::new(ServerConfig { port: 0, host: "127.0.0.1".to_string(), policy, ..Default::default() });
    server.listen().await.unwrap();

    let mut client = TcpStream::connect(("127.0.0.1", server.port())).await.unwrap();
    client
        .write_all(b"GET http://example.com/anything HTTP/1.1\r\nHost: example.com\r\n\r\n")
        .await
        .unwrap();
    client.flush().await.unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    let response_text = String::from_utf8_lossy(&response);
    assert!(response_text.starts_with("HTTP/1.1 418"));
    assert!(response_text.to_lowercase().contains("x-teapot: yes"));
    assert!(response_text.ends_with("short and stout"));

    server.close(true).await;
}

#[tokio::test]
async fn policy_callback_sees_decoded_basic_auth_credentials() {
    let policy: Arc<dyn PolicyCallback> = Arc::new(PolicyFn(|req: &PolicyRequest| -> BoxedPolicyFuture {
        let authorized = req.username.as_deref() == Some("alice") && req.password.as_deref() == Some("wonder:land");
        Box::pin(async move { Ok(PolicyOutcome { request_authentication: !authorized, ..Default::default() }) })
    }));
    let server = Server::new(ServerConfig { port: 0, host: "127.0.0.1".to_string(), policy, ..Default::default() });
    server.listen().await.unwrap();

    // Password containing a colon must still decode correctly: spec.md §4.8.
    let credentials = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, "alice:wonder:land");
    let mut client = TcpStream::connect(("127.0.0.1", server.port())).await.unwrap();
    let request = format!(
        "GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\nProxy-Authorization: Basic {credentials}\r\n\r\n"
    );
    client.write_all(request.as_bytes()).await.unwrap();
    client.flush().await.unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    // No custom response and no real origin to forward to, so a 502 is expected here; the point
    // of this test is that authentication was NOT rejected with 407.
    assert!(!String::from_utf8_lossy(&response).starts_with("HTTP/1.1 407"));

    server.close(true).await;
}

#[tokio::test]
async fn rejects_missing_credentials_with_407() {
    let policy: Arc<dyn PolicyCallback> = Arc::new(PolicyFn(|req: &PolicyRequest| -> BoxedPolicyFuture {
        let authorized = req.username.as_deref() == Some("alice");
        Box::pin(async move { Ok(PolicyOutcome { request_authentication: !authorized, ..Default::default() }) })
    }));
    let server = Server::new(ServerConfig { port: 0, host: "127.0.0.1".to_string(), policy, ..Default::default() });
    server.listen().await.unwrap();

    let mut client = TcpStream::connect(("127.0.0.1", server.port())).await.unwrap();
    client.write_all(b"GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\n\r\n").await.unwrap();
    client.flush().await.unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 407"));

    server.close(true).await;
}
