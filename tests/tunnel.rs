//! CONNECT tunnel tests through the full server.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use forward_proxy::config::ProxyConfig;

mod common;

use common::TestProxy;

const ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

async fn read_exact_within(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    buf
}

#[tokio::test]
async fn connect_splices_both_directions() {
    let target = common::start_echo_tcp().await;
    let proxy = TestProxy::start(ProxyConfig::default()).await;

    let mut stream = TcpStream::connect(proxy.addr).await.unwrap();
    let request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n\r\nearly");
    stream.write_all(request.as_bytes()).await.unwrap();

    assert_eq!(read_exact_within(&mut stream, ESTABLISHED.len()).await, ESTABLISHED);
    // Bytes sent after the head reach the target first.
    assert_eq!(read_exact_within(&mut stream, 5).await, b"early");

    stream.write_all(b"ping").await.unwrap();
    assert_eq!(read_exact_within(&mut stream, 4).await, b"ping");

    // Closing our side ends the session and closes the socket.
    stream.shutdown().await.unwrap();
    let mut rest = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn connect_echoes_request_version() {
    let target = common::start_echo_tcp().await;
    let proxy = TestProxy::start(ProxyConfig::default()).await;

    let mut stream = TcpStream::connect(proxy.addr).await.unwrap();
    stream
        .write_all(format!("CONNECT {target} HTTP/1.0\r\n\r\n").as_bytes())
        .await
        .unwrap();

    let expected = b"HTTP/1.0 200 Connection Established\r\n\r\n";
    assert_eq!(read_exact_within(&mut stream, expected.len()).await, expected);
}

#[tokio::test]
async fn target_close_closes_client() {
    let target = common::start_raw_origin("bye").await;
    let proxy = TestProxy::start(ProxyConfig::default()).await;

    let mut stream = TcpStream::connect(proxy.addr).await.unwrap();
    stream
        .write_all(format!("CONNECT {target} HTTP/1.1\r\n\r\n").as_bytes())
        .await
        .unwrap();
    assert_eq!(read_exact_within(&mut stream, ESTABLISHED.len()).await, ESTABLISHED);

    // The raw origin answers after a full head, then hangs up.
    stream.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
    let mut rest = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rest, b"bye");
}

#[tokio::test]
async fn unreachable_target_closes_without_status_line() {
    let closed = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let proxy = TestProxy::start(ProxyConfig::default()).await;

    let request = format!("CONNECT {closed} HTTP/1.1\r\n\r\n");
    let reply = tokio::time::timeout(
        Duration::from_secs(5),
        common::raw_exchange(proxy.addr, request.as_bytes()),
    )
    .await
    .unwrap();
    assert!(reply.is_empty(), "{}", String::from_utf8_lossy(&reply));
}

#[tokio::test]
async fn unreachable_target_can_answer_bad_gateway() {
    let closed = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let mut config = ProxyConfig::default();
    config.tunnel.reply_on_failure = true;
    let proxy = TestProxy::start(config).await;

    let request = format!("CONNECT {closed} HTTP/1.1\r\n\r\n");
    let reply = common::raw_exchange(proxy.addr, request.as_bytes()).await;
    assert_eq!(reply, b"HTTP/1.1 502 Bad Gateway\r\n\r\n");
}
