#![allow(dead_code)]

use std::net::SocketAddr;

use devgate_core::DeviceId;
use devgate_transport::{DeviceEndpoint, Endpoint};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub fn tcp_device(id: &str, addr: SocketAddr) -> DeviceEndpoint {
    DeviceEndpoint::new(DeviceId::new(id).unwrap(), Endpoint::Tcp { addr })
}

pub fn serial_device(id: &str, bus: &str, unit: u8) -> DeviceEndpoint {
    DeviceEndpoint::new(
        DeviceId::new(id).unwrap(),
        Endpoint::Serial {
            bus: bus.to_string(),
            unit,
        },
    )
}

pub fn http_device(id: &str, url: String) -> DeviceEndpoint {
    DeviceEndpoint::new(DeviceId::new(id).unwrap(), Endpoint::Http { url })
}

/// Minimal HTTP/1.1 responder: answers every request with `status` and `body`.
pub async fn spawn_http_device(status: u16, body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                loop {
                    let n = stream.read(&mut buf).await.unwrap_or(0);
                    if n == 0 {
                        return;
                    }
                    request.extend_from_slice(&buf[..n]);
                    if let Some(end) = find_header_end(&request) {
                        let length = content_length(&request[..end]);
                        if request.len() >= end + length {
                            break;
                        }
                    }
                }
                let response = format!(
                    "HTTP/1.1 {status} X\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    addr
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

fn content_length(head: &[u8]) -> usize {
    String::from_utf8_lossy(head)
        .lines()
        .find_map(|l| {
            let (name, value) = l.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse().ok())
                .flatten()
        })
        .unwrap_or(0)
}
