//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use portmux::config::schema::{CertificateConfig, FrontendConfig, MuxConfig, TlsConfig};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

static DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Mux settings small enough to keep tests fast.
pub fn mux_config() -> MuxConfig {
    MuxConfig {
        max_prefix_bytes: 1024,
        match_timeout_ms: 1_000,
        queue_capacity: 8,
    }
}

/// HTTP/2 preface, an empty SETTINGS frame and one POST with `content_type`.
///
/// Header fields are HPACK literals without Huffman coding.
pub fn h2_request(content_type: &str) -> Vec<u8> {
    let mut block = vec![0x83, 0x86, 0x84];
    for (name, value) in [(":authority", "localhost"), ("content-type", content_type)] {
        block.push(0x00);
        block.push(name.len() as u8);
        block.extend_from_slice(name.as_bytes());
        block.push(value.len() as u8);
        block.extend_from_slice(value.as_bytes());
    }

    let mut bytes = portmux::mux::matcher::HTTP2_PREFACE.to_vec();
    bytes.extend_from_slice(&[0, 0, 0, 0x4, 0, 0, 0, 0, 0]);
    bytes.extend_from_slice(&[0, 0, block.len() as u8, 0x1, 0x4, 0, 0, 0, 1]);
    bytes.extend_from_slice(&block);
    bytes
}

/// Bind an ephemeral localhost port.
pub async fn bind_local() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Connect and send `bytes`, keeping the connection open.
pub async fn send(addr: SocketAddr, bytes: &[u8]) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(bytes).await.unwrap();
    stream
}

/// Read exactly `len` bytes or fail after a second.
pub async fn read_exactly<R: AsyncRead + Unpin>(reader: &mut R, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    tokio::time::timeout(Duration::from_secs(1), reader.read_exact(&mut buf))
        .await
        .expect("read timed out")
        .unwrap();
    buf
}

/// Wait until the peer closes `stream`, returning any bytes it sent.
pub async fn read_until_closed(stream: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut buf))
        .await
        .expect("connection was not closed");
    buf
}

/// Self-signed certificate written to a fresh temporary directory.
pub struct TestCert {
    pub dir: PathBuf,
    pub cert_pem: String,
    pub config: CertificateConfig,
}

impl Drop for TestCert {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

pub fn write_cert(names: &[&str]) -> TestCert {
    let generated =
        rcgen::generate_simple_self_signed(names.iter().map(|n| n.to_string()).collect::<Vec<_>>())
            .unwrap();

    let dir = std::env::temp_dir().join(format!(
        "portmux-test-{}-{}",
        std::process::id(),
        DIR_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::create_dir_all(&dir).unwrap();

    let cert_path = dir.join("cert.pem");
    let key_path = dir.join("key.pem");
    let cert_pem = generated.cert.pem();
    std::fs::write(&cert_path, &cert_pem).unwrap();
    std::fs::write(&key_path, generated.key_pair.serialize_pem()).unwrap();

    TestCert {
        dir,
        cert_pem,
        config: CertificateConfig {
            cert_path,
            key_path,
            server_names: Vec::new(),
        },
    }
}

/// Frontend config on an ephemeral port serving `cert`.
pub fn frontend_config(cert: &TestCert) -> FrontendConfig {
    let mut config = FrontendConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.mux = mux_config();
    config.tls = TlsConfig {
        certificates: vec![cert.config.clone()],
        ..TlsConfig::default()
    };
    config
}
