//! Shared utilities for integration and load testing.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use pool_relay::config::RelayConfig;
use pool_relay::net::io_pool::IoPool;
use pool_relay::net::listener::{Listener, ListenerError};
use pool_relay::{RelayServer, Shutdown};

/// Drain bound used by test relays. Well above how long a clean shutdown takes.
#[allow(dead_code)]
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// A relay running on an ephemeral loopback port.
#[allow(dead_code)]
pub struct RunningRelay {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub updates: mpsc::UnboundedSender<RelayConfig>,
    pub task: JoinHandle<Result<(), ListenerError>>,
}

/// Start a relay whose sessions run on the test runtime.
pub async fn start_relay(config: RelayConfig) -> RunningRelay {
    start_relay_on(config, IoPool::current()).await
}

/// Start a relay with an explicit I/O pool.
pub async fn start_relay_on(mut config: RelayConfig, pool: IoPool) -> RunningRelay {
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    config.listener.bind_address = addr.to_string();

    let listener = Listener::from_tcp(tcp, config.listener.max_connections).unwrap();
    let shutdown = Shutdown::new();
    let (updates, config_updates) = mpsc::unbounded_channel();
    let server = RelayServer::with_io_pool(config, pool).with_drain_timeout(DRAIN_TIMEOUT);
    let task = tokio::spawn(server.run(listener, config_updates, shutdown.subscribe()));

    RunningRelay {
        addr,
        shutdown,
        updates,
        task,
    }
}

/// Config pointing the relay at `backend`.
#[allow(dead_code)]
pub fn backend_config(backend: SocketAddr) -> RelayConfig {
    let mut config = RelayConfig::default();
    config.backend.host = backend.ip().to_string();
    config.backend.port = backend.port();
    config
}

/// Line backend answering each request line with `<tag>:<line>`.
///
/// Returns its address and a counter of accepted connections.
#[allow(dead_code)]
pub async fn start_line_backend(tag: &'static str) -> (SocketAddr, Arc<AtomicUsize>) {
    start_line_backend_with_limit(tag, usize::MAX).await
}

/// Like [`start_line_backend`], but closes each connection after `limit` replies.
#[allow(dead_code)]
pub async fn start_line_backend_with_limit(
    tag: &'static str,
    limit: usize,
) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = connections.clone();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let (read, mut write) = socket.into_split();
                let mut lines = BufReader::new(read).lines();
                let mut served = 0;
                while served < limit {
                    let Ok(Some(line)) = lines.next_line().await else {
                        break;
                    };
                    let reply = format!("{}:{}\n", tag, line);
                    if write.write_all(reply.as_bytes()).await.is_err() {
                        break;
                    }
                    served += 1;
                }
                let _ = write.shutdown().await;
            });
        }
    });

    (addr, connections)
}

/// Backend that reads one request, writes `body`, and closes the stream.
#[allow(dead_code)]
pub async fn start_until_close_backend(body: Vec<u8>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let body = Arc::new(body);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let body = body.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(&body).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// A port nothing listens on.
#[allow(dead_code)]
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Newline-oriented miner stand-in.
pub struct LineClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

#[allow(dead_code)]
impl LineClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer,
        }
    }

    pub async fn send(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }

    /// Send one frame and wait for one response line.
    pub async fn request(&mut self, frame: &str) -> String {
        self.send(format!("{}\n", frame).as_bytes()).await;
        self.read_line().await
    }

    /// Next line including its newline; empty at end of stream.
    pub async fn read_line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        line
    }

    /// Everything until the relay closes the connection.
    pub async fn read_to_end(mut self) -> Vec<u8> {
        let mut received = Vec::new();
        let _ = tokio::time::timeout(
            Duration::from_secs(5),
            self.reader.read_to_end(&mut received),
        )
        .await
        .expect("relay did not close the connection");
        received
    }

    pub async fn finish(&mut self) {
        self.writer.shutdown().await.unwrap();
    }
}
