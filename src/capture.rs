//! Exit-side capture
//!
//! A [`CaptureWorker`] listens on the far side of the proxy chain, serves
//! exactly one connection, and records every byte it receives until the
//! peer half-closes. The work runs on its own task; the payload comes back
//! through a single-slot channel so the test side can tell "finished" from
//! "still running". Bytes received so far stay readable while it runs.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;

use crate::common::{Result, Timeouts};
use crate::net::CHUNK_SIZE;

/// Payload handed back by a capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captured {
    /// Bytes received so far; error text is appended with a `|` tag
    pub data: Vec<u8>,
    /// False when the worker was still running at the end of the wait
    pub finished: bool,
}

/// Listener that captures one inbound connection
pub struct CaptureWorker {
    addr: SocketAddr,
    running: Arc<AtomicBool>,
    received: Arc<Mutex<Vec<u8>>>,
    result_rx: oneshot::Receiver<Vec<u8>>,
    result: Option<Vec<u8>>,
    join_wait: Duration,
}

impl CaptureWorker {
    /// Bind `addr` and start capturing in the background
    ///
    /// Binding happens before this returns, so a proxy started afterwards
    /// always finds the listener in place.
    pub fn start(addr: SocketAddr, timeouts: &Timeouts) -> Result<Self> {
        let listener = bind(addr)?;
        let running = Arc::new(AtomicBool::new(true));
        let (result_tx, result_rx) = oneshot::channel();
        let received = Arc::new(Mutex::new(Vec::new()));

        let flag = Arc::clone(&running);
        let buffer = Arc::clone(&received);
        let poll = timeouts.accept_poll();
        tokio::spawn(async move {
            capture(listener, &flag, &buffer, poll).await;
            let data = snapshot(&buffer);
            tracing::debug!(%addr, bytes = data.len(), "Capture finished");
            let _ = result_tx.send(data);
        });

        tracing::debug!(%addr, "Capture listening");
        Ok(Self {
            addr,
            running,
            received,
            result_rx,
            result: None,
            join_wait: timeouts.capture_join(),
        })
    }

    /// Wait a bounded time for the capture and return what is available
    pub async fn get(&mut self) -> Captured {
        if self.result.is_none() {
            match timeout(self.join_wait, &mut self.result_rx).await {
                Ok(Ok(data)) => self.result = Some(data),
                Ok(Err(_)) => {
                    tracing::warn!(addr = %self.addr, "Capture task ended without a result");
                    self.result = Some(Vec::new());
                }
                Err(_) => {
                    tracing::debug!(addr = %self.addr, "Capture still running");
                }
            }
        }

        match &self.result {
            Some(data) => Captured {
                data: data.clone(),
                finished: true,
            },
            None => Captured {
                data: snapshot(&self.received),
                finished: false,
            },
        }
    }

    /// Ask the worker to give up and wait a bounded time for it
    pub async fn stop(&mut self) -> Captured {
        self.running.store(false, Ordering::SeqCst);
        self.get().await
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(1)
}

async fn capture(
    listener: TcpListener,
    running: &AtomicBool,
    received: &Mutex<Vec<u8>>,
    poll: Duration,
) {
    let conn = loop {
        if !running.load(Ordering::SeqCst) {
            return;
        }
        match timeout(poll, listener.accept()).await {
            Ok(Ok((conn, remote))) => {
                tracing::debug!(%remote, "Capture accepted connection");
                break conn;
            }
            Ok(Err(e)) => {
                append(received, format!("|ACCEPT ERROR: {}", e).as_bytes());
                return;
            }
            Err(_) => continue,
        }
    };
    // Only one peer is ever served.
    drop(listener);

    read_all(conn, running, received, poll).await
}

async fn read_all(
    mut conn: TcpStream,
    running: &AtomicBool,
    received: &Mutex<Vec<u8>>,
    poll: Duration,
) {
    let mut chunk = vec![0u8; CHUNK_SIZE];
    loop {
        if !running.load(Ordering::SeqCst) {
            append(received, b"|RECV ERROR: timed out");
            break;
        }
        match timeout(poll, conn.read(&mut chunk)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => append(received, &chunk[..n]),
            Ok(Err(e)) => {
                append(received, format!("|RECV ERROR: {}", e).as_bytes());
                break;
            }
            Err(_) => continue,
        }
    }
}

fn append(received: &Mutex<Vec<u8>>, bytes: &[u8]) {
    received
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .extend_from_slice(bytes);
}

fn snapshot(received: &Mutex<Vec<u8>>) -> Vec<u8> {
    received
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}
