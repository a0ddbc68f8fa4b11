//! Client-side socket helpers
//!
//! Every operation on the test side is bounded by a timeout so a hung
//! proxy shows up as a failure instead of a hang.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::common::{Error, Result, Timeouts};

/// Largest single read made against a proxy
pub const CHUNK_SIZE: usize = 4096;

/// Connect to `addr`, retrying while the connection is refused
///
/// The proxy under test may not have bound its listener yet. Only
/// `ConnectionRefused` is retried; any other error is returned at once.
/// Each attempt is bounded by `limit`.
pub async fn connect_with_retry(
    addr: SocketAddr,
    attempts: u32,
    interval: Duration,
    limit: Duration,
) -> Result<TcpStream> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = match timeout(limit, TcpStream::connect(addr)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")),
        };
        match result {
            Ok(stream) => {
                tracing::debug!(%addr, attempt, "Connected");
                return Ok(stream);
            }
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused && attempt <= attempts => {
                tracing::trace!(%addr, attempt, "Connection refused, retrying");
                tokio::time::sleep(interval).await;
            }
            Err(e) => {
                return Err(Error::ConnectFailed {
                    addr,
                    attempts: attempt,
                    source: e,
                })
            }
        }
    }
}

/// Connect using the retry policy from the timeout settings
pub async fn connect(addr: SocketAddr, timeouts: &Timeouts) -> Result<TcpStream> {
    connect_with_retry(
        addr,
        timeouts.connect_attempts,
        timeouts.connect_interval(),
        timeouts.socket(),
    )
    .await
}

/// Write all of `data`, failing if the peer stops accepting it in time
pub async fn send_all(stream: &mut TcpStream, data: &[u8], limit: Duration) -> Result<()> {
    match timeout(limit, stream.write_all(data)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(Error::ReceiveTimeout {
            peer: peer_name(stream),
            timeout_ms: limit.as_millis() as u64,
        }),
    }
}

/// Read one chunk of at most [`CHUNK_SIZE`] bytes
///
/// A connection reset reads as an empty chunk, the same as a clean close.
pub async fn recv_chunk(stream: &mut TcpStream, limit: Duration) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    match timeout(limit, stream.read(&mut buf)).await {
        Ok(Ok(n)) => {
            buf.truncate(n);
            Ok(buf)
        }
        Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionReset => Ok(Vec::new()),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(Error::ReceiveTimeout {
            peer: peer_name(stream),
            timeout_ms: limit.as_millis() as u64,
        }),
    }
}

/// Shut down the send side of the connection
///
/// A peer that already reset the connection leaves nothing to shut down;
/// that is not an error here.
pub async fn half_close(stream: &mut TcpStream) -> Result<()> {
    match stream.shutdown().await {
        Ok(()) => Ok(()),
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::NotConnected | io::ErrorKind::ConnectionReset
            ) =>
        {
            tracing::debug!(error = %e, "Peer gone before half-close");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn peer_name(stream: &TcpStream) -> String {
    stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "peer".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    async fn unused_addr() -> SocketAddr {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        listener.local_addr().unwrap()
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_retries() {
        let addr = unused_addr().await;
        let started = std::time::Instant::now();
        let err = connect_with_retry(addr, 20, Duration::from_millis(50), Duration::from_secs(1))
            .await
            .unwrap_err();
        match err {
            Error::ConnectFailed { attempts, source, .. } => {
                assert_eq!(attempts, 21);
                assert_eq!(source.kind(), io::ErrorKind::ConnectionRefused);
            }
            other => panic!("Expected ConnectFailed, got {other:?}"),
        }
        assert!(started.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_connect_succeeds_once_listener_appears() {
        let addr = unused_addr().await;
        let late = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let listener = TcpListener::bind(addr).await.unwrap();
            let (_conn, _) = listener.accept().await.unwrap();
        });
        let stream = connect_with_retry(addr, 20, Duration::from_millis(50), Duration::from_secs(1)).await;
        assert!(stream.is_ok());
        late.await.unwrap();
    }

    #[tokio::test]
    async fn test_recv_chunk_times_out() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        let (_server, _) = listener.accept().await.unwrap();
        let err = recv_chunk(&mut client, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ReceiveTimeout { timeout_ms: 100, .. }));
    }

    #[tokio::test]
    async fn test_recv_chunk_after_close_is_empty() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        drop(server);
        let got = recv_chunk(&mut client, Duration::from_secs(1)).await.unwrap();
        assert!(got.is_empty());
    }

    #[tokio::test]
    async fn test_recv_chunk_after_reset_is_empty() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        server.set_linger(Some(Duration::ZERO)).unwrap();
        drop(server);
        let got = recv_chunk(&mut client, Duration::from_secs(1)).await.unwrap();
        assert!(got.is_empty());
    }

    #[tokio::test]
    async fn test_connect_attempt_is_bounded() {
        // TEST-NET-1 is never routed, so the SYN goes unanswered.
        let addr = SocketAddr::from(([192, 0, 2, 1], 9));
        let started = std::time::Instant::now();
        let err = connect_with_retry(addr, 20, Duration::from_millis(50), Duration::from_millis(100))
            .await
            .unwrap_err();
        match err {
            Error::ConnectFailed { attempts, source, .. } => {
                assert_eq!(attempts, 1);
                // Hosts without a route fail at once instead of timing out.
                assert_ne!(source.kind(), io::ErrorKind::ConnectionRefused);
            }
            other => panic!("Expected ConnectFailed, got {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
