//! Plays a [`Script`] against a live connection

use std::time::Duration;

use tokio::net::TcpStream;

use crate::capture::{CaptureWorker, Captured};
use crate::common::{Error, Result};
use crate::net;

use super::Script;

/// How a script run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOutcome {
    /// The peer hung up where the script said it would; no transfer follows
    Dropped,
    /// The script ran to completion and the payload was sent; this is what
    /// came out of the far end of the proxy
    Transferred(Captured),
}

/// Run `script` over `conn`
///
/// Sends and receives alternate, starting with a send. Received bytes must
/// match the scripted bytes exactly. If the script finishes without an
/// expected drop, `payload` is sent, the send side is shut down, and the
/// exit-side capture is collected for the caller to compare.
pub async fn run(
    script: &Script,
    conn: &mut TcpStream,
    payload: &[u8],
    capture: Option<&mut CaptureWorker>,
    limit: Duration,
) -> Result<ScriptOutcome> {
    let mut sending = true;
    for (idx, step) in script.steps().iter().enumerate() {
        let step_num = idx + 1;
        let expected = match step.bytes() {
            Some(bytes) => bytes,
            None => {
                expect_drop(conn, step_num, limit).await?;
                tracing::debug!(step = step_num, "Peer dropped connection as expected");
                return Ok(ScriptOutcome::Dropped);
            }
        };

        if sending {
            tracing::trace!(step = step_num, bytes = expected.len(), "Script send");
            net::send_all(conn, expected, limit).await?;
        } else {
            let got = net::recv_chunk(conn, limit).await?;
            tracing::trace!(step = step_num, bytes = got.len(), "Script receive");
            if got != expected {
                return Err(Error::script_mismatch(step_num, expected, &got));
            }
        }
        sending = !sending;
    }

    let capture = capture.ok_or_else(|| {
        Error::Script("script completed without a drop but nothing captures the exit side".to_string())
    })?;

    net::send_all(conn, payload, limit).await?;
    net::half_close(conn).await?;
    Ok(ScriptOutcome::Transferred(capture.get().await))
}

async fn expect_drop(conn: &mut TcpStream, step_num: usize, limit: Duration) -> Result<()> {
    net::half_close(conn).await?;
    let got = net::recv_chunk(conn, limit).await?;
    if got.is_empty() {
        Ok(())
    } else {
        Err(Error::drop_violation(step_num, &got))
    }
}
