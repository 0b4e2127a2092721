//! Connection pair: one local socket spliced to one virtual connection
//!
//! The pair ends as soon as either copy direction finishes. Both sides are
//! then closed, even if the other direction could still carry data; a peer
//! that half-closes would otherwise keep the pair open forever.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use super::local::ForwardTarget;
use super::registry::{ConnectionGuard, Direction};
use crate::ssh::{AsyncStream, Transport};

const COPY_BUFFER_SIZE: usize = 32 * 1024;

/// Bound on the best-effort shutdown of each side
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// How a connection pair ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairOutcome {
    /// Remote dial failed; local connection closed without copying
    DialFailed,
    /// local -> remote finished first (local EOF or error)
    LocalClosed,
    /// remote -> local finished first (remote EOF or error)
    RemoteClosed,
    /// Closed by shutdown
    Cancelled,
}

/// Forward one accepted local connection to `target` through `transport`.
///
/// Per-connection failures are logged here and never returned.
pub async fn run_pair<L>(
    local: L,
    transport: &dyn Transport,
    target: &ForwardTarget,
    guard: ConnectionGuard,
    idle_timeout: Option<Duration>,
) -> PairOutcome
where
    L: AsyncStream,
{
    let id = guard.id();
    let peer = guard.peer();
    let token = guard.token().clone();

    let dialed = tokio::select! {
        biased;
        _ = token.cancelled() => {
            debug!("Connection {} from {} cancelled before dial", id, peer);
            return PairOutcome::Cancelled;
        }
        dialed = transport.dial(&target.remote_host, target.remote_port) => dialed,
    };

    let remote = match dialed {
        Ok(remote) => remote,
        Err(e) => {
            warn!("Connection {} from {}: failed to reach {}: {}", id, peer, target, e);
            guard.registry().record_failed_dial();
            // Dropping `local` closes it
            return PairOutcome::DialFailed;
        }
    };

    debug!("Connection {} from {} forwarding to {}", id, peer, target);

    let (mut local_read, mut local_write) = tokio::io::split(local);
    let (mut remote_read, mut remote_write) = tokio::io::split(remote);
    let registry = guard.registry();

    let outcome = tokio::select! {
        _ = token.cancelled() => PairOutcome::Cancelled,

        result = pump(&mut local_read, &mut remote_write, idle_timeout, |n| {
            registry.record_bytes(Direction::Sent, n)
        }) => {
            log_copy_end(id, "local -> remote", result);
            PairOutcome::LocalClosed
        }

        result = pump(&mut remote_read, &mut local_write, idle_timeout, |n| {
            registry.record_bytes(Direction::Received, n)
        }) => {
            log_copy_end(id, "remote -> local", result);
            PairOutcome::RemoteClosed
        }
    };

    // Close both sides now; the other direction is not waited on
    let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, local_write.shutdown()).await;
    let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, remote_write.shutdown()).await;
    drop((local_read, local_write, remote_read, remote_write));

    debug!("Connection {} from {} closed ({:?})", id, peer, outcome);
    outcome
}

fn log_copy_end(id: u64, direction: &str, result: io::Result<u64>) {
    match result {
        Ok(n) => debug!("Connection {}: {} reached EOF after {} bytes", id, direction, n),
        Err(e) => debug!("Connection {}: {} copy error: {}", id, direction, e),
    }
}

/// Copy until EOF or error. `on_bytes` is called after every write.
async fn pump<R, W, F>(
    reader: &mut R,
    writer: &mut W,
    idle_timeout: Option<Duration>,
    on_bytes: F,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: Fn(u64),
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let n = match idle_timeout {
            Some(limit) => tokio::time::timeout(limit, reader.read(&mut buf))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "idle timeout"))??,
            None => reader.read(&mut buf).await?,
        };
        if n == 0 {
            return Ok(total);
        }

        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        total += n as u64;
        on_bytes(n as u64);
    }
}
