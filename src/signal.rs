// lossweep: TLS Handshake Latency under Emulated and Real Network Impairment
// Copyright (C) 2025 The lossweep authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! One-shot completion signal between the client and server hosts.
//!
//! The finishing side connects to the listener, writes [`COMPLETION_TOKEN`] and disconnects.
//! There is no framing and no acknowledgment. The listener accepts a fixed number of
//! connections and checks each payload for exact equality with the token.

use std::{net::SocketAddr, time::Duration};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

use crate::{
    error::{with_deadline, SweepResult},
    util::status,
};

/// Token signaling that the client finished one of its phases.
pub const COMPLETION_TOKEN: &[u8] = b"CLIENT_FINISHED";
/// Maximum payload read from a single connection.
pub const RECV_BUFFER: usize = 1024;

/// Send the completion token to `addr`.
pub async fn send_completion(addr: SocketAddr, deadline: Duration) -> SweepResult {
    with_deadline(format!("sending completion to {addr}"), deadline, async {
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(COMPLETION_TOKEN).await?;
        stream.shutdown().await?;
        Ok(())
    })
    .await?;
    log::info!("Sent completion signal to {addr}");
    Ok(())
}

/// Outcome of waiting for completion signals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionReport {
    /// Connections that delivered exactly the token.
    pub verified: usize,
    /// Connections that delivered anything else, or nothing before the deadline.
    pub rejected: usize,
}

impl CompletionReport {
    /// No connection delivered anything but the token.
    pub fn is_complete(&self) -> bool {
        self.rejected == 0
    }
}

/// Read one message, like a single `recv` of [`RECV_BUFFER`] bytes. Stops as soon as the data
/// can no longer become the token, once the token is complete, when the sender closes, or when
/// the buffer is full. Bytes already queued after a complete token are picked up as well, such
/// that a longer payload is not mistaken for the token.
async fn read_message(conn: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(RECV_BUFFER);
    let mut chunk = [0u8; RECV_BUFFER];
    while buf.len() < COMPLETION_TOKEN.len() && COMPLETION_TOKEN.starts_with(&buf) {
        let n = conn.read(&mut chunk[..RECV_BUFFER - buf.len()]).await?;
        if n == 0 {
            return Ok(buf);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    if buf.len() < RECV_BUFFER {
        match conn.try_read(&mut chunk[..RECV_BUFFER - buf.len()]) {
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e),
        }
    }
    Ok(buf)
}

/// Listening side of the completion signal.
pub struct CompletionListener {
    listener: TcpListener,
}

impl CompletionListener {
    pub async fn bind(addr: SocketAddr) -> SweepResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        log::info!("Waiting for completion signals on {}", listener.local_addr()?);
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> SweepResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept exactly `message_count` connections. Every accept and read is bounded by
    /// `deadline`. A connection that does not deliver a message in time counts as rejected;
    /// an accept that times out fails the whole wait.
    pub async fn wait(&self, message_count: usize, deadline: Duration) -> SweepResult<CompletionReport> {
        let mut report = CompletionReport::default();
        for i in 1..=message_count {
            let (mut conn, peer) = with_deadline("accepting a completion signal", deadline, async {
                Ok(self.listener.accept().await?)
            })
            .await?;

            let buf = match with_deadline(
                format!("reading completion signal from {peer}"),
                deadline,
                async { Ok(read_message(&mut conn).await?) },
            )
            .await
            {
                Ok(buf) => buf,
                Err(e) => {
                    log::warn!("{} No message {i} from {peer}: {e}", status(false));
                    report.rejected += 1;
                    continue;
                }
            };

            if buf == COMPLETION_TOKEN {
                log::info!("{} Client has finished message {i}!", status(true));
                report.verified += 1;
            } else {
                log::warn!(
                    "{} Unexpected message {i} from {peer}: {:?}",
                    status(false),
                    String::from_utf8_lossy(&buf)
                );
                report.rejected += 1;
            }
        }
        Ok(report)
    }
}
