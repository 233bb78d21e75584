//! TCP front end.
//!
//! Each connection gets a reader and a writer. Every complete line is dispatched on
//! the blocking pool so a long acquisition never stalls socket I/O, and so `abort`
//! from any client is handled while an exposure runs. All replies, interim and
//! terminal, go to a broadcast channel that every connection's writer forwards to
//! its client. A client that falls behind loses the lines it missed and keeps going.
//!
//! A line that is not UTF-8 or exceeds [`MAX_LINE_BYTES`] is answered with an
//! `error parse:` line and the connection keeps reading.

use std::future::Future;
use std::net::SocketAddr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{AppResult, DaqError};
use crate::protocol::{Dispatcher, Notifier, Rejected};

/// Lines buffered per client before it is considered lagging.
const BROADCAST_CAPACITY: usize = 1024;

/// Longest request line accepted, terminator excluded.
pub const MAX_LINE_BYTES: usize = 4096;

/// Fan-out of reply lines to every connected client.
#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<String>,
}

impl Broadcaster {
    /// Channel with room for `capacity` undelivered lines per client.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// New receiver for a connection.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Notifier for Broadcaster {
    fn notify(&self, line: &str) {
        if self.tx.send(line.to_string()).is_err() {
            debug!(line, "no clients connected, line dropped");
        }
    }
}

/// Bound command listener.
pub struct Server {
    listener: TcpListener,
    dispatcher: Dispatcher,
    broadcaster: Broadcaster,
}

impl Server {
    /// Bind the listener.
    ///
    /// # Errors
    ///
    /// `DaqError::Io` if the address cannot be bound.
    pub async fn bind(addr: SocketAddr, dispatcher: Dispatcher) -> AppResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            dispatcher,
            broadcaster: Broadcaster::new(BROADCAST_CAPACITY),
        })
    }

    /// Address actually bound (useful with port 0).
    ///
    /// # Errors
    ///
    /// `DaqError::Io` if the socket has no local address.
    pub fn local_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until Ctrl-C.
    ///
    /// # Errors
    ///
    /// `DaqError::Io` if accepting fails irrecoverably.
    pub async fn run(self) -> AppResult<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Serve until `shutdown` resolves, then abort any running acquisition.
    ///
    /// # Errors
    ///
    /// `DaqError::Io` if accepting fails irrecoverably.
    pub async fn run_until<F>(self, shutdown: F) -> AppResult<()>
    where
        F: Future<Output = ()>,
    {
        info!(addr = %self.local_addr()?, "command server listening");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let dispatcher = self.dispatcher.clone();
                            let broadcaster = self.broadcaster.clone();
                            tokio::spawn(handle_connection(stream, peer, dispatcher, broadcaster));
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
            }
        }

        let session = std::sync::Arc::clone(self.dispatcher.session());
        if session.is_busy() {
            info!("aborting running acquisition before exit");
            if let Err(e) = tokio::task::spawn_blocking(move || session.abort()).await {
                warn!(error = %e, "abort on shutdown did not complete");
            }
        }
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Dispatcher,
    broadcaster: Broadcaster,
) {
    let (reader, mut writer) = stream.into_split();
    let mut rx = broadcaster.subscribe();
    info!(%peer, clients = broadcaster.client_count(), "client connected");

    // The greeting goes to this client only.
    let greeting = {
        let dispatcher = dispatcher.clone();
        tokio::task::spawn_blocking(move || dispatcher.dispatch("status", &|_: &str| {})).await
    };
    match greeting {
        Ok(Some(line)) => {
            if send_line(&mut writer, &line).await.is_err() {
                info!(%peer, "client disconnected");
                return;
            }
        }
        Ok(None) => {}
        Err(e) => warn!(%peer, error = %e, "status on connect failed"),
    }

    let writer_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(line) => {
                    if send_line(&mut writer, &line).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(%peer, skipped = n, "client lagged, lines dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        let line = match next_request(&mut reader, &mut buf).await {
            Ok(Inbound::Line(line)) => line,
            Ok(Inbound::Malformed(reason)) => {
                warn!(%peer, %reason, "request dropped");
                let rejected = Rejected {
                    command: None,
                    error: DaqError::Parse(reason),
                };
                broadcaster.notify(&rejected.reply());
                continue;
            }
            Ok(Inbound::Closed) => break,
            Err(e) => {
                warn!(%peer, error = %e, "read failed");
                break;
            }
        };
        debug!(%peer, line = %line, "received");
        let dispatcher = dispatcher.clone();
        let broadcaster = broadcaster.clone();
        tokio::spawn(async move {
            let notifier = broadcaster.clone();
            let reply =
                tokio::task::spawn_blocking(move || dispatcher.dispatch(&line, &notifier)).await;
            match reply {
                Ok(Some(reply)) => broadcaster.notify(&reply),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "dispatch task failed"),
            }
        });
    }

    writer_task.abort();
    info!(%peer, "client disconnected");
}

/// One read from a client connection.
#[derive(Debug, PartialEq)]
enum Inbound {
    /// A request line without its terminator
    Line(String),
    /// A line that cannot be a request; the connection stays usable
    Malformed(String),
    /// Peer closed the connection
    Closed,
}

/// Read the next `\n`-terminated line, never buffering more than `MAX_LINE_BYTES`.
///
/// An unterminated line at end of stream still counts as a line.
async fn next_request<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Inbound>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let limit = MAX_LINE_BYTES as u64 + 1;
    if (&mut *reader).take(limit).read_until(b'\n', buf).await? == 0 {
        return Ok(Inbound::Closed);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    } else if buf.len() > MAX_LINE_BYTES {
        discard_line(reader).await?;
        return Ok(Inbound::Malformed(format!(
            "request longer than {MAX_LINE_BYTES} bytes"
        )));
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    Ok(match std::str::from_utf8(buf) {
        Ok(line) => Inbound::Line(line.to_string()),
        Err(_) => Inbound::Malformed("request is not valid UTF-8".to_string()),
    })
}

/// Skip input up to and including the next `\n`.
async fn discard_line<R>(reader: &mut R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let (used, done) = {
            let chunk = reader.fill_buf().await?;
            match chunk.iter().position(|&b| b == b'\n') {
                Some(end) => (end + 1, true),
                None => (chunk.len(), chunk.is_empty()),
            }
        };
        reader.consume(used);
        if done {
            return Ok(());
        }
    }
}

async fn send_line(writer: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcaster_fans_out() {
        let broadcaster = Broadcaster::new(8);
        let mut a = broadcaster.subscribe();
        let mut b = broadcaster.subscribe();
        assert_eq!(broadcaster.client_count(), 2);

        broadcaster.notify("abort 1");
        assert_eq!(a.recv().await.unwrap(), "abort 1");
        assert_eq!(b.recv().await.unwrap(), "abort 1");
    }

    #[tokio::test]
    async fn test_request_framing() {
        let input: &[u8] = b"status\r\nexpose \xff\xfe 1\n\nabort";
        let mut reader = BufReader::new(input);
        let mut buf = Vec::new();
        let mut seen = Vec::new();
        loop {
            let inbound = next_request(&mut reader, &mut buf).await.unwrap();
            if inbound == Inbound::Closed {
                break;
            }
            seen.push(inbound);
        }
        assert_eq!(
            seen,
            vec![
                Inbound::Line("status".into()),
                Inbound::Malformed("request is not valid UTF-8".into()),
                Inbound::Line(String::new()),
                Inbound::Line("abort".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_oversized_request_is_skipped() {
        let mut input = vec![b'x'; MAX_LINE_BYTES * 3];
        input.extend_from_slice(b"\nabort\n");
        let mut reader = BufReader::with_capacity(64, input.as_slice());
        let mut buf = Vec::new();
        let rejected = next_request(&mut reader, &mut buf).await.unwrap();
        assert!(matches!(rejected, Inbound::Malformed(reason) if reason.contains("longer")));
        assert!(buf.len() <= MAX_LINE_BYTES + 1);
        assert_eq!(
            next_request(&mut reader, &mut buf).await.unwrap(),
            Inbound::Line("abort".into())
        );
    }

    #[tokio::test]
    async fn test_lagging_receiver_skips() {
        let broadcaster = Broadcaster::new(2);
        let mut slow = broadcaster.subscribe();
        for i in 0..5 {
            broadcaster.notify(&format!("line {i}"));
        }
        assert!(matches!(
            slow.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        assert_eq!(slow.recv().await.unwrap(), "line 3");
    }
}
