// ── Device link ──
//
// One persistent TCP connection to one device, turned into a
// synchronous request/reply channel. The connection mutex is held
// from the write of a request until its reply line has been read, so
// replies are never handed to the wrong caller.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::error::Error;
use crate::wire::{self, Hello};

/// How long `open` waits for the TCP connect and the HELLO reply.
pub const DEFAULT_CONNECT_WINDOW: Duration = Duration::from_secs(3);

/// A versioned, serialized request/reply channel to a single device.
pub struct Link {
    addr: String,
    device_id: String,
    protocol_version: String,
    conn: Mutex<Option<Conn>>,
}

struct Conn {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    /// Bytes of a line whose terminator has not arrived yet. Kept across
    /// calls so a deadline never drops half a reply.
    partial: Vec<u8>,
    /// Replies still owed to requests that timed out.
    owed: usize,
}

impl Link {
    /// Connect and handshake using [`DEFAULT_CONNECT_WINDOW`].
    pub async fn open(host: &str, port: u16, expected_device_id: &str) -> Result<Self, Error> {
        Self::open_within(host, port, expected_device_id, DEFAULT_CONNECT_WINDOW).await
    }

    /// Connect to `host:port`, send `HELLO main v1`, and verify the
    /// device's answer within `window`.
    pub async fn open_within(
        host: &str,
        port: u16,
        expected_device_id: &str,
        window: Duration,
    ) -> Result<Self, Error> {
        let addr = format!("{host}:{port}");
        let deadline = Instant::now() + window;

        let stream = match tokio::time::timeout_at(deadline, TcpStream::connect((host, port))).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(Error::Connect {
                    addr,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(Error::Connect {
                    addr,
                    reason: format!("no connection within {}ms", window.as_millis()),
                });
            }
        };
        stream.set_nodelay(true)?;

        let mut conn = Conn::new(stream);
        conn.write_line(&wire::hello_line()).await?;

        let reply = match tokio::time::timeout_at(deadline, conn.read_line()).await {
            Ok(Ok(line)) => line,
            Ok(Err(e)) => return Err(e),
            Err(_) => None,
        };
        let Some(hello) = reply.as_deref().and_then(Hello::parse) else {
            return Err(Error::Handshake { addr, reply });
        };

        if hello.device_id != expected_device_id {
            return Err(Error::DeviceIdMismatch {
                expected: expected_device_id.to_owned(),
                got: hello.device_id,
            });
        }
        if hello.version != wire::PROTOCOL_VERSION {
            return Err(Error::ProtocolVersionMismatch {
                expected: wire::PROTOCOL_VERSION.to_owned(),
                got: hello.version,
            });
        }

        info!(%addr, device_id = %hello.device_id, "link opened");
        Ok(Self {
            addr,
            device_id: hello.device_id,
            protocol_version: hello.version,
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Identity the device announced during the handshake.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// `false` once [`close`](Self::close) has run.
    pub async fn is_open(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    /// Write `line` and wait up to `timeout` for exactly one reply line.
    ///
    /// Concurrent callers queue on the link; the next request is written
    /// only after this one's reply has been consumed.
    pub async fn request(&self, line: &str, timeout: Duration) -> Result<String, Error> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(Error::ConnectionClosed)?;

        trace!(device = %self.device_id, %line, "request");
        conn.write_line(line).await?;

        let deadline = Instant::now() + timeout;
        let mut discarded = false;
        loop {
            match tokio::time::timeout_at(deadline, conn.read_line()).await {
                Err(_) => {
                    // A line discarded here may have been this request's own
                    // reply, so only a request that saw nothing adds debt.
                    if !discarded {
                        conn.owed += 1;
                    }
                    debug!(device = %self.device_id, %line, owed = conn.owed, "request timed out");
                    return Err(Error::Timeout {
                        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    });
                }
                Ok(Err(e)) => return Err(e),
                Ok(Ok(None)) => return Err(Error::ConnectionClosed),
                Ok(Ok(Some(reply))) if conn.owed > 0 => {
                    conn.owed -= 1;
                    discarded = true;
                    warn!(device = %self.device_id, %reply, "discarding late reply");
                }
                Ok(Ok(Some(reply))) => {
                    trace!(device = %self.device_id, %reply, "reply");
                    return Ok(reply);
                }
            }
        }
    }

    /// Write `line` without waiting for an answer.
    pub async fn send(&self, line: &str) -> Result<(), Error> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(Error::ConnectionClosed)?;
        trace!(device = %self.device_id, %line, "send");
        conn.write_line(line).await
    }

    /// Close the socket. Calling it again is a no-op.
    pub async fn close(&self) -> Result<(), Error> {
        let Some(mut conn) = self.conn.lock().await.take() else {
            return Ok(());
        };
        debug!(device = %self.device_id, "closing link");
        match conn.writer.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("addr", &self.addr)
            .field("device_id", &self.device_id)
            .field("protocol_version", &self.protocol_version)
            .finish_non_exhaustive()
    }
}

impl Conn {
    fn new(stream: TcpStream) -> Self {
        let (read, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer,
            partial: Vec::new(),
            owed: 0,
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<(), Error> {
        let mut frame = String::with_capacity(line.len() + 1);
        frame.push_str(line);
        frame.push('\n');
        self.writer
            .write_all(frame.as_bytes())
            .await
            .map_err(closed_or_io)?;
        self.writer.flush().await.map_err(closed_or_io)
    }

    /// Next complete line without its terminator, or `None` at EOF.
    async fn read_line(&mut self) -> Result<Option<String>, Error> {
        let n = self
            .reader
            .read_until(b'\n', &mut self.partial)
            .await
            .map_err(closed_or_io)?;
        if n == 0 || self.partial.last() != Some(&b'\n') {
            return Ok(None);
        }
        let bytes = std::mem::take(&mut self.partial);
        let line = String::from_utf8_lossy(&bytes);
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_owned()))
    }
}

fn closed_or_io(e: std::io::Error) -> Error {
    use std::io::ErrorKind;
    match e.kind() {
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
            Error::ConnectionClosed
        }
        _ => Error::Io(e),
    }
}
