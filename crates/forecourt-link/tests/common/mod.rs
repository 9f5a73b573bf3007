// Scripted line device for link and registry tests.

#![allow(dead_code, clippy::unwrap_used)]

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

pub async fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// Server side of one accepted connection.
pub struct DeviceConn {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl DeviceConn {
    pub async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer,
        }
    }

    /// Accept and answer the HELLO as `device_id`.
    pub async fn accept_as(listener: &TcpListener, device_id: &str) -> Self {
        let mut conn = Self::accept(listener).await;
        conn.handshake(device_id, "v1").await;
        conn
    }

    pub async fn handshake(&mut self, device_id: &str, version: &str) {
        assert_eq!(self.read_line().await.as_deref(), Some("HELLO main v1"));
        self.write_line(&format!("HELLO {device_id} {version}")).await;
    }

    /// Next line, or `None` once the client has closed.
    pub async fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await.ok()?;
        (n > 0).then(|| line.trim_end().to_owned())
    }

    pub async fn write_line(&mut self, line: &str) {
        self.write_raw(&format!("{line}\n")).await;
    }

    pub async fn write_raw(&mut self, bytes: &str) {
        self.writer.write_all(bytes.as_bytes()).await.unwrap();
        self.writer.flush().await.unwrap();
    }
}
