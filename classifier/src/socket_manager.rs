//! Owns the single TCP connection to the external DPI engine.
//!
//! All I/O is serialized through a mutex around the connection; any I/O
//! error recycles the socket (drops it, so the next call reconnects).

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("not connected")]
    NotConnected,
    #[error("connect timed out")]
    ConnectTimeout,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct SocketManager {
    addr: String,
    connect_timeout: Duration,
    io_timeout: Duration,
    conn: Mutex<Option<TcpStream>>,
}

impl SocketManager {
    pub fn new(addr: String, connect_timeout: Duration, io_timeout: Duration) -> Self {
        SocketManager {
            addr,
            connect_timeout,
            io_timeout,
            conn: Mutex::new(None),
        }
    }

    /// Dials the DPI engine with the configured connect timeout. On
    /// failure the caller is expected to retry after the configured delay.
    pub async fn connect(&self) -> Result<(), SocketError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| SocketError::ConnectTimeout)??;
        *self.conn.lock().await = Some(stream);
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    /// Sends `frame` without waiting for a reply, used for the `CREATE` and
    /// `REMOVE` lifecycle frames (only `PACKET` gets a classification
    /// reply). Any I/O error drops the connection so the next call
    /// reconnects.
    pub async fn send_frame(&self, frame: &str) -> Result<(), SocketError> {
        let mut guard = self.conn.lock().await;
        let stream = guard.as_mut().ok_or(SocketError::NotConnected)?;

        let write = async {
            stream.write_all(frame.as_bytes()).await?;
            stream.flush().await
        };
        match tokio::time::timeout(self.io_timeout, write)
            .await
            .unwrap_or_else(|_| Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "write deadline exceeded")))
        {
            Ok(()) => Ok(()),
            Err(e) => {
                *guard = None;
                Err(e.into())
            }
        }
    }

    /// Sends `command` followed by `payload` and reads the reply, which is
    /// terminated by a blank line. Any I/O error drops the connection so
    /// the next call reconnects from scratch.
    pub async fn classify_packet(&self, command: &str, payload: &[u8]) -> Result<String, SocketError> {
        let mut guard = self.conn.lock().await;
        let stream = guard.as_mut().ok_or(SocketError::NotConnected)?;

        let write = async {
            stream.write_all(command.as_bytes()).await?;
            stream.write_all(payload).await?;
            stream.flush().await
        };
        if let Err(e) = tokio::time::timeout(self.io_timeout, write)
            .await
            .unwrap_or_else(|_| Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "write deadline exceeded")))
        {
            *guard = None;
            return Err(e.into());
        }

        match tokio::time::timeout(self.io_timeout, read_until_blank_line(stream)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => {
                *guard = None;
                Err(e.into())
            }
            Err(_) => {
                *guard = None;
                Err(SocketError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "read deadline exceeded")))
            }
        }
    }
}

async fn read_until_blank_line(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            break;
        }
        buf.push(byte[0]);
        if buf.ends_with(b"\r\n\r\n") {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
