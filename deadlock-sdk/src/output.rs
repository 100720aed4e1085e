//! Telemetry sinks for emitting deadlock payloads.

use std::fmt::Debug;
use std::path::PathBuf;

use async_trait::async_trait;
use deadlock_types::DeadlockPayload;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::SinkError;

/// Somewhere a collector can hand its payloads.
///
/// A failed `emit` aborts the cycle: the high-water mark does not move and
/// the same rows are offered again on the next cycle.
#[async_trait]
pub trait TelemetrySink: Send + Sync + Debug {
    async fn emit(&self, payload: &DeadlockPayload) -> Result<(), SinkError>;
}

/// Built-in output destinations.
#[derive(Debug)]
pub enum Output {
    /// Append each payload to a file as one line of JSON.
    File(PathBuf),

    /// Send each payload to a TCP server as newline-delimited JSON.
    ///
    /// A fresh connection is made per payload.
    Tcp(String),

    /// Send payloads through a channel.
    ///
    /// Use `Output::channel()` to create this variant and get the receiver.
    Channel(mpsc::Sender<DeadlockPayload>),

    /// Pretty-print each payload to stdout.
    Stdout,
}

impl Output {
    /// Create a file output.
    ///
    /// # Example
    ///
    /// ```rust
    /// use deadlock_sdk::Output;
    ///
    /// let output = Output::file("deadlocks.jsonl");
    /// ```
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Output::File(path.into())
    }

    /// Create a TCP output.
    ///
    /// # Example
    ///
    /// ```rust
    /// use deadlock_sdk::Output;
    ///
    /// let output = Output::tcp("localhost:9090");
    /// ```
    pub fn tcp(addr: impl Into<String>) -> Self {
        Output::Tcp(addr.into())
    }

    /// Create a channel output and return both the output and receiver.
    ///
    /// # Example
    ///
    /// ```rust
    /// use deadlock_sdk::Output;
    ///
    /// let (output, mut rx) = Output::channel(16);
    ///
    /// // Later, receive payloads
    /// // while let Some(payload) = rx.recv().await {
    /// //     println!("Got {} deadlocks", payload.len());
    /// // }
    /// ```
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<DeadlockPayload>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Output::Channel(tx), rx)
    }

    /// Short description for logs.
    pub fn description(&self) -> String {
        match self {
            Output::File(path) => format!("file: {}", path.display()),
            Output::Tcp(addr) => format!("tcp: {addr}"),
            Output::Channel(_) => "channel".to_string(),
            Output::Stdout => "stdout".to_string(),
        }
    }
}

#[async_trait]
impl TelemetrySink for Output {
    async fn emit(&self, payload: &DeadlockPayload) -> Result<(), SinkError> {
        match self {
            Output::File(path) => {
                let mut line = serde_json::to_vec(payload)?;
                line.push(b'\n');
                let mut file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await?;
                file.write_all(&line).await?;
                file.flush().await?;
            }
            Output::Tcp(addr) => {
                let mut line = serde_json::to_vec(payload)?;
                line.push(b'\n');
                let mut stream = tokio::net::TcpStream::connect(addr).await?;
                stream.write_all(&line).await?;
                stream.shutdown().await?;
            }
            Output::Channel(tx) => {
                // Don't block the cycle on a slow consumer
                tx.try_send(payload.clone()).map_err(|err| match err {
                    mpsc::error::TrySendError::Full(_) => SinkError::ChannelFull,
                    mpsc::error::TrySendError::Closed(_) => SinkError::ChannelClosed,
                })?;
            }
            Output::Stdout => {
                let json = serde_json::to_string_pretty(payload)?;
                let mut stdout = tokio::io::stdout();
                stdout.write_all(json.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use deadlock_types::OutputRow;
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn payload(rows: usize) -> DeadlockPayload {
        let rows = (0..rows)
            .map(|_| OutputRow::parsed(Utc::now(), "<deadlock/>", vec![]))
            .collect();
        DeadlockPayload::new("db-1", 10.0, rows)
    }

    #[test]
    fn test_output_constructors() {
        assert!(matches!(Output::file("x.jsonl"), Output::File(_)));
        assert_eq!(Output::tcp("localhost:9000").description(), "tcp: localhost:9000");
    }

    #[tokio::test]
    async fn test_file_output_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let output = Output::file(&path);

        output.emit(&payload(1)).await.unwrap();
        output.emit(&payload(2)).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["dbm_type"], "deadlocks");
        assert_eq!(second["sqlserver_deadlocks"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_channel_output() {
        let (output, mut rx) = Output::channel(1);

        output.emit(&payload(1)).await.unwrap();
        let err = output.emit(&payload(1)).await.unwrap_err();
        assert!(matches!(err, SinkError::ChannelFull));

        assert_eq!(rx.recv().await.unwrap().len(), 1);

        drop(rx);
        let err = output.emit(&payload(1)).await.unwrap_err();
        assert!(matches!(err, SinkError::ChannelClosed));
    }

    #[tokio::test]
    async fn test_tcp_output_sends_ndjson() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(socket).lines();
            lines.next_line().await.unwrap().unwrap()
        });

        Output::tcp(addr.to_string()).emit(&payload(3)).await.unwrap();

        let line = server.await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["sqlserver_deadlocks"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_tcp_output_reports_connect_failure() {
        // Bind then drop to get a port with nothing listening.
        let addr = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let err = Output::tcp(addr.to_string()).emit(&payload(1)).await.unwrap_err();
        assert!(matches!(err, SinkError::Io(_)));
    }
}
