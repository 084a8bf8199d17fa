//! Trait abstraction for the shell transport to enable testing
//!
//! The transport's only job is to push one UTF-8 command line at the device;
//! inbound lines travel the other way on a plain mpsc channel fed by a
//! reader task, so the command channel never blocks on the port.

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{PmicBridgeError, Result};

/// Baud rate of the PMIC evaluation kit's shell UART
pub const SHELL_BAUD_RATE: u32 = 115_200;

/// Capacity of the inbound line channel
const LINE_CHANNEL_CAPACITY: usize = 256;

/// Trait for shell line output
#[async_trait]
pub trait ShellTransport: Send {
    /// Write one command line (terminator appended here)
    async fn send_line(&mut self, line: &str) -> io::Result<()>;
}

/// Serial shell transport over a tokio-serial stream
///
/// Owns the write half of the port; a background task reads the other half
/// line by line and forwards each line on the channel returned by
/// [`SerialShellTransport::open`]. The channel closing signals that the
/// shell went away.
pub struct SerialShellTransport {
    writer: tokio::io::WriteHalf<tokio_serial::SerialStream>,
    device_path: String,
}

impl std::fmt::Debug for SerialShellTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialShellTransport")
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

impl SerialShellTransport {
    /// Open the shell port and spawn the line reader
    ///
    /// # Errors
    ///
    /// Returns an error if the port cannot be opened with 8N1 settings.
    pub fn open(path: &str, baud_rate: u32) -> Result<(Self, mpsc::Receiver<String>)> {
        use tokio_serial::SerialPortBuilderExt;

        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| PmicBridgeError::Serial(format!("Failed to open {path}: {e}")))?;

        info!("Opened PMIC shell at {} ({} baud)", path, baud_rate);

        let (reader, writer) = tokio::io::split(port);
        let (line_tx, line_rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);

        tokio::spawn(read_lines(reader, line_tx));

        Ok((
            Self {
                writer,
                device_path: path.to_string(),
            },
            line_rx,
        ))
    }

    /// Path of the opened serial device
    pub fn device_path(&self) -> &str {
        &self.device_path
    }
}

#[async_trait]
impl ShellTransport for SerialShellTransport {
    async fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;
        debug!("Sent shell line ({} bytes)", line.len());
        Ok(())
    }
}

/// Read the shell byte stream line by line until EOF or a read error.
async fn read_lines<R>(reader: R, line_tx: mpsc::Sender<String>)
where
    R: tokio::io::AsyncRead + Unpin + Send,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim_end_matches('\r').to_string();
                if line_tx.send(line).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                warn!("Shell stream closed");
                break;
            }
            Err(e) => {
                warn!("Shell read failed: {}", e);
                break;
            }
        }
    }
    // dropping line_tx closes the channel, which the session reads as
    // shell loss
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Mock shell transport for testing
    ///
    /// Records every sent line and optionally fails writes with a scripted
    /// error; inbound lines are pushed through the paired sender.
    #[derive(Clone)]
    pub struct MockShellTransport {
        pub sent_lines: Arc<Mutex<Vec<String>>>,
        pub write_error: Arc<Mutex<Option<io::ErrorKind>>>,
    }

    impl MockShellTransport {
        pub fn new() -> Self {
            Self {
                sent_lines: Arc::new(Mutex::new(Vec::new())),
                write_error: Arc::new(Mutex::new(None)),
            }
        }

        /// Create a mock together with an inbound line channel pair
        pub fn with_lines() -> (Self, mpsc::Sender<String>, mpsc::Receiver<String>) {
            let (line_tx, line_rx) = mpsc::channel(64);
            (Self::new(), line_tx, line_rx)
        }

        pub fn sent(&self) -> Vec<String> {
            self.sent_lines.lock().unwrap().clone()
        }

        pub fn set_write_error(&self, error: io::ErrorKind) {
            *self.write_error.lock().unwrap() = Some(error);
        }
    }

    #[async_trait]
    impl ShellTransport for MockShellTransport {
        async fn send_line(&mut self, line: &str) -> io::Result<()> {
            if let Some(error) = *self.write_error.lock().unwrap() {
                return Err(io::Error::new(error, "Mock write error"));
            }
            self.sent_lines.lock().unwrap().push(line.to_string());
            Ok(())
        }
    }
}
