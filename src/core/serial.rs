use crate::config::SerialConfig;
use crate::core::queue::ResponseQueue;
use crate::utils::error::Result;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};

/// SUB / CTRL-Z: primes command mode and submits an SMS body.
pub const CTRL_Z: u8 = 0x1a;

/// Pause after an empty read or a read error.
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Unterminated output (such as the `> ` SMS prompt) is queued once the line
/// has been quiet this long.
const FRAGMENT_FLUSH_AFTER: Duration = Duration::from_millis(200);

const MAX_FRAGMENT_BYTES: usize = 4096;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Serial connection to the modem plus the background task feeding its
/// response queue.
pub struct SerialLink {
    label: String,
    writer: Mutex<BoxedWriter>,
    queue: ResponseQueue,
    reader: JoinHandle<()>,
}

impl SerialLink {
    /// Opens the device at 8N1 without flow control.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let stream = tokio_serial::new(&config.port, config.baud_rate)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(FlowControl::None)
            .open_native_async()?;

        tracing::info!(
            "📡 Opened serial port {} at {} baud",
            config.port,
            config.baud_rate
        );
        Ok(Self::from_stream(config.port.clone(), stream, ResponseQueue::new()))
    }

    /// Wraps any byte stream; must be called inside a tokio runtime.
    pub fn from_stream<S>(label: impl Into<String>, stream: S, queue: ResponseQueue) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let label = label.into();
        let (read_half, write_half) = tokio::io::split(stream);
        let reader = tokio::spawn(read_loop(read_half, queue.clone(), label.clone()));

        Self {
            label,
            writer: Mutex::new(Box::new(write_half)),
            queue,
            reader,
        }
    }

    pub fn queue(&self) -> &ResponseQueue {
        &self.queue
    }

    /// Sends raw text. `true` means the port accepted the bytes, not that
    /// the modem received them.
    pub async fn write(&self, text: &str) -> bool {
        let accepted = self.write_bytes(text.as_bytes()).await;
        let prefix = if accepted { ">>" } else { "xx" };
        for line in text.split(['\r', '\n']).filter(|line| !line.is_empty()) {
            tracing::debug!("{} {} >> {}", prefix, self.label, visible(line));
        }
        accepted
    }

    pub async fn write_ctrl_z(&self) -> bool {
        let accepted = self.write_bytes(&[CTRL_Z]).await;
        let prefix = if accepted { ">>" } else { "xx" };
        tracing::debug!("{} {} >> CTRL+Z", prefix, self.label);
        accepted
    }

    async fn write_bytes(&self, bytes: &[u8]) -> bool {
        let mut writer = self.writer.lock().await;
        let written = match writer.write_all(bytes).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        match written {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Write to {} failed: {}", self.label, e);
                false
            }
        }
    }

    /// Stops the reader task. Queued lines stay available.
    pub fn shutdown(&self) {
        if !self.reader.is_finished() {
            tracing::info!("Stopping serial reader for {}", self.label);
            self.reader.abort();
        }
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Reads forever; errors are logged at debug level and retried.
async fn read_loop<R>(mut reader: R, queue: ResponseQueue, label: String)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 512];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        match tokio::time::timeout(FRAGMENT_FLUSH_AFTER, reader.read(&mut buf)).await {
            Ok(Ok(0)) => {
                flush_fragment(&mut pending, &queue, &label);
                tokio::time::sleep(IDLE_POLL_INTERVAL).await;
            }
            Ok(Ok(n)) => {
                pending.extend_from_slice(&buf[..n]);
                for line in take_complete_lines(&mut pending) {
                    enqueue(&queue, &label, line);
                }
                if pending.len() > MAX_FRAGMENT_BYTES {
                    flush_fragment(&mut pending, &queue, &label);
                }
            }
            Ok(Err(e)) => {
                tracing::debug!("Read from {} failed, retrying: {}", label, e);
                tokio::time::sleep(IDLE_POLL_INTERVAL).await;
            }
            Err(_) => flush_fragment(&mut pending, &queue, &label),
        }
    }
}

fn is_terminator(byte: u8) -> bool {
    byte == b'\r' || byte == b'\n'
}

/// Splits off every line that has seen its terminator; the unterminated
/// tail stays in `pending`.
fn take_complete_lines(pending: &mut Vec<u8>) -> Vec<String> {
    let Some(last) = pending.iter().rposition(|&b| is_terminator(b)) else {
        return Vec::new();
    };

    let complete: Vec<u8> = pending.drain(..=last).collect();
    complete
        .split(|&b| is_terminator(b))
        .filter(|line| !line.is_empty())
        .map(|line| String::from_utf8_lossy(line).into_owned())
        .collect()
}

fn flush_fragment(pending: &mut Vec<u8>, queue: &ResponseQueue, label: &str) {
    if pending.is_empty() {
        return;
    }
    let fragment = String::from_utf8_lossy(pending).into_owned();
    pending.clear();
    enqueue(queue, label, fragment);
}

fn enqueue(queue: &ResponseQueue, label: &str, line: String) {
    if line.trim().is_empty() {
        return;
    }
    tracing::debug!("<< {} << {}", label, visible(&line));
    if let Some(dropped) = queue.push(line) {
        tracing::trace!("Response queue full, dropped oldest line: {}", visible(&dropped));
    }
}

/// Renders control characters as `^` for log output.
pub fn visible(line: &str) -> String {
    line.chars()
        .map(|c| if c.is_control() { '^' } else { c })
        .collect()
}
