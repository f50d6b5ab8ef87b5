//! Merged output stream.
//!
//! stdout and stderr are pumped by separate tasks into one unbounded channel.
//! Chunks are numbered when they are received, so `seq` reflects the order in
//! which data reached the channel. Bytes from one pipe are never reordered.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Read size for pipe pumps.
const PUMP_BUFFER_SIZE: usize = 8 * 1024;

/// Source of an output chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Stdout,
    Stderr,
    /// Messages from polyrun itself (timeouts, spawn failures).
    Diagnostic,
}

/// One piece of output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    /// Arrival index within the stream, starting at 0.
    pub seq: u64,
    pub channel: Channel,
    pub bytes: Vec<u8>,
}

impl OutputChunk {
    /// Bytes as text, replacing invalid UTF-8.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

type Message = (Channel, Vec<u8>);

/// Create a connected sender/stream pair.
pub(crate) fn output_channel() -> (OutputSender, OutputStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (OutputSender { tx }, OutputStream { rx, next_seq: 0 })
}

/// Producer side, cloned into each pump.
#[derive(Debug, Clone)]
pub(crate) struct OutputSender {
    tx: mpsc::UnboundedSender<Message>,
}

impl OutputSender {
    /// Queue bytes. Dropped silently once the stream is gone.
    pub(crate) fn send(&self, channel: Channel, bytes: Vec<u8>) {
        let _ = self.tx.send((channel, bytes));
    }

    /// Queue a diagnostic line.
    pub(crate) fn diagnostic(&self, message: &str) {
        let mut bytes = message.as_bytes().to_vec();
        if !bytes.ends_with(b"\n") {
            bytes.push(b'\n');
        }
        self.send(Channel::Diagnostic, bytes);
    }
}

/// Copy a pipe into the stream until EOF.
///
/// Keeps reading after the consumer has dropped the stream so the child
/// never blocks on a full pipe.
pub(crate) fn spawn_pump<R>(mut reader: R, channel: Channel, sender: OutputSender) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; PUMP_BUFFER_SIZE];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => sender.send(channel, buf[..n].to_vec()),
                Err(e) => {
                    tracing::debug!("{:?} pump stopped: {}", channel, e);
                    break;
                }
            }
        }
    })
}

/// Ordered, finite output of one process.
///
/// Ends once both pipes are closed and the process has been reaped.
#[derive(Debug)]
pub struct OutputStream {
    rx: mpsc::UnboundedReceiver<Message>,
    next_seq: u64,
}

impl OutputStream {
    fn number(&mut self, (channel, bytes): Message) -> OutputChunk {
        let seq = self.next_seq;
        self.next_seq += 1;
        OutputChunk {
            seq,
            channel,
            bytes,
        }
    }

    /// Next chunk, or `None` at end of stream.
    pub async fn next_chunk(&mut self) -> Option<OutputChunk> {
        let message = self.rx.recv().await?;
        Some(self.number(message))
    }

    /// Drain the whole stream.
    pub async fn collect(mut self) -> Vec<OutputChunk> {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            chunks.push(chunk);
        }
        chunks
    }

    /// Drain the whole stream as text.
    pub async fn collect_text(self) -> String {
        let mut text = String::new();
        for chunk in self.collect().await {
            text.push_str(&chunk.text());
        }
        text
    }
}

impl Stream for OutputStream {
    type Item = OutputChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(message)) => Poll::Ready(Some(self.number(message))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_seq_follows_arrival() {
        let (sender, stream) = output_channel();
        sender.send(Channel::Stdout, b"a".to_vec());
        sender.send(Channel::Stderr, b"b".to_vec());
        sender.diagnostic("done");
        drop(sender);

        let chunks = stream.collect().await;
        let seqs: Vec<u64> = chunks.iter().map(|c| c.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(chunks[1].channel, Channel::Stderr);
        assert_eq!(chunks[2].text(), "done\n");
    }

    #[tokio::test]
    async fn test_stream_impl() {
        let (sender, mut stream) = output_channel();
        sender.send(Channel::Stdout, b"x".to_vec());
        drop(sender);

        let chunk = stream.next().await.unwrap();
        assert_eq!(chunk.bytes, b"x");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_pump_reads_to_eof() {
        let (sender, stream) = output_channel();
        let data: &[u8] = b"hello world";
        spawn_pump(data, Channel::Stdout, sender).await.unwrap();
        assert_eq!(stream.collect_text().await, "hello world");
    }
}
