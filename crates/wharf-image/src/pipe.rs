//! Bounded in-memory pipe from a blocking writer to an async byte stream.

use std::io::{self, Write};

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use wharf_runtime::ArchiveStream;

/// Chunks buffered between producer and consumer.
pub const PIPE_DEPTH: usize = 16;

/// Create a pipe holding at most `depth` chunks in flight.
///
/// The stream ends when every [`PipeWriter`] is dropped. A writer that fails
/// reports it with [`PipeWriter::fail`], which the consumer sees as the last item.
#[must_use]
pub fn pipe(depth: usize) -> (PipeWriter, ArchiveStream) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    (PipeWriter { tx }, ReceiverStream::new(rx).boxed())
}

/// Blocking write half of [`pipe`]. Must not be used from an async context.
#[derive(Debug, Clone)]
pub struct PipeWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
}

impl PipeWriter {
    /// Deliver `error` to the consumer and close this end.
    pub fn fail(self, error: io::Error) {
        // A consumer that already hung up has nothing left to tell.
        let _ = self.tx.blocking_send(Err(error));
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .blocking_send(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "archive consumer went away"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;

    use super::*;

    #[tokio::test]
    async fn bytes_arrive_in_order() {
        let (mut writer, stream) = pipe(2);
        let producer = tokio::task::spawn_blocking(move || {
            for i in 0..10u8 {
                writer.write_all(&[i; 3]).unwrap();
            }
        });

        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        producer.await.unwrap();
        let flat: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        assert_eq!(flat.len(), 30);
        assert_eq!(&flat[27..], &[9, 9, 9]);
    }

    #[tokio::test]
    async fn failure_is_the_last_item() {
        let (mut writer, mut stream) = pipe(4);
        tokio::task::spawn_blocking(move || {
            writer.write_all(b"partial").unwrap();
            writer.fail(io::Error::other("boom"));
        })
        .await
        .unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"partial"));
        assert_eq!(stream.next().await.unwrap().unwrap_err().to_string(), "boom");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn dropped_consumer_breaks_the_pipe() {
        let (mut writer, stream) = pipe(1);
        drop(stream);
        let err = tokio::task::spawn_blocking(move || writer.write_all(b"x"))
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
