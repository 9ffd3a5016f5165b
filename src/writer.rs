//! Dedicated writer task serializing all frame writes.
//!
//! Request-issuing operations run on arbitrarily many caller tasks, but the
//! output stream must see each frame as one contiguous byte run. Instead of
//! a mutex around the write half, every pre-encoded frame goes through an
//! mpsc channel to a single writer task; the single consumer is the
//! write-side critical section, so concurrent callers can never interleave
//! bytes from two frames. Encoding stays on the caller's task.

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{BosswaveError, Result};

/// Channel capacity for queued outbound frames.
const CHANNEL_CAPACITY: usize = 64;

/// Handle for queueing encoded frames to the writer task.
///
/// Cheaply cloneable; dropping every handle shuts the writer down after the
/// queue drains.
#[derive(Clone)]
pub(crate) struct WriterHandle {
    tx: mpsc::Sender<Bytes>,
}

impl WriterHandle {
    /// Queue one encoded frame for writing.
    ///
    /// Fails with [`BosswaveError::ConnectionClosed`] once the writer task
    /// has stopped.
    pub(crate) async fn send(&self, frame: Bytes) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| BosswaveError::ConnectionClosed)
    }
}

/// Spawn the writer task over the connection's write half.
pub(crate) fn spawn_writer_task<W>(writer: W) -> (WriterHandle, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let task = tokio::spawn(async move {
        if let Err(e) = writer_loop(rx, writer).await {
            tracing::error!("writer task failed: {}", e);
        }
    });
    (WriterHandle { tx }, task)
}

/// Receive frames and write each as an atomic unit.
///
/// Drains any frames already queued before flushing, so a burst of
/// publishes costs one flush instead of one per frame.
async fn writer_loop<W>(mut rx: mpsc::Receiver<Bytes>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = rx.recv().await {
        writer.write_all(&frame).await?;
        while let Ok(next) = rx.try_recv() {
            writer.write_all(&next).await?;
        }
        writer.flush().await?;
    }
    // Every handle dropped: orderly shutdown.
    writer.shutdown().await?;
    Ok(())
}
