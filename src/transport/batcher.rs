//! Batched outbound writer
//!
//! Drains the outbound queue into the stream. Notifications are held until
//! `batch_size` messages are queued or `batch_delay` has passed since the
//! first one, whichever comes first. Requests and responses flush the batch
//! together with everything queued before them, so order is preserved.
//! On shutdown anything still queued is dropped.

use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::message::Outgoing;

#[derive(Debug, Clone, Copy)]
pub struct BatchPolicy {
    pub batch_size: usize,
    pub batch_delay: Duration,
}

pub(crate) async fn run_writer<W>(
    mut rx: mpsc::Receiver<Outgoing>,
    mut writer: W,
    policy: BatchPolicy,
    shutdown: CancellationToken,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch: Vec<Outgoing> = Vec::with_capacity(policy.batch_size);
    let mut deadline: Option<Instant> = None;

    loop {
        let next = match deadline {
            Some(at) => {
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep_until(at) => {
                        flush(&mut writer, &mut batch).await?;
                        deadline = None;
                        continue;
                    }
                    msg = rx.recv() => msg,
                }
            }
            None => {
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => break,
                    msg = rx.recv() => msg,
                }
            }
        };

        let Some(msg) = next else {
            // All senders gone: write what is left and stop.
            flush(&mut writer, &mut batch).await?;
            break;
        };

        let urgent = !msg.is_notification();
        batch.push(msg);

        if urgent || batch.len() >= policy.batch_size {
            flush(&mut writer, &mut batch).await?;
            deadline = None;
        } else if deadline.is_none() {
            deadline = Some(Instant::now() + policy.batch_delay);
        }
    }

    if !batch.is_empty() {
        tracing::debug!(dropped = batch.len(), "Dropping queued notifications on close");
    }
    Ok(())
}

async fn flush<W>(writer: &mut W, batch: &mut Vec<Outgoing>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }
    let mut buf = String::new();
    for msg in batch.drain(..) {
        buf.push_str(&msg.encode());
    }
    writer.write_all(buf.as_bytes()).await?;
    writer.flush().await
}
