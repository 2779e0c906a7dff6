//! Output streaming for running guest processes.
//!
//! The guest cannot push output, so the streamer polls. On every tick it
//! asks for the process status and downloads the output scratch file; bytes
//! beyond the last emitted offset become the next [`OutputChunk`]. Once the
//! process reports an end time, one final pass flushes the remainder and the
//! loop ends with the exit code.
//!
//! ```text
//!            tick                 tick                 tick
//!  RUNNING ───────▶ status ─────▶ running: emit delta ───▶ ...
//!                      │
//!                      └────────▶ ended: emit remainder ─▶ ENDED (exit code)
//! ```

use crate::context::{guarded, GuestContext};
use crate::error::{Result, ToolboxError};
use crate::launcher::LaunchedProcess;
use crate::transfer::TransferManager;
use bytes::Bytes;
use futures::Stream;
use guestbox_api::ProcessInfo;
use std::borrow::Cow;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Capacity of the chunk channel behind [`OutputStream`].
pub(crate) const OUTPUT_CHANNEL_CAPACITY: usize = 64;

/// Newly observed output of one run.
///
/// Chunks of a run are emitted in order, never overlap and leave no gaps:
/// each chunk's `offset` is the previous chunk's `offset + len`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    /// Byte offset of `data` within the output file.
    pub offset: u64,
    /// The new bytes.
    pub data: Bytes,
}

impl OutputChunk {
    /// Number of bytes in this chunk.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the chunk carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The chunk as text; invalid UTF-8 is replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}

/// Drives the poll loop for one launched process.
pub struct OutputStreamer<'a> {
    ctx: &'a GuestContext,
    interval: Duration,
}

impl<'a> OutputStreamer<'a> {
    /// Create a streamer polling every `interval`.
    pub fn new(ctx: &'a GuestContext, interval: Duration) -> Self {
        Self { ctx, interval }
    }

    /// Poll `process` until it ends.
    ///
    /// Chunks go to `sink`; with no sink the output file is never downloaded
    /// and only the exit code is observed. The sink is dropped when this
    /// returns, which closes the channel exactly once on every path.
    ///
    /// # Errors
    /// - [`ToolboxError::Exit`] when the process ends with a non-zero code,
    ///   raised after the channel is closed
    /// - any status or download failure, which aborts the loop at once;
    ///   chunks already emitted stay valid
    /// - [`ToolboxError::Cancelled`] when `cancel` fires, observed at the
    ///   next tick, call boundary or blocked send
    pub async fn stream(
        &self,
        process: &LaunchedProcess,
        sink: Option<mpsc::Sender<OutputChunk>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut sink = sink;
        let mut offset = 0u64;
        let mut polls = 0u64;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let code = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ToolboxError::Cancelled),
                _ = ticker.tick() => {}
            }
            polls += 1;

            let status = self.status(process, cancel).await?;
            self.flush(process, &mut offset, &mut sink, cancel).await?;

            if status.has_ended() {
                let code = status.exit_code.unwrap_or_else(|| {
                    tracing::debug!(run_id = %process.run_id, pid = process.pid, "Ended process reported no exit code");
                    0
                });
                break code;
            }
            tracing::trace!(run_id = %process.run_id, pid = process.pid, polls, offset, "Process still running");
        };

        drop(sink);
        tracing::debug!(
            run_id = %process.run_id,
            pid = process.pid,
            exit_code = code,
            polls,
            output_len = offset,
            "Process ended"
        );

        if code != 0 {
            return Err(ToolboxError::Exit {
                program: process.program.clone(),
                code,
            });
        }
        Ok(())
    }

    async fn status(
        &self,
        process: &LaunchedProcess,
        cancel: &CancellationToken,
    ) -> Result<ProcessInfo> {
        let procs = guarded(
            cancel,
            self.ctx
                .processes()
                .list_processes(self.ctx.auth(), &[process.pid]),
        )
        .await?;

        procs
            .into_iter()
            .find(|p| p.pid == process.pid)
            .ok_or(ToolboxError::ProcessNotFound(process.pid))
    }

    /// Download the output file and emit whatever lies past `offset`.
    async fn flush(
        &self,
        process: &LaunchedProcess,
        offset: &mut u64,
        sink: &mut Option<mpsc::Sender<OutputChunk>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let Some(tx) = sink.as_ref() else {
            return Ok(());
        };

        let content = TransferManager::new(self.ctx)
            .download_bytes(&process.output_path, cancel)
            .await?;
        let len = content.len() as u64;

        if len < *offset {
            tracing::warn!(
                run_id = %process.run_id,
                path = %process.output_path,
                len,
                offset = *offset,
                "Output file shrank; ignoring"
            );
            return Ok(());
        }
        if len == *offset {
            return Ok(());
        }

        let chunk = OutputChunk {
            offset: *offset,
            data: content.slice(*offset as usize..),
        };
        tracing::trace!(run_id = %process.run_id, offset = chunk.offset, len = chunk.len(), "Emitting output chunk");

        // A stalled receiver must not hold the run past cancellation.
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ToolboxError::Cancelled),
            sent = tx.send(chunk) => sent,
        };
        if sent.is_err() {
            tracing::warn!(
                run_id = %process.run_id,
                pid = process.pid,
                "Output receiver dropped; waiting for exit without streaming"
            );
            *sink = None;
        }
        *offset = len;
        Ok(())
    }
}

/// Output of a run executing on its own task.
///
/// Yields chunks until the run finishes; `None` from [`recv`](Self::recv)
/// (or the end of the [`Stream`]) means the run is over, never that it is
/// merely idle. The run's outcome comes from [`wait`](Self::wait) and is
/// authoritative over any chunks already seen.
pub struct OutputStream {
    rx: mpsc::Receiver<OutputChunk>,
    task: JoinHandle<Result<()>>,
    cancel: CancellationToken,
}

/// Everything a finished run produced.
#[derive(Debug)]
pub struct CollectedOutput {
    /// Concatenation of every chunk, in order.
    pub output: Bytes,
    /// Outcome of the run.
    pub result: Result<()>,
}

impl OutputStream {
    pub(crate) fn new(
        rx: mpsc::Receiver<OutputChunk>,
        task: JoinHandle<Result<()>>,
        cancel: CancellationToken,
    ) -> Self {
        Self { rx, task, cancel }
    }

    /// Receive the next chunk; `None` once the run has finished.
    pub async fn recv(&mut self) -> Option<OutputChunk> {
        self.rx.recv().await
    }

    /// Request cancellation of the run.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the run to finish, discarding unread output.
    pub async fn wait(self) -> Result<()> {
        drop(self.rx);
        join(self.task).await
    }

    /// Read every remaining chunk, then wait for the run to finish.
    pub async fn collect_output(mut self) -> CollectedOutput {
        let mut output = Vec::new();
        while let Some(chunk) = self.rx.recv().await {
            output.extend_from_slice(&chunk.data);
        }
        CollectedOutput {
            output: Bytes::from(output),
            result: join(self.task).await,
        }
    }
}

impl Stream for OutputStream {
    type Item = OutputChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

async fn join(task: JoinHandle<Result<()>>) -> Result<()> {
    task.await
        .map_err(|e| ToolboxError::Task(e.to_string()))?
}
