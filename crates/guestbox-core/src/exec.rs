//! Program execution entry points.
//!
//! Every entry point follows the same lifecycle: allocate scratch files,
//! launch, stream output until exit, then release the scratch files. The
//! `run_*` methods drive a run to completion on the caller's task; the
//! `spawn_*` methods move it onto its own task and hand back an
//! [`OutputStream`].

use crate::context::{GuestContext, RunId};
use crate::error::Result;
use crate::launcher::{ensure_supported, Command, ProcessLauncher, ProgramRequest};
use crate::scratch::ScratchScope;
use crate::streamer::{OutputChunk, OutputStream, OutputStreamer, OUTPUT_CHANNEL_CAPACITY};
use crate::transfer::UploadSource;
use guestbox_api::FileAttributes;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

impl GuestContext {
    /// Run `command` and stream its output into `output`.
    ///
    /// `output` is closed exactly once when this returns, on success and on
    /// every error.
    ///
    /// # Errors
    /// [`ToolboxError::Exit`](crate::ToolboxError::Exit) if the command ran
    /// and exited non-zero; any other variant if it could not be started or
    /// observed.
    pub async fn run(
        &self,
        command: Command,
        output: mpsc::Sender<OutputChunk>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let interval = self.config().command_poll_interval;
        self.execute(ProgramRequest::Command(command), interval, Some(output), cancel)
            .await
    }

    /// Run one PowerShell command string (Windows only).
    ///
    /// Equivalent to a batch of one.
    pub async fn run_command(
        &self,
        command: &str,
        output: mpsc::Sender<OutputChunk>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.run_commands(vec![command.to_string()], output, cancel)
            .await
    }

    /// Run PowerShell command strings as one script block (Windows only).
    pub async fn run_commands(
        &self,
        commands: Vec<String>,
        output: mpsc::Sender<OutputChunk>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let interval = self.config().command_poll_interval;
        self.execute(ProgramRequest::Batch(commands), interval, Some(output), cancel)
            .await
    }

    /// Run PowerShell command strings, observing only the exit code
    /// (Windows only).
    pub async fn run_simple_commands(
        &self,
        commands: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let interval = self.config().command_poll_interval;
        self.execute(ProgramRequest::Batch(commands), interval, None, cancel)
            .await
    }

    /// Upload `script` to a scratch `.ps1` file and run it (Windows only).
    ///
    /// Polls at the faster script interval. Both the script file and the
    /// output file are removed afterwards.
    pub async fn run_script(
        &self,
        script: impl Into<UploadSource>,
        output: mpsc::Sender<OutputChunk>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        // Rejected before the script is staged.
        ensure_supported(self.family(), &ProgramRequest::Script(String::new()))?;

        let run_id = RunId::new();
        let start = Instant::now();
        tracing::info!(run_id = %run_id, kind = "script execution", "Running script in guest");

        let mut scratch = ScratchScope::new(self);
        let result = self
            .stage_and_run_script(run_id, &mut scratch, script.into(), output, cancel)
            .await;
        scratch.release().await;

        log_outcome(run_id, start, &result);
        result
    }

    async fn stage_and_run_script(
        &self,
        run_id: RunId,
        scratch: &mut ScratchScope,
        script: UploadSource,
        output: mpsc::Sender<OutputChunk>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let suffix = self.config().script_suffix.clone();
        let script_path = scratch.create(&suffix, cancel).await?;
        self.transfers()
            .upload(script, &script_path, &FileAttributes::default(), true, cancel)
            .await?;
        tracing::debug!(run_id = %run_id, path = %script_path, "Script staged");

        let interval = self.config().script_poll_interval;
        self.launch_and_stream(
            run_id,
            &ProgramRequest::Script(script_path),
            interval,
            scratch,
            Some(output),
            cancel,
        )
        .await
    }

    /// Run `command` on its own task.
    pub fn spawn(&self, command: Command, cancel: &CancellationToken) -> OutputStream {
        let interval = self.config().command_poll_interval;
        self.spawn_request(ProgramRequest::Command(command), interval, cancel)
    }

    /// Run PowerShell command strings on their own task (Windows only).
    pub fn spawn_commands(&self, commands: Vec<String>, cancel: &CancellationToken) -> OutputStream {
        let interval = self.config().command_poll_interval;
        self.spawn_request(ProgramRequest::Batch(commands), interval, cancel)
    }

    /// Run a script on its own task (Windows only).
    pub fn spawn_script(
        &self,
        script: impl Into<UploadSource>,
        cancel: &CancellationToken,
    ) -> OutputStream {
        let ctx = self.clone();
        let script = script.into();
        let token = cancel.child_token();
        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);

        let run_token = token.clone();
        let task = tokio::spawn(async move { ctx.run_script(script, tx, &run_token).await });
        OutputStream::new(rx, task, token)
    }

    fn spawn_request(
        &self,
        request: ProgramRequest,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> OutputStream {
        let ctx = self.clone();
        let token = cancel.child_token();
        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);

        let run_token = token.clone();
        let task = tokio::spawn(async move {
            ctx.execute(request, interval, Some(tx), &run_token).await
        });
        OutputStream::new(rx, task, token)
    }

    /// Launch `request` and stream it to completion inside a fresh scratch
    /// scope.
    pub(crate) async fn execute(
        &self,
        request: ProgramRequest,
        interval: Duration,
        sink: Option<mpsc::Sender<OutputChunk>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_supported(self.family(), &request)?;

        let run_id = RunId::new();
        let start = Instant::now();
        tracing::info!(
            run_id = %run_id,
            kind = request.kind(),
            family = %self.family(),
            "Running program in guest"
        );

        let mut scratch = ScratchScope::new(self);
        let result = self
            .launch_and_stream(run_id, &request, interval, &mut scratch, sink, cancel)
            .await;
        scratch.release().await;

        log_outcome(run_id, start, &result);
        result
    }

    async fn launch_and_stream(
        &self,
        run_id: RunId,
        request: &ProgramRequest,
        interval: Duration,
        scratch: &mut ScratchScope,
        sink: Option<mpsc::Sender<OutputChunk>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let process = ProcessLauncher::new(self)
            .launch(run_id, request, scratch, cancel)
            .await?;
        OutputStreamer::new(self, interval)
            .stream(&process, sink, cancel)
            .await
    }
}

fn log_outcome(run_id: RunId, start: Instant, result: &Result<()>) {
    let elapsed_ms = start.elapsed().as_millis() as u64;
    match result {
        Ok(()) => tracing::info!(run_id = %run_id, elapsed_ms, "Guest program finished"),
        Err(e) => match e.exit_code() {
            Some(code) => tracing::info!(run_id = %run_id, elapsed_ms, exit_code = code, "Guest program exited non-zero"),
            None => tracing::warn!(run_id = %run_id, elapsed_ms, error = %e, "Guest program failed"),
        },
    }
}
