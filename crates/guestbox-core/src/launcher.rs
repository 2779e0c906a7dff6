//! Program launching.
//!
//! Turns one of the three run shapes (a structured command, a batch of
//! command strings, a staged script) into a [`ProcessSpec`] for the guest's
//! OS family and starts it. Every launch redirects its standard output into
//! a fresh scratch file; that file is what the streamer polls.

use crate::config::ToolboxConfig;
use crate::context::{guarded, GuestContext, RunId};
use crate::error::{Result, ToolboxError};
use crate::scratch::ScratchScope;
use guestbox_api::{GuestOsFamily, ProcessSpec};
use tokio_util::sync::CancellationToken;

/// A single program invocation, the guest-side analogue of
/// [`std::process::Command`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    current_dir: Option<String>,
}

impl Command {
    /// Create a command for `program`.
    ///
    /// On non-Windows guests a program that is not an absolute path runs
    /// through `bash -c`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Append an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the working directory.
    pub fn current_dir(mut self, dir: impl Into<String>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Program name or path.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments.
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// The three launchable shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramRequest {
    /// One structured command.
    Command(Command),
    /// PowerShell command strings, joined with `;` into one script block.
    Batch(Vec<String>),
    /// Path of a script already uploaded to the guest.
    Script(String),
}

impl ProgramRequest {
    /// Short name used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Command(_) => "command execution",
            Self::Batch(_) => "batch execution",
            Self::Script(_) => "script execution",
        }
    }
}

/// Fail if `request` cannot run on `family`.
///
/// Batches and scripts are PowerShell constructs; they are only offered for
/// Windows-family guests. Checked before any remote state is created.
pub fn ensure_supported(family: GuestOsFamily, request: &ProgramRequest) -> Result<()> {
    match request {
        ProgramRequest::Command(_) => Ok(()),
        ProgramRequest::Batch(_) | ProgramRequest::Script(_) if family.is_windows() => Ok(()),
        ProgramRequest::Batch(_) | ProgramRequest::Script(_) => {
            Err(ToolboxError::UnsupportedPlatform {
                family,
                operation: request.kind(),
            })
        }
    }
}

/// Build the program spec for `request`, redirecting output to `output_path`.
pub fn build_spec(
    family: GuestOsFamily,
    config: &ToolboxConfig,
    request: &ProgramRequest,
    output_path: &str,
) -> Result<ProcessSpec> {
    ensure_supported(family, request)?;

    let out_file = format!("| Out-File {output_path} -encoding ASCII");

    let spec = match (family.is_windows(), request) {
        (true, ProgramRequest::Command(cmd)) => ProcessSpec {
            program_path: config.powershell_path.clone(),
            arguments: format!("{} {out_file}", cmd.command_line()),
            env_variables: env_strings(cmd),
            working_directory: cmd.current_dir.clone(),
        },
        (false, ProgramRequest::Command(cmd)) if cmd.program.contains('/') => {
            // Absolute programs run directly; the guest agent hands the
            // argument string to the system shell, so redirection applies.
            let mut arguments = cmd.args.join(" ");
            if !arguments.is_empty() {
                arguments.push(' ');
            }
            arguments.push_str(&format!("> {output_path}"));
            ProcessSpec {
                program_path: cmd.program.clone(),
                arguments,
                env_variables: env_strings(cmd),
                working_directory: cmd.current_dir.clone(),
            }
        }
        (false, ProgramRequest::Command(cmd)) => ProcessSpec {
            program_path: config.bash_path.clone(),
            arguments: format!(
                "-c '{} > {output_path}'",
                escape_single_quoted(&cmd.command_line())
            ),
            env_variables: env_strings(cmd),
            working_directory: cmd.current_dir.clone(),
        },
        (_, ProgramRequest::Batch(commands)) => ProcessSpec {
            program_path: config.powershell_path.clone(),
            arguments: format!("-Command \"& {{ {} }}\" {out_file}", commands.join(";")),
            ..Default::default()
        },
        (_, ProgramRequest::Script(path)) => ProcessSpec {
            program_path: config.powershell_path.clone(),
            arguments: format!("{path} {out_file}"),
            ..Default::default()
        },
    };

    Ok(spec)
}

fn env_strings(cmd: &Command) -> Vec<String> {
    cmd.env.iter().map(|(k, v)| format!("{k}={v}")).collect()
}

/// Escape `s` for use inside a single-quoted shell word.
fn escape_single_quoted(s: &str) -> String {
    s.replace('\'', r"'\''")
}

/// A started guest process and the scratch file capturing its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchedProcess {
    /// Invocation this process belongs to.
    pub run_id: RunId,
    /// Guest process id.
    pub pid: i64,
    /// Program path that was started.
    pub program: String,
    /// Scratch file receiving standard output.
    pub output_path: String,
}

/// Starts programs in the guest.
pub struct ProcessLauncher<'a> {
    ctx: &'a GuestContext,
}

impl<'a> ProcessLauncher<'a> {
    /// Create a launcher bound to a context.
    pub fn new(ctx: &'a GuestContext) -> Self {
        Self { ctx }
    }

    /// Allocate an output scratch file and start `request`.
    ///
    /// The scratch file is registered in `scratch`; the caller releases it.
    /// A failed start is reported as-is and never retried, since starting
    /// twice could run the program's side effects twice.
    pub async fn launch(
        &self,
        run_id: RunId,
        request: &ProgramRequest,
        scratch: &mut ScratchScope,
        cancel: &CancellationToken,
    ) -> Result<LaunchedProcess> {
        ensure_supported(self.ctx.family(), request)?;

        let output_path = scratch.create("", cancel).await?;
        let spec = build_spec(self.ctx.family(), self.ctx.config(), request, &output_path)?;

        tracing::debug!(
            run_id = %run_id,
            program = %spec.program_path,
            arguments = %spec.arguments,
            "Starting guest program"
        );
        let pid = guarded(
            cancel,
            self.ctx.processes().start_program(self.ctx.auth(), &spec),
        )
        .await?;
        tracing::debug!(run_id = %run_id, pid, output = %output_path, "Guest program started");

        Ok(LaunchedProcess {
            run_id,
            pid,
            program: spec.program_path,
            output_path,
        })
    }
}
