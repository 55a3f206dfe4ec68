//! Launching the privileged extraction worker.

use std::io::{self, ErrorKind, Read, Write};
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;

use bock_common::{BockError, BockResult};

use super::archive::Stream;

/// One worker invocation.
pub struct WorkerRequest<'a> {
    /// Registered re-exec command name, passed as `argv[0]`.
    pub command: &'a str,
    /// Remaining arguments.
    pub args: Vec<String>,
    /// The complete environment of the worker.
    pub env: Vec<(String, String)>,
    /// Bytes fed to the worker's standard input.
    pub stdin: Stream<'a>,
}

/// What the worker left behind.
#[derive(Debug)]
pub struct WorkerOutput {
    /// Exit status.
    pub status: ExitStatus,
    /// Captured standard output.
    pub stdout: Vec<u8>,
    /// Captured standard error.
    pub stderr: Vec<u8>,
}

/// Runs a worker to completion.
pub trait WorkerLauncher: Send + Sync {
    /// Start the worker, feed it `request.stdin` and wait for it to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker cannot be started or its input
    /// cannot be delivered.
    fn run(&self, request: WorkerRequest<'_>) -> BockResult<WorkerOutput>;
}

/// Re-executes the current binary under a registered command name.
#[derive(Debug, Clone)]
pub struct ReexecLauncher {
    executable: PathBuf,
}

impl Default for ReexecLauncher {
    fn default() -> Self {
        Self::with_executable("/proc/self/exe")
    }
}

impl ReexecLauncher {
    /// Launch `executable` instead of the running binary.
    pub fn with_executable(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }
}

impl WorkerLauncher for ReexecLauncher {
    fn run(&self, request: WorkerRequest<'_>) -> BockResult<WorkerOutput> {
        use std::os::unix::process::CommandExt;

        let mut child = Command::new(&self.executable)
            .arg0(request.command)
            .args(&request.args)
            .env_clear()
            .envs(request.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BockError::fs("spawn", &self.executable, e))?;
        tracing::debug!(pid = child.id(), command = request.command, "Worker started");

        let Some(mut sink) = child.stdin.take() else {
            return Err(BockError::Internal {
                message: "worker stdin was not captured".to_string(),
            });
        };
        let mut source = request.stdin;

        // a worker that exits early closes the pipe; its exit status is
        // reported instead
        let (fed, output) = thread::scope(|scope| {
            let feeder = scope.spawn(move || -> io::Result<()> {
                match io::copy(&mut source, &mut sink) {
                    Ok(_) => {}
                    Err(e) if e.kind() == ErrorKind::BrokenPipe => {}
                    Err(e) => return Err(e),
                }
                sink.flush().or_else(|e| {
                    if e.kind() == ErrorKind::BrokenPipe {
                        Ok(())
                    } else {
                        Err(e)
                    }
                })
            });
            let output = child.wait_with_output();
            let fed = feeder
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("stdin feeder panicked")));
            (fed, output)
        });

        let output = output?;
        tracing::debug!(status = %output.status, "Worker exited");
        fed?;

        Ok(WorkerOutput {
            status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// Drain `reader` so the writer on the other end never blocks.
pub(crate) fn drain(reader: &mut dyn Read) -> io::Result<u64> {
    io::copy(reader, &mut io::sink())
}
