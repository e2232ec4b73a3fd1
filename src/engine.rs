//! Generation engine boundary
//!
//! The pipeline never renders content itself. A [`GenerationEngine`] turns a
//! [`TransformationSpec`] into the text of its output file; failures are
//! opaque `anyhow` errors that the pipeline wraps as
//! [`SyncError::GenerationFailed`](crate::error::SyncError::GenerationFailed).

use crate::manifest::{DEFAULT_TIMEOUT, TransformationSpec};
use crate::validation::validate_non_empty_string;
use anyhow::{Context, Result, anyhow, bail};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Produces the content for one transformation
pub trait GenerationEngine: Send + Sync {
    fn generate(&self, spec: &TransformationSpec) -> Result<String>;

    fn name(&self) -> &str {
        "engine"
    }
}

impl<F> GenerationEngine for F
where
    F: Fn(&TransformationSpec) -> Result<String> + Send + Sync,
{
    fn generate(&self, spec: &TransformationSpec) -> Result<String> {
        self(spec)
    }

    fn name(&self) -> &str {
        "closure"
    }
}

/// Returned (inside `anyhow`) when an engine exceeds its time budget
#[derive(Debug, Error)]
#[error("engine did not finish within {}s", timeout.as_secs())]
pub struct EngineTimeout {
    pub timeout: Duration,
}

// =============================================================================
// PROCESS ENGINE
// =============================================================================

/// Runs an external command once per transformation.
///
/// The transformation spec is written to stdin as JSON; stdout is the
/// generated content. A non-zero exit is a failure carrying stderr. The
/// process is killed once the transformation's timeout (or the engine
/// default) elapses.
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    program: PathBuf,
    args: Vec<String>,
    default_timeout: Duration,
}

impl ProcessEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Build from a whitespace-separated command line such as `ggen render --stdin`
    pub fn from_command_line(command: &str) -> Result<Self> {
        validate_non_empty_string("engine", command)?;
        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("engine command is empty"))?;
        Ok(Self::new(program).with_args(parts.map(str::to_string)))
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args.extend(args);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    fn spawn(&self, spec: &TransformationSpec) -> Result<Child> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env("GGEN_TRANSFORMATION", &spec.name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program.display()))
    }
}

impl GenerationEngine for ProcessEngine {
    fn generate(&self, spec: &TransformationSpec) -> Result<String> {
        let timeout = spec.effective_timeout(self.default_timeout);
        let payload = serde_json::to_vec(spec).context("failed to serialize transformation")?;
        let mut child = self.spawn(spec)?;

        // every pipe gets its own thread; polling for exit must not stall on a full pipe
        let stdin = child.stdin.take();
        let writer = thread::spawn(move || -> std::io::Result<()> {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&payload)?;
            }
            Ok(())
        });
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait().context("failed to poll engine process")? {
                break status;
            }
            if started.elapsed() >= timeout {
                let _ = child.kill();
                let _ = child.wait();
                // the pipes close with the child, so these return promptly
                let _ = writer.join();
                let _ = stdout.join();
                let _ = stderr.join();
                return Err(EngineTimeout { timeout }.into());
            }
            thread::sleep(POLL_INTERVAL);
        };

        // a child that exits without reading stdin yields EPIPE here; only the
        // exit status matters
        let _ = writer.join();
        let stdout = join_output(stdout)?;
        let stderr = join_output(stderr)?;

        if !status.success() {
            bail!(
                "{} exited with {}: {}",
                self.program.display(),
                status
                    .code()
                    .map_or_else(|| "a signal".to_string(), |c| format!("code {c}")),
                String::from_utf8_lossy(&stderr).trim()
            );
        }

        String::from_utf8(stdout).context("engine output is not valid UTF-8")
    }

    fn name(&self) -> &str {
        "process"
    }
}

type OutputHandle = thread::JoinHandle<std::io::Result<Vec<u8>>>;

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> OutputHandle {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

fn join_output(handle: OutputHandle) -> Result<Vec<u8>> {
    handle
        .join()
        .map_err(|_| anyhow!("engine output reader panicked"))?
        .context("failed to read engine output")
}
