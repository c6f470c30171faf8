//! External simulator invocation and output parsing

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;

use crate::error::{HarnessError, Result};
use crate::staging::{StagedInput, StagingArea};
use crate::sweep::Backend;

/// Bumped whenever the accepted output format changes
pub const PARSER_VERSION: u32 = 1;

/// Marker printed by the reference testbench
pub const DEFAULT_MARKER: &str = "Predicted digit on LEDR[3:0] is:";

/// How often a running tool is polled for exit
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Output kept in error messages
const STDERR_TAIL: usize = 2000;

/// Captured output of a finished tool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// One external program with a wall-clock limit
#[derive(Debug, Clone)]
pub struct ToolCommand {
    argv: Vec<String>,
    work_dir: PathBuf,
    timeout: Duration,
    envs: Vec<(String, String)>,
}

/// Kills and reaps the child if it is still running when dropped
struct ChildGuard(Child);

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Ok(None) = self.0.try_wait() {
            let _ = self.0.kill();
            let _ = self.0.wait();
        }
    }
}

/// Read a pipe to EOF on its own thread; the text arrives on the channel
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    rx
}

fn tail(s: &str) -> String {
    let start = s.len().saturating_sub(STDERR_TAIL);
    let start = (start..=s.len())
        .find(|&i| s.is_char_boundary(i))
        .unwrap_or(s.len());
    s[start..].trim_end().to_string()
}

impl ToolCommand {
    pub fn new(argv: Vec<String>, work_dir: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        if argv.is_empty() {
            return Err(HarnessError::Config("empty command".to_string()));
        }
        Ok(Self {
            argv,
            work_dir: work_dir.into(),
            timeout,
            envs: Vec::new(),
        })
    }

    /// Set an environment variable for the child
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The command line, for messages
    pub fn display(&self) -> String {
        self.argv.join(" ")
    }

    /// Run to completion, or kill the child once the timeout passes.
    ///
    /// A non-zero exit is `ToolFailed`; output is only returned on success.
    pub fn run(&self) -> Result<ToolOutput> {
        let command = self.display();
        let mut cmd = Command::new(&self.argv[0]);
        cmd.args(&self.argv[1..])
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (k, v) in &self.envs {
            cmd.env(k, v);
        }

        let mut child = cmd.spawn().map_err(|e| HarnessError::ToolFailed {
            command: command.clone(),
            status: None,
            stderr: e.to_string(),
        })?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let mut guard = ChildGuard(child);

        let deadline = Instant::now() + self.timeout;
        let timed_out = |command: String| {
            tracing::warn!(command = %command, timeout = ?self.timeout, "killed after timeout");
            HarnessError::Timeout {
                command,
                timeout: self.timeout,
            }
        };

        let status = loop {
            if let Some(status) = guard.0.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = guard.0.kill();
                let _ = guard.0.wait();
                // Reader threads are left detached: a grandchild may still hold the pipes
                return Err(timed_out(command));
            }
            thread::sleep(POLL_INTERVAL);
        };

        // The child has exited, but a background process it started can keep
        // the pipes open. Collecting output shares the same deadline.
        let collect = |rx: &Receiver<String>| {
            rx.recv_timeout(deadline.saturating_duration_since(Instant::now()))
        };
        let output = match (collect(&stdout), collect(&stderr)) {
            (Ok(stdout), Ok(stderr)) => ToolOutput { stdout, stderr },
            (Err(RecvTimeoutError::Timeout), _) | (_, Err(RecvTimeoutError::Timeout)) => {
                return Err(timed_out(command));
            }
            (out, err) => ToolOutput {
                stdout: out.unwrap_or_default(),
                stderr: err.unwrap_or_default(),
            },
        };
        if !status.success() {
            return Err(HarnessError::ToolFailed {
                command,
                status: status.code(),
                stderr: tail(&output.stderr),
            });
        }
        Ok(output)
    }
}

/// Extracts the predicted class from simulator output
#[derive(Debug, Clone)]
pub struct PredictionParser {
    marker: String,
    pattern: Regex,
}

impl PredictionParser {
    /// Match `marker` literally, followed by a decimal class
    pub fn new(marker: &str) -> Result<Self> {
        if marker.trim().is_empty() {
            return Err(HarnessError::Config("empty prediction marker".to_string()));
        }
        let pattern = Regex::new(&format!(r"{}\s*(\d+)", regex::escape(marker)))
            .map_err(|e| HarnessError::Config(format!("bad prediction marker: {}", e)))?;
        Ok(Self {
            marker: marker.to_string(),
            pattern,
        })
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// The class announced in `output`.
    ///
    /// The marker may appear more than once (e.g. progress lines), but every
    /// occurrence must agree.
    pub fn parse(&self, output: &str) -> Result<u8> {
        let fail = |reason: String| HarnessError::ParseFailure {
            reason,
            output: output.to_string(),
        };

        let mut found: Option<u8> = None;
        for caps in self.pattern.captures_iter(output) {
            let digits = &caps[1];
            let value: u8 = digits
                .parse()
                .map_err(|_| fail(format!("class {} out of range", digits)))?;
            match found {
                Some(prev) if prev != value => {
                    return Err(fail(format!("conflicting predictions {} and {}", prev, value)));
                }
                _ => found = Some(value),
            }
        }
        found.ok_or_else(|| fail(format!("marker {:?} not found", self.marker)))
    }
}

/// Runs the simulator once per item against a staged input file
pub struct SimulatorBackend {
    staging: StagingArea,
    simulator: ToolCommand,
    build: Option<ToolCommand>,
    parser: PredictionParser,
}

impl SimulatorBackend {
    pub fn new(
        staging: StagingArea,
        simulator: ToolCommand,
        build: Option<ToolCommand>,
        parser: PredictionParser,
    ) -> Self {
        Self {
            staging,
            simulator,
            build,
            parser,
        }
    }
}

impl Backend for SimulatorBackend {
    fn name(&self) -> &str {
        "simulator"
    }

    fn prepare(&mut self) -> Result<()> {
        if let Some(build) = &self.build {
            tracing::info!(command = %build.display(), "building simulation model");
            build.run()?;
        }
        Ok(())
    }

    fn predict(&mut self, input: &StagedInput) -> Result<u8> {
        self.staging.write(input)?;
        let run = self
            .simulator
            .clone()
            .env("MIFQ_IMAGE_INDEX", input.index.to_string())
            .run();
        // Restore before looking at the outcome so no item sees a stale input
        self.staging.restore()?;

        let output = run?;
        self.parser.parse(&output.stdout).inspect_err(|_| {
            tracing::warn!(
                index = input.index,
                parser_version = PARSER_VERSION,
                output = %output.stdout,
                "unparseable simulator output"
            );
        })
    }
}
