// This module is the only place asmview starts child processes. Everything else asks a
// ProcessRunner, and a deployment may supply its own runner to route tools through a
// sandbox. The local runner spawns with kill_on_drop so a cancelled job takes
// its children with it, feeds stdin when asked, and reads both pipes to EOF while keeping only
// the configured number of bytes. A nonzero exit is data for the caller; only a tool that
// cannot be started, or that outlives its wall clock, becomes an error.

//! Process execution.
//!
//! [`ProcessRunner`] is the seam between asmview and whatever actually
//! launches tools (a sandbox, a remote worker, or plain child processes).
//! [`TokioProcessRunner`] is the local implementation: it enforces a wall
//! clock and caps the captured output of each stream.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::core::{DriverError, DriverResult, ExecResult, Stage};

const TRUNCATION_MARKER: &str = "\n[Truncated]";

/// Options for one tool invocation.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Stage reported if the tool cannot be run.
    pub stage: Stage,
    /// Byte cap for each of stdout and stderr.
    pub max_output: usize,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
    /// Text written to the tool's stdin.
    pub input: Option<String>,
}

impl ExecOptions {
    pub fn new(stage: Stage, max_output: usize) -> Self {
        Self {
            stage,
            max_output,
            cwd: None,
            env: BTreeMap::new(),
            timeout: None,
            input: None,
        }
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env = env.clone();
        self
    }

    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    pub fn input(mut self, text: impl Into<String>) -> Self {
        self.input = Some(text.into());
        self
    }
}

/// Launches external tools on behalf of a job.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `program` to completion. A nonzero exit is reported through
    /// [`ExecResult::code`], not as an error.
    async fn exec(
        &self,
        program: &Path,
        args: &[String],
        options: ExecOptions,
    ) -> DriverResult<ExecResult>;
}

/// Runs tools as local child processes.
#[derive(Debug, Default, Clone)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn exec(
        &self,
        program: &Path,
        args: &[String],
        options: ExecOptions,
    ) -> DriverResult<ExecResult> {
        let start = Instant::now();
        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&options.env)
            .stdin(if options.input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &options.cwd {
            cmd.current_dir(dir);
        }

        log::trace!("exec {} {:?}", program.display(), args);
        let mut child = cmd.spawn().map_err(|source| DriverError::Spawn {
            stage: options.stage,
            tool: program.to_path_buf(),
            source,
        })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let input = options.input.clone();
        let max = options.max_output;

        let feed = async move {
            if let (Some(mut pipe), Some(text)) = (stdin, input) {
                // The tool may exit without reading everything; that is its business.
                let _ = pipe.write_all(text.as_bytes()).await;
            }
        };
        let run = async {
            let ((), out, err, status) = tokio::join!(
                feed,
                read_capped(stdout, max),
                read_capped(stderr, max),
                child.wait()
            );
            Ok::<_, std::io::Error>((out?, err?, status?))
        };

        let outcome = match options.timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    log::warn!("{} timed out after {:?}", program.display(), limit);
                    return Err(DriverError::Timeout {
                        stage: options.stage,
                        tool: program.to_path_buf(),
                        limit_ms: limit.as_millis() as u64,
                    });
                }
            },
            None => run.await,
        };
        let ((stdout, out_truncated), (stderr, err_truncated), status) =
            outcome.map_err(|source| DriverError::Spawn {
                stage: options.stage,
                tool: program.to_path_buf(),
                source,
            })?;

        Ok(ExecResult {
            code: status.code().unwrap_or(-1),
            stdout: into_text(stdout, out_truncated),
            stderr: into_text(stderr, err_truncated),
            exec_time_ms: start.elapsed().as_millis() as u64,
            dir_path: options.cwd,
            truncated: out_truncated || err_truncated,
        })
    }
}

/// Read a pipe to EOF, keeping at most `max` bytes.
async fn read_capped<R: AsyncRead + Unpin>(
    pipe: Option<R>,
    max: usize,
) -> std::io::Result<(Vec<u8>, bool)> {
    let Some(mut pipe) = pipe else {
        return Ok((Vec::new(), false));
    };
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 8192];
    loop {
        let n = pipe.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let room = max.saturating_sub(kept.len());
        kept.extend_from_slice(&buf[..n.min(room)]);
        if n > room {
            truncated = true;
        }
    }
    Ok((kept, truncated))
}

fn into_text(bytes: Vec<u8>, truncated: bool) -> String {
    let mut text = String::from_utf8_lossy(&bytes).into_owned();
    if truncated {
        text.push_str(TRUNCATION_MARKER);
    }
    text
}

#[cfg(test)]
pub(crate) mod testing {
    //! A [`ProcessRunner`] that answers from a closure and records calls.

    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    pub struct RecordedCall {
        pub program: PathBuf,
        pub args: Vec<String>,
        pub options: ExecOptions,
    }

    type Responder = dyn Fn(&Path, &[String], &ExecOptions) -> DriverResult<ExecResult> + Send + Sync;

    #[derive(Clone)]
    pub struct RecordingRunner {
        responder: Arc<Responder>,
        calls: Arc<Mutex<Vec<RecordedCall>>>,
    }

    impl RecordingRunner {
        pub fn new(
            responder: impl Fn(&Path, &[String], &ExecOptions) -> DriverResult<ExecResult>
                + Send
                + Sync
                + 'static,
        ) -> Self {
            Self {
                responder: Arc::new(responder),
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// Every tool succeeds and prints `stdout`.
        pub fn with_stdout(stdout: &str) -> Self {
            let stdout = stdout.to_string();
            Self::new(move |_, _, _| {
                Ok(ExecResult {
                    stdout: stdout.clone(),
                    ..ExecResult::default()
                })
            })
        }

        pub fn calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProcessRunner for RecordingRunner {
        async fn exec(
            &self,
            program: &Path,
            args: &[String],
            options: ExecOptions,
        ) -> DriverResult<ExecResult> {
            let result = (self.responder)(program, args, &options);
            self.calls.lock().unwrap().push(RecordedCall {
                program: program.to_path_buf(),
                args: args.to_vec(),
                options,
            });
            result
        }
    }
}
