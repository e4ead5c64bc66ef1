//! Running external programs (readability, block converter, pandoc).
//!
//! Every helper process is started with `kill_on_drop`, so a timeout that
//! drops the child future also terminates the process. A non-zero exit is
//! always an error carrying the program's stderr.

use crate::error::ArchiveError;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// A fully described invocation.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    /// Program followed by its leading arguments.
    pub argv: &'a [String],
    /// Arguments appended after `argv`.
    pub extra_args: Vec<String>,
    /// Bytes written to stdin, which is then closed.
    pub stdin: Option<&'a [u8]>,
    /// Working directory.
    pub cwd: Option<&'a Path>,
    /// Hard timeout. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl<'a> Invocation<'a> {
    pub fn new(argv: &'a [String]) -> Self {
        Self {
            argv,
            extra_args: Vec::new(),
            stdin: None,
            cwd: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    pub fn stdin(mut self, bytes: &'a [u8]) -> Self {
        self.stdin = Some(bytes);
        self
    }

    pub fn cwd(mut self, dir: &'a Path) -> Self {
        self.cwd = Some(dir);
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn program(&self) -> String {
        self.argv.first().cloned().unwrap_or_default()
    }
}

/// Run the invocation to completion and return its stdout.
pub async fn run(inv: Invocation<'_>) -> Result<Vec<u8>, ArchiveError> {
    let program = inv.program();
    if program.is_empty() {
        return Err(ArchiveError::InvalidConfig("empty command".into()));
    }

    let mut cmd = Command::new(&program);
    cmd.args(&inv.argv[1..])
        .args(&inv.extra_args)
        .stdin(if inv.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = inv.cwd {
        cmd.current_dir(dir);
    }

    debug!("Running {} {:?}", program, inv.extra_args);

    let mut child = cmd.spawn().map_err(|e| ArchiveError::SubprocessSpawn {
        program: program.clone(),
        source: e,
    })?;

    // Feed stdin from a separate task so a child that writes before it has
    // read everything cannot fill the stdout pipe and stall us.
    if let (Some(bytes), Some(mut stdin)) = (inv.stdin, child.stdin.take()) {
        let bytes = bytes.to_vec();
        let name = program.clone();
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&bytes).await {
                debug!("{}: stdin write ended early: {}", name, e);
            }
            // Dropping closes the pipe so the child sees EOF.
        });
    }

    let output = match inv.timeout {
        Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| ArchiveError::SubprocessTimeout {
                program: program.clone(),
                secs: limit.as_secs(),
            })?,
        None => child.wait_with_output().await,
    }
    .map_err(|e| ArchiveError::SubprocessFailed {
        program: program.clone(),
        status: "wait failed".into(),
        stderr: e.to_string(),
    })?;

    if !output.status.success() {
        return Err(ArchiveError::SubprocessFailed {
            program,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output.stdout)
}
