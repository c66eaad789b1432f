//! Blocking shellouts to the packaging CLIs.
//!
//! Goals:
//! - **Verbatim**: stdout/stderr are captured whole and handed back untouched.
//! - **Opt-in bounds**: no timeout unless `PYPACK_TOOL_TIMEOUT_MS` is set.
//! - **No secrets**: argv is never logged (uploads carry the token there).

use pypack_core::{Error, Result, ToolInvocation, ToolOutput, ToolRunner};
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn env_or(key: &str, default: &str) -> String {
    env(key).unwrap_or_else(|| default.to_string())
}

/// Unset (or unparsable) means "wait forever".
pub fn optional_timeout_from_env_ms(key: &str) -> Option<Duration> {
    env(key)
        .and_then(|s| s.parse::<u64>().ok())
        .map(|ms| Duration::from_millis(ms.clamp(50, 3_600_000)))
}

pub fn which(bin: &str) -> Option<PathBuf> {
    let as_path = std::path::Path::new(bin);
    if as_path.components().count() > 1 {
        return as_path.is_file().then(|| as_path.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        let cand = dir.join(bin);
        if cand.is_file() {
            return Some(cand);
        }
        if cfg!(windows) {
            let cand = dir.join(format!("{bin}.exe"));
            if cand.is_file() {
                return Some(cand);
            }
        }
    }
    None
}

pub fn has(bin: &str) -> bool {
    which(bin).is_some()
}

/// Runs tools on the host with `std::process`.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    timeout: Option<Duration>,
}

impl SystemRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

fn drain<R: Read + Send + 'static>(src: Option<R>) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut s) = src {
            // A read error leaves whatever arrived before it.
            let _ = s.read_to_end(&mut buf);
        }
        buf
    })
}

/// Exit code, or `-N` for a process terminated by signal `N`.
fn exit_code(status: ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return Some(-sig);
        }
    }
    status.code()
}

fn wait_bounded(child: &mut Child, program: &str, timeout: Duration) -> Result<Option<i32>> {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(exit_code(status)),
            Ok(None) => {}
            Err(e) => return Err(Error::Spawn(format!("{program}: wait failed: {e}"))),
        }
        if start.elapsed() > timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Timeout(format!(
                "{program} after {} ms",
                timeout.as_millis()
            )));
        }
        std::thread::sleep(Duration::from_millis(25));
    }
}

impl ToolRunner for SystemRunner {
    fn run(&self, inv: &ToolInvocation) -> Result<ToolOutput> {
        let mut cmd = Command::new(&inv.program);
        cmd.args(&inv.args)
            .current_dir(&inv.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let t0 = Instant::now();
        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ToolNotFound(inv.program.clone())
            } else {
                Error::Spawn(format!("{}: {e}", inv.program))
            }
        })?;

        // Drain both pipes concurrently; a tool that fills one pipe while we block on the
        // other would otherwise never exit.
        let out = drain(child.stdout.take());
        let err = drain(child.stderr.take());

        let status = match self.timeout {
            Some(t) => wait_bounded(&mut child, &inv.program, t)?,
            None => exit_code(
                child
                    .wait()
                    .map_err(|e| Error::Spawn(format!("{}: wait failed: {e}", inv.program)))?,
            ),
        };

        let stdout = out.join().unwrap_or_default();
        let stderr = err.join().unwrap_or_default();
        tracing::debug!(
            program = %inv.program,
            cwd = %inv.cwd.display(),
            status = ?status,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "tool exited"
        );
        Ok(ToolOutput {
            status,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}
