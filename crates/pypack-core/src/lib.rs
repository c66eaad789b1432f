use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("source not readable: {0}")]
    Source(String),
    #[error("scaffold failed: {0}")]
    Scaffold(String),
    #[error("tool not found: {0}")]
    ToolNotFound(String),
    #[error("failed to start {0}")]
    Spawn(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("working directory: {0}")]
    WorkDir(String),
}

pub type Result<T> = std::result::Result<T, Error>;

pub const DEFAULT_MIN_PYTHON: &str = "3.8";

/// Target package index for the upload step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Repository {
    #[default]
    #[serde(rename = "pypi")]
    Pypi,
    #[serde(rename = "testpypi")]
    TestPypi,
}

impl Repository {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pypi => "pypi",
            Self::TestPypi => "testpypi",
        }
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Repository {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pypi" => Ok(Self::Pypi),
            "testpypi" => Ok(Self::TestPypi),
            other => Err(Error::InvalidRequest(format!(
                "unknown repository {other:?} (allowed: pypi, testpypi)"
            ))),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_min_python() -> String {
    DEFAULT_MIN_PYTHON.to_string()
}

/// One packaging run. Immutable once the pipeline starts.
#[derive(Clone, Deserialize)]
pub struct PackageRequest {
    /// Path to a Python file or directory.
    pub source_path: PathBuf,
    pub package_name: String,
    /// Semantic version string, written verbatim into the manifest.
    pub version: String,
    /// Upload credential. Publishing is skipped when absent.
    #[serde(default)]
    pub pypi_token: Option<String>,
    #[serde(default)]
    pub repository: Repository,
    #[serde(default = "default_true")]
    pub run_tests: bool,
    #[serde(default = "default_true")]
    pub lint_code: bool,
    #[serde(default = "default_min_python")]
    pub min_python: String,
}

impl PackageRequest {
    pub fn new(
        source_path: impl Into<PathBuf>,
        package_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            package_name: package_name.into(),
            version: version.into(),
            pypi_token: None,
            repository: Repository::default(),
            run_tests: true,
            lint_code: true,
            min_python: default_min_python(),
        }
    }

    /// Reject requests that cannot be scaffolded safely.
    ///
    /// The package name becomes a directory name inside the working directory, so it must be
    /// a single plain path component.
    pub fn validate(&self) -> Result<()> {
        if self.source_path.as_os_str().is_empty() {
            return Err(Error::InvalidRequest("source_path must be non-empty".into()));
        }
        let name = self.package_name.trim();
        if name.is_empty() {
            return Err(Error::InvalidRequest("package_name must be non-empty".into()));
        }
        if name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(Error::InvalidRequest(format!(
                "package_name {name:?} must be a single path component"
            )));
        }
        let version = self.version.trim();
        if version.is_empty() {
            return Err(Error::InvalidRequest("version must be non-empty".into()));
        }
        // Written into a Python string literal by the scaffold.
        if version.chars().any(|c| c == '"' || c == '\\' || c.is_control()) {
            return Err(Error::InvalidRequest(format!(
                "version {version:?} contains quote, backslash or control characters"
            )));
        }
        Ok(())
    }

    /// The upload credential, if one was supplied. Blank tokens count as absent.
    pub fn upload_token(&self) -> Option<&str> {
        self.pypi_token.as_deref().filter(|t| !t.trim().is_empty())
    }
}

impl fmt::Debug for PackageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageRequest")
            .field("source_path", &self.source_path)
            .field("package_name", &self.package_name)
            .field("version", &self.version)
            .field("pypi_token", &self.pypi_token.as_ref().map(|_| "<redacted>"))
            .field("repository", &self.repository)
            .field("run_tests", &self.run_tests)
            .field("lint_code", &self.lint_code)
            .field("min_python", &self.min_python)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    Success,
    PartialSuccess,
    Error,
}

impl PackageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PartialSuccess => "partial_success",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageResponse {
    pub status: PackageStatus,
    pub build_log: Vec<String>,
    pub dist_files: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub pypi_url: Option<String>,
}

/// Logs and errors produced by one stage, in the order the stage produced them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageResult {
    pub logs: Vec<String>,
    pub errors: Vec<String>,
}

impl StageResult {
    pub fn log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildOutcome {
    pub stage: StageResult,
    pub dist_files: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PublishOutcome {
    pub stage: StageResult,
    pub pypi_url: Option<String>,
}

/// A single external process launch.
#[derive(Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
        }
    }

    pub fn arg(mut self, a: impl Into<String>) -> Self {
        self.args.push(a.into());
        self
    }
}

// Upload invocations carry the credential in argv.
impl fmt::Debug for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut args = Vec::with_capacity(self.args.len());
        let mut hide_next = false;
        for a in &self.args {
            if hide_next {
                args.push("<redacted>");
                hide_next = false;
                continue;
            }
            hide_next = a == "--password";
            args.push(a.as_str());
        }
        f.debug_struct("ToolInvocation")
            .field("program", &self.program)
            .field("args", &args)
            .field("cwd", &self.cwd)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code. Runners report termination by signal `N` as `-N`; `None` means the
    /// platform gave no code at all.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn exit_code_label(&self) -> String {
        match self.status {
            Some(c) => c.to_string(),
            None => "signal".to_string(),
        }
    }
}

/// Starts external processes and waits for them to exit.
///
/// An `Err` means the process never produced an exit status (not found, spawn failure,
/// timeout). A non-zero exit is a successful `Ok` with the code in [`ToolOutput::status`].
pub trait ToolRunner: Send + Sync {
    fn run(&self, inv: &ToolInvocation) -> Result<ToolOutput>;
}

impl<T: ToolRunner + ?Sized> ToolRunner for std::sync::Arc<T> {
    fn run(&self, inv: &ToolInvocation) -> Result<ToolOutput> {
        (**self).run(inv)
    }
}
