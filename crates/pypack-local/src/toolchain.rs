//! Which binaries the pipeline launches, and where it puts its working directory.

use crate::shellout::{env, env_or, has, optional_timeout_from_env_ms};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toolchain {
    pub ruff: String,
    pub pytest: String,
    pub python: String,
    pub twine: String,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            ruff: "ruff".into(),
            pytest: "pytest".into(),
            python: "python".into(),
            twine: "twine".into(),
        }
    }
}

impl Toolchain {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            ruff: env_or("PYPACK_RUFF", &d.ruff),
            pytest: env_or("PYPACK_PYTEST", &d.pytest),
            python: env_or("PYPACK_PYTHON", &d.python),
            twine: env_or("PYPACK_TWINE", &d.twine),
        }
    }

    /// `(role, binary, resolvable on PATH)` for each tool, in pipeline order.
    pub fn availability(&self) -> Vec<(&'static str, &str, bool)> {
        [
            ("lint", self.ruff.as_str()),
            ("test", self.pytest.as_str()),
            ("build", self.python.as_str()),
            ("upload", self.twine.as_str()),
        ]
        .into_iter()
        .map(|(role, bin)| (role, bin, has(bin)))
        .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineConfig {
    pub toolchain: Toolchain,
    /// Parent for per-run working directories (system temp dir when unset).
    pub work_root: Option<PathBuf>,
    /// Per-tool timeout; `None` waits indefinitely.
    #[serde(rename = "tool_timeout_ms", serialize_with = "ser_timeout_ms")]
    pub tool_timeout: Option<Duration>,
}

fn ser_timeout_ms<S: serde::Serializer>(
    t: &Option<Duration>,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    match t {
        Some(d) => s.serialize_some(&(d.as_millis() as u64)),
        None => s.serialize_none(),
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self {
            toolchain: Toolchain::from_env(),
            work_root: env("PYPACK_WORK_DIR").map(PathBuf::from),
            tool_timeout: optional_timeout_from_env_ms("PYPACK_TOOL_TIMEOUT_MS"),
        }
    }
}
