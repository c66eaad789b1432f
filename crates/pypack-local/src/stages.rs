//! Quality gate, build, and publish steps.
//!
//! None of these return `Err`: every failure, including a tool that cannot be started,
//! becomes an entry in the stage's error list.

use crate::toolchain::Toolchain;
use pypack_core::{
    BuildOutcome, PackageRequest, PublishOutcome, StageResult, ToolInvocation, ToolRunner,
};
use std::path::{Path, PathBuf};

pub const PYPI_PROJECT_URL: &str = "https://pypi.org/project";
pub const UPLOAD_USERNAME: &str = "__token__";

fn path_arg(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

/// `ruff check <pkg>/src`. A non-zero exit alone is only a warning.
pub fn run_lint(runner: &dyn ToolRunner, tools: &Toolchain, package_dir: &Path) -> StageResult {
    let mut r = StageResult::default();
    let inv = ToolInvocation::new(&tools.ruff, package_dir)
        .arg("check")
        .arg(path_arg(&package_dir.join("src")));
    match runner.run(&inv) {
        Ok(out) if out.success() => r.log("✅ Linting passed"),
        Ok(out) => {
            r.log(format!("⚠️ Linting issues:\n{}", out.stdout));
            if !out.stderr.is_empty() {
                r.error(format!("Linting error: {}", out.stderr));
            }
        }
        Err(e) => {
            tracing::warn!(stage = "lint", error = %e, "linter did not run");
            r.error(format!("Linter error: {e}"));
        }
    }
    r
}

/// `pytest <pkg>/tests -v`, skipped when there is no tests directory.
pub fn run_tests(runner: &dyn ToolRunner, tools: &Toolchain, package_dir: &Path) -> StageResult {
    let mut r = StageResult::default();
    let tests_dir = package_dir.join("tests");
    if !tests_dir.exists() {
        r.log("ℹ️ No tests found - skipping");
        return r;
    }
    let inv = ToolInvocation::new(&tools.pytest, package_dir)
        .arg(path_arg(&tests_dir))
        .arg("-v");
    match runner.run(&inv) {
        Ok(out) => {
            r.log(format!("Test results:\n{}", out.stdout));
            if !out.success() {
                r.error(format!(
                    "Tests failed with exit code {}",
                    out.exit_code_label()
                ));
            }
        }
        Err(e) => {
            tracing::warn!(stage = "test", error = %e, "test runner did not run");
            r.error(format!("Test runner error: {e}"));
        }
    }
    r
}

/// `python -m build`; on success every entry of `<pkg>/dist` is an artifact.
pub fn run_build(runner: &dyn ToolRunner, tools: &Toolchain, package_dir: &Path) -> BuildOutcome {
    let mut out = BuildOutcome::default();
    let inv = ToolInvocation::new(&tools.python, package_dir)
        .arg("-m")
        .arg("build");
    let res = match runner.run(&inv) {
        Ok(res) => res,
        Err(e) => {
            tracing::warn!(stage = "build", error = %e, "build tool did not run");
            out.stage.error(format!("Build error: {e}"));
            return out;
        }
    };

    out.stage.log(format!("Build output:\n{}", res.stdout));
    if !res.success() {
        out.stage.error(format!(
            "Build failed with code {}: {}",
            res.exit_code_label(),
            res.stderr
        ));
        return out;
    }

    let dist = package_dir.join("dist");
    if !dist.exists() {
        return out;
    }
    match list_dist(&dist) {
        Ok(files) => {
            let names: Vec<String> = files
                .iter()
                .filter_map(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .collect();
            out.stage
                .log(format!("📦 Built packages: {}", names.join(", ")));
            out.dist_files = files.iter().map(|p| path_arg(p)).collect();
        }
        Err(e) => out.stage.error(format!("Build error: {e}")),
    }
    out
}

fn list_dist(dist: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = std::fs::read_dir(dist)?
        .map(|e| e.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

pub fn published_url(req: &PackageRequest) -> String {
    format!(
        "{PYPI_PROJECT_URL}/{}/{}/",
        req.package_name.trim(),
        req.version
    )
}

/// `twine upload` of `<pkg>/dist/*` (the upload tool expands the glob).
pub fn run_publish(
    runner: &dyn ToolRunner,
    tools: &Toolchain,
    package_dir: &Path,
    req: &PackageRequest,
) -> PublishOutcome {
    let mut out = PublishOutcome::default();
    let Some(token) = req.upload_token() else {
        out.stage.error("Upload error: no upload credential supplied");
        return out;
    };
    let inv = ToolInvocation::new(&tools.twine, package_dir)
        .arg("upload")
        .arg("--repository")
        .arg(req.repository.as_str())
        .arg("--username")
        .arg(UPLOAD_USERNAME)
        .arg("--password")
        .arg(token)
        .arg(path_arg(&package_dir.join("dist").join("*")));
    match runner.run(&inv) {
        Ok(res) => {
            out.stage.log(format!("Upload output:\n{}", res.stdout));
            if res.success() {
                out.pypi_url = Some(published_url(req));
            } else {
                out.stage.error(format!("Upload failed: {}", res.stderr));
            }
        }
        Err(e) => {
            tracing::warn!(stage = "publish", error = %e, "upload tool did not run");
            out.stage.error(format!("Upload error: {e}"));
        }
    }
    out
}
