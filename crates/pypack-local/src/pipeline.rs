use crate::scaffold::setup_package_structure;
use crate::shellout::SystemRunner;
use crate::stages::{run_build, run_lint, run_publish, run_tests};
use crate::toolchain::PipelineConfig;
use pypack_core::{
    Error, PackageRequest, PackageResponse, PackageStatus, Result, StageResult, ToolRunner,
};
use std::path::Path;
use std::time::Instant;

pub const BANNER_SCAFFOLD: &str = "📦 Creating package structure...";
pub const BANNER_LINT: &str = "🔍 Running linter...";
pub const BANNER_TEST: &str = "🧪 Running tests...";
pub const BANNER_BUILD: &str = "🏗️ Building package...";
pub const BANNER_PUBLISH: &str = "🚀 Uploading to PyPI...";

/// Scaffold -> lint -> test -> build -> publish, inside a private working directory.
#[derive(Debug, Clone)]
pub struct Pipeline<R = SystemRunner> {
    config: PipelineConfig,
    runner: R,
}

impl Pipeline<SystemRunner> {
    pub fn from_env() -> Self {
        Self::with_config(PipelineConfig::from_env())
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        let runner = SystemRunner::new(config.tool_timeout);
        Self { config, runner }
    }
}

#[derive(Default)]
struct RunLog {
    build_log: Vec<String>,
    errors: Vec<String>,
    dist_files: Vec<String>,
    pypi_url: Option<String>,
}

impl RunLog {
    fn absorb(&mut self, stage: StageResult) {
        self.build_log.extend(stage.logs);
        self.errors.extend(stage.errors);
    }

    fn finish(self, status: PackageStatus) -> PackageResponse {
        PackageResponse {
            status,
            build_log: self.build_log,
            dist_files: self.dist_files,
            errors: self.errors,
            pypi_url: self.pypi_url,
        }
    }

    fn fatal(mut self, e: &Error) -> PackageResponse {
        self.errors = vec![format!("Critical error: {e}")];
        self.dist_files.clear();
        self.pypi_url = None;
        self.finish(PackageStatus::Error)
    }
}

impl<R: ToolRunner> Pipeline<R> {
    pub fn new(config: PipelineConfig, runner: R) -> Self {
        Self { config, runner }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn work_dir(&self) -> Result<tempfile::TempDir> {
        let mut b = tempfile::Builder::new();
        b.prefix("pypack-");
        let dir = match &self.config.work_root {
            Some(root) => b.tempdir_in(root),
            None => b.tempdir(),
        };
        dir.map_err(|e| Error::WorkDir(e.to_string()))
    }

    /// Run every stage for `req`. Never fails: problems are reported in the response.
    pub fn create_package(&self, req: &PackageRequest) -> PackageResponse {
        let _span = tracing::info_span!(
            "create_package",
            package = %req.package_name,
            version = %req.version,
            repository = %req.repository,
        )
        .entered();
        let t0 = Instant::now();
        let mut run = RunLog::default();

        let work = match self.work_dir() {
            Ok(w) => w,
            Err(e) => {
                tracing::error!(error = %e, "could not create working directory");
                return run.fatal(&e);
            }
        };

        let outcome = self.run_stages(work.path(), req, &mut run);

        let work_path = work.path().to_path_buf();
        if let Err(e) = work.close() {
            tracing::warn!(
                path = %work_path.display(),
                error = %e,
                "failed to remove working directory"
            );
        }

        let resp = match outcome {
            Ok(()) if run.errors.is_empty() => run.finish(PackageStatus::Success),
            Ok(()) => run.finish(PackageStatus::PartialSuccess),
            Err(e) => {
                tracing::error!(error = %e, "scaffold failed");
                run.fatal(&e)
            }
        };
        tracing::info!(
            status = resp.status.as_str(),
            errors = resp.errors.len(),
            artifacts = resp.dist_files.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "pipeline finished"
        );
        resp
    }

    fn run_stages(&self, root: &Path, req: &PackageRequest, run: &mut RunLog) -> Result<()> {
        let tools = &self.config.toolchain;

        run.build_log.push(BANNER_SCAFFOLD.into());
        let package_dir = setup_package_structure(root, req)?;

        if req.lint_code {
            run.build_log.push(BANNER_LINT.into());
            let t = Instant::now();
            let r = run_lint(&self.runner, tools, &package_dir);
            tracing::info!(
                stage = "lint",
                ok = r.is_ok(),
                elapsed_ms = t.elapsed().as_millis() as u64,
                "stage finished"
            );
            run.absorb(r);
        }

        if req.run_tests {
            run.build_log.push(BANNER_TEST.into());
            let t = Instant::now();
            let r = run_tests(&self.runner, tools, &package_dir);
            tracing::info!(
                stage = "test",
                ok = r.is_ok(),
                elapsed_ms = t.elapsed().as_millis() as u64,
                "stage finished"
            );
            run.absorb(r);
        }

        run.build_log.push(BANNER_BUILD.into());
        let t = Instant::now();
        let b = run_build(&self.runner, tools, &package_dir);
        tracing::info!(
            stage = "build",
            ok = b.stage.is_ok(),
            artifacts = b.dist_files.len(),
            elapsed_ms = t.elapsed().as_millis() as u64,
            "stage finished"
        );
        run.dist_files = b.dist_files;
        run.absorb(b.stage);

        // Gated on everything recorded so far, not only on the build.
        if req.upload_token().is_some() && run.errors.is_empty() {
            run.build_log.push(BANNER_PUBLISH.into());
            let t = Instant::now();
            let p = run_publish(&self.runner, tools, &package_dir, req);
            tracing::info!(
                stage = "publish",
                ok = p.stage.is_ok(),
                elapsed_ms = t.elapsed().as_millis() as u64,
                "stage finished"
            );
            run.pypi_url = p.pypi_url;
            run.absorb(p.stage);
        } else if req.upload_token().is_some() {
            tracing::info!(stage = "publish", "skipped: earlier stages recorded errors");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Reply, ScriptedRunner};
    use std::sync::Arc;

    struct Fixture {
        _input: tempfile::TempDir,
        work_root: tempfile::TempDir,
        req: PackageRequest,
    }

    fn fixture() -> Fixture {
        let input = tempfile::tempdir().unwrap();
        let src = input.path().join("lib.py");
        std::fs::write(&src, "def f():\n    return 42\n").unwrap();
        Fixture {
            req: PackageRequest::new(&src, "pkg", "1.0.0"),
            _input: input,
            work_root: tempfile::tempdir().unwrap(),
        }
    }

    fn pipeline(fx: &Fixture, runner: ScriptedRunner) -> Pipeline<Arc<ScriptedRunner>> {
        let config = PipelineConfig {
            work_root: Some(fx.work_root.path().to_path_buf()),
            ..Default::default()
        };
        Pipeline::new(config, Arc::new(runner))
    }

    fn building() -> Reply {
        Reply::ok("ok\n").creating(&["dist/pkg-1.0.0.tar.gz", "dist/pkg-1.0.0-py3-none-any.whl"])
    }

    fn work_root_is_empty(fx: &Fixture) -> bool {
        std::fs::read_dir(fx.work_root.path()).unwrap().next().is_none()
    }

    #[test]
    fn clean_run_without_token_succeeds_and_skips_upload() {
        let fx = fixture();
        let p = pipeline(&fx, ScriptedRunner::new().on("python", building()));

        let resp = p.create_package(&fx.req);

        assert_eq!(resp.status, PackageStatus::Success);
        assert!(resp.errors.is_empty());
        assert!(resp.pypi_url.is_none());
        assert_eq!(
            resp.build_log,
            [
                BANNER_SCAFFOLD,
                BANNER_LINT,
                "✅ Linting passed",
                BANNER_TEST,
                "ℹ️ No tests found - skipping",
                BANNER_BUILD,
                "Build output:\nok\n",
                "📦 Built packages: pkg-1.0.0-py3-none-any.whl, pkg-1.0.0.tar.gz",
            ]
        );
        let names: Vec<_> = resp
            .dist_files
            .iter()
            .map(|f| Path::new(f).file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["pkg-1.0.0-py3-none-any.whl", "pkg-1.0.0.tar.gz"]);
        assert_eq!(p.runner().programs(), ["ruff", "python"]);
        assert!(work_root_is_empty(&fx));
    }

    #[test]
    fn token_and_clean_run_publishes() {
        let mut fx = fixture();
        fx.req.pypi_token = Some("pypi-xyz".into());
        let p = pipeline(
            &fx,
            ScriptedRunner::new()
                .on("python", building())
                .on("twine", Reply::ok("done\n")),
        );

        let resp = p.create_package(&fx.req);

        assert_eq!(resp.status, PackageStatus::Success);
        assert_eq!(resp.pypi_url.as_deref(), Some("https://pypi.org/project/pkg/1.0.0/"));
        assert_eq!(&resp.build_log[resp.build_log.len() - 2..], [BANNER_PUBLISH, "Upload output:\ndone\n"]);
        assert_eq!(p.runner().programs(), ["ruff", "python", "twine"]);
    }

    #[test]
    fn blank_token_never_reaches_the_uploader() {
        let mut fx = fixture();
        fx.req.pypi_token = Some(String::new());
        let p = pipeline(
            &fx,
            ScriptedRunner::new()
                .on("python", building())
                .on("twine", Reply::ok("done\n")),
        );

        let resp = p.create_package(&fx.req);

        assert_eq!(resp.status, PackageStatus::Success);
        assert!(resp.pypi_url.is_none());
        assert!(!resp.build_log.iter().any(|l| l == BANNER_PUBLISH));
        assert_eq!(p.runner().programs(), ["ruff", "python"]);
    }

    #[test]
    fn build_failure_blocks_publish() {
        let mut fx = fixture();
        fx.req.pypi_token = Some("pypi-xyz".into());
        let p = pipeline(
            &fx,
            ScriptedRunner::new()
                .on("python", Reply::exit(1, "", "backend exploded"))
                .on("twine", Reply::ok("should not run")),
        );

        let resp = p.create_package(&fx.req);

        assert_eq!(resp.status, PackageStatus::PartialSuccess);
        assert_eq!(resp.errors, ["Build failed with code 1: backend exploded"]);
        assert!(resp.dist_files.is_empty());
        assert!(resp.pypi_url.is_none());
        assert!(!p.runner().programs().contains(&"twine".to_string()));
        assert!(!resp.build_log.iter().any(|l| l == BANNER_PUBLISH));
        assert!(work_root_is_empty(&fx));
    }

    #[test]
    fn quality_gate_errors_continue_to_build_but_block_publish() {
        let mut fx = fixture();
        fx.req.pypi_token = Some("pypi-xyz".into());
        let p = pipeline(
            &fx,
            ScriptedRunner::new()
                .on("ruff", Reply::exit(1, "E999\n", "ruff crashed"))
                .on("python", building()),
        );

        let resp = p.create_package(&fx.req);

        assert_eq!(resp.status, PackageStatus::PartialSuccess);
        assert_eq!(resp.errors, ["Linting error: ruff crashed"]);
        assert_eq!(resp.dist_files.len(), 2);
        assert_eq!(p.runner().programs(), ["ruff", "python"]);
    }

    #[test]
    fn lint_warnings_alone_do_not_block_publish() {
        let mut fx = fixture();
        fx.req.pypi_token = Some("pypi-xyz".into());
        let p = pipeline(
            &fx,
            ScriptedRunner::new()
                .on("ruff", Reply::exit(1, "F401 unused import\n", ""))
                .on("python", building()),
        );

        let resp = p.create_package(&fx.req);

        assert_eq!(resp.status, PackageStatus::Success);
        assert!(resp.build_log.contains(&"⚠️ Linting issues:\nF401 unused import\n".to_string()));
        assert_eq!(p.runner().programs(), ["ruff", "python", "twine"]);
    }

    #[test]
    fn upload_failure_is_partial_success() {
        let mut fx = fixture();
        fx.req.pypi_token = Some("pypi-xyz".into());
        let p = pipeline(
            &fx,
            ScriptedRunner::new()
                .on("python", building())
                .on("twine", Reply::exit(1, "", "HTTPError: 400")),
        );

        let resp = p.create_package(&fx.req);

        assert_eq!(resp.status, PackageStatus::PartialSuccess);
        assert_eq!(resp.errors, ["Upload failed: HTTPError: 400"]);
        assert!(resp.pypi_url.is_none());
        assert_eq!(resp.dist_files.len(), 2);
    }

    #[test]
    fn disabled_gates_are_not_run() {
        let mut fx = fixture();
        fx.req.lint_code = false;
        fx.req.run_tests = false;
        let p = pipeline(&fx, ScriptedRunner::new());

        let resp = p.create_package(&fx.req);

        assert_eq!(resp.status, PackageStatus::Success);
        assert_eq!(resp.build_log, [BANNER_SCAFFOLD, BANNER_BUILD, "Build output:\n"]);
        assert_eq!(p.runner().programs(), ["python"]);
    }

    #[test]
    fn scaffold_failure_is_fatal_and_cleans_up() {
        let mut fx = fixture();
        fx.req.source_path = fx.work_root.path().join("missing.py");
        fx.req.pypi_token = Some("pypi-xyz".into());
        let p = pipeline(&fx, ScriptedRunner::new());

        let resp = p.create_package(&fx.req);

        assert_eq!(resp.status, PackageStatus::Error);
        assert_eq!(resp.errors.len(), 1);
        assert!(resp.errors[0].starts_with("Critical error: "), "{}", resp.errors[0]);
        assert!(resp.dist_files.is_empty());
        assert!(resp.pypi_url.is_none());
        assert_eq!(resp.build_log, [BANNER_SCAFFOLD]);
        assert!(p.runner().calls().is_empty());
        assert!(work_root_is_empty(&fx));
    }

    #[test]
    fn invalid_request_is_fatal() {
        let mut fx = fixture();
        fx.req.package_name = "../escape".into();
        let p = pipeline(&fx, ScriptedRunner::new());

        let resp = p.create_package(&fx.req);

        assert_eq!(resp.status, PackageStatus::Error);
        assert_eq!(resp.errors.len(), 1);
        assert!(resp.errors[0].contains("invalid request"));
        assert!(work_root_is_empty(&fx));
    }

    #[test]
    fn missing_work_root_is_fatal() {
        let fx = fixture();
        let config = PipelineConfig {
            work_root: Some(fx.work_root.path().join("does/not/exist")),
            ..Default::default()
        };
        let p = Pipeline::new(config, ScriptedRunner::new());

        let resp = p.create_package(&fx.req);

        assert_eq!(resp.status, PackageStatus::Error);
        assert_eq!(resp.errors.len(), 1);
        assert!(resp.build_log.is_empty());
        assert!(p.runner().calls().is_empty());
    }

    #[test]
    fn tools_run_inside_the_scaffolded_package() {
        let fx = fixture();
        let p = pipeline(&fx, ScriptedRunner::new());

        p.create_package(&fx.req);

        for call in p.runner().calls() {
            assert_eq!(call.cwd.file_name().and_then(|n| n.to_str()), Some("pkg"));
            assert!(call.cwd.starts_with(fx.work_root.path()));
        }
    }
}
