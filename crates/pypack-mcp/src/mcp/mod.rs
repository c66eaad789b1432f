use pypack_core::{Error as PypackError, PackageRequest};
use pypack_local::Pipeline;
use rmcp::{
    handler::server::router::tool::ToolRouter as RmcpToolRouter,
    handler::server::wrapper::Parameters,
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
    transport::stdio,
    ErrorData as McpError, ServiceExt,
};
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;

const SCHEMA_VERSION: u64 = 1;
const CREATE_KIND: &str = "create_pypi_package";

mod envelope;
use envelope::*;

fn tool_result(payload: serde_json::Value) -> CallToolResult {
    // Structured content for machine consumers, plus a text fallback for clients that only
    // read `content[0].text`.
    let mut r = CallToolResult::structured(payload.clone());
    r.content = vec![Content::text(payload.to_string())];
    r
}

// No Debug: carries the upload token.
#[derive(Deserialize, JsonSchema, Default)]
struct CreatePackageArgs {
    /// Path to a Python file or directory (required).
    #[serde(default)]
    source_path: Option<String>,
    /// Name for the PyPI package (required).
    #[serde(default)]
    package_name: Option<String>,
    /// Package version in semantic format (required).
    #[serde(default)]
    version: Option<String>,
    /// PyPI API token for upload. When omitted the package is built but not uploaded.
    #[serde(default)]
    pypi_token: Option<String>,
    /// Target repository (default: pypi). Allowed: pypi, testpypi
    #[serde(default)]
    repository: Option<String>,
    /// Run pytest if a tests directory exists (default: true).
    #[serde(default)]
    run_tests: Option<bool>,
    /// Run the Ruff linter (default: true).
    #[serde(default)]
    lint_code: Option<bool>,
    /// Minimum Python version (default: 3.8).
    #[serde(default)]
    min_python: Option<String>,
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

impl CreatePackageArgs {
    fn into_request(self) -> pypack_core::Result<PackageRequest> {
        let required = |v: Option<String>, field: &str| {
            non_empty(v).ok_or_else(|| PypackError::InvalidRequest(format!("{field} is required")))
        };
        let mut req = PackageRequest::new(
            required(self.source_path, "source_path")?,
            required(self.package_name, "package_name")?,
            required(self.version, "version")?,
        );
        req.pypi_token = non_empty(self.pypi_token);
        if let Some(r) = self.repository {
            req.repository = r.parse()?;
        }
        if let Some(b) = self.run_tests {
            req.run_tests = b;
        }
        if let Some(b) = self.lint_code {
            req.lint_code = b;
        }
        if let Some(v) = non_empty(self.min_python) {
            req.min_python = v;
        }
        req.validate()?;
        Ok(req)
    }
}

#[derive(Clone)]
pub(crate) struct PypackMcp {
    tool_router: RmcpToolRouter<Self>,
    pipeline: Arc<Pipeline>,
}

#[tool_router]
impl PypackMcp {
    pub(crate) fn new() -> Self {
        Self::with_pipeline(Pipeline::from_env())
    }

    pub(crate) fn with_pipeline(pipeline: Pipeline) -> Self {
        Self {
            tool_router: Self::tool_router(),
            pipeline: Arc::new(pipeline),
        }
    }

    #[tool(description = "Converts Python code to a PyPI package with quality checks and optional upload")]
    async fn create_pypi_package(
        &self,
        params: Parameters<Option<CreatePackageArgs>>,
    ) -> Result<CallToolResult, McpError> {
        let t0 = std::time::Instant::now();
        let args = params.0.unwrap_or_default();

        let req = match args.into_request() {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "rejected create_pypi_package arguments");
                let mut payload = failed_response(
                    ErrorCode::InvalidParams,
                    &e.to_string(),
                    "Pass source_path, package_name and version; repository must be \"pypi\" or \"testpypi\".",
                );
                add_envelope_fields(&mut payload, CREATE_KIND, t0.elapsed().as_millis());
                return Ok(tool_result(payload));
            }
        };

        let pipeline = Arc::clone(&self.pipeline);
        let joined = tokio::task::spawn_blocking(move || pipeline.create_package(&req)).await;
        let mut payload = match joined {
            Ok(resp) => serde_json::to_value(&resp)
                .map_err(|e| McpError::internal_error(e.to_string(), None))?,
            Err(e) => {
                tracing::error!(error = %e, "pipeline task failed");
                failed_response(
                    ErrorCode::UnexpectedError,
                    &format!("pipeline task failed: {e}"),
                    "The packaging run aborted unexpectedly; check the server log (stderr) and retry.",
                )
            }
        };
        add_envelope_fields(&mut payload, CREATE_KIND, t0.elapsed().as_millis());
        Ok(tool_result(payload))
    }
}

#[tool_handler]
impl rmcp::ServerHandler for PypackMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Converts Python code to production-ready PyPI packages".to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

pub(crate) async fn serve_stdio() -> Result<(), McpError> {
    let svc = PypackMcp::new();
    tracing::info!(config = ?svc.pipeline.config(), "serving MCP over stdio");
    let running = svc
        .serve(stdio())
        .await
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    // Keep the stdio server alive until the client closes.
    running
        .waiting()
        .await
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(())
}
