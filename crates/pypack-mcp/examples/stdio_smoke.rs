// Run (from the workspace root):
//   cargo build -p pypack && cargo run -p pypack --example stdio_smoke -- path/to/module.py
//
// Spawns `pypack mcp-stdio`, lists tools, and packages the given source without uploading.
// The tool binaries come from PATH (or the PYPACK_* overrides).

#[cfg(not(feature = "stdio"))]
fn main() {
    eprintln!("stdio_smoke requires `--features stdio` (or default features enabled)");
}

#[cfg(feature = "stdio")]
use rmcp::{
    model::CallToolRequestParam,
    service::ServiceExt,
    transport::{ConfigureCommandExt, TokioChildProcess},
};
#[cfg(feature = "stdio")]
use tokio::process::Command;

#[cfg(feature = "stdio")]
fn payload(result: &rmcp::model::CallToolResult) -> serde_json::Value {
    if let Some(v) = result.structured_content.clone() {
        return v;
    }
    for c in &result.content {
        if let Some(t) = c.as_text() {
            if let Ok(v) = serde_json::from_str::<serde_json::Value>(&t.text) {
                return v;
            }
        }
    }
    serde_json::json!({})
}

#[cfg(feature = "stdio")]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let bin = if let Ok(p) = std::env::var("PYPACK_BIN") {
        p
    } else {
        let root = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        let workspace_root = root
            .parent()
            .and_then(|p| p.parent())
            .ok_or("failed to compute workspace root")?;
        let target_dir = std::env::var("CARGO_TARGET_DIR")
            .ok()
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| workspace_root.join("target"));
        target_dir
            .join("debug")
            .join("pypack")
            .to_string_lossy()
            .to_string()
    };
    let source = std::env::args()
        .nth(1)
        .ok_or("usage: stdio_smoke <source_path> [package_name] [version]")?;
    let name = std::env::args().nth(2).unwrap_or_else(|| "smoke_package".into());
    let version = std::env::args().nth(3).unwrap_or_else(|| "0.0.1".into());

    let service = ()
        .serve(TokioChildProcess::new(Command::new(bin).configure(|cmd| {
            cmd.args(["mcp-stdio"]);
            // Smoke runs never upload.
            cmd.env_remove("PYPACK_PYPI_TOKEN");
        }))?)
        .await?;

    let tools = service.list_tools(Default::default()).await?;
    let names: Vec<_> = tools.tools.iter().map(|t| t.name.to_string()).collect();
    eprintln!("tools: {}", names.join(", "));
    if !names.iter().any(|n| n == "create_pypi_package") {
        return Err("server does not expose create_pypi_package".into());
    }

    let r = service
        .call_tool(CallToolRequestParam {
            name: "create_pypi_package".into(),
            arguments: serde_json::json!({
                "source_path": source,
                "package_name": name,
                "version": version,
            })
            .as_object()
            .cloned(),
        })
        .await?;
    let v = payload(&r);
    println!("{}", serde_json::to_string_pretty(&v)?);

    service.cancel().await?;
    match v["status"].as_str() {
        Some("error") | None => Err("packaging run failed".into()),
        _ => Ok(()),
    }
}
