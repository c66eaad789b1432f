use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pypack_core::{PackageRequest, PackageStatus, Repository};
use pypack_local::{Pipeline, PipelineConfig};
use std::path::PathBuf;

#[cfg(feature = "stdio")]
mod mcp;

#[derive(Parser)]
#[command(name = "pypack")]
#[command(about = "Python packaging pipeline (MCP stdio server)", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run as an MCP stdio server (for Cursor / MCP clients).
    #[cfg(feature = "stdio")]
    McpStdio,
    /// Run the packaging pipeline once and print the response (json).
    Package(PackageCmd),
    /// Diagnose tool availability and configuration (json; no secrets).
    Doctor(DoctorCmd),
    /// Print version info.
    Version(VersionCmd),
}

#[derive(clap::Args)]
struct PackageCmd {
    /// Path to a Python file or directory.
    #[arg(long)]
    source_path: PathBuf,
    /// Name for the PyPI package.
    #[arg(long)]
    package_name: String,
    /// Package version (semantic format).
    #[arg(long)]
    version: String,
    /// PyPI API token. Upload is skipped when absent.
    #[arg(long, env = "PYPACK_PYPI_TOKEN", hide_env_values = true)]
    pypi_token: Option<String>,
    /// Target repository. Allowed: pypi, testpypi
    #[arg(long, default_value = "pypi")]
    repository: String,
    /// Run the Ruff linter.
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    lint_code: bool,
    /// Run pytest if a tests directory exists.
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    run_tests: bool,
    /// Minimum Python version.
    #[arg(long, default_value = pypack_core::DEFAULT_MIN_PYTHON)]
    min_python: String,
}

#[derive(clap::Args)]
struct DoctorCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
    /// Attempt a local stdio MCP handshake (list_tools) to prove a client can start the server.
    ///
    /// This spawns a child `pypack mcp-stdio` process and calls `list_tools`. It does not run
    /// the pipeline and does not print any secret values.
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    check_stdio: bool,
    /// Timeout for the stdio handshake (ms).
    #[arg(long, default_value_t = 3000)]
    timeout_ms: u64,
}

#[derive(clap::Args)]
struct VersionCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

fn init_tracing() {
    // stdout belongs to the MCP transport (and to JSON output); logs go to stderr.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pypack=info,pypack_local=info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Sets variables from `PYPACK_ENV_FILE` (`KEY=VALUE` lines) that are not already set.
fn load_env_file() {
    let Ok(p) = std::env::var("PYPACK_ENV_FILE") else {
        return;
    };
    let p = p.trim();
    if p.is_empty() {
        return;
    }
    let Ok(txt) = std::fs::read_to_string(p) else {
        return;
    };
    for raw in txt.lines() {
        let s = raw.trim();
        if s.is_empty() || s.starts_with('#') {
            continue;
        }
        let Some((k, v)) = s.split_once('=') else {
            continue;
        };
        let k = k.trim();
        if k.is_empty() {
            continue;
        }
        // Don't override explicit process env.
        if std::env::var_os(k).is_none() {
            std::env::set_var(k, v.trim());
        }
    }
}

fn exit_code(status: PackageStatus) -> i32 {
    match status {
        PackageStatus::Success => 0,
        PackageStatus::Error => 1,
        PackageStatus::PartialSuccess => 2,
    }
}

async fn run_package(args: PackageCmd) -> Result<i32> {
    let repository: Repository = args.repository.parse()?;
    let mut req = PackageRequest::new(args.source_path, args.package_name, args.version);
    req.pypi_token = args.pypi_token.filter(|t| !t.trim().is_empty());
    req.repository = repository;
    req.lint_code = args.lint_code;
    req.run_tests = args.run_tests;
    req.min_python = args.min_python;

    let pipeline = Pipeline::from_env();
    let resp = tokio::task::spawn_blocking(move || pipeline.create_package(&req))
        .await
        .context("pipeline task failed")?;
    println!("{}", serde_json::to_string_pretty(&resp)?);
    Ok(exit_code(resp.status))
}

fn work_dir_writable(config: &PipelineConfig) -> bool {
    let dir = config
        .work_root
        .clone()
        .unwrap_or_else(std::env::temp_dir);
    (|| -> Result<()> {
        std::fs::create_dir_all(&dir)?;
        let probe = dir.join(format!(
            "pypack-doctor-{}-{}.probe",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis()
        ));
        std::fs::write(&probe, b"ok")?;
        let _ = std::fs::remove_file(&probe);
        Ok(())
    })()
    .is_ok()
}

#[cfg(feature = "stdio")]
async fn stdio_handshake(timeout_ms: u64) -> serde_json::Value {
    use rmcp::service::ServiceExt;
    use rmcp::transport::{ConfigureCommandExt, TokioChildProcess};
    use tokio::process::Command;

    let t0 = std::time::Instant::now();
    let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("pypack"));
    let child = match TokioChildProcess::new(Command::new(exe).configure(|cmd| {
        cmd.args(["mcp-stdio"]);
        // Never hand the probe a credential.
        cmd.env_remove("PYPACK_PYPI_TOKEN");
        cmd.env("RUST_LOG", "error");
    })) {
        Ok(c) => c,
        Err(e) => {
            return serde_json::json!({
                "name": "mcp_stdio_handshake",
                "ok": false,
                "message": format!("spawn failed: {e}"),
                "hint": "Reinstall `pypack` and make sure the binary is executable.",
            })
        }
    };

    let res = async {
        let service = ().serve(child).await?;
        let tools = tokio::time::timeout(
            std::time::Duration::from_millis(timeout_ms),
            service.list_tools(Default::default()),
        )
        .await??;
        let _ = service.cancel().await;
        anyhow::Ok(tools.tools.len())
    }
    .await;

    match res {
        Ok(n) => serde_json::json!({
            "name": "mcp_stdio_handshake",
            "ok": true,
            "message": format!("listed {n} tool(s)"),
            "hint": "",
            "elapsed_ms": t0.elapsed().as_millis(),
        }),
        Err(e) => serde_json::json!({
            "name": "mcp_stdio_handshake",
            "ok": false,
            "message": e.to_string(),
            "hint": "The child process closed the stdio transport early. Common causes: stdout contamination, wrong args (not running mcp-stdio), or a crash on startup.",
            "elapsed_ms": t0.elapsed().as_millis(),
        }),
    }
}

async fn run_doctor(args: DoctorCmd) -> Result<()> {
    let t0 = std::time::Instant::now();
    let config = PipelineConfig::from_env();
    let mut checks: Vec<serde_json::Value> = Vec::new();

    let tools: Vec<serde_json::Value> = config
        .toolchain
        .availability()
        .into_iter()
        .map(|(role, bin, found)| {
            serde_json::json!({ "role": role, "bin": bin, "found": found })
        })
        .collect();
    for t in &tools {
        let found = t["found"].as_bool().unwrap_or(false);
        let bin = t["bin"].as_str().unwrap_or_default();
        checks.push(serde_json::json!({
            "name": format!("{}_tool_on_path", t["role"].as_str().unwrap_or_default()),
            "ok": found,
            "message": if found { format!("{bin} found") } else { format!("{bin} not found on PATH") },
            "hint": if found { String::new() } else { format!("Install {bin} or point the PYPACK_* override at it.") },
        }));
    }

    let wd_ok = work_dir_writable(&config);
    checks.push(serde_json::json!({
        "name": "work_dir_writable",
        "ok": wd_ok,
        "message": if wd_ok { "working directory root is writable" } else { "working directory root is not writable" },
        "hint": if wd_ok { "" } else { "Set PYPACK_WORK_DIR to a writable directory." },
    }));

    #[cfg(feature = "stdio")]
    if args.check_stdio {
        checks.push(stdio_handshake(args.timeout_ms).await);
    }
    #[cfg(not(feature = "stdio"))]
    let _ = (args.check_stdio, args.timeout_ms);

    let ok = checks.iter().all(|c| c["ok"].as_bool() == Some(true));
    let payload = serde_json::json!({
        "schema_version": 1,
        "kind": "doctor",
        "ok": ok,
        "name": "pypack",
        "version": env!("CARGO_PKG_VERSION"),
        "config": config,
        "tools": tools,
        "env": {
            "pypi_token_configured": std::env::var("PYPACK_PYPI_TOKEN").is_ok_and(|v| !v.trim().is_empty()),
        },
        "checks": checks,
        "elapsed_ms": t0.elapsed().as_millis(),
    });

    match args.output.to_ascii_lowercase().as_str() {
        "text" => {
            println!("pypack doctor: {}", if ok { "ok" } else { "issues found" });
            for c in payload["checks"].as_array().into_iter().flatten() {
                let name = c["name"].as_str().unwrap_or("?");
                let ok = c["ok"].as_bool().unwrap_or(false);
                println!("- {}: {}", name, if ok { "ok" } else { "fail" });
            }
        }
        _ => println!("{payload}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env_file();
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        #[cfg(feature = "stdio")]
        Commands::McpStdio => {
            mcp::serve_stdio()
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        }
        Commands::Package(args) => {
            let code = run_package(args).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Doctor(args) => run_doctor(args).await?,
        Commands::Version(args) => {
            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "version",
                "ok": true,
                "name": "pypack",
                "version": env!("CARGO_PKG_VERSION"),
            });
            match args.output.to_ascii_lowercase().as_str() {
                "text" => println!("pypack {}", env!("CARGO_PKG_VERSION")),
                _ => println!("{}", v),
            }
        }
    }
    Ok(())
}
