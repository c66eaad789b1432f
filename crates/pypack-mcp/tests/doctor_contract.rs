#[test]
fn doctor_reports_tools_and_config_without_secrets() {
    let bin = assert_cmd::cargo::cargo_bin!("pypack");
    let work = tempfile::tempdir().expect("tempdir");
    let out = std::process::Command::new(bin)
        .args(["doctor", "--check-stdio", "false"])
        .env_remove("PYPACK_ENV_FILE")
        .env("PYPACK_WORK_DIR", work.path())
        .env("PYPACK_TWINE", "pypack-no-such-twine")
        .env("PYPACK_PYPI_TOKEN", "pypi-SECRET-VALUE")
        .output()
        .expect("run pypack doctor");

    assert!(out.status.success(), "pypack doctor failed");
    let s = String::from_utf8_lossy(&out.stdout);
    assert!(!s.contains("pypi-SECRET-VALUE"), "doctor leaked the token");
    let v: serde_json::Value = serde_json::from_str(&s).expect("parse doctor json");

    assert_eq!(v["kind"].as_str(), Some("doctor"));
    assert_eq!(v["env"]["pypi_token_configured"].as_bool(), Some(true));
    assert_eq!(v["config"]["toolchain"]["twine"].as_str(), Some("pypack-no-such-twine"));

    let tools = v["tools"].as_array().expect("tools array");
    let roles: Vec<&str> = tools.iter().filter_map(|t| t["role"].as_str()).collect();
    assert_eq!(roles, ["lint", "test", "build", "upload"]);
    let upload = &tools[3];
    assert_eq!(upload["found"].as_bool(), Some(false));

    let checks = v["checks"].as_array().expect("checks array");
    let wd = checks
        .iter()
        .find(|c| c["name"] == "work_dir_writable")
        .expect("work_dir_writable check");
    assert_eq!(wd["ok"].as_bool(), Some(true));
    // A missing upload tool fails the overall verdict.
    assert_eq!(v["ok"].as_bool(), Some(false));
    assert!(!checks.iter().any(|c| c["name"] == "mcp_stdio_handshake"));
}
