use std::path::PathBuf;
use std::process::Command;

fn platform(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../configs/platforms")
        .join(name)
}

fn mwmr_sim() -> Command {
    Command::new(env!("CARGO_BIN_EXE_mwmr-sim"))
}

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("mwmr-cli-{}-{}", std::process::id(), name))
}

#[test]
fn test_run_loopback_json_summary() {
    let output = mwmr_sim()
        .args(["run", "--json", "-p"])
        .arg(platform("loopback.yaml"))
        .output()
        .expect("Failed to execute command");
    assert_eq!(
        output.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout
        .lines()
        .rfind(|l| l.starts_with('{'))
        .expect("No JSON summary on stdout");
    let json: serde_json::Value = serde_json::from_str(line).expect("Failed to parse JSON");

    assert_eq!(json["status"], "complete");
    assert_eq!(json["stop_reason"], "workload_complete");
    assert_eq!(json["platform"], "loopback-demo");
    assert!(json["ticks"].as_u64().unwrap() > 0);
    // Every word crosses the controller twice: into and out of the coprocessor.
    assert_eq!(json["metrics"]["words_moved"].as_u64(), Some(1024));

    let consumer = json["tasks"]
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["name"] == "consumer")
        .expect("consumer task missing");
    assert_eq!(consumer["progress"].as_u64(), Some(512));
    assert_eq!(consumer["done"], true);
    assert_eq!(json["controller"]["coproc_status"][0].as_u64(), Some(512));
}

#[test]
fn test_run_writes_snapshot() {
    let path = temp_path("snapshot.json");
    std::fs::remove_file(&path).ok();

    let output = mwmr_sim()
        .args(["run", "-p"])
        .arg(platform("stream.yaml"))
        .arg("--snapshot")
        .arg(&path)
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success());

    let text = std::fs::read_to_string(&path).expect("Snapshot not written");
    std::fs::remove_file(&path).ok();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    let channels = json["channels"].as_array().unwrap();
    assert_eq!(channels.len(), 2);
    assert!(channels.iter().all(|c| c["config"]["running"] == true));
}

#[test]
fn test_tick_limit_reports_incomplete() {
    let output = mwmr_sim()
        .args(["run", "--json", "--max-ticks", "10", "-p"])
        .arg(platform("loopback.yaml"))
        .output()
        .expect("Failed to execute command");
    assert_eq!(output.status.code(), Some(1));

    let stdout = String::from_utf8_lossy(&output.stdout);
    let json: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(json["status"], "incomplete");
    assert_eq!(json["stop_reason"], "max_ticks");
    assert_eq!(json["ticks"].as_u64(), Some(10));
}

#[test]
fn test_validate_accepts_sample_platforms() {
    for name in ["loopback.yaml", "stream.yaml"] {
        let status = mwmr_sim()
            .args(["validate", "-p"])
            .arg(platform(name))
            .status()
            .expect("Failed to execute command");
        assert!(status.success(), "{} rejected", name);
    }
}

#[test]
fn test_invalid_manifest_is_config_error() {
    let path = temp_path("bad.yaml");
    std::fs::write(
        &path,
        "name: bad\nmemory:\n  - name: ram\n    base: 0x20000000\n    size: \"4KB\"\nchannels:\n  - name: c\n    direction: to_coprocessor\n    index: 0\n    width: 0\n    depth: 4\n    buffer: 0x20000000\n    status: 0x20000100\n",
    )
    .unwrap();

    let validate = mwmr_sim()
        .args(["validate", "-p"])
        .arg(&path)
        .output()
        .expect("Failed to execute command");
    let run = mwmr_sim()
        .args(["run", "-p"])
        .arg(&path)
        .output()
        .expect("Failed to execute command");
    std::fs::remove_file(&path).ok();

    assert_eq!(validate.status.code(), Some(2));
    assert_eq!(run.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&validate.stderr).contains("width"));
}

#[test]
fn test_missing_manifest_is_config_error() {
    let output = mwmr_sim()
        .args(["run", "-p", "does-not-exist.yaml"])
        .output()
        .expect("Failed to execute command");
    assert_eq!(output.status.code(), Some(2));
}
