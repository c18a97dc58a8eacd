// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn out_dir(test: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("espsim-cli-{}-{}", test, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn run(scenario: &str, extra: &[&str]) -> Output {
    let chip = fixture("esp32.yaml");
    let scenario = fixture(scenario);
    Command::new(env!("CARGO_BIN_EXE_espsim"))
        .arg("run")
        .arg("--chip")
        .arg(&chip)
        .arg("--scenario")
        .arg(&scenario)
        .args(extra)
        .output()
        .expect("Failed to execute espsim")
}

fn read_result(dir: &Path) -> serde_json::Value {
    let text = std::fs::read_to_string(dir.join("result.json")).expect("result.json missing");
    serde_json::from_str(&text).expect("result.json is not JSON")
}

#[test]
fn test_passing_scenario_writes_result() {
    let dir = out_dir("pass");
    let output = run(
        "ledc_blink.yaml",
        &["--output-dir", dir.to_str().unwrap()],
    );
    assert_eq!(
        output.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let result = read_result(&dir);
    assert_eq!(result["status"], "pass");
    assert_eq!(result["steps_executed"], 10);
    assert_eq!(result["time_ns"], 2_048_000);
    assert_eq!(result["assertions"].as_array().unwrap().len(), 3);
    // GPIO2 toggles at 0, 0.512, 1.024, 1.536 and 2.048 ms.
    assert_eq!(result["pins"]["2"]["rising"], 3);
    assert_eq!(result["pins"]["2"]["falling"], 2);
    assert!(dir.join("snapshot.json").exists());

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_failed_expectation_exit_code() {
    let dir = out_dir("fail");
    let output = run(
        "ledc_wrong_duty.yaml",
        &["--output-dir", dir.to_str().unwrap()],
    );
    assert_eq!(output.status.code(), Some(1));

    let result = read_result(&dir);
    assert_eq!(result["status"], "fail");
    assert_eq!(result["assertions"][0]["passed"], false);
    assert_eq!(result["assertions"][0]["actual"], 8192);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_unmapped_write_is_runtime_error() {
    let dir = out_dir("runtime");
    let output = run(
        "unmapped_write.yaml",
        &["--output-dir", dir.to_str().unwrap()],
    );
    assert_eq!(output.status.code(), Some(3));

    let result = read_result(&dir);
    assert_eq!(result["status"], "error");
    assert_eq!(result["steps_executed"], 1);
    assert!(result["message"]
        .as_str()
        .unwrap()
        .contains("0x50000000"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_missing_scenario_is_config_error() {
    let dir = out_dir("config");
    let output = run(
        "does_not_exist.yaml",
        &["--output-dir", dir.to_str().unwrap()],
    );
    assert_eq!(output.status.code(), Some(2));
    assert_eq!(read_result(&dir)["status"], "config_error");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_event_budget_override_is_runtime_error() {
    let output = run("ledc_blink.yaml", &["--max-events", "2"]);
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn test_vcd_generation() {
    let dir = out_dir("vcd");
    std::fs::create_dir_all(&dir).unwrap();
    let vcd_path = dir.join("pins.vcd");
    let output = run("ledc_blink.yaml", &["--vcd", vcd_path.to_str().unwrap()]);
    assert!(output.status.success());

    let content = std::fs::read_to_string(&vcd_path).expect("Failed to read VCD");
    assert!(content.contains("$timescale"), "VCD header missing");
    assert!(content.contains("pin2"), "VCD pin wires missing");
    assert!(content.contains("#512000"), "VCD edge timestamp missing");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_inspect_prints_snapshot() {
    let output = Command::new(env!("CARGO_BIN_EXE_espsim"))
        .arg("inspect")
        .arg("--chip")
        .arg(fixture("esp32.yaml"))
        .output()
        .expect("Failed to execute espsim");
    assert!(output.status.success());
    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("inspect output is not JSON");
    assert_eq!(json["time_ns"], 0);
    assert!(json["peripherals"]["rmt"].is_object());
}
