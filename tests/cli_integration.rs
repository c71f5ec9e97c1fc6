//! `smcstat` binary integration tests.
//!
//! Each test writes a state file to the temp directory and runs the compiled
//! binary against it.
//! Run with: `cargo test --test cli_integration`

use std::path::PathBuf;
use std::process::{Command, Output};

const STATE: &str = r#"{
    "namespaces": [{ "id": 5 }],
    "link_groups": [{
        "id": "0A0B0C0D", "role": "client",
        "links": [{ "index": 0, "dev": "mlx5_0", "port": 1, "qp_num": 300, "peer_qpn": 301 }]
    }],
    "connections": [
        { "local": "10.0.0.1:5000", "remote": "10.0.0.2:80", "sock": 1, "clc_sock": 2,
          "link_group": "0A0B0C0D", "link": 0 },
        { "local": "10.0.0.1:5001", "remote": "10.0.0.2:80", "sock": 3, "clc_sock": 4,
          "fallback": 50331648 },
        { "netns": 5, "local": "[fe80::1]:5000", "remote": "[fe80::2]:80",
          "sock": 5, "clc_sock": 6 }
    ]
}"#;

fn state_file(name: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("smcstat-{}-{name}.json", std::process::id()));
    std::fs::write(&path, STATE).expect("failed to write state file");
    path
}

fn smcstat(state: &PathBuf, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_smcstat"))
        .arg("--state")
        .arg(state)
        .args(args)
        .output()
        .expect("failed to execute")
}

// =========================================================================
// Section 1: reports (TC-1.x)
// =========================================================================

/// TC-1.1: `smcstat conns` prints a header plus one row per connection.
#[test]
fn tc_1_1_conns_text() {
    let state = state_file("conns-text");
    let output = smcstat(&state, &["conns", "--chunk", "50"]);
    assert!(output.status.success(), "exit: {:?}", output.status);

    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 3, "stdout:\n{stdout}");
    assert!(lines[0].contains("local_addr"));
    let linked = lines.iter().find(|l| l.contains("0A0B0C0D")).unwrap();
    assert!(linked.contains(" N "));
    let fallback = lines.iter().find(|l| l.contains(" Y ")).unwrap();
    assert!(fallback.contains("3000000"));
    let _ = std::fs::remove_file(state);
}

/// TC-1.2: `--format json` emits an array of rows for the namespace only.
#[test]
fn tc_1_2_conns_json_v6() {
    let state = state_file("conns-json");
    let output = smcstat(&state, &["--netns", "5", "conns", "--family", "v6", "--format", "json"]);
    assert!(output.status.success(), "exit: {:?}", output.status);

    let rows: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout is not JSON");
    let rows = rows.as_array().expect("expected a JSON array");
    assert_eq!(rows.len(), 1);
    let _ = std::fs::remove_file(state);
}

/// TC-1.3: `smcstat links` lists the usable link of the group.
#[test]
fn tc_1_3_links() {
    let state = state_file("links");
    let output = smcstat(&state, &["links"]);
    assert!(output.status.success(), "exit: {:?}", output.status);

    let stdout = String::from_utf8_lossy(&output.stdout);
    let rows: Vec<&str> = stdout.lines().skip(1).collect();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].starts_with("0A0B0C0D"));
    let _ = std::fs::remove_file(state);
}

// =========================================================================
// Section 2: sysctl and errors (TC-2.x)
// =========================================================================

/// TC-2.1: tunables read back their defaults; writes below the minimum fail.
#[test]
fn tc_2_1_sysctl() {
    let state = state_file("sysctl");
    let output = smcstat(&state, &["sysctl"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("net.smc.wmem_default = 262144"));
    assert!(stdout.contains("net.smc.rmem_default = 393216"));
    assert!(stdout.contains("net.smc.autocorking_size = 65536"));

    let output = smcstat(&state, &["sysctl", "wmem_default", "100"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).starts_with("error:"));
    let _ = std::fs::remove_file(state);
}

/// TC-2.2: an unregistered namespace exits with code 2.
#[test]
fn tc_2_2_unknown_namespace() {
    let state = state_file("netns");
    let output = smcstat(&state, &["--netns", "9", "conns"]);
    assert_eq!(output.status.code(), Some(2));
    let _ = std::fs::remove_file(state);
}

/// TC-2.3: a state file registering more namespaces than allowed exits with
/// code 2.
#[test]
fn tc_2_3_namespace_limit() {
    let state = state_file("limit");
    let output = smcstat(&state, &["--max-netns", "1", "links"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("cannot allocate"));

    let output = smcstat(&state, &["--max-netns", "2", "links"]);
    assert!(output.status.success(), "exit: {:?}", output.status);
    let _ = std::fs::remove_file(state);
}

/// TC-2.4: a missing state file exits with code 1.
#[test]
fn tc_2_4_missing_state_file() {
    let output = smcstat(&PathBuf::from("/nonexistent/smcstat.json"), &["conns"]);
    assert_eq!(output.status.code(), Some(1));
}
