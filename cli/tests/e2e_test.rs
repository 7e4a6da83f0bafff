#![cfg(feature = "integ")]
use assert_cmd::Command;

/// Creates a kind cluster, installs the mesh, runs the harness and removes everything again.
/// Requires docker with the mesh and nginx images pulled, `kind`, `helm`, and the filter built
/// (see `SELFTEST_FILTER_SOURCE_DIR`).
#[test]
fn end_to_end() {
    let output = Command::cargo_bin("mesh-harness")
        .unwrap()
        .args(["--log-level", "debug", "e2e"])
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        output.status.success(),
        "{}\n{}",
        stdout,
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(stdout.contains("result: PASS"));
}
