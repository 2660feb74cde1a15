use std::process::Command;

fn perftest() -> Command {
    Command::new(env!("CARGO_BIN_EXE_perftest"))
}

/// Test that an unknown runner fails before any warmup work starts
#[test]
fn test_unknown_runner_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let output = perftest()
        .args(["log4j", "Unknown", "-verbose"])
        .env("PERFTEST_LOG_DIR", dir.path())
        .output()
        .expect("failed to run perftest");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown runner 'log4j'"), "stderr: {}", stderr);
    assert!(stderr.contains("async-file"), "stderr: {}", stderr);
    // the startup line is only printed once a runner has been created
    assert!(!String::from_utf8_lossy(&output.stdout).contains("Starting PerfTest"));
}

/// Test that missing positionals are a usage error
#[test]
fn test_missing_test_name_is_usage_error() {
    let output = perftest()
        .arg("noop")
        .output()
        .expect("failed to run perftest");

    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Usage"));
}
