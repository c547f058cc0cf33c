use std::process::Command;

fn kestrel(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_kestrel"))
        .args(args)
        .output()
        .expect("Failed to run kestrel")
}

#[test]
fn test_cli_help() {
    let output = kestrel(&["--help"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage: kestrel"));
    assert!(stdout.contains("--mock"));
}

#[test]
fn test_list_tools() {
    let output = kestrel(&["--list-tools"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("atmel-ice"));
    assert!(stdout.contains("simulator"));
    assert!(stdout.contains("atmega328p"));
}

#[test]
fn test_missing_configuration_is_an_error() {
    let output = kestrel(&[]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no debug tool configured"));
}

#[test]
fn test_unknown_tool_exits() {
    let output = kestrel(&["--tool", "no-such-tool", "--target", "atmega328p", "--port", "0"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to start the target controller"));
}
