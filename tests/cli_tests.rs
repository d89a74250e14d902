// tests/cli_tests.rs

use std::io::Write;
use std::process::Command;

fn midi_manager() -> Command {
    Command::new(env!("CARGO_BIN_EXE_midi-manager"))
}

#[test]
fn test_help_message() {
    let output = midi_manager()
        .arg("--help")
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage: midi-manager"));
    assert!(stdout.contains("connect-manual"));
}

#[test]
fn test_note_name() {
    let output = midi_manager()
        .args(["note", "60"])
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "C4");
}

#[test]
fn test_note_out_of_range() {
    let output = midi_manager()
        .args(["note", "128"])
        .output()
        .expect("Failed to execute command");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("128"));
}

#[test]
fn test_invalid_argument() {
    let output = midi_manager()
        .arg("--bogus")
        .output()
        .expect("Failed to execute command");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--bogus"));
    assert!(stderr.contains("Usage"));
}

#[test]
fn test_note_needs_a_number() {
    let output = midi_manager()
        .args(["note", "middle-c"])
        .output()
        .expect("Failed to execute command");
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn test_config_file_is_read() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "log_level = \"warn\"").unwrap();
    let output = midi_manager()
        .arg("--config")
        .arg(file.path())
        .args(["note", "0"])
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "C-1");
}

#[test]
fn test_broken_config_file_fails() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "resolve_timeout_ms = \"soon\"").unwrap();
    let output = midi_manager()
        .arg("--config")
        .arg(file.path())
        .args(["note", "60"])
        .output()
        .expect("Failed to execute command");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to load"));
}
