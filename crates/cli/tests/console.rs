//! Runs the `cncd` binary against endpoints that need no hardware.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use serde_json::Value;

fn run_cncd(config_home: &Path, args: &[&str], stdin: &str) -> (bool, String, String) {
	let mut child = Command::new(env!("CARGO_BIN_EXE_cncd"))
		.args(args)
		.env("XDG_CONFIG_HOME", config_home)
		.env("RUST_LOG", "warn")
		.stdin(Stdio::piped())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		.spawn()
		.expect("failed to spawn cncd");
	child
		.stdin
		.take()
		.expect("stdin piped")
		.write_all(stdin.as_bytes())
		.expect("write stdin");
	let output = child.wait_with_output().expect("wait for cncd");
	(
		output.status.success(),
		String::from_utf8_lossy(&output.stdout).to_string(),
		String::from_utf8_lossy(&output.stderr).to_string(),
	)
}

fn events(stdout: &str) -> Vec<Value> {
	stdout
		.lines()
		.filter(|line| !line.trim().is_empty())
		.map(|line| serde_json::from_str(line).expect("stdout is JSON lines"))
		.collect()
}

#[test]
fn status_without_opening() {
	let dir = tempfile::tempdir().unwrap();
	let port = dir.path().join("ttyUSB0");
	let port = port.to_str().unwrap();

	let (ok, stdout, stderr) =
		run_cncd(dir.path(), &["--port", port, "--no-open"], "status\nquit\n");
	assert!(ok, "stderr: {stderr}");

	let events = events(&stdout);
	let status = events
		.iter()
		.find(|e| e["event"] == "session:status")
		.expect("status line");
	assert_eq!(status["data"]["port"], port);
	assert_eq!(status["data"]["open"], false);
	assert_eq!(status["data"]["controller"]["type"], "Grbl");
	assert_eq!(status["data"]["workflowState"], "idle");
}

#[test]
fn failed_open_is_reported_as_an_event() {
	let dir = tempfile::tempdir().unwrap();
	let port = dir.path().join("missing-tty");
	let port = port.to_str().unwrap();

	let (ok, stdout, _) = run_cncd(
		dir.path(),
		&["--port", port, "--controller", "smoothie"],
		"open\n",
	);
	assert!(ok);

	let errors: Vec<_> = events(&stdout)
		.into_iter()
		.filter(|e| e["event"] == "serialport:error")
		.collect();
	assert_eq!(errors.len(), 2);
	assert_eq!(errors[0]["data"]["port"], port);
}

#[test]
fn missing_config_file_fails_fast() {
	let dir = tempfile::tempdir().unwrap();
	let config = dir.path().join("absent.json");

	let (ok, _, stderr) = run_cncd(
		dir.path(),
		&["--port", "/dev/null", "--config", config.to_str().unwrap()],
		"",
	);
	assert!(!ok);
	assert!(stderr.contains("absent.json"), "stderr: {stderr}");
}
