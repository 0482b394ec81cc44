//! The `cncd` host loop.
//!
//! Session events are printed to stdout as JSON lines
//! (`{"event": ..., "data": ...}`); stdin takes one command per line:
//!
//! ```text
//! status | open | close | quit
//! gcode G0 X10 Y10        write ?        writeln $$
//! loadfile part.nc        loadmacro probe
//! start | pause | resume | stop | feedhold | cyclestart | homing | unlock | reset
//! feedOverride 10         spindleOverride -10        rapidOverride 50
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use cnc_protocol::{DeviceFamily, SessionEvent};
use cnc_runtime::{
	ChannelObserver, Endpoint, Error, NoopTaskRunner, ObserverId, Outcome, SessionConfig,
	SessionHandle, ShellTaskRunner, TaskRunner,
};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::cli::Cli;
use crate::config::Config;

const OBSERVER_CAPACITY: usize = 1024;

/// Commands that take the rest of the line verbatim.
const RAW_TAIL: &[&str] = &["gcode", "write", "writeln"];

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
	Empty,
	Status,
	Open,
	Close,
	Quit,
	Command { name: String, args: Vec<String> },
}

impl ConsoleInput {
	pub fn parse(line: &str) -> Self {
		let line = line.trim();
		let (head, tail) = match line.split_once(char::is_whitespace) {
			Some((head, tail)) => (head, tail.trim()),
			None => (line, ""),
		};
		match head {
			"" => Self::Empty,
			"status" => Self::Status,
			"open" => Self::Open,
			"close" => Self::Close,
			"quit" | "exit" => Self::Quit,
			name => {
				let args = if RAW_TAIL.contains(&name) {
					if tail.is_empty() {
						Vec::new()
					} else {
						vec![tail.to_string()]
					}
				} else {
					tail.split_whitespace().map(str::to_string).collect()
				};
				Self::Command {
					name: name.to_string(),
					args,
				}
			}
		}
	}
}

pub async fn run(cli: Cli, config: Config) -> Result<()> {
	let endpoint =
		Endpoint::parse(&cli.port).with_context(|| format!("invalid endpoint {:?}", cli.port))?;
	let profile = DeviceFamily::from(cli.controller).profile();
	let session_config =
		config.apply(SessionConfig::new(endpoint.to_string(), profile).with_baudrate(cli.baudrate));
	let tasks: Arc<dyn TaskRunner> = if cli.allow_system_triggers {
		Arc::new(ShellTaskRunner)
	} else {
		Arc::new(NoopTaskRunner)
	};

	let session = SessionHandle::spawn(session_config, endpoint.connector(), config.deps(tasks));
	let (observer, events) = ChannelObserver::channel(OBSERVER_CAPACITY);
	let origin = session.add_observer(Arc::new(observer)).await?;
	let printer = tokio::spawn(print_events(events));

	if !cli.no_open {
		if let Err(err) = session.open().await {
			error!(target = "cnc.console", endpoint = %endpoint, error = %err, "open failed; retry with `open`");
		}
	}

	let mut lines = BufReader::new(tokio::io::stdin()).lines();
	loop {
		tokio::select! {
			line = lines.next_line() => {
				let Some(line) = line.context("reading stdin")? else {
					break;
				};
				if !handle_input(&session, origin, ConsoleInput::parse(&line)).await? {
					break;
				}
			}
			_ = tokio::signal::ctrl_c() => {
				info!(target = "cnc.console", "interrupted");
				break;
			}
		}
	}

	session.shutdown().await?;
	// The printer drains once the session drops its observers.
	let _ = printer.await;
	Ok(())
}

/// Returns false when the console should exit.
async fn handle_input(session: &SessionHandle, origin: ObserverId, input: ConsoleInput) -> Result<bool> {
	let result = match input {
		ConsoleInput::Empty => return Ok(true),
		ConsoleInput::Quit => return Ok(false),
		ConsoleInput::Status => {
			let status = serde_json::to_value(session.status().await?)?;
			print_line(&json!({ "event": "session:status", "data": status })).await?;
			return Ok(true);
		}
		ConsoleInput::Open => session.open().await.map(|()| Outcome::Done),
		ConsoleInput::Close => session.close().await.map(|()| Outcome::Done),
		ConsoleInput::Command { name, args } => session.command(Some(origin), &name, &args).await,
	};

	match result {
		Ok(Outcome::Done) => {}
		Ok(Outcome::Loaded { name, total }) => {
			info!(target = "cnc.console", name = %name, total, "program loaded");
		}
		Ok(Outcome::Unsupported) => {
			warn!(target = "cnc.console", "command not supported by this controller");
		}
		Err(Error::SessionGone) => return Err(Error::SessionGone.into()),
		Err(err) if err.is_caller_error() => warn!(target = "cnc.console", error = %err, "rejected"),
		Err(err) => error!(target = "cnc.console", error = %err, "command failed"),
	}
	Ok(true)
}

async fn print_events(mut events: mpsc::Receiver<SessionEvent>) {
	while let Some(event) = events.recv().await {
		if print_line(&event.to_json()).await.is_err() {
			return;
		}
	}
}

async fn print_line(value: &Value) -> std::io::Result<()> {
	let mut line = value.to_string();
	line.push('\n');
	let mut stdout = tokio::io::stdout();
	stdout.write_all(line.as_bytes()).await?;
	stdout.flush().await
}

#[cfg(test)]
mod tests {
	use super::*;

	fn command(name: &str, args: &[&str]) -> ConsoleInput {
		ConsoleInput::Command {
			name: name.into(),
			args: args.iter().map(|a| a.to_string()).collect(),
		}
	}

	#[test]
	fn builtins() {
		assert_eq!(ConsoleInput::parse("   "), ConsoleInput::Empty);
		assert_eq!(ConsoleInput::parse("status"), ConsoleInput::Status);
		assert_eq!(ConsoleInput::parse(" open "), ConsoleInput::Open);
		assert_eq!(ConsoleInput::parse("close"), ConsoleInput::Close);
		assert_eq!(ConsoleInput::parse("exit"), ConsoleInput::Quit);
	}

	#[test]
	fn gcode_keeps_the_whole_line() {
		assert_eq!(
			ConsoleInput::parse("gcode G1 X10  F200"),
			command("gcode", &["G1 X10  F200"])
		);
		assert_eq!(ConsoleInput::parse("write ?"), command("write", &["?"]));
		assert_eq!(ConsoleInput::parse("gcode"), command("gcode", &[]));
	}

	#[test]
	fn other_commands_split_arguments() {
		assert_eq!(
			ConsoleInput::parse("feedOverride -10"),
			command("feedOverride", &["-10"])
		);
		assert_eq!(ConsoleInput::parse("start"), command("start", &[]));
		assert_eq!(
			ConsoleInput::parse("loadfile jobs/part.nc"),
			command("loadfile", &["jobs/part.nc"])
		);
	}
}
