//! Event triggers.
//!
//! Operators attach commands to session events (`gcode:start`, `homing`, ...).
//! `system` rules run a shell command on the host; `gcode` rules are queued on
//! the device like a console line.

use std::process::ExitStatus;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
	System,
	Gcode,
}

/// One configured rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRule {
	pub event: String,
	pub trigger: TriggerKind,
	pub commands: String,
	#[serde(default = "enabled_by_default")]
	pub enabled: bool,
}

fn enabled_by_default() -> bool {
	true
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerAction {
	/// Host command for the task runner.
	System(String),
	/// Lines for the device.
	Gcode(String),
}

/// Resolves event names to actions.
#[derive(Debug, Clone, Default)]
pub struct EventTrigger {
	rules: Vec<TriggerRule>,
}

impl EventTrigger {
	pub fn new(rules: Vec<TriggerRule>) -> Self {
		Self { rules }
	}

	/// Actions for `event`, in rule order. Disabled and blank rules are skipped.
	pub fn resolve(&self, event: &str) -> Vec<TriggerAction> {
		self.rules
			.iter()
			.filter(|rule| rule.enabled && rule.event == event)
			.filter(|rule| !rule.commands.trim().is_empty())
			.map(|rule| match rule.trigger {
				TriggerKind::System => TriggerAction::System(rule.commands.clone()),
				TriggerKind::Gcode => TriggerAction::Gcode(rule.commands.clone()),
			})
			.collect()
	}

	pub fn is_empty(&self) -> bool {
		self.rules.is_empty()
	}
}

/// Runs `system` trigger commands. Must return immediately.
pub trait TaskRunner: Send + Sync {
	fn run(&self, command: &str);
}

/// Ignores every command.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTaskRunner;

impl TaskRunner for NoopTaskRunner {
	fn run(&self, command: &str) {
		debug!(target = "cnc.trigger", command, "task runner disabled, skipping");
	}
}

/// Spawns `sh -c <command>` on the current tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellTaskRunner;

impl ShellTaskRunner {
	pub async fn execute(command: &str) -> std::io::Result<ExitStatus> {
		tokio::process::Command::new("sh")
			.arg("-c")
			.arg(command)
			.kill_on_drop(false)
			.status()
			.await
	}
}

impl TaskRunner for ShellTaskRunner {
	fn run(&self, command: &str) {
		let Ok(runtime) = tokio::runtime::Handle::try_current() else {
			warn!(target = "cnc.trigger", command, "no async runtime, task not started");
			return;
		};
		let command = command.to_string();
		runtime.spawn(async move {
			debug!(target = "cnc.trigger", command = %command, "task started");
			match ShellTaskRunner::execute(&command).await {
				Ok(status) if status.success() => {
					debug!(target = "cnc.trigger", command = %command, "task finished");
				}
				Ok(status) => {
					warn!(target = "cnc.trigger", command = %command, %status, "task failed");
				}
				Err(err) => {
					warn!(target = "cnc.trigger", command = %command, error = %err, "task could not start");
				}
			}
		});
	}
}

impl<T: TaskRunner + ?Sized> TaskRunner for Arc<T> {
	fn run(&self, command: &str) {
		(**self).run(command);
	}
}
