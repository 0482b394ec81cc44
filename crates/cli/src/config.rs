//! `cncd` config file.
//!
//! JSON with camelCase keys. Every key is optional:
//!
//! ```json
//! {
//!   "macros": [{ "id": "probe", "name": "Probe Z", "content": "G38.2 Z-10 F50" }],
//!   "events": [{ "event": "gcode:start", "trigger": "gcode", "commands": "G21" }],
//!   "watchDirectory": "/srv/gcode",
//!   "pollIntervalMs": 250,
//!   "parserStateIntervalMs": 500
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cnc_runtime::{
	EventTrigger, FsFileStore, Macro, SessionConfig, SessionDeps, StaticMacroStore, TaskRunner,
	TriggerRule,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
	pub macros: Vec<Macro>,
	pub events: Vec<TriggerRule>,
	/// Root for `loadfile`; without it `loadfile` always fails.
	pub watch_directory: Option<PathBuf>,
	pub poll_interval_ms: Option<u64>,
	pub parser_state_interval_ms: Option<u64>,
}

impl Config {
	/// `<config dir>/cncd/config.json`.
	pub fn default_path() -> Option<PathBuf> {
		dirs::config_dir().map(|dir| dir.join("cncd").join("config.json"))
	}

	pub fn load(path: &Path) -> Result<Self> {
		let raw = std::fs::read_to_string(path)
			.with_context(|| format!("reading config {}", path.display()))?;
		let config = serde_json::from_str(&raw)
			.with_context(|| format!("parsing config {}", path.display()))?;
		debug!(target = "cnc.config", path = %path.display(), "config loaded");
		Ok(config)
	}

	/// An explicit path must exist; the default path is used only if present.
	pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
		if let Some(path) = explicit {
			return Self::load(path);
		}
		match Self::default_path() {
			Some(path) if path.is_file() => Self::load(&path),
			_ => Ok(Self::default()),
		}
	}

	pub fn apply(&self, mut session: SessionConfig) -> SessionConfig {
		if let Some(ms) = self.poll_interval_ms {
			session = session.with_poll_interval(Duration::from_millis(ms.max(1)));
		}
		if let Some(ms) = self.parser_state_interval_ms {
			session = session.with_parser_state_interval(Duration::from_millis(ms));
		}
		session
	}

	pub fn deps(&self, tasks: Arc<dyn TaskRunner>) -> SessionDeps {
		let mut deps = SessionDeps::default()
			.with_macros(Arc::new(StaticMacroStore::new(self.macros.iter().cloned())))
			.with_tasks(tasks)
			.with_triggers(EventTrigger::new(self.events.clone()));
		if let Some(root) = &self.watch_directory {
			deps = deps.with_files(Arc::new(FsFileStore::new(root.clone())));
		}
		deps
	}
}
