//! Device profiles.
//!
//! The session engine is identical for every supported controller family.
//! What differs (realtime bytes, handshake, overrides, stop sequence, and which
//! commands exist at all) is captured in a [`DeviceProfile`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::parser::{GrblLineParser, LineParser};

/// Status report query. Realtime, no line terminator.
pub const STATUS_QUERY: &str = "?";
/// Parser state query.
pub const PARSER_STATE_QUERY: &str = "$G";
/// Feed hold.
pub const FEED_HOLD: u8 = b'!';
/// Cycle start / resume.
pub const CYCLE_START: u8 = b'~';
/// Soft reset (ctrl-x).
pub const SOFT_RESET: u8 = 0x18;

/// Active state reported while the machine is moving.
pub const ACTIVE_STATE_RUN: &str = "Run";
/// Active state reported while a feed hold is in effect.
pub const ACTIVE_STATE_HOLD: &str = "Hold";

const REALTIME_COMMANDS: &[&str] = &["~", "!", "?", "\x18"];

/// Supported controller families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceFamily {
	Grbl,
	Smoothie,
}

impl DeviceFamily {
	pub fn profile(self) -> DeviceProfile {
		match self {
			DeviceFamily::Grbl => DeviceProfile::grbl(),
			DeviceFamily::Smoothie => DeviceProfile::smoothie(),
		}
	}

	/// Creates a fresh parser for this family. Both families share the Grbl reply grammar.
	pub fn parser(self) -> Box<dyn LineParser> {
		Box::new(GrblLineParser::new())
	}
}

impl fmt::Display for DeviceFamily {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.profile().name)
	}
}

impl FromStr for DeviceFamily {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"grbl" => Ok(DeviceFamily::Grbl),
			"smoothie" | "smoothieware" => Ok(DeviceFamily::Smoothie),
			other => Err(format!("unknown controller type: {other}")),
		}
	}
}

/// One step of the init handshake run after the transport opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitStep {
	/// Line to send before pausing, if any.
	pub command: Option<&'static str>,
	/// Settle time before the next step.
	pub pause_after: Duration,
}

impl InitStep {
	pub const fn pause(ms: u64) -> Self {
		Self {
			command: None,
			pause_after: Duration::from_millis(ms),
		}
	}

	pub const fn send(command: &'static str, ms: u64) -> Self {
		Self {
			command: Some(command),
			pause_after: Duration::from_millis(ms),
		}
	}
}

/// Which override an override command targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideKind {
	Feed,
	Spindle,
	Rapid,
}

/// Inclusive percentage range for G-code driven overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverrideRange {
	pub min: i32,
	pub max: i32,
}

impl OverrideRange {
	pub const fn new(min: i32, max: i32) -> Self {
		Self { min, max }
	}

	/// Applies a signed delta. A zero delta snaps back to 100%.
	pub fn apply(&self, current: i32, delta: i32) -> i32 {
		if delta == 0 {
			return 100;
		}
		current.saturating_add(delta).clamp(self.min, self.max)
	}
}

/// How override commands reach the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideStyle {
	/// Single realtime bytes, Grbl 1.1 style.
	Realtime,
	/// `M220`/`M221` lines with session-tracked percentages. Rapid override is unavailable.
	Gcode {
		feed: OverrideRange,
		spindle: OverrideRange,
	},
}

/// What `stop` sends after the workflow returns to idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopStyle {
	/// Feed hold first if the machine is running, then soft reset after `delay`.
	HoldThenReset { delay: Duration },
	/// Cycle start if the machine is held, so queued motion drains.
	ResumeIfHeld,
}

/// Per-family parameters of the session engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
	pub family: DeviceFamily,
	/// Display name, also the prefix of the `<name>:state` event.
	pub name: &'static str,
	/// Firmware default receive buffer, in bytes.
	pub buffer_size: usize,
	/// Bytes held back for periodic `?` and `$G\n` queries.
	pub query_reserve: usize,
	pub realtime_commands: &'static [&'static str],
	pub init_steps: &'static [InitStep],
	pub overrides: OverrideStyle,
	pub stop: StopStyle,
	pub supports_check: bool,
	pub supports_sleep: bool,
	/// Decorate error, alarm, and setting lines from [`crate::codes`].
	pub describe_codes: bool,
}

impl DeviceProfile {
	pub fn grbl() -> Self {
		const STEPS: &[InitStep] = &[InitStep::pause(500)];
		Self {
			family: DeviceFamily::Grbl,
			name: "Grbl",
			buffer_size: 128,
			query_reserve: 8,
			realtime_commands: REALTIME_COMMANDS,
			init_steps: STEPS,
			overrides: OverrideStyle::Realtime,
			stop: StopStyle::HoldThenReset {
				delay: Duration::from_millis(50),
			},
			supports_check: true,
			supports_sleep: true,
			describe_codes: true,
		}
	}

	pub fn smoothie() -> Self {
		const STEPS: &[InitStep] = &[InitStep::pause(500), InitStep::send("version", 50)];
		Self {
			family: DeviceFamily::Smoothie,
			name: "Smoothie",
			buffer_size: 128,
			query_reserve: 8,
			realtime_commands: REALTIME_COMMANDS,
			init_steps: STEPS,
			overrides: OverrideStyle::Gcode {
				feed: OverrideRange::new(10, 200),
				spindle: OverrideRange::new(0, 200),
			},
			stop: StopStyle::ResumeIfHeld,
			supports_check: false,
			supports_sleep: false,
			describe_codes: false,
		}
	}

	/// Conservative streaming budget before the device reports its real buffer.
	pub fn initial_buffer_size(&self) -> usize {
		self.buffer_size.saturating_sub(self.query_reserve)
	}

	/// Streaming budget for a reported receive-buffer capacity.
	pub fn budget_for_rx(&self, rx: u32) -> usize {
		(rx as usize).saturating_sub(self.query_reserve)
	}

	pub fn is_realtime(&self, command: &str) -> bool {
		self.realtime_commands.contains(&command)
	}

	pub fn supports_rapid_override(&self) -> bool {
		matches!(self.overrides, OverrideStyle::Realtime)
	}
}

/// Maps an override request onto Grbl 1.1 realtime bytes.
///
/// Feed and spindle deltas are decomposed into coarse (10%) then fine (1%)
/// steps; zero resets to 100%. Rapid accepts 100 (or 0), 50, and 25.
/// Returns `None` for values the firmware cannot express.
pub fn realtime_override_bytes(kind: OverrideKind, value: i32) -> Option<Vec<u8>> {
	let (reset, coarse_up, coarse_down, fine_up, fine_down) = match kind {
		OverrideKind::Feed => (0x90, 0x91, 0x92, 0x93, 0x94),
		OverrideKind::Spindle => (0x99, 0x9a, 0x9b, 0x9c, 0x9d),
		OverrideKind::Rapid => {
			return match value {
				0 | 100 => Some(vec![0x95]),
				50 => Some(vec![0x96]),
				25 => Some(vec![0x97]),
				_ => None,
			};
		}
	};

	if value == 0 {
		return Some(vec![reset]);
	}
	if value.abs() > 200 {
		return None;
	}

	let coarse = value / 10;
	let fine = value % 10;
	let mut bytes = Vec::with_capacity((coarse.unsigned_abs() + fine.unsigned_abs()) as usize);
	let coarse_byte = if coarse > 0 { coarse_up } else { coarse_down };
	let fine_byte = if fine > 0 { fine_up } else { fine_down };
	bytes.extend(std::iter::repeat_n(coarse_byte, coarse.unsigned_abs() as usize));
	bytes.extend(std::iter::repeat_n(fine_byte, fine.unsigned_abs() as usize));
	Some(bytes)
}
