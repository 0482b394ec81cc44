//! The closed set of commands a session accepts.

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
	Load { name: String, content: String },
	Unload,
	Start,
	Stop,
	Pause,
	Resume,
	Feedhold,
	Cyclestart,
	Check,
	Homing,
	Sleep,
	Unlock,
	Reset,
	FeedOverride(i32),
	SpindleOverride(i32),
	RapidOverride(i32),
	/// One or more newline-separated lines for the feeder.
	Gcode(String),
	LoadMacro { id: String },
	LoadFile { path: String },
	/// Raw bytes, no terminator added.
	Write(String),
	/// A line; the terminator is added unless the text is a realtime command.
	Writeln(String),
}

impl Command {
	/// Wire name, as accepted by [`from_parts`](Self::from_parts).
	pub fn name(&self) -> &'static str {
		match self {
			Command::Load { .. } => "load",
			Command::Unload => "unload",
			Command::Start => "start",
			Command::Stop => "stop",
			Command::Pause => "pause",
			Command::Resume => "resume",
			Command::Feedhold => "feedhold",
			Command::Cyclestart => "cyclestart",
			Command::Check => "check",
			Command::Homing => "homing",
			Command::Sleep => "sleep",
			Command::Unlock => "unlock",
			Command::Reset => "reset",
			Command::FeedOverride(_) => "feedOverride",
			Command::SpindleOverride(_) => "spindleOverride",
			Command::RapidOverride(_) => "rapidOverride",
			Command::Gcode(_) => "gcode",
			Command::LoadMacro { .. } => "loadmacro",
			Command::LoadFile { .. } => "loadfile",
			Command::Write(_) => "write",
			Command::Writeln(_) => "writeln",
		}
	}

	/// Parses a command name and its string arguments.
	pub fn from_parts<S: AsRef<str>>(name: &str, args: &[S]) -> Result<Self> {
		let arg = |index: usize, command: &'static str, what: &str| -> Result<String> {
			args.get(index)
				.map(|a| a.as_ref().to_string())
				.ok_or_else(|| Error::InvalidArgument {
					command,
					reason: format!("missing {what}"),
				})
		};
		let joined = || {
			args.iter()
				.map(AsRef::as_ref)
				.collect::<Vec<&str>>()
				.join(" ")
		};
		let percent = |command: &'static str| -> Result<i32> {
			let raw = arg(0, command, "value")?;
			raw.trim().parse().map_err(|_| Error::InvalidArgument {
				command,
				reason: format!("not an integer: {raw}"),
			})
		};

		let command = match name {
			"load" => Command::Load {
				name: arg(0, "load", "program name")?,
				content: arg(1, "load", "program content")?,
			},
			"unload" => Command::Unload,
			"start" => Command::Start,
			"stop" => Command::Stop,
			"pause" => Command::Pause,
			"resume" => Command::Resume,
			"feedhold" => Command::Feedhold,
			"cyclestart" => Command::Cyclestart,
			"check" => Command::Check,
			"homing" => Command::Homing,
			"sleep" => Command::Sleep,
			"unlock" => Command::Unlock,
			"reset" => Command::Reset,
			"feedOverride" => Command::FeedOverride(percent("feedOverride")?),
			"spindleOverride" => Command::SpindleOverride(percent("spindleOverride")?),
			"rapidOverride" => Command::RapidOverride(percent("rapidOverride")?),
			"gcode" => Command::Gcode(joined()),
			"loadmacro" => Command::LoadMacro {
				id: arg(0, "loadmacro", "macro id")?,
			},
			"loadfile" => Command::LoadFile {
				path: arg(0, "loadfile", "file path")?,
			},
			"write" => Command::Write(joined()),
			"writeln" => Command::Writeln(joined()),
			other => return Err(Error::UnknownCommand(other.to_string())),
		};
		Ok(command)
	}
}
