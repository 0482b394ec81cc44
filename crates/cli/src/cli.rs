use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use cnc_protocol::DeviceFamily;

/// Controller family (CLI wrapper for cnc_protocol::DeviceFamily)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ControllerArg {
	/// Grbl 0.9 / 1.1
	#[default]
	Grbl,
	/// Smoothieware
	Smoothie,
}

impl From<ControllerArg> for DeviceFamily {
	fn from(arg: ControllerArg) -> Self {
		match arg {
			ControllerArg::Grbl => DeviceFamily::Grbl,
			ControllerArg::Smoothie => DeviceFamily::Smoothie,
		}
	}
}

#[derive(Parser, Debug)]
#[command(name = "cncd")]
#[command(about = "Run a CNC controller session: device events on stdout, commands on stdin")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug, -vvv device traffic)
	#[arg(short, long, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Device node, tcp://host:port serial bridge, or ws:// tunnel
	#[arg(short, long, value_name = "ENDPOINT")]
	pub port: String,

	/// Baud rate reported to clients; set the line itself with stty
	#[arg(short, long, default_value_t = 115_200)]
	pub baudrate: u32,

	/// Controller firmware family
	#[arg(short, long, value_enum, default_value = "grbl")]
	pub controller: ControllerArg,

	/// Config file (defaults to <config dir>/cncd/config.json when present)
	#[arg(long, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Start with the port closed; use `open` on the console
	#[arg(long)]
	pub no_open: bool,

	/// Run `system` event triggers through `sh -c`
	#[arg(long)]
	pub allow_system_triggers: bool,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults() {
		let cli = Cli::try_parse_from(["cncd", "--port", "/dev/ttyUSB0"]).unwrap();
		assert_eq!(cli.port, "/dev/ttyUSB0");
		assert_eq!(cli.baudrate, 115_200);
		assert_eq!(cli.controller, ControllerArg::Grbl);
		assert_eq!(cli.verbose, 0);
		assert!(!cli.no_open);
		assert!(!cli.allow_system_triggers);
	}

	#[test]
	fn smoothie_over_tcp() {
		let cli = Cli::try_parse_from([
			"cncd",
			"-p",
			"tcp://10.0.0.5:2000",
			"-c",
			"smoothie",
			"-b",
			"250000",
			"-vv",
		])
		.unwrap();
		assert_eq!(DeviceFamily::from(cli.controller), DeviceFamily::Smoothie);
		assert_eq!(cli.baudrate, 250_000);
		assert_eq!(cli.verbose, 2);
	}

	#[test]
	fn port_is_required() {
		assert!(Cli::try_parse_from(["cncd"]).is_err());
		assert!(Cli::try_parse_from(["cncd", "-p", "x", "-c", "marlin"]).is_err());
	}
}
