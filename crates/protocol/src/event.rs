//! Typed events produced by a [`LineParser`](crate::LineParser).

/// Receive-buffer fields carried by a status report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferReport {
	/// Free planner blocks.
	pub planner: Option<u32>,
	/// Free bytes in the serial receive buffer.
	pub rx: Option<u32>,
}

/// One decoded line from the device.
///
/// Every variant keeps the raw line so it can be echoed to observers verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
	/// Realtime status report (`<Idle|MPos:...>`).
	Status {
		raw: String,
		buf: Option<BufferReport>,
	},
	/// Line accepted.
	Ok { raw: String },
	/// Line rejected; `message` is the code or text after `error:`.
	Error { raw: String, message: String },
	/// Alarm state entered; `message` is the code or text after `ALARM:`.
	Alarm { raw: String, message: String },
	/// G-code parser modal state (`[GC:G0 G54 ...]`).
	ParserState { raw: String },
	/// Coordinate offsets and probe results (`[G54:...]`, `[PRB:...]`).
	Parameters { raw: String },
	/// Setting line (`$110=500.000`).
	Settings {
		raw: String,
		setting: String,
		value: String,
		description: Option<String>,
	},
	/// Boot banner, printed on power-up and after every soft reset.
	Startup { raw: String, version: String },
	/// Bracketed feedback messages (`[MSG:...]`, help text).
	Feedback { raw: String },
	/// Firmware build banner answering a `version` probe.
	Version { raw: String },
	/// Anything else.
	Others { raw: String },
}

impl DeviceEvent {
	/// The line as received.
	pub fn raw(&self) -> &str {
		match self {
			DeviceEvent::Status { raw, .. }
			| DeviceEvent::Ok { raw }
			| DeviceEvent::Error { raw, .. }
			| DeviceEvent::Alarm { raw, .. }
			| DeviceEvent::ParserState { raw }
			| DeviceEvent::Parameters { raw }
			| DeviceEvent::Settings { raw, .. }
			| DeviceEvent::Startup { raw, .. }
			| DeviceEvent::Feedback { raw }
			| DeviceEvent::Version { raw }
			| DeviceEvent::Others { raw } => raw,
		}
	}

	/// Short event name, used in log fields.
	pub fn kind(&self) -> &'static str {
		match self {
			DeviceEvent::Status { .. } => "status",
			DeviceEvent::Ok { .. } => "ok",
			DeviceEvent::Error { .. } => "error",
			DeviceEvent::Alarm { .. } => "alarm",
			DeviceEvent::ParserState { .. } => "parserstate",
			DeviceEvent::Parameters { .. } => "parameters",
			DeviceEvent::Settings { .. } => "settings",
			DeviceEvent::Startup { .. } => "startup",
			DeviceEvent::Feedback { .. } => "feedback",
			DeviceEvent::Version { .. } => "version",
			DeviceEvent::Others { .. } => "others",
		}
	}
}
