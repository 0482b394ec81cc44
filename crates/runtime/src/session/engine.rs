//! Synchronous core of a device session.
//!
//! The engine owns the feeder, sender, workflow, action mask, and parser for
//! one open connection. Every input (device line, poll tick, timer, command)
//! is a method call with the current time, so the actor around it decides
//! when things happen and tests can drive it step by step.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use cnc_protocol::codes;
use cnc_protocol::profile::{
	self, ACTIVE_STATE_HOLD, ACTIVE_STATE_RUN, CYCLE_START, FEED_HOLD, PARSER_STATE_QUERY,
	SOFT_RESET, STATUS_QUERY,
};
use cnc_protocol::{
	DeviceEvent, DeviceProfile, LineParser, OverrideKind, OverrideRange, OverrideStyle,
	SessionEvent, StopStyle,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use super::command::Command;
use super::{Outcome, SessionConfig, SessionDeps};
use crate::action_mask::ActionMask;
use crate::error::{Error, Result};
use crate::feeder::Feeder;
use crate::observer::{ObserverId, ObserverRegistry};
use crate::sender::Sender;
use crate::trigger::TriggerAction;
use crate::workflow::{Workflow, WorkflowState};

/// Work scheduled for a later instant.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Timer {
	/// Next step of the init handshake.
	InitStep(usize),
	/// Deferred interactive write (the reset half of a stop).
	Write(Vec<u8>),
}

/// Override percentages tracked for G-code driven overrides.
#[derive(Debug, Default)]
struct Overrides {
	feed: Option<i32>,
	spindle: Option<i32>,
}

pub(crate) struct Engine {
	port: String,
	profile: DeviceProfile,
	parser: Box<dyn LineParser>,
	observers: Arc<ObserverRegistry>,
	deps: SessionDeps,
	out: mpsc::UnboundedSender<Vec<u8>>,

	feeder: Feeder,
	sender: Sender,
	workflow: Workflow,
	mask: ActionMask,
	ready: bool,

	/// Last snapshot broadcast as `<controller>:state`.
	published: Option<Arc<Value>>,
	telemetry_seen: bool,
	overrides: Overrides,

	timers: Vec<(Instant, Timer)>,
	parser_state_interval: Duration,
	last_parser_query: Option<Instant>,
}

impl Engine {
	pub(crate) fn new(
		config: &SessionConfig,
		deps: SessionDeps,
		observers: Arc<ObserverRegistry>,
		out: mpsc::UnboundedSender<Vec<u8>>,
	) -> Self {
		let profile = config.profile.clone();
		Self {
			port: config.port.clone(),
			parser: profile.family.parser(),
			sender: Sender::new(profile.initial_buffer_size()),
			profile,
			observers,
			deps,
			out,
			feeder: Feeder::new(),
			workflow: Workflow::new(),
			mask: ActionMask::default(),
			ready: false,
			published: None,
			telemetry_seen: false,
			overrides: Overrides::default(),
			timers: Vec::new(),
			parser_state_interval: config.parser_state_interval,
			last_parser_query: None,
		}
	}

	/// Resets per-connection state and begins the init handshake.
	pub(crate) fn start(&mut self, now: Instant) {
		self.stop_workflow();
		self.mask.clear();
		self.unload();
		self.run_init_step(0, now);
	}

	pub(crate) fn is_ready(&self) -> bool {
		self.ready
	}

	#[cfg(test)]
	pub(crate) fn mask(&self) -> &ActionMask {
		&self.mask
	}

	pub(crate) fn feeder(&self) -> &Feeder {
		&self.feeder
	}

	pub(crate) fn sender(&self) -> &Sender {
		&self.sender
	}

	pub(crate) fn workflow_state(&self) -> WorkflowState {
		self.workflow.state()
	}

	/// Latest decoded telemetry.
	pub(crate) fn telemetry(&self) -> &Arc<Value> {
		self.parser.state()
	}

	/// Brings a newly attached observer up to date.
	pub(crate) fn greet(&self, id: ObserverId) {
		if self.published.is_some() || self.telemetry_seen {
			self.observers.send_to(id, &self.state_event(Arc::clone(self.parser.state())));
		}
		self.observers
			.send_to(id, &SessionEvent::Sender(self.sender.status()));
	}

	/// Feeds one raw line from the transport.
	pub(crate) fn on_line(&mut self, line: &str) {
		trace!(target = "cnc.session", port = %self.port, "< {line}");
		if let Some(event) = self.parser.parse(line) {
			self.handle_event(event);
		}
	}

	fn handle_event(&mut self, event: DeviceEvent) {
		match event {
			DeviceEvent::Status { raw, buf } => {
				self.telemetry_seen = true;
				let echo = self.mask.status_received();
				if self.workflow.is_idle() && self.sender.data_length() == 0 {
					if let Some(rx) = buf.and_then(|b| b.rx) {
						let budget = self.profile.budget_for_rx(rx);
						if self.sender.raise_buffer_size(budget) {
							debug!(target = "cnc.session", port = %self.port, buffer_size = budget, "raised streaming buffer");
						}
					}
				}
				if echo {
					self.read(raw);
				}
			}
			DeviceEvent::Ok { raw } => {
				if let Some(echo) = self.mask.parser_reply_received() {
					if echo {
						self.read(raw);
					}
					return;
				}
				if self.ack_goes_to_sender() {
					self.sender.ack();
					if self.sender.is_finished() {
						info!(target = "cnc.session", port = %self.port, name = %self.sender.name(), total = self.sender.total(), "program complete");
					}
				} else {
					self.read(raw);
					self.feeder.ack();
				}
				self.pump();
			}
			DeviceEvent::Error { raw, message } => {
				if let Some(echo) = self.mask.parser_reply_received() {
					if echo {
						self.read(self.describe_error(&raw, &message));
					}
					return;
				}
				let described = self.describe_error(&raw, &message);
				if self.ack_goes_to_sender() {
					if let Some((number, line)) = self.sender.current_line() {
						let source = format!("> {line} (line={number})");
						warn!(target = "cnc.session", port = %self.port, line = number, error = %described, "program line rejected");
						self.read(source);
					}
					self.read(described);
					self.sender.ack();
				} else {
					self.read(described);
					self.feeder.ack();
				}
				self.pump();
			}
			DeviceEvent::Alarm { raw, message } => {
				let described = self
					.profile
					.describe_codes
					.then(|| codes::describe_alarm(&message))
					.flatten()
					.unwrap_or(raw);
				warn!(target = "cnc.session", port = %self.port, alarm = %described, "device alarm");
				self.read(described);
			}
			DeviceEvent::ParserState { raw } => {
				self.telemetry_seen = true;
				if self.mask.parser_state_received() {
					self.read(raw);
				}
			}
			DeviceEvent::Settings {
				raw,
				setting,
				value,
				description,
			} => {
				let described = match description {
					None if self.profile.describe_codes => {
						codes::describe_setting(&setting, &value).unwrap_or(raw)
					}
					_ => raw,
				};
				self.read(described);
			}
			DeviceEvent::Startup { raw, version } => {
				info!(target = "cnc.session", port = %self.port, version = %version, "controller started");
				self.read(raw);
				self.mask.clear();
				self.overrides = Overrides::default();
				// A reset empties the device buffer: nothing in flight will be acknowledged.
				self.stop_workflow();
				if self.sender.in_flight() > 0 {
					self.sender.rewind();
				}
				self.feeder.ack();
				self.pump();
			}
			DeviceEvent::Parameters { raw }
			| DeviceEvent::Feedback { raw }
			| DeviceEvent::Version { raw }
			| DeviceEvent::Others { raw } => self.read(raw),
		}
	}

	/// One tick of the polling loop.
	pub(crate) fn poll(&mut self, now: Instant) {
		if self.feeder.peek().is_some() {
			self.broadcast(SessionEvent::Feeder(self.feeder.status()));
		}
		if self.sender.peek().is_some() {
			self.broadcast(SessionEvent::Sender(self.sender.status()));
		}

		let current = self.parser.state();
		let changed = match &self.published {
			Some(published) => !Arc::ptr_eq(published, current),
			None => true,
		};
		if changed {
			let snapshot = Arc::clone(current);
			self.published = Some(Arc::clone(&snapshot));
			self.broadcast(self.state_event(snapshot));
		}

		if !self.ready {
			return;
		}

		if self.mask.begin_status_query() {
			self.write_raw(STATUS_QUERY.as_bytes());
		}

		let throttled = self
			.last_parser_query
			.is_some_and(|last| now.saturating_duration_since(last) < self.parser_state_interval);
		if !throttled && self.mask.begin_parser_query() {
			self.last_parser_query = Some(now);
			self.write_raw(format!("{PARSER_STATE_QUERY}\n").as_bytes());
		}
	}

	/// Earliest scheduled timer.
	pub(crate) fn next_deadline(&self) -> Option<Instant> {
		self.timers.iter().map(|(at, _)| *at).min()
	}

	/// Runs every timer due at `now`, oldest deadline first.
	pub(crate) fn fire_due(&mut self, now: Instant) {
		loop {
			let due = self
				.timers
				.iter()
				.enumerate()
				.filter(|(_, (at, _))| *at <= now)
				.min_by_key(|(_, (at, _))| *at)
				.map(|(index, _)| index);
			let Some(index) = due else {
				return;
			};
			let (at, timer) = self.timers.remove(index);
			match timer {
				Timer::InitStep(step) => self.run_init_step(step, at),
				Timer::Write(bytes) => self.write_bytes(&bytes),
			}
		}
	}

	pub(crate) fn dispatch(
		&mut self,
		origin: Option<ObserverId>,
		command: Command,
		now: Instant,
	) -> Result<Outcome> {
		if !self.ready {
			return Err(Error::NotReady(self.port.clone()));
		}
		debug!(target = "cnc.session", port = %self.port, command = command.name(), origin = ?origin, "dispatch");

		match command {
			Command::Load { name, content } => return self.load(&name, &content),
			Command::Unload => self.unload(),
			Command::Start => {
				self.fire_trigger("gcode:start");
				if self.workflow.start() {
					self.sender.rewind();
					self.broadcast_workflow();
				}
				self.feeder.clear();
				self.stream_program();
			}
			Command::Stop => {
				self.fire_trigger("gcode:stop");
				self.stop_workflow();
				let active_state = self.active_state();
				match self.profile.stop {
					StopStyle::HoldThenReset { delay } => {
						if active_state == ACTIVE_STATE_RUN {
							self.write_bytes(&[FEED_HOLD]);
							self.timers.push((now + delay, Timer::Write(vec![SOFT_RESET])));
						} else {
							self.write_bytes(&[SOFT_RESET]);
						}
					}
					StopStyle::ResumeIfHeld => {
						if active_state == ACTIVE_STATE_HOLD {
							self.write_bytes(&[CYCLE_START]);
						}
					}
				}
			}
			Command::Pause => {
				self.fire_trigger("gcode:pause");
				self.pause_workflow();
				self.write_bytes(&[FEED_HOLD]);
			}
			Command::Resume => {
				self.fire_trigger("gcode:resume");
				self.write_bytes(&[CYCLE_START]);
				self.resume_workflow();
			}
			Command::Feedhold => {
				self.fire_trigger("feedhold");
				self.pause_workflow();
				self.write_bytes(&[FEED_HOLD]);
			}
			Command::Cyclestart => {
				self.fire_trigger("cyclestart");
				self.write_bytes(&[CYCLE_START]);
				self.resume_workflow();
			}
			Command::Check => {
				if !self.profile.supports_check {
					return Ok(self.unsupported("check"));
				}
				self.writeln("$C");
			}
			Command::Homing => {
				self.fire_trigger("homing");
				self.writeln("$H");
			}
			Command::Sleep => {
				self.fire_trigger("sleep");
				if !self.profile.supports_sleep {
					return Ok(self.unsupported("sleep"));
				}
				self.writeln("$SLP");
			}
			Command::Unlock => self.writeln("$X"),
			Command::Reset => {
				self.stop_workflow();
				self.write_bytes(&[SOFT_RESET]);
			}
			Command::FeedOverride(value) => {
				return self.apply_override(OverrideKind::Feed, value, "feedOverride");
			}
			Command::SpindleOverride(value) => {
				return self.apply_override(OverrideKind::Spindle, value, "spindleOverride");
			}
			Command::RapidOverride(value) => {
				return self.apply_override(OverrideKind::Rapid, value, "rapidOverride");
			}
			Command::Gcode(text) => self.gcode(&text),
			Command::LoadMacro { .. } | Command::LoadFile { .. } => {
				return Err(Error::InvalidArgument {
					command: command.name(),
					reason: "lookup must be resolved before dispatch".into(),
				});
			}
			Command::Write(data) => self.write(&data),
			Command::Writeln(data) => self.writeln(&data),
		}
		Ok(Outcome::Done)
	}

	/// Fires the trigger rules registered for `event`.
	pub(crate) fn fire_trigger(&mut self, event: &str) {
		for action in self.deps.triggers.resolve(event) {
			match action {
				TriggerAction::System(command) => {
					debug!(target = "cnc.trigger", event, command = %command, "system trigger");
					self.deps.tasks.run(&command);
				}
				TriggerAction::Gcode(commands) => {
					debug!(target = "cnc.trigger", event, commands = %commands, "gcode trigger");
					self.gcode(&commands);
				}
			}
		}
	}

	fn load(&mut self, name: &str, content: &str) -> Result<Outcome> {
		let total = self
			.sender
			.load(name, content)
			.map_err(|source| Error::InvalidProgram {
				name: name.to_string(),
				source,
			})?;
		self.fire_trigger("gcode:load");
		debug!(
			target = "cnc.session",
			port = %self.port,
			name,
			size = content.len(),
			total,
			"program loaded"
		);
		self.stop_workflow();
		self.broadcast(SessionEvent::Sender(self.sender.status()));
		Ok(Outcome::Loaded {
			name: name.to_string(),
			total,
		})
	}

	fn unload(&mut self) {
		self.stop_workflow();
		self.sender.unload();
		self.fire_trigger("gcode:unload");
	}

	fn gcode(&mut self, text: &str) {
		let trimmed = text.trim();
		if trimmed == STATUS_QUERY || trimmed == PARSER_STATE_QUERY {
			self.writeln(trimmed);
			return;
		}
		self.feeder.feed(text.split('\n'));
		self.pump();
	}

	fn apply_override(&mut self, kind: OverrideKind, value: i32, command: &'static str) -> Result<Outcome> {
		if kind == OverrideKind::Rapid && !self.profile.supports_rapid_override() {
			return Ok(self.unsupported(command));
		}
		match self.profile.overrides {
			OverrideStyle::Realtime => {
				let bytes = profile::realtime_override_bytes(kind, value).ok_or_else(|| {
					Error::InvalidArgument {
						command,
						reason: format!("override value out of range: {value}"),
					}
				})?;
				self.write_bytes(&bytes);
			}
			OverrideStyle::Gcode { feed, spindle } => {
				let (range, key, code): (OverrideRange, &str, &str) = match kind {
					OverrideKind::Feed => (feed, "ovF", "M220"),
					OverrideKind::Spindle => (spindle, "ovS", "M221"),
					OverrideKind::Rapid => return Ok(self.unsupported(command)),
				};
				// The device's own report wins; the tracked value covers the gap until one arrives.
				let current = self
					.reported_override(key)
					.or(match kind {
						OverrideKind::Feed => self.overrides.feed,
						_ => self.overrides.spindle,
					})
					.unwrap_or(100);
				let next = range.apply(current, value);
				match kind {
					OverrideKind::Feed => self.overrides.feed = Some(next),
					_ => self.overrides.spindle = Some(next),
				}
				self.gcode(&format!("{code}S{next}"));
			}
		}
		Ok(Outcome::Done)
	}

	fn reported_override(&self, key: &str) -> Option<i32> {
		self.parser.state()["status"][key]
			.as_i64()
			.and_then(|n| i32::try_from(n).ok())
	}

	fn unsupported(&self, command: &'static str) -> Outcome {
		warn!(target = "cnc.session", port = %self.port, controller = self.profile.name, command, "command not supported");
		Outcome::Unsupported
	}

	/// An acknowledgement belongs to the program while program bytes are in
	/// flight and no interactive line is waiting.
	fn ack_goes_to_sender(&self) -> bool {
		self.sender.in_flight() > 0 && !self.feeder.is_pending()
	}

	/// Moves whichever queue may transmit next.
	///
	/// Interactive lines go first but only once the device has drained all
	/// program bytes, so each acknowledgement maps to exactly one owner.
	fn pump(&mut self) {
		if self.feeder.is_pending() {
			return;
		}
		if !self.feeder.is_empty() {
			if self.sender.in_flight() == 0 {
				self.feeder_next();
			}
			return;
		}
		if self.workflow.is_running() {
			self.stream_program();
		}
	}

	fn feeder_next(&mut self) {
		let Some(line) = self.feeder.next() else {
			return;
		};
		self.broadcast(SessionEvent::Write(line.clone()));
		trace!(target = "cnc.session", port = %self.port, "> {line}");
		self.write_raw(format!("{line}\n").as_bytes());
	}

	fn stream_program(&mut self) {
		if !self.workflow.is_running() {
			error!(target = "cnc.session", port = %self.port, state = self.workflow.state().as_str(), "unexpected workflow state, program write dropped");
			return;
		}
		if self.feeder.is_pending() || !self.feeder.is_empty() {
			return;
		}
		for line in self.sender.next() {
			trace!(target = "cnc.session", port = %self.port, "> {line}");
			self.write_raw(format!("{line}\n").as_bytes());
		}
	}

	fn stop_workflow(&mut self) {
		if self.workflow.stop() {
			self.sender.rewind();
			self.broadcast_workflow();
		}
	}

	fn pause_workflow(&mut self) {
		if self.workflow.pause() {
			self.broadcast_workflow();
		}
	}

	fn resume_workflow(&mut self) {
		if self.workflow.resume() {
			self.broadcast_workflow();
			self.stream_program();
		}
	}

	fn broadcast_workflow(&self) {
		debug!(target = "cnc.session", port = %self.port, state = self.workflow.state().as_str(), "workflow");
		self.broadcast(SessionEvent::Workflow(self.workflow.state()));
	}

	fn run_init_step(&mut self, step: usize, now: Instant) {
		let Some(init) = self.profile.init_steps.get(step).copied() else {
			self.ready = true;
			info!(target = "cnc.session", port = %self.port, controller = self.profile.name, "controller ready");
			return;
		};
		if let Some(command) = init.command {
			trace!(target = "cnc.session", port = %self.port, "> {command}");
			self.write_raw(format!("{command}\n").as_bytes());
		}
		self.timers
			.push((now + init.pause_after, Timer::InitStep(step + 1)));
	}

	/// Interactive write: echoed to observers, and `?`/`$G` mark their replies
	/// for echo. A query is not sent again while one is outstanding.
	fn write(&mut self, data: &str) {
		let command = data.trim();
		if command == STATUS_QUERY {
			self.mask.reply_status_report = true;
			if !self.mask.begin_status_query() {
				return;
			}
		} else if command == PARSER_STATE_QUERY {
			self.mask.reply_parser_state = true;
			if !self.mask.begin_parser_query() {
				return;
			}
		}
		self.write_bytes(data.as_bytes());
	}

	fn writeln(&mut self, data: &str) {
		if self.profile.is_realtime(data) {
			self.write(data);
		} else {
			self.write(&format!("{data}\n"));
		}
	}

	/// Echoed write with no query bookkeeping.
	fn write_bytes(&mut self, bytes: &[u8]) {
		let shown = display_bytes(bytes);
		trace!(target = "cnc.session", port = %self.port, "> {shown}");
		self.broadcast(SessionEvent::Write(shown));
		self.write_raw(bytes);
	}

	fn write_raw(&self, bytes: &[u8]) {
		if self.out.send(bytes.to_vec()).is_err() {
			error!(target = "cnc.session", port = %self.port, "transport writer is gone, write dropped");
		}
	}

	fn read(&self, line: String) {
		self.broadcast(SessionEvent::Read(line));
	}

	fn broadcast(&self, event: SessionEvent) {
		self.observers.broadcast(&event);
	}

	fn state_event(&self, state: Arc<Value>) -> SessionEvent {
		SessionEvent::State {
			controller: self.profile.name,
			state,
		}
	}

	fn active_state(&self) -> String {
		self.parser.state()["status"]["activeState"]
			.as_str()
			.unwrap_or_default()
			.to_string()
	}

	fn describe_error(&self, raw: &str, message: &str) -> String {
		self.profile
			.describe_codes
			.then(|| codes::describe_error(message))
			.flatten()
			.unwrap_or_else(|| raw.to_string())
	}
}

/// Printable form of outgoing bytes; control and non-ASCII bytes are escaped.
pub(crate) fn display_bytes(bytes: &[u8]) -> String {
	let mut shown = String::with_capacity(bytes.len());
	for &byte in bytes {
		if byte == b'\n' || (byte.is_ascii() && !byte.is_ascii_control()) {
			shown.push(byte as char);
		} else {
			let _ = write!(shown, "\\x{byte:02x}");
		}
	}
	shown
}
