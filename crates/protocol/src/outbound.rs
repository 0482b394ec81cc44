//! Events a device session broadcasts to its observers.

use std::borrow::Cow;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};

/// Payload of `serialport:open`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
	pub port: String,
	pub baudrate: u32,
	pub controller_type: String,
	pub inuse: bool,
}

/// Payload of `serialport:close`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseInfo {
	pub port: String,
	pub inuse: bool,
}

/// Payload of `serialport:error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
	pub port: String,
	pub err: String,
}

/// Payload of `feeder:status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeederStatus {
	pub queue: usize,
	pub pending: bool,
	pub next: Option<String>,
}

/// Payload of `sender:status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderStatus {
	/// Flow-control discipline, e.g. `"char-counting"`.
	pub sp: &'static str,
	pub name: String,
	/// Program size in bytes.
	pub size: usize,
	pub total: usize,
	pub sent: usize,
	pub received: usize,
	pub buffer_size: usize,
	pub data_length: usize,
}

/// Observable workflow states.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowState {
	#[default]
	Idle,
	Paused,
	Running,
}

impl WorkflowState {
	pub fn as_str(self) -> &'static str {
		match self {
			WorkflowState::Idle => "idle",
			WorkflowState::Paused => "paused",
			WorkflowState::Running => "running",
		}
	}
}

/// One broadcast event.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
	Open(OpenInfo),
	Close(CloseInfo),
	Error(ErrorInfo),
	/// Line from the device, possibly decorated.
	Read(String),
	/// Echo of outgoing traffic.
	Write(String),
	/// Telemetry snapshot, published as `<controller>:state`.
	State {
		controller: &'static str,
		state: Arc<Value>,
	},
	Feeder(FeederStatus),
	Sender(SenderStatus),
	Workflow(WorkflowState),
}

impl SessionEvent {
	/// Event name on the observer wire.
	pub fn name(&self) -> Cow<'static, str> {
		match self {
			SessionEvent::Open(_) => Cow::Borrowed("serialport:open"),
			SessionEvent::Close(_) => Cow::Borrowed("serialport:close"),
			SessionEvent::Error(_) => Cow::Borrowed("serialport:error"),
			SessionEvent::Read(_) => Cow::Borrowed("serialport:read"),
			SessionEvent::Write(_) => Cow::Borrowed("serialport:write"),
			SessionEvent::State { controller, .. } => Cow::Owned(format!("{controller}:state")),
			SessionEvent::Feeder(_) => Cow::Borrowed("feeder:status"),
			SessionEvent::Sender(_) => Cow::Borrowed("sender:status"),
			SessionEvent::Workflow(_) => Cow::Borrowed("workflow:state"),
		}
	}

	/// Event payload as JSON.
	pub fn payload(&self) -> Value {
		let value = match self {
			SessionEvent::Open(info) => serde_json::to_value(info),
			SessionEvent::Close(info) => serde_json::to_value(info),
			SessionEvent::Error(info) => serde_json::to_value(info),
			SessionEvent::Read(line) | SessionEvent::Write(line) => Ok(json!(line)),
			SessionEvent::State { state, .. } => Ok((**state).clone()),
			SessionEvent::Feeder(status) => serde_json::to_value(status),
			SessionEvent::Sender(status) => serde_json::to_value(status),
			SessionEvent::Workflow(state) => Ok(json!(state.as_str())),
		};
		value.unwrap_or(Value::Null)
	}

	/// `{"event": name, "data": payload}`.
	pub fn to_json(&self) -> Value {
		json!({ "event": self.name(), "data": self.payload() })
	}
}
