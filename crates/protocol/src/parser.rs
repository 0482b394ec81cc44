//! Line parser collaborator.
//!
//! The session feeds every received line to a [`LineParser`] and reacts to the
//! typed [`DeviceEvent`] it returns. The parser also owns the decoded telemetry
//! snapshot; a new `Arc` is allocated only when the decoded content changes, so
//! callers detect changes with [`Arc::ptr_eq`].

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::{Map, Value, json};

use crate::event::{BufferReport, DeviceEvent};

/// Decodes raw device lines into typed events.
pub trait LineParser: Send {
	/// Parses one line (without terminator). Blank lines yield `None`.
	fn parse(&mut self, line: &str) -> Option<DeviceEvent>;

	/// Latest decoded telemetry.
	fn state(&self) -> &Arc<Value>;
}

static STATUS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^<(.+)>$").expect("valid regex"));
static ERROR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^error:(.*)$").expect("valid regex"));
static ALARM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^ALARM:(.*)$").expect("valid regex"));
static PARSER_STATE: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"^\[(?:GC:)?((?:[a-zA-Z][0-9]+(?:\.[0-9]*)?\s*)+)\]$").expect("valid regex")
});
static PARAMETERS: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"^\[(G54|G55|G56|G57|G58|G59|G28|G30|G92|TLO|PRB):.+\]$").expect("valid regex")
});
static FEEDBACK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\[.*\]$").expect("valid regex"));
static SETTINGS: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"^(\$[^=\s]+)=(\S*)\s*(?:\((.*)\))?\s*$").expect("valid regex")
});
static STARTUP: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^Grbl\s+(\S+)").expect("valid regex"));
static VERSION: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^Build version:").expect("valid regex"));

/// Parser for the Grbl reply grammar (0.9 and 1.1), also spoken by Smoothieware.
#[derive(Debug)]
pub struct GrblLineParser {
	state: Arc<Value>,
}

impl Default for GrblLineParser {
	fn default() -> Self {
		Self::new()
	}
}

impl GrblLineParser {
	pub fn new() -> Self {
		Self {
			state: Arc::new(json!({
				"status": {
					"activeState": "",
					"mpos": { "x": "0.000", "y": "0.000", "z": "0.000" },
					"wpos": { "x": "0.000", "y": "0.000", "z": "0.000" },
				},
				"parserstate": {
					"modal": [],
					"tool": "",
					"feedrate": "",
					"spindle": "",
				},
			})),
		}
	}

	fn replace_section(&mut self, key: &str, section: Value) {
		if self.state.get(key) == Some(&section) {
			return;
		}
		let mut next = (*self.state).clone();
		if let Value::Object(map) = &mut next {
			map.insert(key.to_string(), section);
		}
		self.state = Arc::new(next);
	}

	fn parse_status(&mut self, raw: &str, body: &str) -> DeviceEvent {
		let fields = split_status_fields(body);
		let mut status = Map::new();
		let mut buf: Option<BufferReport> = None;

		for (key, values) in &fields {
			match key.as_str() {
				"" => {
					let state = values.first().map(String::as_str).unwrap_or("");
					let (active, sub) = match state.split_once(':') {
						Some((active, sub)) => (active, Some(sub)),
						None => (state, None),
					};
					status.insert("activeState".into(), json!(active));
					if let Some(sub) = sub {
						status.insert("subState".into(), json!(sub));
					}
				}
				"MPos" => {
					status.insert("mpos".into(), axes(values));
				}
				"WPos" => {
					status.insert("wpos".into(), axes(values));
				}
				"WCO" => {
					status.insert("wco".into(), axes(values));
				}
				"Bf" => {
					let report = buf.get_or_insert_with(BufferReport::default);
					report.planner = values.first().and_then(|v| v.parse().ok());
					report.rx = values.get(1).and_then(|v| v.parse().ok());
				}
				"Buf" => {
					buf.get_or_insert_with(BufferReport::default).planner =
						values.first().and_then(|v| v.parse().ok());
				}
				"RX" => {
					buf.get_or_insert_with(BufferReport::default).rx =
						values.first().and_then(|v| v.parse().ok());
				}
				"FS" => {
					status.insert("feedrate".into(), json!(values.first()));
					status.insert("spindle".into(), json!(values.get(1)));
				}
				"F" => {
					status.insert("feedrate".into(), json!(values.first()));
				}
				"Ov" => {
					for (name, value) in ["ovF", "ovR", "ovS"].iter().zip(values) {
						if let Ok(n) = value.parse::<i64>() {
							status.insert((*name).into(), json!(n));
						}
					}
				}
				"Pn" => {
					status.insert("pins".into(), json!(values.join(",")));
				}
				"Ln" => {
					status.insert("line".into(), json!(values.first()));
				}
				_ => {}
			}
		}

		if let Some(report) = buf {
			status.insert(
				"buf".into(),
				json!({ "planner": report.planner, "rx": report.rx }),
			);
		}

		self.replace_section("status", Value::Object(status));
		DeviceEvent::Status {
			raw: raw.to_string(),
			buf,
		}
	}

	fn parse_parser_state(&mut self, raw: &str, words: &str) -> DeviceEvent {
		let mut modal = Vec::new();
		let mut tool = String::new();
		let mut feedrate = String::new();
		let mut spindle = String::new();

		for word in words.split_whitespace() {
			let (letter, value) = word.split_at(1);
			match letter.to_ascii_uppercase().as_str() {
				"G" | "M" => modal.push(word.to_ascii_uppercase()),
				"T" => tool = value.to_string(),
				"F" => feedrate = value.to_string(),
				"S" => spindle = value.to_string(),
				_ => {}
			}
		}

		self.replace_section(
			"parserstate",
			json!({
				"modal": modal,
				"tool": tool,
				"feedrate": feedrate,
				"spindle": spindle,
			}),
		);
		DeviceEvent::ParserState {
			raw: raw.to_string(),
		}
	}
}

impl LineParser for GrblLineParser {
	fn parse(&mut self, line: &str) -> Option<DeviceEvent> {
		let raw = line.trim();
		if raw.is_empty() {
			return None;
		}

		let event = if raw == "ok" {
			DeviceEvent::Ok {
				raw: raw.to_string(),
			}
		} else if let Some(caps) = STATUS.captures(raw) {
			let body = caps[1].to_string();
			return Some(self.parse_status(raw, &body));
		} else if let Some(caps) = ERROR.captures(raw) {
			DeviceEvent::Error {
				raw: raw.to_string(),
				message: caps[1].trim().to_string(),
			}
		} else if let Some(caps) = ALARM.captures(raw) {
			DeviceEvent::Alarm {
				raw: raw.to_string(),
				message: caps[1].trim().to_string(),
			}
		} else if let Some(caps) = PARSER_STATE.captures(raw) {
			let words = caps[1].to_string();
			return Some(self.parse_parser_state(raw, &words));
		} else if PARAMETERS.is_match(raw) {
			DeviceEvent::Parameters {
				raw: raw.to_string(),
			}
		} else if FEEDBACK.is_match(raw) {
			DeviceEvent::Feedback {
				raw: raw.to_string(),
			}
		} else if let Some(caps) = SETTINGS.captures(raw) {
			DeviceEvent::Settings {
				raw: raw.to_string(),
				setting: caps[1].to_string(),
				value: caps[2].to_string(),
				description: caps.get(3).map(|m| m.as_str().trim().to_string()),
			}
		} else if let Some(caps) = STARTUP.captures(raw) {
			DeviceEvent::Startup {
				raw: raw.to_string(),
				version: caps[1].to_string(),
			}
		} else if VERSION.is_match(raw) {
			DeviceEvent::Version {
				raw: raw.to_string(),
			}
		} else {
			DeviceEvent::Others {
				raw: raw.to_string(),
			}
		};

		Some(event)
	}

	fn state(&self) -> &Arc<Value> {
		&self.state
	}
}

/// Splits a status body into `(key, values)` pairs. The active state comes
/// first under an empty key.
///
/// Grbl 1.1 separates fields with `|`. Grbl 0.9 and Smoothie separate
/// everything with `,`, so a token without `:` continues the previous field.
fn split_status_fields(body: &str) -> Vec<(String, Vec<String>)> {
	let mut fields: Vec<(String, Vec<String>)> = Vec::new();

	if body.contains('|') {
		for (i, part) in body.split('|').enumerate() {
			if i == 0 {
				fields.push((String::new(), vec![part.to_string()]));
				continue;
			}
			match part.split_once(':') {
				Some((key, value)) => fields.push((
					key.to_string(),
					value.split(',').map(str::to_string).collect(),
				)),
				None => fields.push((part.to_string(), Vec::new())),
			}
		}
		return fields;
	}

	for (i, token) in body.split(',').enumerate() {
		if i == 0 {
			fields.push((String::new(), vec![token.to_string()]));
			continue;
		}
		match token.split_once(':') {
			Some((key, value)) => fields.push((key.to_string(), vec![value.to_string()])),
			None => {
				if let Some((_, values)) = fields.last_mut() {
					values.push(token.to_string());
				}
			}
		}
	}
	fields
}

fn axes(values: &[String]) -> Value {
	let mut map = Map::new();
	for (name, value) in ["x", "y", "z", "a", "b", "c"].iter().zip(values) {
		map.insert((*name).to_string(), json!(value));
	}
	Value::Object(map)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn parse(line: &str) -> DeviceEvent {
		GrblLineParser::new().parse(line).expect("event")
	}

	#[test]
	fn classifies_acknowledgements() {
		assert_eq!(parse("ok"), DeviceEvent::Ok { raw: "ok".into() });
		assert_eq!(
			parse("error:22"),
			DeviceEvent::Error {
				raw: "error:22".into(),
				message: "22".into()
			}
		);
		assert_eq!(
			parse("ALARM:1"),
			DeviceEvent::Alarm {
				raw: "ALARM:1".into(),
				message: "1".into()
			}
		);
	}

	#[test]
	fn blank_lines_are_skipped() {
		let mut parser = GrblLineParser::new();
		assert_eq!(parser.parse(""), None);
		assert_eq!(parser.parse("  \r"), None);
	}

	#[test]
	fn grbl11_status_reports_rx_buffer() {
		let mut parser = GrblLineParser::new();
		let event = parser
			.parse("<Idle|MPos:1.000,2.000,3.000|Bf:15,128|FS:0,0|Ov:100,100,100>")
			.unwrap();
		match event {
			DeviceEvent::Status { buf, .. } => {
				assert_eq!(
					buf,
					Some(BufferReport {
						planner: Some(15),
						rx: Some(128)
					})
				);
			}
			other => panic!("Expected Status, got {:?}", other),
		}
		let status = &parser.state()["status"];
		assert_eq!(status["activeState"], "Idle");
		assert_eq!(status["mpos"]["y"], "2.000");
		assert_eq!(status["ovS"], 100);
	}

	#[test]
	fn grbl09_status_uses_comma_fields() {
		let mut parser = GrblLineParser::new();
		let event = parser
			.parse("<Run,MPos:0.000,0.000,0.000,WPos:1.000,0.000,0.000,Buf:3,RX:64>")
			.unwrap();
		match event {
			DeviceEvent::Status { buf, .. } => {
				assert_eq!(
					buf,
					Some(BufferReport {
						planner: Some(3),
						rx: Some(64)
					})
				);
			}
			other => panic!("Expected Status, got {:?}", other),
		}
		let status = &parser.state()["status"];
		assert_eq!(status["activeState"], "Run");
		assert_eq!(status["wpos"]["x"], "1.000");
	}

	#[test]
	fn hold_substate_is_split() {
		let mut parser = GrblLineParser::new();
		parser.parse("<Hold:0|MPos:0.000,0.000,0.000>");
		assert_eq!(parser.state()["status"]["activeState"], "Hold");
		assert_eq!(parser.state()["status"]["subState"], "0");
	}

	#[test]
	fn snapshot_identity_changes_only_with_content() {
		let mut parser = GrblLineParser::new();
		parser.parse("<Idle|MPos:0.000,0.000,0.000>");
		let first = Arc::clone(parser.state());

		parser.parse("<Idle|MPos:0.000,0.000,0.000>");
		assert!(Arc::ptr_eq(&first, parser.state()));

		parser.parse("<Run|MPos:0.000,0.000,0.000>");
		assert!(!Arc::ptr_eq(&first, parser.state()));
	}

	#[test]
	fn parser_state_updates_modal_words() {
		let mut parser = GrblLineParser::new();
		let event = parser.parse("[GC:G0 G54 G17 G21 G90 G94 M5 M9 T1 F100 S0]").unwrap();
		assert_eq!(event.kind(), "parserstate");

		let state = &parser.state()["parserstate"];
		assert_eq!(state["tool"], "1");
		assert_eq!(state["feedrate"], "100");
		assert_eq!(state["modal"][0], "G0");

		// Grbl 0.9 omits the GC: prefix
		assert_eq!(parse("[G0 G54 G17 G21 G90 G94 M0 M5 M9 T0 F0. S0.]").kind(), "parserstate");
	}

	#[test]
	fn bracketed_lines_are_parameters_or_feedback() {
		assert_eq!(parse("[G54:0.000,0.000,0.000]").kind(), "parameters");
		assert_eq!(parse("[PRB:0.000,0.000,1.492:1]").kind(), "parameters");
		assert_eq!(parse("[MSG:'$H'|'$X' to unlock]").kind(), "feedback");
		assert_eq!(parse("[VER:1.1f.20170801:]").kind(), "feedback");
	}

	#[test]
	fn settings_capture_optional_description() {
		assert_eq!(
			parse("$110=500.000"),
			DeviceEvent::Settings {
				raw: "$110=500.000".into(),
				setting: "$110".into(),
				value: "500.000".into(),
				description: None,
			}
		);
		match parse("$0=10 (step pulse, usec)") {
			DeviceEvent::Settings { description, .. } => {
				assert_eq!(description.as_deref(), Some("step pulse, usec"));
			}
			other => panic!("Expected Settings, got {:?}", other),
		}
	}

	#[test]
	fn startup_and_version_banners() {
		assert_eq!(
			parse("Grbl 1.1f ['$' for help]"),
			DeviceEvent::Startup {
				raw: "Grbl 1.1f ['$' for help]".into(),
				version: "1.1f".into(),
			}
		);
		assert_eq!(parse("Build version: edge-3332442").kind(), "version");
		assert_eq!(parse("Smoothie out of band").kind(), "others");
	}
}
