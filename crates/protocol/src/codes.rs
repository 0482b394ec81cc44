//! Grbl 1.1 error, alarm, and setting descriptions.
//!
//! Grbl 1.1 reports bare numeric codes; older firmware prints text. Lines are
//! only decorated when a code is found here.

/// A numbered error or alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Code {
	pub code: u32,
	pub description: &'static str,
}

/// A `$N` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Setting {
	pub setting: &'static str,
	pub description: &'static str,
	pub units: &'static str,
}

const fn code(code: u32, description: &'static str) -> Code {
	Code { code, description }
}

const fn setting(setting: &'static str, description: &'static str, units: &'static str) -> Setting {
	Setting {
		setting,
		description,
		units,
	}
}

pub const ERRORS: &[Code] = &[
	code(1, "G-code words consist of a letter and a value. Letter was not found."),
	code(2, "Numeric value format is not valid or missing an expected value."),
	code(3, "Grbl '$' system command was not recognized or supported."),
	code(4, "Negative value received for an expected positive value."),
	code(5, "Homing cycle is not enabled via settings."),
	code(6, "Minimum step pulse time must be greater than 3usec"),
	code(7, "EEPROM read failed. Reset and restored to default values."),
	code(8, "Grbl '$' command cannot be used unless Grbl is IDLE. Ensures smooth operation during a job."),
	code(9, "G-code locked out during alarm or jog state"),
	code(10, "Soft limits cannot be enabled without homing also enabled."),
	code(11, "Max characters per line exceeded. Line was not processed and executed."),
	code(12, "(Compile Option) Grbl '$' setting value exceeds the maximum step rate supported."),
	code(13, "Safety door detected as opened and door state initiated."),
	code(14, "(Grbl-Mega Only) Build info or startup line exceeded EEPROM line length limit."),
	code(15, "Jog target exceeds machine travel. Command ignored."),
	code(16, "Jog command with no '=' or contains prohibited g-code."),
	code(17, "Laser mode requires PWM output."),
	code(20, "Unsupported or invalid g-code command found in block."),
	code(21, "More than one g-code command from same modal group found in block."),
	code(22, "Feed rate has not yet been set or is undefined."),
	code(23, "G-code command in block requires an integer value."),
	code(24, "Two G-code commands that both require the use of the XYZ axis words were detected in the block."),
	code(25, "A G-code word was repeated in the block."),
	code(26, "A G-code command implicitly or explicitly requires XYZ axis words in the block, but none were detected."),
	code(27, "N line number value is not within the valid range of 1 - 9,999,999."),
	code(28, "A G-code command was sent, but is missing some required P or L value words in the line."),
	code(29, "Grbl supports six work coordinate systems G54-G59. G59.1, G59.2, and G59.3 are not supported."),
	code(30, "The G53 G-code command requires either a G0 seek or G1 feed motion mode to be active. A different motion was active."),
	code(31, "There are unused axis words in the block and G80 motion mode cancel is active."),
	code(32, "A G2 or G3 arc was commanded but there are no XYZ axis words in the selected plane to trace the arc."),
	code(33, "The motion command has an invalid target. G2, G3, and G38.2 generates this error, if the arc is impossible to generate or if the probe target is the current position."),
	code(34, "A G2 or G3 arc, traced with the radius definition, had a mathematical error when computing the arc geometry. Try either breaking up the arc into semi-circles or quadrants, or redefine them with the arc offset definition."),
	code(35, "A G2 or G3 arc, traced with the offset definition, is missing the IJK offset word in the selected plane to trace the arc."),
	code(36, "There are unused, leftover G-code words that aren't used by any command in the block."),
	code(37, "The G43.1 dynamic tool length offset command cannot apply an offset to an axis other than its configured axis. The Grbl default axis is the Z-axis."),
	code(38, "Tool number greater than max supported value."),
];

pub const ALARMS: &[Code] = &[
	code(1, "Hard limit triggered. Machine position is likely lost due to sudden and immediate halt. Re-homing is highly recommended."),
	code(2, "G-code motion target exceeds machine travel. Machine position safely retained. Alarm may be unlocked."),
	code(3, "Reset while in motion. Grbl cannot guarantee position. Lost steps are likely. Re-homing is highly recommended."),
	code(4, "Probe fail. The probe is not in the expected initial state before starting probe cycle, where G38.2 and G38.3 is not triggered and G38.4 and G38.5 is triggered."),
	code(5, "Probe fail. Probe did not contact the workpiece within the programmed travel for G38.2 and G38.4."),
	code(6, "Homing fail. Reset during active homing cycle."),
	code(7, "Homing fail. Safety door was opened during active homing cycle."),
	code(8, "Homing fail. Cycle failed to clear limit switch when pulling off. Try increasing pull-off setting or check wiring."),
	code(9, "Homing fail. Could not find limit switch within search distance. Defined as 1.5 * max_travel on search and 5 * pulloff on locate phases."),
];

pub const SETTINGS: &[Setting] = &[
	setting("$0", "Step pulse time", "microseconds"),
	setting("$1", "Step idle delay", "milliseconds"),
	setting("$2", "Step pulse invert", "mask"),
	setting("$3", "Step direction invert", "mask"),
	setting("$4", "Invert step enable pin", "boolean"),
	setting("$5", "Invert limit pins", "boolean"),
	setting("$6", "Invert probe pin", "boolean"),
	setting("$10", "Status report options", "mask"),
	setting("$11", "Junction deviation", "millimeters"),
	setting("$12", "Arc tolerance", "millimeters"),
	setting("$13", "Report in inches", "boolean"),
	setting("$20", "Soft limits enable", "boolean"),
	setting("$21", "Hard limits enable", "boolean"),
	setting("$22", "Homing cycle enable", "boolean"),
	setting("$23", "Homing direction invert", "mask"),
	setting("$24", "Homing locate feed rate", "mm/min"),
	setting("$25", "Homing search seek rate", "mm/min"),
	setting("$26", "Homing switch debounce delay", "milliseconds"),
	setting("$27", "Homing switch pull-off distance", "millimeters"),
	setting("$30", "Maximum spindle speed", "RPM"),
	setting("$31", "Minimum spindle speed", "RPM"),
	setting("$32", "Laser-mode enable", "boolean"),
	setting("$100", "X-axis travel resolution", "step/mm"),
	setting("$101", "Y-axis travel resolution", "step/mm"),
	setting("$102", "Z-axis travel resolution", "step/mm"),
	setting("$110", "X-axis maximum rate", "mm/min"),
	setting("$111", "Y-axis maximum rate", "mm/min"),
	setting("$112", "Z-axis maximum rate", "mm/min"),
	setting("$120", "X-axis acceleration", "mm/sec^2"),
	setting("$121", "Y-axis acceleration", "mm/sec^2"),
	setting("$122", "Z-axis acceleration", "mm/sec^2"),
	setting("$130", "X-axis maximum travel", "millimeters"),
	setting("$131", "Y-axis maximum travel", "millimeters"),
	setting("$132", "Z-axis maximum travel", "millimeters"),
];

pub fn error(code: u32) -> Option<&'static Code> {
	ERRORS.iter().find(|c| c.code == code)
}

pub fn alarm(code: u32) -> Option<&'static Code> {
	ALARMS.iter().find(|c| c.code == code)
}

pub fn setting_info(name: &str) -> Option<&'static Setting> {
	SETTINGS.iter().find(|s| s.setting == name)
}

/// `error:N (description)` for a known numeric code.
pub fn describe_error(message: &str) -> Option<String> {
	let code = message.trim().parse::<u32>().ok()?;
	error(code).map(|e| format!("error:{} ({})", code, e.description))
}

/// `ALARM:N (description)` for a known numeric code.
pub fn describe_alarm(message: &str) -> Option<String> {
	let code = message.trim().parse::<u32>().ok()?;
	alarm(code).map(|a| format!("ALARM:{} ({})", code, a.description))
}

/// `$N=V (description, units)` for a known setting.
pub fn describe_setting(name: &str, value: &str) -> Option<String> {
	setting_info(name).map(|s| format!("{}={} ({}, {})", name, value, s.description, s.units))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn numeric_codes_are_decorated() {
		assert_eq!(
			describe_error("9").as_deref(),
			Some("error:9 (G-code locked out during alarm or jog state)")
		);
		assert!(describe_alarm("2").unwrap().starts_with("ALARM:2 (G-code motion target"));
	}

	#[test]
	fn text_messages_pass_through() {
		assert_eq!(describe_error("Bad number format"), None);
		assert_eq!(describe_error("99"), None);
		assert_eq!(describe_alarm("Hard/soft limit"), None);
	}

	#[test]
	fn settings_include_units() {
		assert_eq!(
			describe_setting("$110", "500.000").as_deref(),
			Some("$110=500.000 (X-axis maximum rate, mm/min)")
		);
		assert_eq!(describe_setting("$999", "1"), None);
	}
}
