//! Error types for the device session runtime.

use thiserror::Error;

use crate::observer::ObserverId;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a program was rejected by [`Sender::load`](crate::Sender::load).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgramError {
	/// No non-blank lines.
	#[error("program is empty")]
	Empty,

	/// A line can never fit in the device's receive buffer.
	#[error("line {line} is {length} bytes, device buffer holds {limit}")]
	LineTooLong {
		line: usize,
		length: usize,
		limit: usize,
	},
}

/// Errors that can occur in a device session.
#[derive(Debug, Error)]
pub enum Error {
	/// The transport could not be opened.
	#[error("Failed to open {port}: {reason}")]
	OpenFailed { port: String, reason: String },

	/// `open()` on a session that is already open.
	#[error("Session is already open: {0}")]
	AlreadyOpen(String),

	/// Operation needs an open session.
	#[error("Session is not open: {0}")]
	NotOpen(String),

	/// The init handshake has not completed yet.
	#[error("Device is not ready: {0}")]
	NotReady(String),

	/// The session task is gone (shut down or panicked).
	#[error("Session task has shut down")]
	SessionGone,

	/// Transport-level failure while connected.
	#[error("Transport error: {0}")]
	Transport(String),

	/// Program content failed validation; sender state was not touched.
	#[error("Invalid G-code: name={name}: {source}")]
	InvalidProgram {
		name: String,
		#[source]
		source: ProgramError,
	},

	/// Command name not in the dispatch table.
	#[error("Unknown command: {0}")]
	UnknownCommand(String),

	/// Command arguments could not be interpreted.
	#[error("Invalid argument for {command}: {reason}")]
	InvalidArgument {
		command: &'static str,
		reason: String,
	},

	/// Macro lookup found nothing.
	#[error("Cannot find the macro: id={0}")]
	MacroNotFound(String),

	/// Observer id not registered with this session.
	#[error("Observer not found: {0}")]
	ObserverNotFound(ObserverId),

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// True for misuse by the caller: wrong lifecycle order, bad command, missing observer.
	pub fn is_caller_error(&self) -> bool {
		matches!(
			self,
			Error::AlreadyOpen(_)
				| Error::NotOpen(_)
				| Error::NotReady(_)
				| Error::UnknownCommand(_)
				| Error::InvalidArgument { .. }
				| Error::ObserverNotFound(_)
		)
	}

	/// True for failures of the byte stream itself.
	pub fn is_transport(&self) -> bool {
		matches!(
			self,
			Error::OpenFailed { .. } | Error::Transport(_) | Error::Io(_)
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn invalid_program_names_the_program() {
		let err = Error::InvalidProgram {
			name: "part.nc".into(),
			source: ProgramError::Empty,
		};
		assert_eq!(err.to_string(), "Invalid G-code: name=part.nc: program is empty");
		assert!(!err.is_caller_error());
	}

	#[test]
	fn classification() {
		assert!(Error::NotOpen("/dev/ttyUSB0".into()).is_caller_error());
		assert!(Error::UnknownCommand("jump".into()).is_caller_error());
		assert!(Error::Transport("broken pipe".into()).is_transport());
		assert!(!Error::SessionGone.is_transport());
	}
}
