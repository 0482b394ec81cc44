//! Outstanding-query bookkeeping.
//!
//! Polling must never stack a second `?` or `$G` on top of one the device has
//! not answered yet, and replies to queries an operator typed by hand are
//! echoed while routine polling replies are not.

/// Where the parser-state query is in its two-part reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParserQueryPhase {
	#[default]
	Idle,
	/// `$G` sent, parser state line not seen yet.
	Queried,
	/// Parser state line seen, its trailing `ok` still expected.
	StateReceived,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionMask {
	pub query_status_report: bool,
	pub query_parser_state: ParserQueryPhase,
	pub reply_status_report: bool,
	pub reply_parser_state: bool,
}

impl ActionMask {
	/// Marks a status query as sent. Returns false if one is already outstanding.
	pub fn begin_status_query(&mut self) -> bool {
		if self.query_status_report {
			return false;
		}
		self.query_status_report = true;
		true
	}

	/// A status report arrived. Returns whether it should be echoed.
	pub fn status_received(&mut self) -> bool {
		self.query_status_report = false;
		std::mem::take(&mut self.reply_status_report)
	}

	/// Marks a parser-state query as sent. Returns false while one is in progress.
	pub fn begin_parser_query(&mut self) -> bool {
		if self.parser_query_outstanding() {
			return false;
		}
		self.query_parser_state = ParserQueryPhase::Queried;
		true
	}

	/// The parser state line arrived. Returns whether it should be echoed.
	pub fn parser_state_received(&mut self) -> bool {
		self.query_parser_state = ParserQueryPhase::StateReceived;
		self.reply_parser_state
	}

	/// Consumes an `ok`/`error` if it closes a parser-state query.
	///
	/// Returns `None` when the acknowledgement belongs to someone else,
	/// otherwise whether the line should be echoed.
	pub fn parser_reply_received(&mut self) -> Option<bool> {
		if self.query_parser_state != ParserQueryPhase::StateReceived {
			return None;
		}
		self.query_parser_state = ParserQueryPhase::Idle;
		Some(std::mem::take(&mut self.reply_parser_state))
	}

	pub fn parser_query_outstanding(&self) -> bool {
		self.query_parser_state != ParserQueryPhase::Idle
	}

	pub fn clear(&mut self) {
		*self = Self::default();
	}

	#[cfg(test)]
	pub fn is_clear(&self) -> bool {
		*self == Self::default()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn status_query_is_not_stacked() {
		let mut mask = ActionMask::default();
		assert!(mask.begin_status_query());
		assert!(!mask.begin_status_query());
		assert!(!mask.status_received());
		assert!(mask.begin_status_query());
	}

	#[test]
	fn interactive_status_reply_is_echoed_once() {
		let mut mask = ActionMask::default();
		mask.reply_status_report = true;
		mask.begin_status_query();
		assert!(mask.status_received());
		mask.begin_status_query();
		assert!(!mask.status_received());
	}

	#[test]
	fn parser_query_walks_through_phases() {
		let mut mask = ActionMask::default();
		assert_eq!(mask.parser_reply_received(), None);

		assert!(mask.begin_parser_query());
		assert_eq!(mask.query_parser_state, ParserQueryPhase::Queried);
		assert!(!mask.begin_parser_query());
		// An ok before the state line belongs to another command.
		assert_eq!(mask.parser_reply_received(), None);

		assert!(!mask.parser_state_received());
		assert!(!mask.begin_parser_query());
		assert_eq!(mask.parser_reply_received(), Some(false));
		assert_eq!(mask.query_parser_state, ParserQueryPhase::Idle);
		assert!(mask.begin_parser_query());
	}

	#[test]
	fn clear_resets_everything() {
		let mut mask = ActionMask {
			query_status_report: true,
			query_parser_state: ParserQueryPhase::StateReceived,
			reply_status_report: true,
			reply_parser_state: true,
		};
		assert!(!mask.is_clear());
		mask.clear();
		assert!(mask.is_clear());
	}
}
