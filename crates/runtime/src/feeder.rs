//! Interactive command queue.
//!
//! Jogs, macros, and console lines are sent one at a time: a line is
//! dequeued only after the device acknowledged the previous one.

use cnc_protocol::FeederStatus;

use crate::queue::Queue;

#[derive(Debug, Default)]
pub struct Feeder {
	queue: Queue<String>,
	pending: bool,
}

impl Feeder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Queues lines, trimmed. Blank lines are dropped.
	pub fn feed<I, S>(&mut self, lines: I)
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		for line in lines {
			let line = line.as_ref().trim();
			if !line.is_empty() {
				self.queue.push(line.to_string());
			}
		}
	}

	/// Dequeues the next line for transmission.
	///
	/// No-op while a line is in flight or the queue is empty.
	pub fn next(&mut self) -> Option<String> {
		if self.pending {
			return None;
		}
		let line = self.queue.pop()?;
		self.pending = true;
		Some(line)
	}

	/// The device acknowledged the in-flight line.
	pub fn ack(&mut self) {
		self.pending = false;
	}

	pub fn is_pending(&self) -> bool {
		self.pending
	}

	pub fn peek(&self) -> Option<&str> {
		self.queue.peek().map(String::as_str)
	}

	/// Drops queued lines. An in-flight line stays pending.
	pub fn clear(&mut self) {
		self.queue.clear();
	}

	pub fn len(&self) -> usize {
		self.queue.len()
	}

	pub fn is_empty(&self) -> bool {
		self.queue.is_empty()
	}

	pub fn status(&self) -> FeederStatus {
		FeederStatus {
			queue: self.queue.len(),
			pending: self.pending,
			next: self.queue.peek().cloned(),
		}
	}
}
