//! Program streamer with character-counting flow control.
//!
//! The device's receive buffer holds at most `buffer_size` bytes. Every line
//! sent is charged at its encoded length (line plus `\n`) and discharged when
//! the matching acknowledgement arrives, so the streamer can keep the buffer
//! full without waiting for a reply per line.

use cnc_protocol::SenderStatus;

use crate::error::ProgramError;
use crate::queue::Queue;

/// Name of the flow-control discipline in `sender:status`.
pub const CHAR_COUNTING: &str = "char-counting";

#[derive(Debug)]
pub struct Sender {
	name: String,
	lines: Vec<String>,
	/// Byte length of the loaded content.
	size: usize,
	/// Index of the next line to transmit.
	sent: usize,
	/// Acknowledged lines.
	received: usize,
	buffer_size: usize,
	data_length: usize,
	/// Encoded lengths of lines sent but not acknowledged, oldest first.
	in_flight: Queue<usize>,
}

impl Sender {
	pub fn new(buffer_size: usize) -> Self {
		Self {
			name: String::new(),
			lines: Vec::new(),
			size: 0,
			sent: 0,
			received: 0,
			buffer_size,
			data_length: 0,
			in_flight: Queue::new(),
		}
	}

	/// Replaces the loaded program.
	///
	/// Content is validated before anything is touched: a rejected program
	/// leaves the previous one in place.
	pub fn load(&mut self, name: &str, content: &str) -> Result<usize, ProgramError> {
		let lines: Vec<String> = content
			.lines()
			.map(str::trim)
			.filter(|line| !line.is_empty())
			.map(str::to_string)
			.collect();

		if lines.is_empty() {
			return Err(ProgramError::Empty);
		}
		if let Some((index, line)) = lines
			.iter()
			.enumerate()
			.find(|(_, line)| encoded_len(line) > self.buffer_size)
		{
			return Err(ProgramError::LineTooLong {
				line: index + 1,
				length: encoded_len(line),
				limit: self.buffer_size,
			});
		}

		self.name = name.to_string();
		self.size = content.len();
		self.lines = lines;
		self.rewind();
		Ok(self.lines.len())
	}

	/// Drops the program. The negotiated buffer size is kept.
	pub fn unload(&mut self) {
		self.name.clear();
		self.lines.clear();
		self.size = 0;
		self.rewind();
	}

	/// Back to the first line without discarding the program.
	pub fn rewind(&mut self) {
		self.sent = 0;
		self.received = 0;
		self.data_length = 0;
		self.in_flight.clear();
	}

	/// Takes as many unsent lines as fit in the remaining buffer budget.
	///
	/// Stops at the first line that would overflow; it goes out after a later
	/// [`ack`](Self::ack) frees enough room.
	pub fn next(&mut self) -> Vec<String> {
		let mut batch = Vec::new();
		while let Some(line) = self.lines.get(self.sent) {
			let len = encoded_len(line);
			if self.data_length + len > self.buffer_size {
				break;
			}
			self.data_length += len;
			self.in_flight.push(len);
			self.sent += 1;
			batch.push(line.clone());
		}
		batch
	}

	/// Discharges the oldest in-flight line. Returns false if nothing was in flight.
	pub fn ack(&mut self) -> bool {
		let Some(len) = self.in_flight.pop() else {
			return false;
		};
		self.data_length -= len;
		self.received += 1;
		true
	}

	/// Raises the streaming budget. Smaller values are ignored.
	pub fn raise_buffer_size(&mut self, size: usize) -> bool {
		if size <= self.buffer_size {
			return false;
		}
		self.buffer_size = size;
		true
	}

	/// Line the device will acknowledge next, with its 1-based number.
	pub fn current_line(&self) -> Option<(usize, &str)> {
		self.lines
			.get(self.received)
			.map(|line| (self.received + 1, line.as_str()))
	}

	/// Next unacknowledged line, if the program is not finished.
	pub fn peek(&self) -> Option<&str> {
		self.lines.get(self.received).map(String::as_str)
	}

	pub fn is_loaded(&self) -> bool {
		!self.lines.is_empty()
	}

	pub fn is_finished(&self) -> bool {
		self.is_loaded() && self.received == self.lines.len()
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn total(&self) -> usize {
		self.lines.len()
	}

	pub fn sent(&self) -> usize {
		self.sent
	}

	pub fn received(&self) -> usize {
		self.received
	}

	pub fn buffer_size(&self) -> usize {
		self.buffer_size
	}

	pub fn data_length(&self) -> usize {
		self.data_length
	}

	pub fn in_flight(&self) -> usize {
		self.in_flight.len()
	}

	pub fn status(&self) -> SenderStatus {
		SenderStatus {
			sp: CHAR_COUNTING,
			name: self.name.clone(),
			size: self.size,
			total: self.lines.len(),
			sent: self.sent,
			received: self.received,
			buffer_size: self.buffer_size,
			data_length: self.data_length,
		}
	}
}

fn encoded_len(line: &str) -> usize {
	line.len() + 1
}
