//! FIFO shared by the feeder and sender.

use std::collections::VecDeque;

/// Insertion-ordered queue.
#[derive(Debug, Clone)]
pub struct Queue<T> {
	items: VecDeque<T>,
}

impl<T> Default for Queue<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> Queue<T> {
	pub fn new() -> Self {
		Self {
			items: VecDeque::new(),
		}
	}

	pub fn push(&mut self, item: T) {
		self.items.push_back(item);
	}

	pub fn peek(&self) -> Option<&T> {
		self.items.front()
	}

	pub fn pop(&mut self) -> Option<T> {
		self.items.pop_front()
	}

	pub fn clear(&mut self) {
		self.items.clear();
	}

	pub fn len(&self) -> usize {
		self.items.len()
	}

	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}
}

impl<T> Extend<T> for Queue<T> {
	fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
		self.items.extend(iter);
	}
}
