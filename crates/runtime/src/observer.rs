//! Observer fan-out.
//!
//! Delivery is best-effort and never blocks: a slow observer loses events, a
//! closed one is pruned, and neither holds up the session or other observers.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use cnc_protocol::SessionEvent;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Identifier of an attached observer, unique per registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ObserverId(u64);

impl fmt::Display for ObserverId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "observer-{}", self.0)
	}
}

/// Result of pushing one event to one observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
	Delivered,
	/// Observer is alive but could not take the event right now.
	Dropped,
	/// Observer is gone and should be detached.
	Closed,
}

/// Anything that can receive session events, e.g. a client socket.
pub trait Observer: Send + Sync {
	/// Must not block.
	fn emit(&self, event: &SessionEvent) -> Delivery;
}

/// Observer backed by a bounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
	tx: mpsc::Sender<SessionEvent>,
}

impl ChannelObserver {
	pub fn new(tx: mpsc::Sender<SessionEvent>) -> Self {
		Self { tx }
	}

	/// Creates an observer and the receiver its events arrive on.
	pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SessionEvent>) {
		let (tx, rx) = mpsc::channel(capacity);
		(Self::new(tx), rx)
	}
}

impl Observer for ChannelObserver {
	fn emit(&self, event: &SessionEvent) -> Delivery {
		match self.tx.try_send(event.clone()) {
			Ok(()) => Delivery::Delivered,
			Err(mpsc::error::TrySendError::Full(_)) => Delivery::Dropped,
			Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
		}
	}
}

/// Attached observers, ordered by id and so by attach order.
///
/// Broadcasts iterate over a snapshot taken under the lock and deliver
/// without it, so observers may attach or detach from inside `emit`.
#[derive(Default)]
pub struct ObserverRegistry {
	observers: Mutex<BTreeMap<ObserverId, Arc<dyn Observer>>>,
	next_id: AtomicU64,
}

impl fmt::Debug for ObserverRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ObserverRegistry")
			.field("observers", &self.ids())
			.finish()
	}
}

impl ObserverRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add(&self, observer: Arc<dyn Observer>) -> ObserverId {
		let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
		self.observers.lock().insert(id, observer);
		debug!(target = "cnc.session", %id, "observer attached");
		id
	}

	pub fn remove(&self, id: ObserverId) -> bool {
		let removed = self.observers.lock().remove(&id).is_some();
		if removed {
			debug!(target = "cnc.session", %id, "observer detached");
		}
		removed
	}

	pub fn ids(&self) -> Vec<ObserverId> {
		self.observers.lock().keys().copied().collect()
	}

	pub fn len(&self) -> usize {
		self.observers.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.observers.lock().is_empty()
	}

	/// Delivers to one observer only.
	pub fn send_to(&self, id: ObserverId, event: &SessionEvent) -> Option<Delivery> {
		let observer = self.observers.lock().get(&id).cloned()?;
		let delivery = observer.emit(event);
		if delivery == Delivery::Closed {
			self.remove(id);
		}
		Some(delivery)
	}

	/// Delivers to every attached observer and detaches the closed ones.
	pub fn broadcast(&self, event: &SessionEvent) {
		let snapshot: Vec<(ObserverId, Arc<dyn Observer>)> = self
			.observers
			.lock()
			.iter()
			.map(|(id, observer)| (*id, Arc::clone(observer)))
			.collect();

		let mut closed = Vec::new();
		for (id, observer) in snapshot {
			match observer.emit(event) {
				Delivery::Delivered => {}
				Delivery::Dropped => {
					trace!(target = "cnc.session", %id, event = %event.name(), "observer lagging, event dropped");
				}
				Delivery::Closed => closed.push(id),
			}
		}
		for id in closed {
			self.remove(id);
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Weak;

	use super::*;

	fn read(line: &str) -> SessionEvent {
		SessionEvent::Read(line.to_string())
	}

	#[test]
	fn broadcast_reaches_every_observer() {
		let registry = ObserverRegistry::new();
		let (a, mut rx_a) = ChannelObserver::channel(8);
		let (b, mut rx_b) = ChannelObserver::channel(8);
		registry.add(Arc::new(a));
		registry.add(Arc::new(b));

		registry.broadcast(&read("ok"));

		assert_eq!(rx_a.try_recv().unwrap(), read("ok"));
		assert_eq!(rx_b.try_recv().unwrap(), read("ok"));
	}

	#[test]
	fn full_observer_does_not_block_others() {
		let registry = ObserverRegistry::new();
		let (slow, mut rx_slow) = ChannelObserver::channel(1);
		let (fast, mut rx_fast) = ChannelObserver::channel(8);
		let slow_id = registry.add(Arc::new(slow));
		registry.add(Arc::new(fast));

		registry.broadcast(&read("one"));
		registry.broadcast(&read("two"));

		assert_eq!(rx_slow.try_recv().unwrap(), read("one"));
		assert!(rx_slow.try_recv().is_err());
		assert_eq!(rx_fast.try_recv().unwrap(), read("one"));
		assert_eq!(rx_fast.try_recv().unwrap(), read("two"));
		assert!(registry.ids().contains(&slow_id));
	}

	#[test]
	fn closed_observers_are_pruned() {
		let registry = ObserverRegistry::new();
		let (gone, rx) = ChannelObserver::channel(8);
		let id = registry.add(Arc::new(gone));
		drop(rx);

		registry.broadcast(&read("ok"));
		assert!(!registry.ids().contains(&id));
		assert!(registry.is_empty());
	}

	#[test]
	fn send_to_targets_one_observer() {
		let registry = ObserverRegistry::new();
		let (a, mut rx_a) = ChannelObserver::channel(8);
		let (b, mut rx_b) = ChannelObserver::channel(8);
		let id_a = registry.add(Arc::new(a));
		registry.add(Arc::new(b));

		assert_eq!(registry.send_to(id_a, &read("hello")), Some(Delivery::Delivered));
		assert_eq!(rx_a.try_recv().unwrap(), read("hello"));
		assert!(rx_b.try_recv().is_err());

		registry.remove(id_a);
		assert_eq!(registry.send_to(id_a, &read("hello")), None);
	}

	struct SelfRemoving {
		registry: Weak<ObserverRegistry>,
		id: Mutex<Option<ObserverId>>,
	}

	impl Observer for SelfRemoving {
		fn emit(&self, _event: &SessionEvent) -> Delivery {
			if let (Some(registry), Some(id)) = (self.registry.upgrade(), *self.id.lock()) {
				registry.remove(id);
			}
			Delivery::Delivered
		}
	}

	#[test]
	fn observer_may_detach_during_broadcast() {
		let registry = Arc::new(ObserverRegistry::new());
		let leaver = Arc::new(SelfRemoving {
			registry: Arc::downgrade(&registry),
			id: Mutex::new(None),
		});
		let id = registry.add(leaver.clone());
		*leaver.id.lock() = Some(id);
		let (stayer, mut rx) = ChannelObserver::channel(8);
		registry.add(Arc::new(stayer));

		registry.broadcast(&read("ok"));

		assert!(!registry.ids().contains(&id));
		assert_eq!(registry.len(), 1);
		assert_eq!(rx.try_recv().unwrap(), read("ok"));
	}

	#[test]
	fn ids_are_unique_and_ordered() {
		let registry = ObserverRegistry::new();
		let (a, _rx_a) = ChannelObserver::channel(1);
		let (b, _rx_b) = ChannelObserver::channel(1);
		let first = registry.add(Arc::new(a));
		let second = registry.add(Arc::new(b));
		assert_ne!(first, second);
		assert_eq!(registry.ids(), vec![first, second]);
		assert_eq!(first.to_string(), "observer-1");
	}
}
