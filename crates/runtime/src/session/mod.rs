//! Device session: one connection, many observers.
//!
//! A session is a tokio task that owns the connection and serializes every
//! input: caller requests, device lines, poll ticks, and scheduled steps.
//! Callers talk to it through a cloneable [`SessionHandle`].
//!
//! # Lifecycle
//!
//! ```text
//! spawn ──► closed ──open()──► handshake ──► ready ──close()/disconnect──► closed
//! ```
//!
//! Everything tied to one connection (engine, poll timer, pending handshake
//! steps, transport tasks) lives in a `Link`; dropping it is the teardown, so
//! nothing scheduled can fire against a closed connection. Observers belong
//! to the session and survive reconnects.

mod command;
mod engine;

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use cnc_protocol::{
	CloseInfo, DeviceProfile, ErrorInfo, FeederStatus, OpenInfo, SenderStatus, SessionEvent,
	WorkflowState,
};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub use command::Command;
pub(crate) use engine::Engine;

use crate::error::{Error, Result};
use crate::observer::{Observer, ObserverId, ObserverRegistry};
use crate::store::{EmptyStore, FileStore, MacroStore};
use crate::transport::{Connector, TransportEvent, run_writer};
use crate::trigger::{EventTrigger, NoopTaskRunner, TaskRunner};

/// Default status poll period.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Minimum spacing of parser-state queries.
pub const DEFAULT_PARSER_STATE_INTERVAL: Duration = Duration::from_millis(500);

const REQUEST_CAPACITY: usize = 64;

/// Per-session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
	/// Port label reported in events.
	pub port: String,
	pub baudrate: u32,
	pub profile: DeviceProfile,
	pub poll_interval: Duration,
	pub parser_state_interval: Duration,
}

impl SessionConfig {
	pub fn new(port: impl Into<String>, profile: DeviceProfile) -> Self {
		Self {
			port: port.into(),
			baudrate: 115_200,
			profile,
			poll_interval: DEFAULT_POLL_INTERVAL,
			parser_state_interval: DEFAULT_PARSER_STATE_INTERVAL,
		}
	}

	pub fn with_baudrate(mut self, baudrate: u32) -> Self {
		self.baudrate = baudrate;
		self
	}

	pub fn with_poll_interval(mut self, interval: Duration) -> Self {
		self.poll_interval = interval;
		self
	}

	pub fn with_parser_state_interval(mut self, interval: Duration) -> Self {
		self.parser_state_interval = interval;
		self
	}
}

/// Collaborators injected into a session.
#[derive(Clone)]
pub struct SessionDeps {
	pub macros: Arc<dyn MacroStore>,
	pub files: Arc<dyn FileStore>,
	pub tasks: Arc<dyn TaskRunner>,
	pub triggers: Arc<EventTrigger>,
}

impl Default for SessionDeps {
	fn default() -> Self {
		Self {
			macros: Arc::new(EmptyStore),
			files: Arc::new(EmptyStore),
			tasks: Arc::new(NoopTaskRunner),
			triggers: Arc::new(EventTrigger::default()),
		}
	}
}

impl SessionDeps {
	pub fn with_macros(mut self, macros: Arc<dyn MacroStore>) -> Self {
		self.macros = macros;
		self
	}

	pub fn with_files(mut self, files: Arc<dyn FileStore>) -> Self {
		self.files = files;
		self
	}

	pub fn with_tasks(mut self, tasks: Arc<dyn TaskRunner>) -> Self {
		self.tasks = tasks;
		self
	}

	pub fn with_triggers(mut self, triggers: EventTrigger) -> Self {
		self.triggers = Arc::new(triggers);
		self
	}
}

/// What a dispatched command did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
	Done,
	Loaded { name: String, total: usize },
	/// Not available on this controller family; nothing was sent.
	Unsupported,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerStatus {
	#[serde(rename = "type")]
	pub kind: String,
	pub state: Value,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
	pub port: String,
	pub baudrate: u32,
	pub connections: Vec<ObserverId>,
	pub open: bool,
	pub ready: bool,
	pub controller: ControllerStatus,
	pub workflow_state: WorkflowState,
	pub feeder: Option<FeederStatus>,
	pub sender: Option<SenderStatus>,
}

enum Request {
	Open {
		reply: oneshot::Sender<Result<()>>,
	},
	Close {
		reply: oneshot::Sender<Result<()>>,
	},
	AddObserver {
		observer: Arc<dyn Observer>,
		reply: oneshot::Sender<ObserverId>,
	},
	RemoveObserver {
		id: ObserverId,
		reply: oneshot::Sender<Result<()>>,
	},
	Dispatch {
		origin: Option<ObserverId>,
		command: Command,
		reply: oneshot::Sender<Result<Outcome>>,
	},
	/// A macro or file lookup finished; load its content.
	Resolved {
		origin: Option<ObserverId>,
		trigger: &'static str,
		name: String,
		content: String,
		reply: oneshot::Sender<Result<Outcome>>,
	},
	Status {
		reply: oneshot::Sender<SessionStatus>,
	},
	Shutdown {
		reply: oneshot::Sender<()>,
	},
}

/// Cloneable handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
	tx: mpsc::Sender<Request>,
}

impl std::fmt::Debug for SessionHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionHandle")
			.field("closed", &self.tx.is_closed())
			.finish()
	}
}

impl SessionHandle {
	/// Starts a session task. The connection is not opened yet.
	pub fn spawn(config: SessionConfig, connector: Arc<dyn Connector>, deps: SessionDeps) -> Self {
		let (tx, rx) = mpsc::channel(REQUEST_CAPACITY);
		let actor = Actor {
			config,
			connector,
			deps,
			observers: Arc::new(ObserverRegistry::new()),
			link: None,
			requests: rx,
			loopback: tx.downgrade(),
		};
		tokio::spawn(actor.run());
		Self { tx }
	}

	async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T> {
		let (reply, rx) = oneshot::channel();
		self.tx
			.send(make(reply))
			.await
			.map_err(|_| Error::SessionGone)?;
		rx.await.map_err(|_| Error::SessionGone)
	}

	/// Opens the transport and starts the init handshake.
	pub async fn open(&self) -> Result<()> {
		self.request(|reply| Request::Open { reply }).await?
	}

	pub async fn close(&self) -> Result<()> {
		self.request(|reply| Request::Close { reply }).await?
	}

	/// Attaches an observer. If connected, it immediately receives the
	/// latest telemetry and sender status.
	pub async fn add_observer(&self, observer: Arc<dyn Observer>) -> Result<ObserverId> {
		self.request(|reply| Request::AddObserver { observer, reply })
			.await
	}

	pub async fn remove_observer(&self, id: ObserverId) -> Result<()> {
		self.request(|reply| Request::RemoveObserver { id, reply })
			.await?
	}

	pub async fn dispatch(&self, origin: Option<ObserverId>, command: Command) -> Result<Outcome> {
		self.request(|reply| Request::Dispatch {
			origin,
			command,
			reply,
		})
		.await?
	}

	/// Parses `name` and `args` into a [`Command`] and dispatches it.
	pub async fn command<S: AsRef<str>>(
		&self,
		origin: Option<ObserverId>,
		name: &str,
		args: &[S],
	) -> Result<Outcome> {
		let command = Command::from_parts(name, args).inspect_err(|err| {
			error!(target = "cnc.session", name, error = %err, "command rejected");
		})?;
		self.dispatch(origin, command).await
	}

	pub async fn status(&self) -> Result<SessionStatus> {
		self.request(|reply| Request::Status { reply }).await
	}

	/// Closes the connection if open and stops the session task.
	pub async fn shutdown(&self) -> Result<()> {
		self.request(|reply| Request::Shutdown { reply }).await
	}
}

/// State tied to one open connection.
struct Link {
	engine: Engine,
	events: mpsc::UnboundedReceiver<TransportEvent>,
	poll: Interval,
	reader: JoinHandle<()>,
	// Finishes on its own once the engine's outbound sender is dropped.
	_writer: JoinHandle<()>,
}

impl Drop for Link {
	fn drop(&mut self) {
		self.reader.abort();
	}
}

enum LinkInput {
	Transport(TransportEvent),
	Tick(Instant),
	Timer(Instant),
}

impl Link {
	async fn next_input(&mut self) -> LinkInput {
		let deadline = self.engine.next_deadline();
		tokio::select! {
			event = self.events.recv() => {
				LinkInput::Transport(event.unwrap_or(TransportEvent::Disconnected(None)))
			}
			tick = self.poll.tick() => LinkInput::Tick(tick),
			now = sleep_until(deadline) => LinkInput::Timer(now),
		}
	}
}

async fn sleep_until(deadline: Option<Instant>) -> Instant {
	match deadline {
		Some(deadline) => {
			tokio::time::sleep_until(deadline).await;
			Instant::now()
		}
		None => pending().await,
	}
}

async fn next_link_input(link: &mut Option<Link>) -> LinkInput {
	match link {
		Some(link) => link.next_input().await,
		None => pending().await,
	}
}

struct Actor {
	config: SessionConfig,
	connector: Arc<dyn Connector>,
	deps: SessionDeps,
	observers: Arc<ObserverRegistry>,
	link: Option<Link>,
	requests: mpsc::Receiver<Request>,
	loopback: mpsc::WeakSender<Request>,
}

impl Actor {
	async fn run(mut self) {
		debug!(target = "cnc.session", port = %self.config.port, "session started");
		loop {
			tokio::select! {
				request = self.requests.recv() => {
					let Some(request) = request else { break };
					if !self.handle(request).await {
						break;
					}
				}
				input = next_link_input(&mut self.link) => self.on_link_input(input),
			}
		}
		if self.link.is_some() {
			self.teardown();
		}
		debug!(target = "cnc.session", port = %self.config.port, "session stopped");
	}

	/// Returns false when the session should stop.
	async fn handle(&mut self, request: Request) -> bool {
		match request {
			Request::Open { reply } => {
				let _ = reply.send(self.open().await);
			}
			Request::Close { reply } => {
				let _ = reply.send(self.close());
			}
			Request::AddObserver { observer, reply } => {
				let id = self.observers.add(observer);
				if let Some(link) = &self.link {
					link.engine.greet(id);
				}
				let _ = reply.send(id);
			}
			Request::RemoveObserver { id, reply } => {
				let result = if self.observers.remove(id) {
					Ok(())
				} else {
					error!(target = "cnc.session", %id, "observer not attached");
					Err(Error::ObserverNotFound(id))
				};
				let _ = reply.send(result);
			}
			Request::Dispatch {
				origin,
				command,
				reply,
			} => self.dispatch(origin, command, reply),
			Request::Resolved {
				origin,
				trigger,
				name,
				content,
				reply,
			} => {
				let result = match &mut self.link {
					Some(link) => {
						if link.engine.is_ready() {
							link.engine.fire_trigger(trigger);
						}
						link.engine
							.dispatch(origin, Command::Load { name, content }, Instant::now())
					}
					None => Err(Error::NotOpen(self.config.port.clone())),
				};
				let _ = reply.send(result);
			}
			Request::Status { reply } => {
				let _ = reply.send(self.status());
			}
			Request::Shutdown { reply } => {
				if self.link.is_some() {
					self.teardown();
				}
				let _ = reply.send(());
				return false;
			}
		}
		true
	}

	async fn open(&mut self) -> Result<()> {
		let port = self.config.port.clone();
		if self.link.is_some() {
			error!(target = "cnc.session", port = %port, "cannot open, already open");
			return Err(Error::AlreadyOpen(port));
		}

		let parts = match self.connector.connect().await {
			Ok(parts) => parts,
			Err(err) => {
				error!(target = "cnc.session", port = %port, error = %err, "error opening port");
				self.observers.broadcast(&SessionEvent::Error(ErrorInfo {
					port,
					err: err.to_string(),
				}));
				return Err(err);
			}
		};

		let (event_tx, events) = mpsc::unbounded_channel();
		let (out_tx, out_rx) = mpsc::unbounded_channel();
		let reader = tokio::spawn(parts.reader.run(event_tx.clone()));
		let writer = tokio::spawn(run_writer(parts.writer, out_rx, event_tx));

		self.observers.broadcast(&SessionEvent::Open(OpenInfo {
			port: port.clone(),
			baudrate: self.config.baudrate,
			controller_type: self.config.profile.name.to_string(),
			inuse: true,
		}));
		info!(target = "cnc.session", port = %port, controller = self.config.profile.name, "connected");

		let mut engine = Engine::new(
			&self.config,
			self.deps.clone(),
			Arc::clone(&self.observers),
			out_tx,
		);
		engine.start(Instant::now());

		let mut poll = tokio::time::interval(self.config.poll_interval);
		poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

		self.link = Some(Link {
			engine,
			events,
			poll,
			reader,
			_writer: writer,
		});
		Ok(())
	}

	fn close(&mut self) -> Result<()> {
		if self.link.is_none() {
			error!(target = "cnc.session", port = %self.config.port, "port was already closed");
			return Err(Error::NotOpen(self.config.port.clone()));
		}
		self.teardown();
		Ok(())
	}

	fn teardown(&mut self) {
		self.observers.broadcast(&SessionEvent::Close(CloseInfo {
			port: self.config.port.clone(),
			inuse: false,
		}));
		self.link = None;
		info!(target = "cnc.session", port = %self.config.port, "disconnected");
	}

	fn on_link_input(&mut self, input: LinkInput) {
		let Some(link) = &mut self.link else {
			return;
		};
		match input {
			LinkInput::Transport(TransportEvent::Line(line)) => link.engine.on_line(&line),
			LinkInput::Transport(TransportEvent::Disconnected(reason)) => {
				match reason {
					Some(reason) => {
						warn!(target = "cnc.session", port = %self.config.port, reason = %reason, "disconnected from port");
					}
					None => debug!(target = "cnc.session", port = %self.config.port, "port reached end of stream"),
				}
				self.teardown();
			}
			LinkInput::Transport(TransportEvent::Error(err)) => {
				error!(target = "cnc.session", port = %self.config.port, error = %err, "unexpected error while reading/writing port");
				self.observers.broadcast(&SessionEvent::Error(ErrorInfo {
					port: self.config.port.clone(),
					err,
				}));
				self.teardown();
			}
			LinkInput::Tick(now) => link.engine.poll(now),
			LinkInput::Timer(now) => link.engine.fire_due(now),
		}
	}

	fn dispatch(
		&mut self,
		origin: Option<ObserverId>,
		command: Command,
		reply: oneshot::Sender<Result<Outcome>>,
	) {
		let port = self.config.port.clone();
		let Some(link) = &mut self.link else {
			error!(target = "cnc.session", port = %port, command = command.name(), "port is not accessible");
			let _ = reply.send(Err(Error::NotOpen(port)));
			return;
		};
		if !link.engine.is_ready() {
			let _ = reply.send(Err(Error::NotReady(port)));
			return;
		}

		match command {
			Command::LoadMacro { id } => {
				let macros = Arc::clone(&self.deps.macros);
				let loopback = self.loopback.clone();
				tokio::spawn(async move {
					match macros.lookup_macro(&id).await {
						Ok(Some(found)) => {
							resolve(loopback, origin, "loadmacro", found.name, found.content, reply).await;
						}
						Ok(None) => {
							error!(target = "cnc.session", id = %id, "cannot find the macro");
							let _ = reply.send(Err(Error::MacroNotFound(id)));
						}
						Err(err) => {
							let _ = reply.send(Err(err));
						}
					}
				});
			}
			Command::LoadFile { path } => {
				let files = Arc::clone(&self.deps.files);
				let loopback = self.loopback.clone();
				tokio::spawn(async move {
					match files.read_file(&path).await {
						Ok(content) => {
							resolve(loopback, origin, "loadfile", path, content, reply).await;
						}
						Err(err) => {
							error!(target = "cnc.session", path = %path, error = %err, "cannot read file");
							let _ = reply.send(Err(err));
						}
					}
				});
			}
			command => {
				let _ = reply.send(link.engine.dispatch(origin, command, Instant::now()));
			}
		}
	}

	fn status(&self) -> SessionStatus {
		let (ready, state, workflow_state, feeder, sender) = match &self.link {
			Some(link) => (
				link.engine.is_ready(),
				(**link.engine.telemetry()).clone(),
				link.engine.workflow_state(),
				Some(link.engine.feeder().status()),
				Some(link.engine.sender().status()),
			),
			None => (false, Value::Null, WorkflowState::Idle, None, None),
		};
		SessionStatus {
			port: self.config.port.clone(),
			baudrate: self.config.baudrate,
			connections: self.observers.ids(),
			open: self.link.is_some(),
			ready,
			controller: ControllerStatus {
				kind: self.config.profile.name.to_string(),
				state,
			},
			workflow_state,
			feeder,
			sender,
		}
	}
}

/// Hands a finished lookup back to the session task.
async fn resolve(
	loopback: mpsc::WeakSender<Request>,
	origin: Option<ObserverId>,
	trigger: &'static str,
	name: String,
	content: String,
	reply: oneshot::Sender<Result<Outcome>>,
) {
	let Some(tx) = loopback.upgrade() else {
		let _ = reply.send(Err(Error::SessionGone));
		return;
	};
	let request = Request::Resolved {
		origin,
		trigger,
		name,
		content,
		reply,
	};
	if let Err(mpsc::error::SendError(request)) = tx.send(request).await {
		if let Request::Resolved { reply, .. } = request {
			let _ = reply.send(Err(Error::SessionGone));
		}
	}
}
