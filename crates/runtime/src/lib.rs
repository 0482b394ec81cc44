//! CNC Runtime - Device sessions for Grbl-class controllers
//!
//! This crate owns everything between a byte transport and the clients
//! watching a machine:
//!
//! - **Queues**: the interactive [`Feeder`] and the character-counting [`Sender`]
//! - **Workflow**: idle/running/paused program state
//! - **Session**: one connection, its init handshake, polling, and command dispatch
//! - **Observers**: best-effort event fan-out to any number of clients
//! - **Transport**: device node, TCP bridge, or WebSocket tunnel
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  SessionHandle  ┌───────────────┐
//! │   clients    │ ──────────────► │ session actor │
//! │ (observers)  │ ◄── events ──── │  ┌─────────┐  │
//! └──────────────┘                 │  │ Engine  │  │  feeder, sender, mask
//!                                  │  └─────────┘  │
//!                                  └───────┬───────┘
//!                                          │ bytes / lines
//!                                  ┌───────▼───────┐
//!                                  │   transport   │
//!                                  └───────────────┘
//! ```
//!
//! Device lines are decoded by the [`cnc_protocol::LineParser`] chosen by the
//! session's [`cnc_protocol::DeviceProfile`].

pub mod action_mask;
pub mod error;
pub mod feeder;
pub mod observer;
pub mod queue;
pub mod sender;
pub mod session;
pub mod store;
pub mod transport;
pub mod trigger;
pub mod workflow;

pub use action_mask::ActionMask;
pub use error::{Error, ProgramError, Result};
pub use feeder::Feeder;
pub use observer::{ChannelObserver, Delivery, Observer, ObserverId, ObserverRegistry};
pub use queue::Queue;
pub use sender::Sender;
pub use session::{
	Command, Outcome, SessionConfig, SessionDeps, SessionHandle, SessionStatus,
};
pub use store::{EmptyStore, FileStore, FsFileStore, Macro, MacroStore, StaticMacroStore};
pub use transport::{
	Connector, DeviceFileConnector, Endpoint, LineTransport, TcpConnector, TransportEvent,
	TransportParts, WebSocketConnector,
};
pub use trigger::{
	EventTrigger, NoopTaskRunner, ShellTaskRunner, TaskRunner, TriggerAction, TriggerKind, TriggerRule,
};
pub use workflow::{Workflow, WorkflowState};
