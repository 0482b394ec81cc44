//! Wire-level types for Grbl-class motion controllers.
//!
//! Everything here is synchronous and transport-agnostic:
//!
//! - **Events**: typed replies decoded from the device's line stream
//! - **Parser**: the [`LineParser`] collaborator plus a Grbl-dialect implementation
//! - **Profiles**: per-family command bytes, init handshake, and override rules
//! - **Codes**: description tables used to decorate error, alarm, and setting lines
//! - **Outbound**: the events a session broadcasts to its observers

pub mod codes;
pub mod event;
pub mod outbound;
pub mod parser;
pub mod profile;

pub use event::{BufferReport, DeviceEvent};
pub use outbound::{
	CloseInfo, ErrorInfo, FeederStatus, OpenInfo, SenderStatus, SessionEvent, WorkflowState,
};
pub use parser::{GrblLineParser, LineParser};
pub use profile::{
	DeviceFamily, DeviceProfile, InitStep, OverrideKind, OverrideRange, OverrideStyle, StopStyle,
};
