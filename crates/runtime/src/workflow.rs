//! Job lifecycle.
//!
//! Transitions only report whether they happened; the session applies the
//! side effects (rewind, resume streaming) in the same step.

pub use cnc_protocol::WorkflowState;

#[derive(Debug, Default)]
pub struct Workflow {
	state: WorkflowState,
}

impl Workflow {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn state(&self) -> WorkflowState {
		self.state
	}

	pub fn is_running(&self) -> bool {
		self.state == WorkflowState::Running
	}

	pub fn is_idle(&self) -> bool {
		self.state == WorkflowState::Idle
	}

	/// IDLE -> RUNNING.
	pub fn start(&mut self) -> bool {
		self.transition(WorkflowState::Idle, WorkflowState::Running)
	}

	/// RUNNING or PAUSED -> IDLE.
	pub fn stop(&mut self) -> bool {
		if self.state == WorkflowState::Idle {
			return false;
		}
		self.state = WorkflowState::Idle;
		true
	}

	/// RUNNING -> PAUSED.
	pub fn pause(&mut self) -> bool {
		self.transition(WorkflowState::Running, WorkflowState::Paused)
	}

	/// PAUSED -> RUNNING.
	pub fn resume(&mut self) -> bool {
		self.transition(WorkflowState::Paused, WorkflowState::Running)
	}

	fn transition(&mut self, from: WorkflowState, to: WorkflowState) -> bool {
		if self.state != from {
			return false;
		}
		self.state = to;
		true
	}
}
