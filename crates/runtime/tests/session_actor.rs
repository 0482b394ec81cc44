//! End-to-end session tests against a simulated Grbl controller.
//!
//! The controller runs on the far end of an in-memory duplex pipe and answers
//! like firmware would: `ok` per line, a status report per `?`, and a parser
//! state block for `$G`. Time is paused so handshake and poll timers run
//! without real waiting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cnc_protocol::{DeviceProfile, SessionEvent};
use cnc_runtime::{
	ChannelObserver, Command, Connector, DeviceFileConnector, Error, LineTransport, Macro, Outcome,
	Result, SessionConfig, SessionDeps, SessionHandle, SessionStatus, StaticMacroStore,
	TransportParts,
};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

const STATUS_REPORT: &[u8] = b"<Idle|MPos:0.000,0.000,0.000|Bf:15,128>\r\n";
const PARSER_STATE: &[u8] = b"[GC:G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0]\r\nok\r\n";

struct DuplexConnector {
	host: Mutex<Option<DuplexStream>>,
}

#[async_trait]
impl Connector for DuplexConnector {
	fn describe(&self) -> String {
		"duplex".into()
	}

	async fn connect(&self) -> Result<TransportParts> {
		let stream = self.host.lock().take().ok_or_else(|| Error::OpenFailed {
			port: self.describe(),
			reason: "pipe already used".into(),
		})?;
		let (reader, writer) = tokio::io::split(stream);
		Ok(LineTransport::new(writer, reader).into_parts())
	}
}

fn pipe() -> (Arc<DuplexConnector>, DuplexStream) {
	let (host, device) = tokio::io::duplex(4096);
	let connector = Arc::new(DuplexConnector {
		host: Mutex::new(Some(host)),
	});
	(connector, device)
}

/// Answers like Grbl 1.1 and records every line it receives.
fn spawn_controller(mut io: DuplexStream) -> Arc<Mutex<Vec<String>>> {
	let seen = Arc::new(Mutex::new(Vec::new()));
	let log = Arc::clone(&seen);
	tokio::spawn(async move {
		let mut buf = [0u8; 512];
		let mut line = Vec::new();
		loop {
			let n = match io.read(&mut buf).await {
				Ok(0) | Err(_) => return,
				Ok(n) => n,
			};
			let mut reply = Vec::new();
			for &byte in &buf[..n] {
				match byte {
					b'?' => reply.extend_from_slice(STATUS_REPORT),
					b'!' | b'~' | 0x18 => {}
					b'\n' => {
						let text = String::from_utf8_lossy(&line).trim().to_string();
						line.clear();
						if text == "$G" {
							reply.extend_from_slice(PARSER_STATE);
						} else {
							reply.extend_from_slice(b"ok\r\n");
							log.lock().push(text);
						}
					}
					other => line.push(other),
				}
			}
			if !reply.is_empty() && io.write_all(&reply).await.is_err() {
				return;
			}
		}
	});
	seen
}

fn spawn_session(connector: Arc<dyn Connector>, deps: SessionDeps) -> SessionHandle {
	let config = SessionConfig::new("sim", DeviceProfile::grbl());
	SessionHandle::spawn(config, connector, deps)
}

async fn wait_for(
	session: &SessionHandle,
	what: &str,
	done: impl Fn(&SessionStatus) -> bool,
) -> SessionStatus {
	for _ in 0..200 {
		let status = session.status().await.unwrap();
		if done(&status) {
			return status;
		}
		tokio::time::sleep(Duration::from_millis(50)).await;
	}
	panic!("timed out waiting for {what}");
}

async fn next_event(
	events: &mut mpsc::Receiver<SessionEvent>,
	matches: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
	loop {
		let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
			.await
			.expect("event within timeout")
			.expect("observer channel open");
		if matches(&event) {
			return event;
		}
	}
}

#[tokio::test(start_paused = true)]
async fn streams_a_program_end_to_end() {
	let (connector, device) = pipe();
	let seen = spawn_controller(device);
	let session = spawn_session(connector, SessionDeps::default());
	let (observer, mut events) = ChannelObserver::channel(1024);
	session.add_observer(Arc::new(observer)).await.unwrap();

	session.open().await.unwrap();
	match next_event(&mut events, |e| matches!(e, SessionEvent::Open(_))).await {
		SessionEvent::Open(info) => {
			assert_eq!(info.port, "sim");
			assert_eq!(info.controller_type, "Grbl");
			assert!(info.inuse);
		}
		_ => unreachable!(),
	}
	wait_for(&session, "handshake", |s| s.ready).await;

	let outcome = session
		.command(None, "load", &["part.nc", "G21\nG0 X10\nG1 X20 F100\n"])
		.await
		.unwrap();
	assert_eq!(
		outcome,
		Outcome::Loaded {
			name: "part.nc".into(),
			total: 3
		}
	);
	session.dispatch(None, Command::Start).await.unwrap();

	let status = wait_for(&session, "program acknowledged", |s| {
		s.sender.as_ref().is_some_and(|sender| sender.received == 3)
	})
	.await;
	assert_eq!(status.connections.len(), 1);
	assert_eq!(status.controller.kind, "Grbl");
	assert_eq!(status.controller.state["status"]["activeState"], "Idle");

	let lines = seen.lock().clone();
	assert_eq!(lines, vec!["G21", "G0 X10", "G1 X20 F100"]);

	session.close().await.unwrap();
	next_event(&mut events, |e| matches!(e, SessionEvent::Close(_))).await;
	assert!(!session.status().await.unwrap().open);
	session.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn commands_require_an_open_ready_session() {
	let (connector, device) = pipe();
	spawn_controller(device);
	let session = spawn_session(connector, SessionDeps::default());

	let err = session.dispatch(None, Command::Homing).await.unwrap_err();
	assert!(matches!(err, Error::NotOpen(_)));
	assert!(matches!(session.close().await, Err(Error::NotOpen(_))));

	session.open().await.unwrap();
	let err = session.dispatch(None, Command::Homing).await.unwrap_err();
	assert!(matches!(err, Error::NotReady(_)));
	assert!(matches!(session.open().await, Err(Error::AlreadyOpen(_))));

	wait_for(&session, "handshake", |s| s.ready).await;
	assert_eq!(
		session.dispatch(None, Command::Homing).await.unwrap(),
		Outcome::Done
	);

	let err = session
		.command(None, "jog", &["X10"])
		.await
		.unwrap_err();
	assert!(matches!(err, Error::UnknownCommand(_)));
	session.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn macros_load_as_programs() {
	let (connector, device) = pipe();
	spawn_controller(device);
	let macros = StaticMacroStore::new([Macro {
		id: "probe".into(),
		name: "Probe Z".into(),
		content: "G38.2 Z-10 F50\nG0 Z5\n".into(),
	}]);
	let deps = SessionDeps::default().with_macros(Arc::new(macros));
	let session = spawn_session(connector, deps);
	session.open().await.unwrap();
	wait_for(&session, "handshake", |s| s.ready).await;

	let outcome = session.command(None, "loadmacro", &["probe"]).await.unwrap();
	assert_eq!(
		outcome,
		Outcome::Loaded {
			name: "Probe Z".into(),
			total: 2
		}
	);
	let status = session.status().await.unwrap();
	assert_eq!(status.sender.map(|s| s.name), Some("Probe Z".to_string()));

	let err = session.command(None, "loadmacro", &["missing"]).await.unwrap_err();
	assert!(matches!(err, Error::MacroNotFound(ref id) if id == "missing"));
	session.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn device_hangup_closes_the_session() {
	let (connector, device) = pipe();
	let session = spawn_session(connector, SessionDeps::default());
	let (observer, mut events) = ChannelObserver::channel(64);
	session.add_observer(Arc::new(observer)).await.unwrap();

	session.open().await.unwrap();
	drop(device);

	match next_event(&mut events, |e| matches!(e, SessionEvent::Close(_))).await {
		SessionEvent::Close(info) => assert!(!info.inuse),
		_ => unreachable!(),
	}
	wait_for(&session, "teardown", |s| !s.open).await;

	// Observers survive the connection.
	assert_eq!(session.status().await.unwrap().connections.len(), 1);
	session.shutdown().await.unwrap();
}

#[tokio::test]
async fn open_failure_is_broadcast() {
	let dir = tempfile::tempdir().unwrap();
	let connector = Arc::new(DeviceFileConnector::new(dir.path().join("ttyUSB9")));
	let session = spawn_session(connector, SessionDeps::default());
	let (observer, mut events) = ChannelObserver::channel(8);
	let id = session.add_observer(Arc::new(observer)).await.unwrap();

	let err = session.open().await.unwrap_err();
	assert!(err.is_transport());
	assert!(matches!(events.recv().await, Some(SessionEvent::Error(_))));
	assert!(!session.status().await.unwrap().open);

	session.remove_observer(id).await.unwrap();
	assert!(matches!(
		session.remove_observer(id).await,
		Err(Error::ObserverNotFound(_))
	));
	session.shutdown().await.unwrap();
	assert!(matches!(session.status().await, Err(Error::SessionGone)));
}
