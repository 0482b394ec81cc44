//! Line-oriented byte transports.
//!
//! A transport is split into a writer (raw bytes out) and a reader that runs
//! until the stream ends, pushing newline-framed lines as [`TransportEvent`]s.
//! [`Connector`]s open the concrete streams: a tty device node, a TCP serial
//! bridge, or a WebSocket tunnel.

mod websocket;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, trace};

pub use websocket::WebSocketConnector;

use crate::error::{Error, Result};

/// What the reader side reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
	/// One line, without its terminator.
	Line(String),
	/// Stream ended, with the reason if it was not a clean EOF.
	Disconnected(Option<String>),
	/// Read or write failure.
	Error(String),
}

/// Outbound half.
#[async_trait]
pub trait TransportWriter: Send {
	async fn write(&mut self, bytes: &[u8]) -> Result<()>;

	async fn close(&mut self) -> Result<()>;
}

/// Inbound half. Runs until the stream ends or `events` is dropped.
#[async_trait]
pub trait TransportReader: Send {
	async fn run(self: Box<Self>, events: mpsc::UnboundedSender<TransportEvent>);
}

/// Both halves of an opened transport.
pub struct TransportParts {
	pub writer: Box<dyn TransportWriter>,
	pub reader: Box<dyn TransportReader>,
}

impl fmt::Debug for TransportParts {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TransportParts").finish_non_exhaustive()
	}
}

/// Opens transports to one endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
	/// Port label used in events and logs.
	fn describe(&self) -> String;

	async fn connect(&self) -> Result<TransportParts>;
}

/// Newline framing over any tokio byte stream pair.
pub struct LineTransport<W, R> {
	writer: W,
	reader: R,
}

impl<W, R> LineTransport<W, R>
where
	W: AsyncWrite + Unpin + Send + 'static,
	R: AsyncRead + Unpin + Send + 'static,
{
	pub fn new(writer: W, reader: R) -> Self {
		Self { writer, reader }
	}

	pub fn into_parts(self) -> TransportParts {
		TransportParts {
			writer: Box::new(StreamWriter {
				inner: self.writer,
			}),
			reader: Box::new(StreamReader {
				inner: BufReader::new(self.reader),
			}),
		}
	}
}

struct StreamWriter<W> {
	inner: W,
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> TransportWriter for StreamWriter<W> {
	async fn write(&mut self, bytes: &[u8]) -> Result<()> {
		self.inner.write_all(bytes).await?;
		self.inner.flush().await?;
		Ok(())
	}

	async fn close(&mut self) -> Result<()> {
		self.inner.shutdown().await?;
		Ok(())
	}
}

struct StreamReader<R> {
	inner: BufReader<R>,
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> TransportReader for StreamReader<R> {
	async fn run(mut self: Box<Self>, events: mpsc::UnboundedSender<TransportEvent>) {
		let mut buf = Vec::new();
		loop {
			buf.clear();
			let event = match self.inner.read_until(b'\n', &mut buf).await {
				Ok(0) => {
					let _ = events.send(TransportEvent::Disconnected(None));
					return;
				}
				Ok(_) => TransportEvent::Line(decode_line(&buf)),
				Err(err) => {
					let _ = events.send(TransportEvent::Error(err.to_string()));
					return;
				}
			};
			if events.send(event).is_err() {
				return;
			}
		}
	}
}

fn decode_line(bytes: &[u8]) -> String {
	let text = String::from_utf8_lossy(bytes);
	text.trim_end_matches(['\n', '\r']).to_string()
}

/// Splits arbitrary chunks into lines. Partial trailing data is kept.
#[derive(Debug, Default)]
pub struct LineBuffer {
	pending: Vec<u8>,
}

impl LineBuffer {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
		self.pending.extend_from_slice(chunk);
		let mut lines = Vec::new();
		while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
			let line: Vec<u8> = self.pending.drain(..=pos).collect();
			lines.push(decode_line(&line));
		}
		lines
	}
}

/// Opens a serial device node.
///
/// Line settings (baud rate, parity) are applied to the node outside this
/// process, e.g. with `stty`.
#[derive(Debug, Clone)]
pub struct DeviceFileConnector {
	path: PathBuf,
}

impl DeviceFileConnector {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}
}

#[async_trait]
impl Connector for DeviceFileConnector {
	fn describe(&self) -> String {
		self.path.display().to_string()
	}

	async fn connect(&self) -> Result<TransportParts> {
		// Separate handles: a blocked read on a tokio File stalls writes on the same handle.
		let open_failed = |err: std::io::Error| Error::OpenFailed {
			port: self.describe(),
			reason: err.to_string(),
		};
		let reader = tokio::fs::File::open(&self.path)
			.await
			.map_err(open_failed)?;
		let writer = tokio::fs::OpenOptions::new()
			.write(true)
			.open(&self.path)
			.await
			.map_err(open_failed)?;
		debug!(target = "cnc.transport", path = %self.path.display(), "device opened");
		Ok(LineTransport::new(writer, reader).into_parts())
	}
}

/// Connects to a serial-over-TCP bridge (`ser2net` and friends).
#[derive(Debug, Clone)]
pub struct TcpConnector {
	addr: String,
}

impl TcpConnector {
	pub fn new(addr: impl Into<String>) -> Self {
		Self { addr: addr.into() }
	}
}

#[async_trait]
impl Connector for TcpConnector {
	fn describe(&self) -> String {
		format!("tcp://{}", self.addr)
	}

	async fn connect(&self) -> Result<TransportParts> {
		let stream = tokio::net::TcpStream::connect(&self.addr)
			.await
			.map_err(|err| Error::OpenFailed {
				port: self.describe(),
				reason: err.to_string(),
			})?;
		stream.set_nodelay(true)?;
		debug!(target = "cnc.transport", addr = %self.addr, "tcp bridge connected");
		let (reader, writer) = stream.into_split();
		Ok(LineTransport::new(writer, reader).into_parts())
	}
}

/// Where a session connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
	Device(PathBuf),
	Tcp(String),
	WebSocket(String),
}

impl Endpoint {
	/// `ws://` and `wss://` URLs, `tcp://host:port`, or a filesystem path.
	pub fn parse(spec: &str) -> Result<Self> {
		let spec = spec.trim();
		if spec.is_empty() {
			return Err(Error::InvalidArgument {
				command: "open",
				reason: "empty endpoint".into(),
			});
		}
		if spec.starts_with("ws://") || spec.starts_with("wss://") {
			return Ok(Endpoint::WebSocket(spec.to_string()));
		}
		if let Some(addr) = spec.strip_prefix("tcp://") {
			if addr.is_empty() {
				return Err(Error::InvalidArgument {
					command: "open",
					reason: format!("missing address in {spec}"),
				});
			}
			return Ok(Endpoint::Tcp(addr.to_string()));
		}
		Ok(Endpoint::Device(PathBuf::from(spec)))
	}

	pub fn connector(&self) -> Arc<dyn Connector> {
		match self {
			Endpoint::Device(path) => Arc::new(DeviceFileConnector::new(path.clone())),
			Endpoint::Tcp(addr) => Arc::new(TcpConnector::new(addr.clone())),
			Endpoint::WebSocket(url) => Arc::new(WebSocketConnector::new(url.clone())),
		}
	}
}

impl fmt::Display for Endpoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Endpoint::Device(path) => write!(f, "{}", path.display()),
			Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
			Endpoint::WebSocket(url) => f.write_str(url),
		}
	}
}

/// Drains `outbound` into `writer` until the channel closes or a write fails.
///
/// Failures are reported on `events` so the session can tear down.
pub async fn run_writer(
	mut writer: Box<dyn TransportWriter>,
	mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
	events: mpsc::UnboundedSender<TransportEvent>,
) {
	while let Some(bytes) = outbound.recv().await {
		trace!(target = "cnc.transport", len = bytes.len(), "write");
		if let Err(err) = writer.write(&bytes).await {
			let _ = events.send(TransportEvent::Error(err.to_string()));
			return;
		}
	}
	if let Err(err) = writer.close().await {
		debug!(target = "cnc.transport", error = %err, "close failed");
	}
}

#[cfg(test)]
mod tests;
