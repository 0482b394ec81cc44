//! Serial port tunneled over a WebSocket.
//!
//! Outgoing bytes go out as binary frames so realtime bytes above 0x7f survive.
//! Incoming text and binary frames are treated as one continuous byte stream
//! and re-framed on newlines.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use super::{Connector, LineBuffer, TransportEvent, TransportParts, TransportReader, TransportWriter};
use crate::error::{Error, Result};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct WebSocketConnector {
	url: String,
}

impl WebSocketConnector {
	pub fn new(url: impl Into<String>) -> Self {
		Self { url: url.into() }
	}
}

#[async_trait]
impl Connector for WebSocketConnector {
	fn describe(&self) -> String {
		self.url.clone()
	}

	async fn connect(&self) -> Result<TransportParts> {
		let (socket, _response) = connect_async(self.url.as_str())
			.await
			.map_err(|err| Error::OpenFailed {
				port: self.describe(),
				reason: err.to_string(),
			})?;
		debug!(target = "cnc.transport", url = %self.url, "websocket connected");

		let (sink, stream) = socket.split();
		Ok(TransportParts {
			writer: Box::new(WebSocketWriter { sink }),
			reader: Box::new(WebSocketReader { stream }),
		})
	}
}

struct WebSocketWriter {
	sink: SplitSink<Socket, Message>,
}

#[async_trait]
impl TransportWriter for WebSocketWriter {
	async fn write(&mut self, bytes: &[u8]) -> Result<()> {
		self.sink
			.send(Message::Binary(bytes.to_vec()))
			.await
			.map_err(|err| Error::Transport(err.to_string()))
	}

	async fn close(&mut self) -> Result<()> {
		self.sink
			.close()
			.await
			.map_err(|err| Error::Transport(err.to_string()))
	}
}

struct WebSocketReader {
	stream: SplitStream<Socket>,
}

#[async_trait]
impl TransportReader for WebSocketReader {
	async fn run(mut self: Box<Self>, events: mpsc::UnboundedSender<TransportEvent>) {
		let mut lines = LineBuffer::new();
		while let Some(frame) = self.stream.next().await {
			let chunk = match frame {
				Ok(Message::Text(text)) => text.into_bytes(),
				Ok(Message::Binary(bytes)) => bytes,
				Ok(Message::Close(frame)) => {
					let reason = frame
						.map(|f| f.reason.to_string())
						.filter(|reason| !reason.is_empty());
					let _ = events.send(TransportEvent::Disconnected(reason));
					return;
				}
				Ok(_) => continue,
				Err(err) => {
					let _ = events.send(TransportEvent::Error(err.to_string()));
					return;
				}
			};
			for line in lines.push(&chunk) {
				if events.send(TransportEvent::Line(line)).is_err() {
					return;
				}
			}
		}
		let _ = events.send(TransportEvent::Disconnected(None));
	}
}
