use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::*;

#[test]
fn endpoint_parsing() {
	assert_eq!(
		Endpoint::parse("/dev/ttyUSB0").unwrap(),
		Endpoint::Device(PathBuf::from("/dev/ttyUSB0"))
	);
	assert_eq!(
		Endpoint::parse("tcp://192.168.1.20:2000").unwrap(),
		Endpoint::Tcp("192.168.1.20:2000".into())
	);
	assert_eq!(
		Endpoint::parse("ws://localhost:8000/serial").unwrap(),
		Endpoint::WebSocket("ws://localhost:8000/serial".into())
	);
	assert!(Endpoint::parse("tcp://").is_err());
	assert!(Endpoint::parse("  ").is_err());
}

#[test]
fn endpoint_display_round_trips_labels() {
	for spec in ["/dev/ttyACM0", "tcp://bridge:2000", "wss://shop.local/cnc"] {
		let endpoint = Endpoint::parse(spec).unwrap();
		assert_eq!(endpoint.to_string(), spec);
		assert_eq!(endpoint.connector().describe(), spec);
	}
}

#[test]
fn line_buffer_keeps_partial_lines() {
	let mut buffer = LineBuffer::new();
	assert!(buffer.push(b"<Idle|MPos:0.000").is_empty());
	assert_eq!(
		buffer.push(b",0.000,0.000>\r\nok\r\nerr"),
		vec!["<Idle|MPos:0.000,0.000,0.000>", "ok"]
	);
	assert_eq!(buffer.push(b"or:20\n"), vec!["error:20"]);
}

#[tokio::test]
async fn writer_sends_raw_bytes() {
	let (device, host) = tokio::io::duplex(1024);
	let (host_read, host_write) = tokio::io::split(host);
	let TransportParts { mut writer, .. } = LineTransport::new(host_write, host_read).into_parts();

	writer.write(b"G0 X1\n").await.unwrap();
	writer.write(&[0x18]).await.unwrap();

	let (mut device_read, _device_write) = tokio::io::split(device);
	let mut buf = [0u8; 7];
	device_read.read_exact(&mut buf).await.unwrap();
	assert_eq!(&buf, b"G0 X1\n\x18");
}

#[tokio::test]
async fn reader_frames_lines_and_reports_eof() {
	let (device, host) = tokio::io::duplex(1024);
	let (host_read, host_write) = tokio::io::split(host);
	let TransportParts { reader, .. } = LineTransport::new(host_write, host_read).into_parts();
	let (tx, mut rx) = mpsc::unbounded_channel();
	let task = tokio::spawn(reader.run(tx));

	let (_device_read, mut device_write) = tokio::io::split(device);
	device_write
		.write_all(b"Grbl 1.1f ['$' for help]\r\nok\r\n")
		.await
		.unwrap();
	device_write.shutdown().await.unwrap();
	drop(device_write);
	drop(_device_read);

	assert_eq!(
		rx.recv().await,
		Some(TransportEvent::Line("Grbl 1.1f ['$' for help]".into()))
	);
	assert_eq!(rx.recv().await, Some(TransportEvent::Line("ok".into())));
	assert_eq!(rx.recv().await, Some(TransportEvent::Disconnected(None)));
	task.await.unwrap();
}

#[tokio::test]
async fn reader_stops_when_receiver_dropped() {
	let (device, host) = tokio::io::duplex(1024);
	let (host_read, host_write) = tokio::io::split(host);
	let TransportParts { reader, .. } = LineTransport::new(host_write, host_read).into_parts();
	let (tx, rx) = mpsc::unbounded_channel();
	drop(rx);
	let task = tokio::spawn(reader.run(tx));

	let (_device_read, mut device_write) = tokio::io::split(device);
	device_write.write_all(b"ok\n").await.unwrap();

	task.await.unwrap();
}

#[tokio::test]
async fn run_writer_drains_and_reports_failure() {
	let (device, host) = tokio::io::duplex(64);
	let (host_read, host_write) = tokio::io::split(host);
	let TransportParts { writer, .. } = LineTransport::new(host_write, host_read).into_parts();
	let (out_tx, out_rx) = mpsc::unbounded_channel();
	let (event_tx, mut event_rx) = mpsc::unbounded_channel();
	let task = tokio::spawn(run_writer(writer, out_rx, event_tx));

	out_tx.send(b"?".to_vec()).unwrap();
	let (mut device_read, device_write) = tokio::io::split(device);
	let mut buf = [0u8; 1];
	device_read.read_exact(&mut buf).await.unwrap();
	assert_eq!(&buf, b"?");

	// Device gone: the next write fails.
	drop(device_read);
	drop(device_write);
	out_tx.send(b"$G\n".to_vec()).unwrap();

	assert!(matches!(event_rx.recv().await, Some(TransportEvent::Error(_))));
	task.await.unwrap();
}

#[tokio::test]
async fn device_file_connector_reports_open_failure() {
	let dir = tempfile::tempdir().unwrap();
	let connector = DeviceFileConnector::new(dir.path().join("ttyMISSING"));
	let err = connector.connect().await.unwrap_err();
	assert!(matches!(err, Error::OpenFailed { .. }));
	assert!(err.is_transport());
}
