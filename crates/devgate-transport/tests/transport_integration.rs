//! Transports against in-process fake devices.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use devgate_protocol::handlers::rs485_modbus::{encode_rtu, read_holding_registers};
use devgate_protocol::{DoorCommand, EntropyAccessHandler, FrameCodec, ProtocolHandler};
use devgate_transport::{
    DeviceCommand, FailureKind, HttpTransport, HttpTransportConfig, Rs485Bus, Rs485Transport,
    SerialSettings, TcpTransport, TcpTransportConfig, TransportAdapter, TransportKind,
    TransportSet,
};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::codec::Framed;

#[tokio::test]
async fn test_tcp_door_command_gets_ack() {
    let handler = EntropyAccessHandler::new();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // Fake controller: acknowledge one command.
    tokio::spawn(async move {
        let handler = EntropyAccessHandler::new();
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, FrameCodec::new(handler.framing()));
        if let Some(Ok(frame)) = framed.next().await {
            let request = handler.parse_bytes(&frame).unwrap();
            let ack = handler.build_response(&request, true, "", "");
            framed.send(ack).await.unwrap();
        }
    });

    let transport = TcpTransport::new(TcpTransportConfig { timeout_ms: 1000 });
    let command = DeviceCommand::new(
        "open-door",
        handler.door_control("ACCESS_001", 77, DoorCommand::Open, 1, 3),
    )
    .with_framing(handler.framing());

    let result = timeout(
        Duration::from_secs(5),
        transport.send_command(&common::tcp_device("ACCESS_001", addr), &command),
    )
    .await
    .unwrap();

    assert!(result.success, "{}", result.message);
    let reply = handler.parse_bytes(result.payload.as_ref().unwrap()).unwrap();
    assert_eq!(reply.device_code, "ACCESS_001");
    assert_eq!(reply.sequence, Some(77));
}

#[tokio::test]
async fn test_tcp_silent_device_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let transport = TcpTransport::new(TcpTransportConfig { timeout_ms: 200 });
    let result = transport
        .send_command(
            &common::tcp_device("ACCESS_002", addr),
            &DeviceCommand::new("status", Bytes::from_static(b"status")),
        )
        .await;

    assert!(!result.success);
    assert_eq!(result.failure, Some(FailureKind::Timeout));
    assert!(result.elapsed >= Duration::from_millis(200));
}

#[tokio::test]
async fn test_tcp_refused_connection_fails() {
    // Bind then drop to get a port nobody listens on.
    let addr = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();
    let transport = TcpTransport::default();
    let result = transport
        .send_command(
            &common::tcp_device("ACCESS_003", addr),
            &DeviceCommand::new("status", Bytes::from_static(b"status")),
        )
        .await;
    assert!(!result.success);
    assert_eq!(result.failure, Some(FailureKind::Io));
}

#[tokio::test]
async fn test_rs485_exchanges_never_interleave() {
    let (gateway_side, mut device_side) = tokio::io::duplex(1024);
    let settings = SerialSettings {
        port: "fake".into(),
        baud_rate: 115_200,
        timeout_ms: 1000,
        ..SerialSettings::default()
    };
    let transport = Arc::new(
        Rs485Transport::new().with_bus(Rs485Bus::with_stream("bus0", settings, gateway_side)),
    );
    let interleaved = Arc::new(AtomicBool::new(false));

    // Fake bus: 8-byte read requests, answered after a pause. Any byte that
    // arrives during the pause means a second request was written mid-exchange.
    let seen = interleaved.clone();
    let bus = tokio::spawn(async move {
        let mut served = 0;
        while served < 6 {
            let mut req = [0u8; 8];
            device_side.read_exact(&mut req).await.unwrap();
            let mut extra = [0u8; 1];
            if let Ok(Ok(n)) =
                timeout(Duration::from_millis(20), device_side.read(&mut extra)).await
                && n > 0
            {
                seen.store(true, Ordering::SeqCst);
            }
            let reply = encode_rtu(req[0], 0x03, &[0x02, 0x00, req[0]]);
            device_side.write_all(&reply).await.unwrap();
            served += 1;
        }
    });

    let mut tasks = Vec::new();
    for unit in 1..=6u8 {
        let transport = transport.clone();
        tasks.push(tokio::spawn(async move {
            let device = common::serial_device(&format!("RS_{unit}"), "bus0", unit);
            let pdu = read_holding_registers(unit, 0, 1).slice(1..6);
            let result = transport
                .send_command(&device, &DeviceCommand::new("read-holding-registers", pdu))
                .await;
            (unit, result)
        }));
    }

    for task in tasks {
        let (unit, result) = timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert!(result.success, "unit {unit}: {}", result.message);
        let reply = result.payload.unwrap();
        assert_eq!(reply[0], unit, "reply routed to its own request");
        assert_eq!(reply[4], unit);
    }
    bus.await.unwrap();
    assert!(!interleaved.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_rs485_exception_reply_is_failure() {
    let (gateway_side, mut device_side) = tokio::io::duplex(256);
    let settings = SerialSettings {
        timeout_ms: 500,
        ..SerialSettings::default()
    };
    let transport =
        Rs485Transport::new().with_bus(Rs485Bus::with_stream("bus1", settings, gateway_side));

    tokio::spawn(async move {
        let mut req = [0u8; 8];
        device_side.read_exact(&mut req).await.unwrap();
        let reply = encode_rtu(req[0], 0x83, &[0x02]);
        device_side.write_all(&reply).await.unwrap();
    });

    let result = transport
        .send_command(
            &common::serial_device("RS_9", "bus1", 9),
            &DeviceCommand::new("read", Bytes::from_static(&[0x03, 0x00, 0x64, 0x00, 0x01])),
        )
        .await;
    assert!(!result.success);
    assert_eq!(result.failure, Some(FailureKind::DeviceException));
}

#[tokio::test]
async fn test_rs485_late_reply_is_not_taken_for_the_next() {
    let (gateway_side, mut device_side) = tokio::io::duplex(256);
    let settings = SerialSettings {
        port: "fake".into(),
        baud_rate: 115_200,
        timeout_ms: 100,
        ..SerialSettings::default()
    };
    let bus = Rs485Bus::with_stream("bus0", settings, gateway_side);

    // Slow unit: answers the first read after the master gave up on it.
    let device = tokio::spawn(async move {
        let mut req = [0u8; 8];
        device_side.read_exact(&mut req).await.unwrap();
        assert_eq!(&req[..], &read_holding_registers(3, 0x10, 1)[..]);
        tokio::time::sleep(Duration::from_millis(150)).await;
        device_side
            .write_all(&encode_rtu(3, 0x03, &[0x02, 0x11, 0x11]))
            .await
            .unwrap();

        device_side.read_exact(&mut req).await.unwrap();
        assert_eq!(&req[..], &read_holding_registers(3, 0x20, 1)[..]);
        device_side
            .write_all(&encode_rtu(3, 0x03, &[0x02, 0x22, 0x22]))
            .await
            .unwrap();
        device_side
    });

    let first = bus
        .exchange(3, &read_holding_registers(3, 0x10, 1)[1..6], true)
        .await
        .unwrap_err();
    assert!(matches!(first, devgate_transport::TransportError::ReadTimeout(100)));

    let second = bus
        .exchange(3, &read_holding_registers(3, 0x20, 1)[1..6], true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&second[..], &encode_rtu(3, 0x03, &[0x02, 0x22, 0x22])[..]);
    timeout(Duration::from_secs(1), device).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_http_success_returns_body() {
    let addr = common::spawn_http_device(200, "OK:1").await;
    let transport = HttpTransport::new(HttpTransportConfig::default()).unwrap();
    let device = common::http_device("CKJ1234567", format!("http://{addr}/iclock/cdata"));

    let result = transport
        .send_command(&device, &DeviceCommand::new("push", Bytes::from_static(b"hello")))
        .await;
    assert!(result.success, "{}", result.message);
    assert_eq!(result.payload.as_deref(), Some(&b"OK:1"[..]));
}

#[tokio::test]
async fn test_http_non_2xx_is_business_failure() {
    let addr = common::spawn_http_device(503, "device busy").await;
    let transport = HttpTransport::new(HttpTransportConfig::default()).unwrap();
    let device = common::http_device("CKJ1234567", format!("http://{addr}/"));

    let result = transport
        .send_command(&device, &DeviceCommand::new("push", Bytes::from_static(b"hello")))
        .await;
    assert!(!result.success);
    assert_eq!(result.failure, Some(FailureKind::HttpStatus));
    assert!(result.message.contains("503"));
    assert!(result.message.contains("device busy"));
}

#[test]
fn test_transport_set_prefers_priority() {
    let set = TransportSet::new()
        .with(HttpTransport::new(HttpTransportConfig::default()).unwrap())
        .with(TcpTransport::default())
        .with(Rs485Transport::new());
    assert_eq!(
        set.kinds(),
        [TransportKind::Rs485, TransportKind::Tcp, TransportKind::Http]
    );
    let endpoint = devgate_transport::Endpoint::Tcp {
        addr: "127.0.0.1:4370".parse().unwrap(),
    };
    assert_eq!(
        set.select(&endpoint).map(|t| t.protocol_type()),
        Some(TransportKind::Tcp)
    );
}
