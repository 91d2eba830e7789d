#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use devgate_gateway::{Gateway, GatewayConfig, ListenerConfig, PushListenerConfig};
use devgate_protocol::{
    ChannelSink, DeviceEvent, EntropyAccessHandler, FrameCodec, ProtocolHandler, ProtocolMessage,
};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

pub const ACCESS: &str = "ACCESS_ENTROPY_V4.8";
pub const ATTENDANCE: &str = "ATTENDANCE_ENTROPY_V4.0";

pub type DeviceConn = Framed<TcpStream, FrameCodec>;

pub fn listener(protocol_type: &str) -> ListenerConfig {
    ListenerConfig {
        bind: SocketAddr::from(([127, 0, 0, 1], 0)),
        protocol_type: protocol_type.to_string(),
        ..Default::default()
    }
}

pub fn push_listener(protocol_type: &str) -> PushListenerConfig {
    PushListenerConfig {
        bind: SocketAddr::from(([127, 0, 0, 1], 0)),
        protocol_type: protocol_type.to_string(),
        ..Default::default()
    }
}

pub fn config(listeners: Vec<ListenerConfig>) -> GatewayConfig {
    GatewayConfig {
        listeners,
        ..Default::default()
    }
}

/// A gateway serving in the background.
pub struct Running {
    pub gateway: Arc<Gateway>,
    pub events: mpsc::Receiver<DeviceEvent>,
    pub shutdown: CancellationToken,
    pub task: JoinHandle<()>,
}

impl Running {
    pub fn addr(&self) -> SocketAddr {
        self.gateway.local_addrs()[0]
    }

    /// URL of the first push listener.
    pub fn push_url(&self) -> String {
        let push = &self.gateway.push_listeners()[0];
        format!("http://{}{}", push.local_addr(), push.path())
    }
}

pub async fn start(config: GatewayConfig) -> Running {
    let (sink, events) = ChannelSink::channel(64);
    let gateway = Arc::new(Gateway::bind(&config, Arc::new(sink)).await.unwrap());
    let shutdown = CancellationToken::new();
    let task = {
        let gateway = Arc::clone(&gateway);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { gateway.run(shutdown).await })
    };
    Running {
        gateway,
        events,
        shutdown,
        task,
    }
}

pub async fn start_access(listener: ListenerConfig) -> Running {
    start(config(vec![listener])).await
}

/// Connect as an access controller.
pub async fn connect(addr: SocketAddr) -> DeviceConn {
    let stream = TcpStream::connect(addr).await.unwrap();
    Framed::new(stream, FrameCodec::new(EntropyAccessHandler::new().framing()))
}

pub async fn send(conn: &mut DeviceConn, frame: Bytes) {
    conn.send(frame).await.unwrap();
}

/// Next reply from the gateway, parsed.
pub async fn reply(conn: &mut DeviceConn) -> ProtocolMessage {
    let frame = timeout(Duration::from_secs(3), conn.next())
        .await
        .expect("no reply in time")
        .expect("connection closed")
        .unwrap();
    EntropyAccessHandler::new().parse_bytes(&frame).unwrap()
}

/// True once the gateway has closed the connection.
pub async fn closed(conn: &mut DeviceConn, within: Duration) -> bool {
    matches!(timeout(within, conn.next()).await, Ok(None | Some(Err(_))))
}
