//! HTTP push listeners for protocols without frame boundaries.
//!
//! ```text
//! clock ──POST <path>──> PushListener ──body──> Dispatcher::handle
//!                                                  └─> reply bytes as the response body
//! ```
//!
//! Each request body is exactly one frame. Unparseable bodies get `400` with
//! an empty body; every other outcome gets `200` with the protocol's reply,
//! which carries success or failure itself.

use std::net::SocketAddr;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use devgate_core::{DeviceId, ProtocolType};
use devgate_protocol::ProtocolHandler;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use crate::config::PushListenerConfig;
use crate::dispatch::{Dispatcher, FrameOutcome};
use crate::error::{GatewayError, Result};

/// A bound HTTP listener accepting pushed frames of one protocol.
#[derive(Debug)]
pub struct PushListener {
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    config: PushListenerConfig,
    dispatcher: Dispatcher,
}

impl PushListener {
    /// # Errors
    /// [`GatewayError::Bind`] when the address cannot be bound.
    pub async fn bind(config: PushListenerConfig, dispatcher: Dispatcher) -> Result<Self> {
        let listener = TcpListener::bind(config.bind)
            .await
            .map_err(|source| GatewayError::Bind {
                addr: config.bind,
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!(
            addr = %local_addr,
            path = %config.path,
            protocol = %dispatcher.handler().protocol_type(),
            "Push listener bound"
        );
        Ok(Self {
            listener: Mutex::new(Some(listener)),
            local_addr,
            config,
            dispatcher,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn protocol_type(&self) -> &ProtocolType {
        self.dispatcher.handler().protocol_type()
    }

    pub fn path(&self) -> &str {
        &self.config.path
    }

    fn router(&self) -> Router {
        Router::new()
            .route(&self.config.path, post(receive_push))
            .layer(DefaultBodyLimit::max(self.config.max_body_bytes))
            .with_state(self.dispatcher.clone())
    }

    /// Serve requests until `shutdown` fires. A listener serves once.
    pub async fn run(&self, shutdown: CancellationToken) {
        let Some(listener) = self.listener.lock().await.take() else {
            warn!(addr = %self.local_addr, "Push listener already served");
            return;
        };
        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
        {
            warn!(addr = %self.local_addr, error = %e, "Push listener failed");
        }
        info!(addr = %self.local_addr, "Push listener stopped");
    }
}

async fn receive_push(
    State(dispatcher): State<Dispatcher>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Response {
    let fallback = match DeviceId::new(&peer.ip().to_string()) {
        Ok(id) => id,
        Err(e) => {
            warn!(peer = %peer, error = %e, "Cannot name peer");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let outcome = dispatcher.handle(&body, &fallback);
    trace!(peer = %peer, outcome = outcome.label(), len = body.len(), "Push handled");
    match outcome {
        FrameOutcome::Dropped(_) => StatusCode::BAD_REQUEST.into_response(),
        FrameOutcome::Rejected { reply, .. }
        | FrameOutcome::Failed { reply, .. }
        | FrameOutcome::Completed { reply, .. } => (StatusCode::OK, reply).into_response(),
    }
}
