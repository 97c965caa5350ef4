// Axum WebSocket transport: one worker per connection, JSON commands in, JSON events out.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::adapter::traits::EngineAdapter;
use crate::api::worker_api::spawn_worker;
use crate::config::EngineConfig;
use crate::engine::events::{WorkerCommand, WorkerEvent};

#[derive(Clone)]
struct ServerState {
    adapter: Arc<dyn EngineAdapter>,
    config: Arc<EngineConfig>,
}

pub struct WorkerServer {
    port: u16,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl WorkerServer {
    /// Start the server on a random local port, returning a handle.
    pub async fn start(adapter: Arc<dyn EngineAdapter>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let state = ServerState {
            adapter,
            config: Arc::new(config),
        };
        let app = Router::new()
            .route("/worker", get(worker_socket_handler))
            .route("/health", get(health_handler))
            .with_state(state);

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        info!("worker server listening on 127.0.0.1:{}", port);
        Ok(Self {
            port,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn worker_url(&self) -> String {
        format!("ws://127.0.0.1:{}/worker", self.port)
    }

    pub fn health_url(&self) -> String {
        format!("http://127.0.0.1:{}/health", self.port)
    }

    /// Shutdown the server gracefully.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn health_handler() -> &'static str {
    "ok"
}

/// GET /worker: upgrade to a WebSocket speaking the worker protocol.
async fn worker_socket_handler(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: ServerState) {
    let worker = match spawn_worker(Arc::clone(&state.adapter), (*state.config).clone()) {
        Ok(worker) => worker,
        Err(e) => {
            error!("failed to start worker for connection: {}", e);
            return;
        }
    };
    let (control, mut events) = worker.split();
    let (mut sender, mut receiver) = socket.split();
    // Errors about frames that never reached the worker.
    let (rejects_tx, mut rejects_rx) = mpsc::unbounded_channel::<WorkerEvent>();

    let send_task = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                Some(event) = events.recv() => event,
                Some(event) = rejects_rx.recv() => event,
                else => break,
            };
            let payload = match serde_json::to_string(&event) {
                Ok(payload) => payload,
                Err(e) => {
                    error!("failed to encode worker event: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(payload.into())).await.is_err() {
                debug!("worker socket closed while sending");
                break;
            }
        }
    });

    while let Some(frame) = receiver.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!("worker socket receive error: {}", e);
                break;
            }
        };
        match frame {
            Message::Text(text) => match serde_json::from_str::<WorkerCommand>(text.as_str()) {
                Ok(command) => {
                    if let Err(e) = control.send(command) {
                        warn!("dropping command: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    warn!("malformed worker command: {}", e);
                    let _ = rejects_tx.send(WorkerEvent::Error {
                        error: format!("invalid message: {}", e),
                    });
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Client is gone: stop whatever is running and let the worker wind down.
    control.cancel();
    drop(control);
    drop(rejects_tx);
    let _ = send_task.await;
    debug!("worker connection finished");
}
