// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{error::Error, sync::Arc};

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Json, Router,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde_json::{json, Value};
use tracing::{debug, info, span, Instrument, Level};

use crate::control::{ControlContext, SessionError, SessionSink};

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    control: Arc<ControlContext>,
    dmx_enabled: bool,
}

impl AppState {
    pub fn new(control: Arc<ControlContext>, dmx_enabled: bool) -> AppState {
        AppState {
            control,
            dmx_enabled,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/control", get(control_socket))
        .route("/health", get(health))
        .with_state(state)
}

/// Serves until ctrl-c, then closes the transmitter so the rig is left dark.
pub async fn serve(address: &str, state: AppState) -> Result<(), Box<dyn Error>> {
    let control = state.control.clone();
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!(address, "Control server listening.");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down.");
        })
        .await?;

    control.close_transmitter();
    Ok(())
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let dmx_status = match (state.dmx_enabled, state.control.transmitter()) {
        (false, _) => "disabled",
        (true, Some(_)) => "connected",
        (true, None) => "disconnected",
    };

    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().timestamp(),
        "dmx_status": dmx_status,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn control_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.control))
}

/// The write half of a WebSocket.
struct WebSocketSink {
    sender: SplitSink<WebSocket, WsMessage>,
}

#[async_trait]
impl SessionSink for WebSocketSink {
    async fn send_text(&mut self, text: String) -> Result<(), SessionError> {
        self.sender
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))
    }

    async fn send_ping(&mut self) -> Result<(), SessionError> {
        self.sender
            .send(WsMessage::Ping(Vec::new()))
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.sender.close().await;
    }
}

/// Reads commands until the client leaves or goes quiet for longer than the read timeout.
async fn handle_socket(socket: WebSocket, ctx: Arc<ControlContext>) {
    let (sender, mut receiver) = socket.split();
    let session = ctx.connect(Box::new(WebSocketSink { sender })).await;
    let timing = ctx.timing();

    let span = span!(Level::INFO, "session", id = session.id());
    async {
        let pinger = {
            let session = session.clone();
            tokio::spawn(
                async move {
                    let mut interval = tokio::time::interval(timing.ping_interval);
                    // The first tick is immediate.
                    interval.tick().await;
                    loop {
                        interval.tick().await;
                        if let Err(e) = session.ping().await {
                            debug!(err = %e, "Ping failed");
                            return;
                        }
                    }
                }
                .in_current_span(),
            )
        };

        loop {
            match tokio::time::timeout(timing.read_timeout, receiver.next()).await {
                Err(_) => {
                    info!("Client went quiet, closing session.");
                    break;
                }
                Ok(None) | Ok(Some(Ok(WsMessage::Close(_)))) => break,
                Ok(Some(Err(e))) => {
                    debug!(err = %e, "WebSocket read error");
                    break;
                }
                Ok(Some(Ok(WsMessage::Text(text)))) => ctx.handle_text(&session, &text).await,
                // Pongs and anything else still count as signs of life.
                Ok(Some(Ok(_))) => {}
            }
        }

        pinger.abort();
        ctx.disconnect(session.id()).await;
    }
    .instrument(span)
    .await;
}
