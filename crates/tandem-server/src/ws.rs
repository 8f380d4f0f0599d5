//! WebSocket transport for the chat hub.
//!
//! Admission runs after the upgrade so that a rejected client still receives
//! a close frame with its rejection code. Each admitted connection gets a
//! writer task draining its outbound queue; the reader loop handles inbound
//! frames and closes the socket when the access token expires.

use std::time::Duration;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header::AUTHORIZATION, HeaderMap},
    response::Response,
};
use chrono::Utc;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use tandem_shared::protocol::{ClientFrame, ErrorFrame, ServerFrame};

use crate::api::AppState;
use crate::error::ChatError;
use crate::gatekeeper::{Admission, ConnectRequest, CLOSE_TOKEN_EXPIRED};
use crate::registry::{outbound_channel, Outbound};

/// Query parameters of `GET /chatHub`.
#[derive(Debug, Default, Deserialize)]
pub struct HubQuery {
    #[serde(rename = "chatId")]
    pub chat_id: Option<String>,
    pub access_token: Option<String>,
}

pub async fn chat_hub(
    State(state): State<AppState>,
    Query(query): Query<HubQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    ws.on_upgrade(move |socket| handle_socket(socket, state, query, authorization))
}

async fn handle_socket(
    mut socket: WebSocket,
    state: AppState,
    query: HubQuery,
    authorization: Option<String>,
) {
    let (tx, rx) = outbound_channel();
    let request = ConnectRequest {
        authorization: authorization.as_deref(),
        access_token: query.access_token.as_deref(),
        chat_id: query.chat_id.as_deref(),
    };

    match state.gatekeeper.admit(request, tx.clone()).await {
        Ok(admission) => run_connection(socket, state, admission, tx, rx).await,
        Err(rejection) => {
            let frame = CloseFrame {
                code: rejection.close_code(),
                reason: rejection.reason().into(),
            };
            let _ = socket.send(Message::Close(Some(frame))).await;
        }
    }
}

async fn run_connection(
    socket: WebSocket,
    state: AppState,
    admission: Admission,
    tx: mpsc::Sender<Outbound>,
    rx: mpsc::Receiver<Outbound>,
) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (close_tx, close_rx) = oneshot::channel::<CloseFrame<'static>>();
    let writer = tokio::spawn(writer_task(ws_sender, rx, close_rx));

    let expiry = tokio::time::sleep(time_left(&admission));
    tokio::pin!(expiry);

    let mut close_frame = None;
    loop {
        tokio::select! {
            _ = &mut expiry => {
                info!(
                    connection = %admission.connection_id,
                    user = %admission.user_id,
                    "Access token expired, closing connection"
                );
                close_frame = Some(CloseFrame {
                    code: CLOSE_TOKEN_EXPIRED,
                    reason: "Token expired".into(),
                });
                break;
            }
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    handle_text(&state, &admission, &tx, &text).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(connection = %admission.connection_id, reason = ?frame, "Client initiated close");
                    break;
                }
                Some(Ok(Message::Binary(_))) => {
                    debug!(connection = %admission.connection_id, "Ignoring binary frame");
                }
                // Ping/pong replies are handled by the protocol layer.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(connection = %admission.connection_id, error = %e, "WebSocket receive error");
                    break;
                }
                None => break,
            }
        }
    }

    state.gatekeeper.disconnect(&admission).await;

    match close_frame {
        Some(frame) => {
            let _ = close_tx.send(frame);
        }
        None => drop(close_tx),
    }
    let _ = writer.await;
}

/// Forward queued frames to the socket until the connection ends.
async fn writer_task(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    mut close_rx: oneshot::Receiver<CloseFrame<'static>>,
) {
    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(text) => {
                    if sink.send(Message::Text(text.to_string())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            close = &mut close_rx => {
                if let Ok(frame) = close {
                    let _ = sink.send(Message::Close(Some(frame))).await;
                }
                break;
            }
        }
    }
}

async fn handle_text(
    state: &AppState,
    admission: &Admission,
    tx: &mpsc::Sender<Outbound>,
    text: &str,
) {
    let result = match ClientFrame::from_json(text) {
        Ok(ClientFrame::SendMessage(request)) => state
            .pipeline
            .submit(admission.user_id, request)
            .await
            .map(|_| ()),
        Err(e) => Err(ChatError::Validation(format!("Malformed frame: {e}"))),
    };

    if let Err(e) = result {
        debug!(connection = %admission.connection_id, error = %e, "Submission rejected");
        reply_error(tx, &e);
    }
}

/// Queue an error frame for this connection only.
fn reply_error(tx: &mpsc::Sender<Outbound>, error: &ChatError) {
    let frame = ServerFrame::Error(ErrorFrame {
        kind: error.kind().to_string(),
        message: error.public_message(),
    });
    match frame.to_json() {
        Ok(json) => {
            if tx.try_send(json.into()).is_err() {
                warn!("Dropping error frame for slow connection");
            }
        }
        Err(e) => warn!(error = %e, "Failed to encode error frame"),
    }
}

fn time_left(admission: &Admission) -> Duration {
    admission
        .expires_at()
        .and_then(|at| (at - Utc::now()).to_std().ok())
        .unwrap_or(Duration::ZERO)
}
