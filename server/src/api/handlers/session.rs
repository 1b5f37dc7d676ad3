//! Interactive session handlers
//!
//! The attach endpoint upgrades to a WebSocket and bridges it to a container
//! terminal. Client text and binary frames are written verbatim to the
//! terminal; terminal output is sent back as binary frames.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::FormRejection,
        ws::{close_code, rejection::WebSocketUpgradeRejection, CloseFrame, Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
    Form, Json,
};
use futures::channel::mpsc;
use futures::stream::SplitSink;
use futures::{future, SinkExt, StreamExt};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::api::ApiError;
use crate::container::ClientEndpoint;
use crate::error::CodetainerError;
use crate::models::{DetachBody, SendCommandForm, SessionListBody, SuccessBody};
use crate::AppState;

/// Outbound frames buffered between the bridge and the socket writer
const OUTBOUND_BUFFER: usize = 64;

/// Close frame reasons are limited to 123 bytes
const MAX_CLOSE_REASON: usize = 123;

/// WebSocket attach to a container terminal
pub async fn attach(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    // Unknown or already attached containers are rejected before the upgrade is checked
    let record = state.sessions.check_attachable(&id).await?;
    let ws = ws?;

    Ok(ws.on_upgrade(move |socket| handle_attach(socket, record.id, state)))
}

async fn handle_attach(socket: WebSocket, container_id: String, state: Arc<AppState>) {
    let (sender, receiver) = socket.split();

    info!(container_id = %container_id, "Attach WebSocket connected");

    let incoming = receiver
        .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
        .filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => Some(Ok(text.into_bytes())),
                Ok(Message::Binary(data)) => Some(Ok(data)),
                Ok(_) => None,
                Err(e) => Some(Err(CodetainerError::transport(e))),
            }
        });

    let (outbound_tx, outbound_rx) = mpsc::channel::<Vec<u8>>(OUTBOUND_BUFFER);
    let (close_tx, close_rx) = oneshot::channel::<String>();
    let writer = tokio::spawn(write_frames(sender, outbound_rx, close_rx));

    let endpoint = ClientEndpoint::new(incoming, outbound_tx.sink_map_err(CodetainerError::transport));

    match state.sessions.attach(&container_id, endpoint).await {
        Ok(connection) => {
            drop(close_tx);
            connection.closed().await;
        }
        Err(e) => {
            warn!(container_id = %container_id, error = %e, "Attach failed after upgrade");
            let _ = close_tx.send(e.to_string());
        }
    }

    if let Err(e) = writer.await {
        warn!(error = %e, "WebSocket writer task failed");
    }

    info!(container_id = %container_id, "Attach WebSocket closed");
}

/// Forward terminal output to the socket, then send a close frame
async fn write_frames(
    mut sender: SplitSink<WebSocket, Message>,
    mut frames: mpsc::Receiver<Vec<u8>>,
    close_reason: oneshot::Receiver<String>,
) {
    while let Some(bytes) = frames.next().await {
        if sender.send(Message::Binary(bytes)).await.is_err() {
            debug!("WebSocket send failed, client gone");
            return;
        }
    }

    let frame = match close_reason.await {
        Ok(reason) => CloseFrame {
            code: close_code::ERROR,
            reason: truncate_reason(reason).into(),
        },
        Err(_) => CloseFrame {
            code: close_code::NORMAL,
            reason: "session closed".into(),
        },
    };

    let _ = sender.send(Message::Close(Some(frame))).await;
}

fn truncate_reason(mut reason: String) -> String {
    if reason.len() > MAX_CLOSE_REASON {
        let mut end = MAX_CLOSE_REASON;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    reason
}

/// Send a command line to the container terminal
pub async fn send_command(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    form: Result<Form<SendCommandForm>, FormRejection>,
) -> Result<Json<SuccessBody>, ApiError> {
    let Form(form) = form?;
    let command = form
        .command
        .filter(|command| !command.is_empty())
        .ok_or_else(|| CodetainerError::validation("command is required"))?;
    let line = format!("{}\n", command);

    if form.transient {
        state.sessions.inject(&id, &line).await?;
    } else {
        state.sessions.send(&id, &line).await?;
    }

    debug!(container = %id, transient = form.transient, "Command sent");
    Ok(Json(SuccessBody::ok()))
}

/// Close the attached session, if any
pub async fn detach(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DetachBody>, ApiError> {
    let detached = state.sessions.detach(&id).await?;
    Ok(Json(DetachBody {
        success: true,
        detached,
    }))
}

pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<SessionListBody> {
    Json(SessionListBody {
        sessions: state.sessions.sessions().await,
    })
}
