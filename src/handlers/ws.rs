use crate::{
    auth::{CustomerIdentity, PartnerIdentity},
    broadcast::{self, ChannelMessage, OPS_TOPIC},
    errors::ServiceError,
    AppState,
};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use std::sync::Arc;
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tracing::debug;
use uuid::Uuid;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders/:id", get(order_channel))
        .route("/partner", get(partner_channel))
        .route("/ops", get(ops_channel))
}

/// A customer watching their own order: assignment, status changes, live
/// partner location while the order is on the road.
async fn order_channel(
    State(state): State<Arc<AppState>>,
    identity: CustomerIdentity,
    Path(order_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ServiceError> {
    state
        .services
        .orders
        .get_for(order_id, identity.customer_id, identity.customer_kind)
        .await?;

    let rx = state.broadcaster.subscribe(&broadcast::order_topic(order_id));
    Ok(ws.on_upgrade(move |socket| forward(socket, rx)))
}

/// A partner's own channel: new assignments and cancellations of orders they
/// carry.
async fn partner_channel(
    State(state): State<Arc<AppState>>,
    identity: PartnerIdentity,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.delivery.get_partner(identity.partner_id).await?;

    let rx = state
        .broadcaster
        .subscribe(&broadcast::partner_topic(identity.partner_id));
    Ok(ws.on_upgrade(move |socket| forward(socket, rx)))
}

/// Operations dashboard firehose.
async fn ops_channel(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ServiceError> {
    let rx = state.broadcaster.subscribe(OPS_TOPIC);
    Ok(ws.on_upgrade(move |socket| forward(socket, rx)))
}

/// Pumps broadcast messages to the socket as JSON text frames until either
/// side goes away. A lagged receiver skips ahead rather than disconnecting;
/// delivery here is best-effort by design of the hub.
async fn forward(mut socket: WebSocket, mut rx: Receiver<ChannelMessage>) {
    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(message) => {
                    let text = match serde_json::to_string(&message) {
                        Ok(text) => text,
                        Err(e) => {
                            debug!(error = %e, "skipping unserializable channel message");
                            continue;
                        }
                    };
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "websocket subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(_)) => break,
                // Clients have nothing meaningful to say on these channels.
                Some(Ok(_)) => {}
            },
        }
    }
}
