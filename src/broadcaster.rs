//! Entity-change fan-out over websockets.
//!
//! Clients connect with a bearer token in the handshake, optionally
//! pre-subscribed to hub rooms via the query string (`?hubId=...&hubId=...`),
//! and may join or leave rooms with `{"type":"join_hub","hubId":...}`
//! messages. Handlers receive a `Broadcaster` at construction time and emit
//! through it; sends are best-effort and unordered relative to the response.

use futures::{stream::SplitSink, SinkExt};
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::StreamExt;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, io::Error as IoError, net::SocketAddr, sync::Arc};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::http;
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::{client::Request, server::Response},
        protocol::{frame::coding::CloseCode, CloseFrame, Message},
        Error,
    },
    WebSocketStream,
};

use crate::security;

pub type Tx = Arc<RwLock<UnboundedSender<Message>>>;
type HubId = String;

#[derive(Deserialize)]
struct WsRequest {
    #[serde(rename = "type")]
    type_: String,
    #[serde(rename = "hubId")]
    hub_id: Option<String>,
}

#[derive(Serialize)]
struct WsEvent<'a> {
    event: &'a str,
    data: &'a serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscribeQuery {
    #[serde(rename = "hubId", default)]
    pub hub_id: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Broadcaster {
    clients: Arc<RwLock<Vec<Tx>>>,
    rooms: Arc<RwLock<HashMap<HubId, Vec<Tx>>>>,
}

impl Broadcaster {
    pub fn new() -> Broadcaster {
        Broadcaster::default()
    }

    async fn add_client(&self, hub_ids: Vec<String>, conn: Tx) {
        self.clients.write().await.push(conn.clone());
        let mut rooms = self.rooms.write().await;
        for hub_id in hub_ids {
            rooms.entry(hub_id).or_insert_with(Vec::new).push(conn.clone());
        }
    }

    async fn join(&self, hub_id: String, conn: Tx) {
        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(hub_id).or_insert_with(Vec::new);
        if !room.iter().any(|c| Arc::ptr_eq(c, &conn)) {
            room.push(conn);
        }
    }

    async fn leave(&self, hub_id: &str, conn: &Tx) {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get_mut(hub_id) {
            room.retain(|c| !Arc::ptr_eq(c, conn));
            if room.is_empty() {
                rooms.remove(hub_id);
            }
        }
    }

    async fn remove_client(&self, conn: &Tx) {
        self.clients.write().await.retain(|c| !Arc::ptr_eq(c, conn));
        let mut rooms = self.rooms.write().await;
        rooms.retain(|_, room| {
            room.retain(|c| !Arc::ptr_eq(c, conn));
            !room.is_empty()
        });
    }

    /// Broadcast to every connected client.
    pub async fn emit_all(&self, event: &str, data: serde_json::Value) {
        let msg = match serde_json::to_string(&WsEvent { event, data: &data }) {
            Ok(msg) => msg,
            Err(err) => {
                error!("could not serialize {} event: {}", event, err);
                return;
            }
        };
        for client in self.clients.read().await.iter() {
            let ws = client.write().await;
            if let Err(err) = ws.unbounded_send(Message::Text(msg.clone())) {
                error!("error sending ws message! err: {:#?}", err);
            }
        }
    }

    /// Broadcast to subscribers of one hub room only.
    pub async fn emit_room(&self, hub_id: &str, event: &str, data: serde_json::Value) {
        let msg = match serde_json::to_string(&WsEvent { event, data: &data }) {
            Ok(msg) => msg,
            Err(err) => {
                error!("could not serialize {} event: {}", event, err);
                return;
            }
        };
        let rooms = self.rooms.read().await;
        if let Some(room) = rooms.get(hub_id) {
            for client in room {
                let ws = client.write().await;
                if let Err(err) = ws.unbounded_send(Message::Text(msg.clone())) {
                    error!("error sending ws message! err: {:#?}", err);
                }
            }
        }
    }
}

async fn handle_incoming_messages(
    mut incoming: impl StreamExt<Item = Result<Message, Error>> + Unpin,
    broadcaster: Broadcaster,
    client_conn: Tx,
) {
    while let Some(msg) = incoming.next().await {
        match msg {
            Ok(message) => {
                if let Ok(text) = message.to_text() {
                    let req: Result<WsRequest, serde_json::Error> = serde_json::from_str(text);

                    match req {
                        Ok(request) => match (request.type_.as_str(), request.hub_id) {
                            ("join_hub", Some(hub_id)) => {
                                info!("client joined hub: {}", hub_id);
                                broadcaster.join(hub_id, client_conn.clone()).await;
                            }
                            ("leave_hub", Some(hub_id)) => {
                                broadcaster.leave(&hub_id, &client_conn).await;
                            }
                            _ => warn!("unknown ws request type"),
                        },
                        Err(_) => continue,
                    }
                }
            }
            Err(err) => {
                error!("Client disconnected due to error: {}", err);
                break;
            }
        }
    }

    broadcaster.remove_client(&client_conn).await;
    info!("Client disconnected and removed.");
}

async fn handle_outgoing_messages(
    mut rx: UnboundedReceiver<Message>,
    mut outgoing: SplitSink<WebSocketStream<TcpStream>, Message>,
    broadcaster: Broadcaster,
    client_conn: Tx,
) {
    while let Some(msg) = rx.next().await {
        if let Err(err) = outgoing.send(msg).await {
            error!("Failed to send message: {}. Removing client.", err);
            break;
        }
    }

    broadcaster.remove_client(&client_conn).await;
}

/// Accepts websocket subscribers on its own listener. The handshake requires
/// a valid token; identity freshness is not re-checked here (the connection
/// only receives broadcasts, it cannot act).
pub async fn serve(
    addr: SocketAddr,
    broadcaster: Broadcaster,
    jwt_secret: String,
) -> Result<(), IoError> {
    let listener = TcpListener::bind(&addr).await?;
    info!("websocket listener on {}", addr);

    tokio::spawn(async move {
        while let Ok((raw_stream, _)) = listener.accept().await {
            let mut uri = None;
            let mut token = None;

            let ws_stream = accept_hdr_async(raw_stream, |req: &Request, res: Response| {
                if let Some(auth_header) = req.headers().get("Authorization") {
                    if let Ok(auth_str) = auth_header.to_str() {
                        token = Some(auth_str.to_string());
                        uri = Some(req.uri().clone());
                        return Ok(res);
                    }
                }

                let mut res = res;
                *res.status_mut() = http::StatusCode::UNAUTHORIZED;
                let body = Some("Unauthorized".to_string());
                Err(res.map(|_| body))
            })
            .await;

            let mut ws_stream = match ws_stream {
                Ok(stream) => stream,
                Err(_) => continue, // skip this connection if not authorized
            };

            let token = token.unwrap_or_default();
            if let Err(err) = security::decode_token(&token, &jwt_secret) {
                warn!("ws handshake rejected: {}", err.message);
                let unauthorized = CloseFrame {
                    code: CloseCode::Error,
                    reason: std::borrow::Cow::Borrowed("Unauthorized"),
                };
                let _ = ws_stream.close(Some(unauthorized)).await;
                continue;
            }

            let uri = uri.map(|u| u.to_string()).unwrap_or_default();
            let query: SubscribeQuery = serde_qs::from_str(uri.trim_start_matches("/?"))
                .unwrap_or(SubscribeQuery { hub_id: Vec::new() });

            let (tx, rx) = unbounded::<Message>();
            let tx_arc = Arc::new(RwLock::new(tx));

            broadcaster.add_client(query.hub_id, tx_arc.clone()).await;

            let (outgoing, incoming) = ws_stream.split();

            tokio::spawn(handle_incoming_messages(
                incoming,
                broadcaster.clone(),
                tx_arc.clone(),
            ));

            tokio::spawn(handle_outgoing_messages(
                rx,
                outgoing,
                broadcaster.clone(),
                tx_arc,
            ));
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn room_emit_reaches_subscribers_only() {
        let broadcaster = Broadcaster::new();

        let (tx_a, mut rx_a) = unbounded::<Message>();
        let conn_a: Tx = Arc::new(RwLock::new(tx_a));
        let (tx_b, mut rx_b) = unbounded::<Message>();
        let conn_b: Tx = Arc::new(RwLock::new(tx_b));

        broadcaster
            .add_client(vec!["hub-1".to_string()], conn_a.clone())
            .await;
        broadcaster.add_client(vec![], conn_b.clone()).await;

        broadcaster
            .emit_room("hub-1", "hub_status_changed", serde_json::json!({"status": "online"}))
            .await;

        let msg = rx_a.next().await.unwrap();
        assert!(msg.to_text().unwrap().contains("hub_status_changed"));
        assert!(rx_b.try_next().is_err()); // nothing queued for b

        broadcaster
            .emit_all("device_deleted", serde_json::json!({"deviceId": "x"}))
            .await;
        assert!(rx_a.next().await.unwrap().to_text().unwrap().contains("device_deleted"));
        assert!(rx_b.next().await.unwrap().to_text().unwrap().contains("device_deleted"));
    }

    #[tokio::test]
    async fn join_and_leave_adjust_room_membership() {
        let broadcaster = Broadcaster::new();
        let (tx, mut rx) = unbounded::<Message>();
        let conn: Tx = Arc::new(RwLock::new(tx));

        broadcaster.add_client(vec![], conn.clone()).await;
        broadcaster.join("hub-9".to_string(), conn.clone()).await;
        broadcaster
            .emit_room("hub-9", "device_status_changed", serde_json::json!({}))
            .await;
        assert!(rx.next().await.is_some());

        broadcaster.leave("hub-9", &conn).await;
        broadcaster
            .emit_room("hub-9", "device_status_changed", serde_json::json!({}))
            .await;
        assert!(rx.try_next().is_err());

        broadcaster.remove_client(&conn).await;
        broadcaster.emit_all("hub_updated", serde_json::json!({})).await;
        assert!(rx.try_next().is_err());
    }
}
