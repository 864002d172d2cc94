//! Broadcast server (T_ws): the `/ws` duplex endpoint every control client
//! connects to. One task per connection reads the socket and dispatches
//! RPCs; a second forwards that client's outbound queue back to the socket,
//! so a slow client's writes never block the read loop or the aggregator's
//! push.

pub mod client;
pub mod protocol;

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::aggregate::AggregateView;
use crate::broadcast::client::{ClientId, ClientRegistry, HOUSEKEEPING_INTERVAL};
use crate::broadcast::protocol::{
    callback, callback_error, InboundEnvelope, OutboundEnvelope, RpcRequest, RpcResponse,
};
use crate::config::ConfigStore;
use crate::error::AppError;
use crate::kernel::LinkType;
use crate::resource;
use crate::rules::RuleMatcher;

/// Per-connection outbound queue depth. A client that falls this far behind
/// starts dropping pushes rather than backing up the aggregator.
const CLIENT_QUEUE_DEPTH: usize = 64;

/// Everything a dispatched RPC needs. Built in two steps: the `clients`
/// registry exists (and already implements `Broadcaster`) before the
/// aggregator does, so it is handed to `Aggregator::new()` directly — no
/// set-once cell is needed, because broadcasting a summary or a drop never
/// touches the `AggregateView` this struct also holds, only the registry.
pub struct BroadcastServer {
    config: Arc<ConfigStore>,
    matcher: Arc<RuleMatcher>,
    aggregate: AggregateView,
    clients: Arc<ClientRegistry>,
    link_type: LinkType,
}

impl BroadcastServer {
    pub fn new(
        config: Arc<ConfigStore>,
        matcher: Arc<RuleMatcher>,
        aggregate: AggregateView,
        clients: Arc<ClientRegistry>,
        link_type: LinkType,
    ) -> Arc<BroadcastServer> {
        Arc::new(BroadcastServer {
            config,
            matcher,
            aggregate,
            clients,
            link_type,
        })
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new().route("/ws", get(ws_upgrade)).with_state(self)
    }

    /// Evicts idle clients every `HOUSEKEEPING_INTERVAL`. Runs for the
    /// lifetime of the process.
    pub async fn run_housekeeping(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(HOUSEKEEPING_INTERVAL);
        loop {
            ticker.tick().await;
            let evicted = self.clients.sweep_idle();
            if !evicted.is_empty() {
                tracing::debug!(count = evicted.len(), "evicted idle websocket clients");
            }
        }
    }

    async fn dispatch(
        &self,
        client_id: ClientId,
        request: RpcRequest,
    ) -> Result<RpcResponse, AppError> {
        match request {
            RpcRequest::Ping => Ok(RpcResponse::Pong),
            RpcRequest::GetLinkType => Ok(RpcResponse::LinkType(self.link_type.as_str().to_string())),
            RpcRequest::GetSummary => {
                Ok(RpcResponse::Summary(Box::new(self.aggregate.get_summary().await)))
            }
            RpcRequest::GetRules => Ok(RpcResponse::Rules(self.config.rules().await)),
            RpcRequest::SetRules(rules) => {
                let count = self.matcher.compile(&rules).await;
                if count == 0 {
                    return Err(AppError::RpcValidation(
                        "rule set compiled to zero usable predicates".into(),
                    ));
                }
                self.config.set_rules(rules).await?;
                Ok(RpcResponse::RuleCount(count))
            }
            RpcRequest::GetMatchList(query) => {
                Ok(RpcResponse::MatchList(self.aggregate.get_match_list(&query).await))
            }
            RpcRequest::GetBlackList => Ok(RpcResponse::BlackList(self.config.black().await)),
            RpcRequest::ChangeBlack(payload) => {
                self.config.change_black(payload).await?;
                Ok(RpcResponse::Ack(true))
            }
            RpcRequest::GetSystemResourceUsage => {
                Ok(RpcResponse::ResourceUsage(resource::snapshot()))
            }
            RpcRequest::ChangeBroadcastStatus(flag) => {
                self.clients.set_receive_broadcasts(client_id, flag);
                Ok(RpcResponse::BroadcastStatus(flag))
            }
        }
    }
}

async fn ws_upgrade(
    State(server): State<Arc<BroadcastServer>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(server, socket))
}

async fn handle_socket(server: Arc<BroadcastServer>, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<OutboundEnvelope>(CLIENT_QUEUE_DEPTH);
    let client_id = server.clients.register(tx);
    tracing::debug!(client_id, "websocket client connected");

    let mut writer = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let text = match serde_json::to_string(&envelope) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("failed to serialize outbound envelope: {e}");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            message = stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        server.clients.touch(client_id);
                        if handle_text(&server, client_id, &text).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(client_id, "websocket read error: {e}");
                        if server.clients.record_error(client_id) {
                            break;
                        }
                    }
                }
            }
            _ = &mut writer => break,
        }
    }

    writer.abort();
    server.clients.unregister(client_id);
    tracing::debug!(client_id, "websocket client disconnected");
}

/// Handles one inbound text frame. Returns `true` if the client should be
/// disconnected (too many consecutive malformed frames).
async fn handle_text(server: &Arc<BroadcastServer>, client_id: ClientId, text: &str) -> bool {
    let envelope: InboundEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::debug!(client_id, "malformed websocket frame: {e}");
            return server.clients.record_error(client_id);
        }
    };

    let Some(id) = envelope.id.clone() else {
        tracing::debug!(client_id, action = %envelope.action, "frame without id ignored, no reply possible");
        return false;
    };
    match RpcRequest::decode(&envelope) {
        Ok(Some(request)) => {
            let outcome = server.dispatch(client_id, request).await;
            let reply = match outcome {
                Ok(response) => callback(id, response),
                Err(err) => callback_error(id, &err),
            };
            server.clients.send_to(client_id, reply);
        }
        Ok(None) => {
            tracing::debug!(client_id, action = %envelope.action, "unknown RPC action ignored");
        }
        Err(err) => {
            server.clients.send_to(client_id, callback_error(id, &err));
        }
    }
    false
}
