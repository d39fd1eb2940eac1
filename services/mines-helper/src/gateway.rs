//! WebSocket chat gateway.
//!
//! Stands in for the chat transport: rendered sessions are broadcast to every connected client
//! as JSON events, and clients send button presses back as `action` messages. The gateway is
//! both the coordinator's [`Presenter`] and its source of [`PlayerAction`]s.
//!
//! The gateway is a trusted local stand-in for the chat platform and does not authenticate
//! anyone. A connection is bound to the first `actorId` it sends; later actions naming another
//! actor are refused, so one socket cannot act for several players.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State as AxumState;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use mines_types::{ChatContext, MessageRef, PlayerActionKind, PlayerId, SessionId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::coordinator::PlayerAction;
use crate::presenter::{
    AckToken, Acknowledgement, Annotation, Presenter, PresenterError, SessionView,
};

const EVENT_BUFFER: usize = 1024;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum GatewayEvent {
    #[serde(rename = "render")]
    Render {
        #[serde(rename = "messageId")]
        message_id: MessageRef,
        view: SessionView,
        #[serde(skip_serializing_if = "Option::is_none")]
        annotation: Option<Annotation>,
    },
    #[serde(rename = "update")]
    Update {
        #[serde(rename = "messageId")]
        message_id: MessageRef,
        view: SessionView,
        #[serde(skip_serializing_if = "Option::is_none")]
        annotation: Option<Annotation>,
    },
    #[serde(rename = "dispose")]
    Dispose {
        chat: ChatContext,
        #[serde(rename = "messageId")]
        message_id: MessageRef,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum InboundMessage {
    #[serde(rename = "action")]
    Action {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "actorId")]
        actor_id: PlayerId,
        action: PlayerActionKind,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum OutboundResponse {
    #[serde(rename = "ack")]
    Ack {
        #[serde(rename = "requestId")]
        request_id: String,
        result: Acknowledgement,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        code: String,
        message: String,
    },
}

struct GatewayInner {
    broadcaster: broadcast::Sender<GatewayEvent>,
    actions: mpsc::Sender<PlayerAction>,
    next_message: AtomicU64,
    next_conn: AtomicU64,
    live_messages: Mutex<HashSet<MessageRef>>,
    connection_actors: Mutex<HashMap<u64, PlayerId>>,
    pending_acks: Mutex<HashMap<String, (String, mpsc::UnboundedSender<Message>)>>,
}

#[derive(Clone)]
pub struct WsGateway {
    inner: Arc<GatewayInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn ack_key(conn_id: u64, request_id: &str) -> String {
    format!("{conn_id}:{request_id}")
}

fn send_response(tx: &mpsc::UnboundedSender<Message>, response: &OutboundResponse) {
    if let Ok(payload) = serde_json::to_string(response) {
        let _ = tx.send(Message::Text(payload));
    }
}

impl WsGateway {
    pub fn new(actions: mpsc::Sender<PlayerAction>) -> Self {
        let (broadcaster, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            inner: Arc::new(GatewayInner {
                broadcaster,
                actions,
                next_message: AtomicU64::new(1),
                next_conn: AtomicU64::new(1),
                live_messages: Mutex::new(HashSet::new()),
                connection_actors: Mutex::new(HashMap::new()),
                pending_acks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/healthz", get(healthz))
            .with_state(self.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcaster.subscribe()
    }

    fn publish(&self, event: GatewayEvent) {
        // No receivers just means nobody is watching right now.
        if self.inner.broadcaster.send(event).is_err() {
            debug!("no gateway subscribers");
        }
    }

    async fn handle_inbound(&self, conn_id: u64, text: &str, tx: &mpsc::UnboundedSender<Message>) {
        let inbound = match serde_json::from_str::<InboundMessage>(text) {
            Ok(inbound) => inbound,
            Err(err) => {
                warn!(?err, "invalid inbound message");
                send_response(
                    tx,
                    &OutboundResponse::Error {
                        request_id: None,
                        code: "INVALID_MESSAGE".to_string(),
                        message: err.to_string(),
                    },
                );
                return;
            }
        };
        match inbound {
            InboundMessage::Action {
                request_id,
                session_id,
                actor_id,
                action,
            } => {
                let bound = lock(&self.inner.connection_actors)
                    .entry(conn_id)
                    .or_insert_with(|| actor_id.clone())
                    .clone();
                if bound != actor_id {
                    warn!(conn_id, %bound, actor = %actor_id, "actor mismatch on connection");
                    send_response(
                        tx,
                        &OutboundResponse::Error {
                            request_id: Some(request_id),
                            code: "ACTOR_MISMATCH".to_string(),
                            message: format!("connection is bound to actor {bound}"),
                        },
                    );
                    return;
                }
                let key = ack_key(conn_id, &request_id);
                lock(&self.inner.pending_acks).insert(key.clone(), (request_id.clone(), tx.clone()));
                let action = PlayerAction {
                    session_id,
                    actor_id,
                    ack: AckToken(key.clone()),
                    kind: action,
                };
                if self.inner.actions.send(action).await.is_err() {
                    lock(&self.inner.pending_acks).remove(&key);
                    send_response(
                        tx,
                        &OutboundResponse::Error {
                            request_id: Some(request_id),
                            code: "UNAVAILABLE".to_string(),
                            message: "helper is shutting down".to_string(),
                        },
                    );
                }
            }
        }
    }

    fn drop_connection(&self, conn_id: u64) {
        let prefix = format!("{conn_id}:");
        lock(&self.inner.pending_acks).retain(|key, _| !key.starts_with(&prefix));
        lock(&self.inner.connection_actors).remove(&conn_id);
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    AxumState(gateway): AxumState<WsGateway>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, gateway))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn handle_socket(socket: WebSocket, gateway: WsGateway) {
    let conn_id = gateway.inner.next_conn.fetch_add(1, Ordering::Relaxed);
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let mut events = gateway.subscribe();

    let write_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let broadcast_task = {
        let tx = tx.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if let Ok(payload) = serde_json::to_string(&event) {
                            let _ = tx.send(Message::Text(payload));
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(conn_id, skipped, "gateway client lagging");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    };

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Text(text) => gateway.handle_inbound(conn_id, &text, &tx).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    gateway.drop_connection(conn_id);
    write_task.abort();
    broadcast_task.abort();
}

#[async_trait]
impl Presenter for WsGateway {
    async fn render(
        &self,
        view: &SessionView,
        annotation: Option<Annotation>,
    ) -> Result<MessageRef, PresenterError> {
        let id = self.inner.next_message.fetch_add(1, Ordering::Relaxed);
        let message_id = MessageRef::new(format!("msg-{id}"));
        lock(&self.inner.live_messages).insert(message_id.clone());
        self.publish(GatewayEvent::Render {
            message_id: message_id.clone(),
            view: view.clone(),
            annotation,
        });
        Ok(message_id)
    }

    async fn update_render(
        &self,
        message: &MessageRef,
        view: &SessionView,
        annotation: Option<Annotation>,
    ) -> Result<(), PresenterError> {
        {
            let mut live = lock(&self.inner.live_messages);
            // A terminal render is the last edit the message gets.
            let known = if view.status.is_terminal() {
                live.remove(message)
            } else {
                live.contains(message)
            };
            if !known {
                return Err(PresenterError::UnknownMessage(message.clone()));
            }
        }
        self.publish(GatewayEvent::Update {
            message_id: message.clone(),
            view: view.clone(),
            annotation,
        });
        Ok(())
    }

    async fn dispose(
        &self,
        chat: &ChatContext,
        message: &MessageRef,
    ) -> Result<(), PresenterError> {
        if !lock(&self.inner.live_messages).remove(message) {
            return Err(PresenterError::UnknownMessage(message.clone()));
        }
        self.publish(GatewayEvent::Dispose {
            chat: chat.clone(),
            message_id: message.clone(),
        });
        Ok(())
    }

    async fn acknowledge(
        &self,
        ack: &AckToken,
        acknowledgement: Acknowledgement,
    ) -> Result<(), PresenterError> {
        let Some((request_id, tx)) = lock(&self.inner.pending_acks).remove(&ack.0) else {
            return Err(PresenterError::Unavailable(format!(
                "no connection waiting on {}",
                ack.0
            )));
        };
        send_response(
            &tx,
            &OutboundResponse::Ack {
                request_id,
                result: acknowledgement,
            },
        );
        Ok(())
    }
}
