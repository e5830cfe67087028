//! Per-connection session actor. The handler authenticates the upgrade
//! and owns the socket; this actor owns the connection's behaviour:
//! client frames come in through `Handler<ClientMessage>`, domain events
//! arrive through `Handler<ChatEvent>` and go out over the mpsc bridge.
//!
//! Async work (DB calls) runs via `ctx.spawn()` + `into_actor()`.

use actix::prelude::*;
use actix_web::web;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::constants::HEARTBEAT_INTERVAL;
use crate::modules::realtime::dispatcher::{ConversationSvc, Dispatcher, MessageSvc};
use crate::modules::realtime::event::ChatEvent;

use super::message::{ClientMessage, ServerMessage};

/// Tells the session actor to stop once the socket is gone.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Shutdown;

pub struct WebSocketSession {
    /// Connection id, unique per socket even for the same user
    pub id: Uuid,

    /// Authenticated before the actor starts; no anonymous sessions
    pub user_id: Uuid,

    /// Channel towards the client (bridge in handler.rs)
    pub tx: mpsc::UnboundedSender<String>,

    pub dispatcher: web::Data<Dispatcher>,
    pub conversations: web::Data<ConversationSvc>,
    pub messages: web::Data<MessageSvc>,
}

impl WebSocketSession {
    pub fn new(
        user_id: Uuid,
        tx: mpsc::UnboundedSender<String>,
        dispatcher: web::Data<Dispatcher>,
        conversations: web::Data<ConversationSvc>,
        messages: web::Data<MessageSvc>,
    ) -> Self {
        Self { id: Uuid::now_v7(), user_id, tx, dispatcher, conversations, messages }
    }

    fn send_to_client(&self, msg: &ServerMessage) {
        match serde_json::to_string(msg) {
            Ok(json) => {
                if let Err(e) = self.tx.send(json) {
                    tracing::error!("Could not push frame to session {}: {}", self.id, e);
                }
            }
            Err(e) => {
                tracing::error!("Could not serialize server frame (session {}): {}", self.id, e);
            }
        }
    }

    fn handle_client_message(&mut self, msg: ClientMessage, ctx: &mut Context<Self>) {
        match msg {
            ClientMessage::TypingStart { conversation_id } => {
                self.handle_typing(conversation_id, true, ctx);
            }

            ClientMessage::TypingStop { conversation_id } => {
                self.handle_typing(conversation_id, false, ctx);
            }

            ClientMessage::MarkRead { message_ids } => {
                self.handle_mark(message_ids, true, ctx);
            }

            ClientMessage::MarkDelivered { message_ids } => {
                self.handle_mark(message_ids, false, ctx);
            }

            ClientMessage::Ping => {
                self.send_to_client(&ServerMessage::Pong);
            }
        }
    }

    fn handle_typing(&self, conversation_id: Uuid, is_typing: bool, ctx: &mut Context<Self>) {
        let conversations = self.conversations.clone();
        let user_id = self.user_id;
        let session_id = self.id;

        ctx.spawn(
            async move {
                // typing is best effort, a rejected update only gets logged
                if let Err(e) =
                    conversations.update_typing_status(conversation_id, user_id, is_typing).await
                {
                    tracing::warn!(
                        "Typing update rejected (session {}, conversation {}): {}",
                        session_id,
                        conversation_id,
                        e
                    );
                }
            }
            .into_actor(self),
        );
    }

    fn handle_mark(&self, message_ids: Vec<Uuid>, read: bool, ctx: &mut Context<Self>) {
        let messages = self.messages.clone();
        let tx = self.tx.clone();
        let user_id = self.user_id;
        let session_id = self.id;

        ctx.spawn(
            async move {
                let result = if read {
                    messages.mark_read(&message_ids, user_id).await
                } else {
                    messages.mark_delivered(&message_ids, user_id).await
                };

                if let Err(e) = result {
                    tracing::warn!(
                        "Acknowledgement failed (session {}, {} id(s)): {}",
                        session_id,
                        message_ids.len(),
                        e
                    );
                    let frame = ServerMessage::Error {
                        message: "Could not update message status".to_string(),
                    };
                    if let Ok(json) = serde_json::to_string(&frame) {
                        let _ = tx.send(json);
                    }
                }
            }
            .into_actor(self),
        );
    }
}

impl Actor for WebSocketSession {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::debug!("WebSocket session started: {} (user {})", self.id, self.user_id);

        let dispatcher = self.dispatcher.clone();
        let user_id = self.user_id;
        let connection_id = self.id;
        let addr = ctx.address().recipient();
        let tx = self.tx.clone();

        ctx.spawn(
            async move {
                if let Err(e) = dispatcher.connected(user_id, connection_id, addr).await {
                    tracing::error!("Connection setup failed (session {}): {}", connection_id, e);
                    let frame =
                        ServerMessage::Error { message: "Connection setup failed".to_string() };
                    if let Ok(json) = serde_json::to_string(&frame) {
                        let _ = tx.send(json);
                    }
                }
            }
            .into_actor(self),
        );

        // keeps the Redis presence key alive while the socket is open
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            let dispatcher = act.dispatcher.clone();
            let user_id = act.user_id;
            ctx.spawn(
                async move {
                    if let Err(e) = dispatcher.heartbeat(user_id).await {
                        tracing::warn!("Presence refresh failed for user {}: {}", user_id, e);
                    }
                }
                .into_actor(act),
            );
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        // disconnect side effects run in handler.rs once the socket closes
        tracing::debug!("WebSocket session stopped: {} (user {})", self.id, self.user_id);
    }
}

impl Message for ClientMessage {
    type Result = ();
}

/// Handler: client frames forwarded by handler.rs
impl Handler<ClientMessage> for WebSocketSession {
    type Result = ();

    fn handle(&mut self, msg: ClientMessage, ctx: &mut Context<Self>) {
        self.handle_client_message(msg, ctx);
    }
}

/// Handler: domain events from the registry, framed and pushed out
impl Handler<ChatEvent> for WebSocketSession {
    type Result = ();

    fn handle(&mut self, event: ChatEvent, _ctx: &mut Context<Self>) {
        self.send_to_client(&ServerMessage::from(event));
    }
}

impl Handler<Shutdown> for WebSocketSession {
    type Result = ();

    fn handle(&mut self, _: Shutdown, ctx: &mut Context<Self>) {
        ctx.stop();
    }
}
