//! WebSocket HTTP handler. Authenticates the upgrade, starts a session
//! actor, then pumps frames both ways:
//! - Inbound:  client -> websocket -> parse ClientMessage -> session actor
//! - Outbound: registry -> session actor -> mpsc channel -> websocket

use actix_web::{Error, HttpRequest, HttpResponse, web};
use actix_ws::Message;
use tokio::sync::mpsc;

use crate::ENV;
use crate::api::error;
use crate::modules::realtime::dispatcher::{ConversationSvc, Dispatcher, MessageSvc};
use crate::utils::Claims;

use super::message::{ClientMessage, ServerMessage};
use super::session::{Shutdown, WebSocketSession};

#[derive(serde::Deserialize)]
pub struct WsQuery {
    pub token: String,
}

/// Endpoint: GET /ws?token=<access token>
///
/// Browsers cannot set headers on a websocket upgrade, so the token
/// rides in the query string and gets verified before the handshake.
pub async fn websocket_handler(
    req: HttpRequest,
    stream: web::Payload,
    query: web::Query<WsQuery>,
    dispatcher: web::Data<Dispatcher>,
    conversations: web::Data<ConversationSvc>,
    messages: web::Data<MessageSvc>,
) -> Result<HttpResponse, Error> {
    let claims = Claims::decode(&query.token, ENV.jwt_secret.as_ref()).map_err(|e| {
        tracing::warn!("WebSocket upgrade rejected, bad token: {}", e);
        error::Error::unauthorized("Token Invalid or Expired")
    })?;
    let user_id = claims.sub;

    let (response, mut ws_session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    // session actor pushes JSON here, the spawned task writes it out
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let session =
        WebSocketSession::new(user_id, tx, dispatcher.clone(), conversations, messages);
    let connection_id = session.id;

    use actix::Actor;
    let addr = session.start();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                // === INBOUND: client -> server ===
                msg = msg_stream.recv() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let text_str = text.to_string();

                            match serde_json::from_str::<ClientMessage>(&text_str) {
                                Ok(frame) => {
                                    addr.do_send(frame);
                                }
                                Err(e) => {
                                    tracing::warn!(
                                        "Could not parse client frame: {} - raw: {}",
                                        e,
                                        &text_str[..100.min(text_str.len())]
                                    );
                                    let err = ServerMessage::Error {
                                        message: "Unrecognized frame".to_string(),
                                    };
                                    if let Ok(json) = serde_json::to_string(&err) {
                                        if ws_session.text(json).await.is_err() {
                                            break;
                                        }
                                    }
                                }
                            }
                        }

                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = ws_session.pong(&data).await {
                                tracing::error!("Could not send pong: {}", e);
                                break;
                            }
                        }

                        Some(Ok(Message::Pong(_))) => {
                            // heartbeat response, nothing to do
                        }

                        Some(Ok(Message::Close(reason))) => {
                            tracing::info!("WebSocket close frame: {:?}", reason);
                            break;
                        }

                        Some(Ok(Message::Binary(_))) => {
                            tracing::warn!("Binary frames not supported");
                        }

                        Some(Ok(Message::Continuation(_) | Message::Nop)) => {}

                        Some(Err(e)) => {
                            tracing::error!("WebSocket protocol error: {}", e);
                            break;
                        }

                        // stream ended, client went away
                        None => break,
                    }
                }

                // === OUTBOUND: server -> client ===
                Some(json) = rx.recv() => {
                    if ws_session.text(json).await.is_err() {
                        tracing::error!("Could not push frame to websocket client");
                        break;
                    }
                }
            }
        }

        // socket is gone: run disconnect side effects, then stop the actor
        if let Err(e) = dispatcher.disconnected(connection_id).await {
            tracing::error!("Disconnect cleanup failed (connection {}): {}", connection_id, e);
        }
        addr.do_send(Shutdown);

        let _ = ws_session.close(None).await;
        tracing::debug!("WebSocket message loop ended for connection {}", connection_id);
    });

    tracing::info!("WebSocket connection established for user {}", user_id);
    Ok(response)
}
