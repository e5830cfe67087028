//! Glue between the domain services and the connection registry. The
//! services publish events through `RegistrySink`; the websocket layer
//! drives connect/disconnect/heartbeat through `Dispatcher`.

use actix::prelude::*;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::error;
use crate::modules::conversation::repository_pg::{
    ConversationRepositoryPg, ParticipantRepositoryPg, TypingRepositoryPg,
};
use crate::modules::conversation::service::ConversationService;
use crate::modules::message::repository_pg::{DeliveryRepositoryPg, MessageRepositoryPg};
use crate::modules::message::service::MessageService;
use crate::modules::realtime::event::{Audience, ChatEvent, EventSink};
use crate::modules::realtime::presence::PresenceService;
use crate::modules::realtime::registry::{
    AddConnection, ConnectionRegistry, JoinGroup, JoinGroupForUser, LeaveGroupForUser, Publish,
    RemoveConnection,
};
use crate::modules::user::repository_pg::UserDirectoryPg;

pub type ConversationSvc = ConversationService<
    ConversationRepositoryPg,
    ParticipantRepositoryPg,
    TypingRepositoryPg,
    MessageRepositoryPg,
    UserDirectoryPg,
    RegistrySink,
>;

pub type MessageSvc = MessageService<
    MessageRepositoryPg,
    DeliveryRepositoryPg,
    ConversationRepositoryPg,
    ParticipantRepositoryPg,
    RegistrySink,
>;

/// Event sink backed by the registry actor. Membership changes piggyback
/// on participant events so live connections track the durable rows:
/// the added user's connections join the group before the event fans
/// out, the removed user's connections leave right after.
#[derive(Clone)]
pub struct RegistrySink {
    registry: Addr<ConnectionRegistry>,
}

impl RegistrySink {
    pub fn new(registry: Addr<ConnectionRegistry>) -> Self {
        RegistrySink { registry }
    }
}

impl EventSink for RegistrySink {
    fn publish(&self, event: ChatEvent, audience: Audience) {
        match &event {
            ChatEvent::ParticipantAdded { conversation_id, user_id } => {
                self.registry.do_send(JoinGroupForUser {
                    user_id: *user_id,
                    conversation_id: *conversation_id,
                });
                self.registry.do_send(Publish { event, audience });
            }
            ChatEvent::ParticipantRemoved { conversation_id, user_id } => {
                let (user_id, conversation_id) = (*user_id, *conversation_id);
                // mailbox order: the removal notice still reaches the
                // removed user's own connections, then they drop out
                self.registry.do_send(Publish { event, audience });
                self.registry.do_send(LeaveGroupForUser { user_id, conversation_id });
            }
            _ => {
                self.registry.do_send(Publish { event, audience });
            }
        }
    }
}

/// Drives the session lifecycle: registers connections, joins their
/// conversation groups, recovers deliveries missed while offline, and
/// keeps Redis presence in step with the registry's online/offline edges.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Addr<ConnectionRegistry>,
    presence: Arc<PresenceService>,
    conversations: ConversationSvc,
    messages: MessageSvc,
}

impl Dispatcher {
    pub fn new(
        registry: Addr<ConnectionRegistry>,
        presence: Arc<PresenceService>,
        conversations: ConversationSvc,
        messages: MessageSvc,
    ) -> Self {
        Dispatcher { registry, presence, conversations, messages }
    }

    pub async fn connected(
        &self,
        user_id: Uuid,
        connection_id: Uuid,
        addr: Recipient<ChatEvent>,
    ) -> Result<(), error::SystemError> {
        let outcome = self.registry.send(AddConnection { user_id, connection_id, addr }).await?;

        let conversation_ids = self.conversations.conversation_ids_of(user_id).await?;
        for conversation_id in &conversation_ids {
            self.registry.do_send(JoinGroup { connection_id, conversation_id: *conversation_id });
        }

        // everything sent to this user while no device was connected
        let pending = self.messages.undelivered_message_ids(user_id).await?;
        if !pending.is_empty() {
            tracing::info!(
                "Recovering {} undelivered message(s) for user {}",
                pending.len(),
                user_id
            );
            self.messages.mark_delivered(&pending, user_id).await?;
        }

        self.presence.set_online(user_id).await?;

        if outcome.came_online {
            for conversation_id in conversation_ids {
                self.registry.do_send(Publish {
                    event: ChatEvent::PresenceChanged { user_id, online: true, last_seen: None },
                    audience: Audience::Group { conversation_id, exclude_user: Some(user_id) },
                });
            }
        }

        Ok(())
    }

    pub async fn disconnected(&self, connection_id: Uuid) -> Result<(), error::SystemError> {
        let outcome = self.registry.send(RemoveConnection { connection_id }).await?;

        let Some(user_id) = outcome.user_id else {
            return Ok(());
        };
        if !outcome.went_offline {
            return Ok(());
        }

        self.presence.set_offline(user_id).await?;
        let last_seen = self.presence.get_last_seen(user_id).await?;

        for conversation_id in self.conversations.conversation_ids_of(user_id).await? {
            self.registry.do_send(Publish {
                event: ChatEvent::PresenceChanged {
                    user_id,
                    online: false,
                    last_seen: last_seen.clone(),
                },
                audience: Audience::Group { conversation_id, exclude_user: Some(user_id) },
            });
        }

        Ok(())
    }

    pub async fn heartbeat(&self, user_id: Uuid) -> Result<(), error::SystemError> {
        self.presence.refresh_presence(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::realtime::registry::ConnectionsOf;

    struct Collector {
        received: Vec<ChatEvent>,
    }

    impl Actor for Collector {
        type Context = Context<Self>;
    }

    impl Handler<ChatEvent> for Collector {
        type Result = ();

        fn handle(&mut self, event: ChatEvent, _: &mut Context<Self>) {
            self.received.push(event);
        }
    }

    #[derive(Message)]
    #[rtype(result = "usize")]
    struct ReceivedCount;

    impl Handler<ReceivedCount> for Collector {
        type Result = usize;

        fn handle(&mut self, _: ReceivedCount, _: &mut Context<Self>) -> usize {
            self.received.len()
        }
    }

    async fn flush(registry: &Addr<ConnectionRegistry>) {
        // mailbox is FIFO, so awaiting any message drains earlier do_sends
        registry.send(ConnectionsOf { user_id: Uuid::now_v7() }).await.unwrap();
    }

    #[actix_web::test]
    async fn test_added_participant_receives_the_add_event() {
        let registry = ConnectionRegistry::new().start();
        let sink = RegistrySink::new(registry.clone());
        let user_id = Uuid::now_v7();
        let conversation_id = Uuid::now_v7();
        let collector = Collector { received: Vec::new() }.start();

        registry
            .send(AddConnection {
                user_id,
                connection_id: Uuid::now_v7(),
                addr: collector.clone().recipient(),
            })
            .await
            .unwrap();

        sink.publish(
            ChatEvent::ParticipantAdded { conversation_id, user_id },
            Audience::Group { conversation_id, exclude_user: None },
        );
        flush(&registry).await;

        // the join queued ahead of the fan-out, so the new user's own
        // connection sees the event announcing them
        assert_eq!(collector.send(ReceivedCount).await.unwrap(), 1);
    }

    #[actix_web::test]
    async fn test_removed_participant_sees_the_removal_but_nothing_after() {
        let registry = ConnectionRegistry::new().start();
        let sink = RegistrySink::new(registry.clone());
        let user_id = Uuid::now_v7();
        let conversation_id = Uuid::now_v7();
        let connection_id = Uuid::now_v7();
        let collector = Collector { received: Vec::new() }.start();

        registry
            .send(AddConnection { user_id, connection_id, addr: collector.clone().recipient() })
            .await
            .unwrap();
        registry.send(JoinGroup { connection_id, conversation_id }).await.unwrap().unwrap();

        sink.publish(
            ChatEvent::ParticipantRemoved { conversation_id, user_id },
            Audience::Group { conversation_id, exclude_user: None },
        );
        flush(&registry).await;
        assert_eq!(collector.send(ReceivedCount).await.unwrap(), 1);

        sink.publish(
            ChatEvent::TypingChanged {
                conversation_id,
                user_id: Uuid::now_v7(),
                is_typing: true,
            },
            Audience::Group { conversation_id, exclude_user: None },
        );
        flush(&registry).await;
        assert_eq!(collector.send(ReceivedCount).await.unwrap(), 1);
    }
}
