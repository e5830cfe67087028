//! Connection registry actor. Tracks which live connections belong to
//! which user and which conversation groups each connection has joined,
//! and resolves event audiences to session recipients. All mutations go
//! through the mailbox, so connect/disconnect races serialize here.

use actix::prelude::*;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::api::error;
use crate::modules::realtime::event::{Audience, ChatEvent};

#[derive(Message)]
#[rtype(result = "ConnectOutcome")]
pub struct AddConnection {
    pub user_id: Uuid,
    pub connection_id: Uuid,
    pub addr: Recipient<ChatEvent>,
}

#[derive(MessageResponse)]
pub struct ConnectOutcome {
    /// True when this was the user's first live connection.
    pub came_online: bool,
}

#[derive(Message)]
#[rtype(result = "DisconnectOutcome")]
pub struct RemoveConnection {
    pub connection_id: Uuid,
}

#[derive(MessageResponse)]
pub struct DisconnectOutcome {
    pub user_id: Option<Uuid>,
    /// True when the owning user has zero connections left.
    pub went_offline: bool,
}

#[derive(Message)]
#[rtype(result = "Result<(), error::SystemError>")]
pub struct JoinGroup {
    pub connection_id: Uuid,
    pub conversation_id: Uuid,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct LeaveGroup {
    pub connection_id: Uuid,
    pub conversation_id: Uuid,
}

/// Joins every live connection of a user to a group. Used when a user is
/// added to a conversation while already connected.
#[derive(Message)]
#[rtype(result = "()")]
pub struct JoinGroupForUser {
    pub user_id: Uuid,
    pub conversation_id: Uuid,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct LeaveGroupForUser {
    pub user_id: Uuid,
    pub conversation_id: Uuid,
}

#[derive(Message)]
#[rtype(result = "Vec<Uuid>")]
pub struct ConnectionsOf {
    pub user_id: Uuid,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Publish {
    pub event: ChatEvent,
    pub audience: Audience,
}

pub struct ConnectionRegistry {
    /// connection_id -> session recipient
    sessions: HashMap<Uuid, Recipient<ChatEvent>>,

    /// user_id -> connection ids (multi-device)
    users: HashMap<Uuid, HashSet<Uuid>>,

    /// connection_id -> owning user
    connection_owner: HashMap<Uuid, Uuid>,

    /// conversation_id -> connection ids joined for fan-out. Connection
    /// scoped, deliberately separate from the durable participant rows.
    groups: HashMap<Uuid, HashSet<Uuid>>,

    /// connection_id -> joined conversations, reverse index for cleanup
    memberships: HashMap<Uuid, HashSet<Uuid>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            users: HashMap::new(),
            connection_owner: HashMap::new(),
            groups: HashMap::new(),
            memberships: HashMap::new(),
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Actor for ConnectionRegistry {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        tracing::info!("Connection registry started");
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!("Connection registry stopped");
    }
}

impl Handler<AddConnection> for ConnectionRegistry {
    type Result = ConnectOutcome;

    fn handle(&mut self, msg: AddConnection, _: &mut Context<Self>) -> Self::Result {
        self.sessions.insert(msg.connection_id, msg.addr);
        self.connection_owner.insert(msg.connection_id, msg.user_id);

        let connections = self.users.entry(msg.user_id).or_default();
        let came_online = connections.is_empty();
        connections.insert(msg.connection_id);

        tracing::debug!(
            "Connection {} registered for user {} ({} live)",
            msg.connection_id,
            msg.user_id,
            connections.len()
        );

        ConnectOutcome { came_online }
    }
}

impl Handler<RemoveConnection> for ConnectionRegistry {
    type Result = DisconnectOutcome;

    fn handle(&mut self, msg: RemoveConnection, _: &mut Context<Self>) -> Self::Result {
        self.sessions.remove(&msg.connection_id);

        if let Some(conversations) = self.memberships.remove(&msg.connection_id) {
            for conversation_id in conversations {
                if let Some(group) = self.groups.get_mut(&conversation_id) {
                    group.remove(&msg.connection_id);
                    if group.is_empty() {
                        self.groups.remove(&conversation_id);
                    }
                }
            }
        }

        let Some(user_id) = self.connection_owner.remove(&msg.connection_id) else {
            return DisconnectOutcome { user_id: None, went_offline: false };
        };

        let went_offline = match self.users.get_mut(&user_id) {
            Some(connections) => {
                connections.remove(&msg.connection_id);
                if connections.is_empty() {
                    self.users.remove(&user_id);
                    true
                } else {
                    false
                }
            }
            None => false,
        };

        tracing::debug!(
            "Connection {} removed for user {} (went offline: {})",
            msg.connection_id,
            user_id,
            went_offline
        );

        DisconnectOutcome { user_id: Some(user_id), went_offline }
    }
}

impl Handler<JoinGroup> for ConnectionRegistry {
    type Result = Result<(), error::SystemError>;

    fn handle(&mut self, msg: JoinGroup, _: &mut Context<Self>) -> Self::Result {
        if !self.sessions.contains_key(&msg.connection_id) {
            return Err(error::SystemError::not_found("Connection not found"));
        }

        let inserted =
            self.groups.entry(msg.conversation_id).or_default().insert(msg.connection_id);
        if !inserted {
            return Err(error::SystemError::already_exists(
                "Connection already joined to this group",
            ));
        }

        self.memberships.entry(msg.connection_id).or_default().insert(msg.conversation_id);

        Ok(())
    }
}

impl Handler<LeaveGroup> for ConnectionRegistry {
    type Result = ();

    fn handle(&mut self, msg: LeaveGroup, _: &mut Context<Self>) {
        if let Some(group) = self.groups.get_mut(&msg.conversation_id) {
            group.remove(&msg.connection_id);
            if group.is_empty() {
                self.groups.remove(&msg.conversation_id);
            }
        }
        if let Some(conversations) = self.memberships.get_mut(&msg.connection_id) {
            conversations.remove(&msg.conversation_id);
        }
    }
}

impl Handler<JoinGroupForUser> for ConnectionRegistry {
    type Result = ();

    fn handle(&mut self, msg: JoinGroupForUser, _: &mut Context<Self>) {
        let connections: Vec<Uuid> = match self.users.get(&msg.user_id) {
            Some(set) => set.iter().copied().collect(),
            None => return,
        };

        let group = self.groups.entry(msg.conversation_id).or_default();
        for connection_id in &connections {
            group.insert(*connection_id);
        }
        for connection_id in connections {
            self.memberships.entry(connection_id).or_default().insert(msg.conversation_id);
        }
    }
}

impl Handler<LeaveGroupForUser> for ConnectionRegistry {
    type Result = ();

    fn handle(&mut self, msg: LeaveGroupForUser, _: &mut Context<Self>) {
        let connections: Vec<Uuid> = match self.users.get(&msg.user_id) {
            Some(set) => set.iter().copied().collect(),
            None => return,
        };

        if let Some(group) = self.groups.get_mut(&msg.conversation_id) {
            for connection_id in &connections {
                group.remove(connection_id);
            }
            if group.is_empty() {
                self.groups.remove(&msg.conversation_id);
            }
        }
        for connection_id in connections {
            if let Some(conversations) = self.memberships.get_mut(&connection_id) {
                conversations.remove(&msg.conversation_id);
            }
        }
    }
}

impl Handler<ConnectionsOf> for ConnectionRegistry {
    type Result = Vec<Uuid>;

    fn handle(&mut self, msg: ConnectionsOf, _: &mut Context<Self>) -> Self::Result {
        self.users.get(&msg.user_id).map(|set| set.iter().copied().collect()).unwrap_or_default()
    }
}

impl Handler<Publish> for ConnectionRegistry {
    type Result = ();

    fn handle(&mut self, msg: Publish, _: &mut Context<Self>) {
        match msg.audience {
            Audience::Group { conversation_id, exclude_user } => {
                let Some(group) = self.groups.get(&conversation_id) else {
                    tracing::debug!("No live connections in group {}", conversation_id);
                    return;
                };

                let mut sent = 0;
                for connection_id in group {
                    if let Some(excluded) = exclude_user {
                        if self.connection_owner.get(connection_id) == Some(&excluded) {
                            continue;
                        }
                    }
                    if let Some(recipient) = self.sessions.get(connection_id) {
                        recipient.do_send(msg.event.clone());
                        sent += 1;
                    }
                }

                tracing::debug!(
                    "Fanned out to {} connection(s) in group {}",
                    sent,
                    conversation_id
                );
            }
            Audience::User(user_id) => {
                if let Some(connections) = self.users.get(&user_id) {
                    for connection_id in connections {
                        if let Some(recipient) = self.sessions.get(connection_id) {
                            recipient.do_send(msg.event.clone());
                        }
                    }
                } else {
                    tracing::debug!("User {} not connected, event dropped", user_id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::SystemError;

    struct Collector {
        received: Vec<ChatEvent>,
    }

    impl Collector {
        fn start_new() -> Addr<Self> {
            Collector { received: Vec::new() }.start()
        }
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

    fn typing_event(conversation_id: Uuid, user_id: Uuid) -> ChatEvent {
        ChatEvent::TypingChanged { conversation_id, user_id, is_typing: true }
    }

    #[actix_web::test]
    async fn test_only_first_connection_reports_came_online() {
        let registry = ConnectionRegistry::new().start();
        let collector = Collector::start_new();
        let user = Uuid::now_v7();

        let first = registry
            .send(AddConnection {
                user_id: user,
                connection_id: Uuid::now_v7(),
                addr: collector.clone().recipient(),
            })
            .await
            .unwrap();
        let second = registry
            .send(AddConnection {
                user_id: user,
                connection_id: Uuid::now_v7(),
                addr: collector.recipient(),
            })
            .await
            .unwrap();

        assert!(first.came_online);
        assert!(!second.came_online);
    }

    #[actix_web::test]
    async fn test_offline_only_when_last_connection_goes() {
        let registry = ConnectionRegistry::new().start();
        let collector = Collector::start_new();
        let user = Uuid::now_v7();
        let phone = Uuid::now_v7();
        let laptop = Uuid::now_v7();

        for connection_id in [phone, laptop] {
            registry
                .send(AddConnection {
                    user_id: user,
                    connection_id,
                    addr: collector.clone().recipient(),
                })
                .await
                .unwrap();
        }

        let first = registry.send(RemoveConnection { connection_id: phone }).await.unwrap();
        let last = registry.send(RemoveConnection { connection_id: laptop }).await.unwrap();

        assert_eq!(first.user_id, Some(user));
        assert!(!first.went_offline);
        assert!(last.went_offline);

        let remaining = registry.send(ConnectionsOf { user_id: user }).await.unwrap();
        assert!(remaining.is_empty());
    }

    #[actix_web::test]
    async fn test_unknown_connection_reports_no_owner() {
        let registry = ConnectionRegistry::new().start();

        let outcome =
            registry.send(RemoveConnection { connection_id: Uuid::now_v7() }).await.unwrap();

        assert_eq!(outcome.user_id, None);
        assert!(!outcome.went_offline);
    }

    #[actix_web::test]
    async fn test_duplicate_group_join_is_rejected() {
        let registry = ConnectionRegistry::new().start();
        let collector = Collector::start_new();
        let connection_id = Uuid::now_v7();
        let conversation_id = Uuid::now_v7();

        registry
            .send(AddConnection {
                user_id: Uuid::now_v7(),
                connection_id,
                addr: collector.recipient(),
            })
            .await
            .unwrap();

        let first = registry.send(JoinGroup { connection_id, conversation_id }).await.unwrap();
        let second = registry.send(JoinGroup { connection_id, conversation_id }).await.unwrap();

        assert!(first.is_ok());
        assert!(matches!(second, Err(SystemError::AlreadyExists(_))));
    }

    #[actix_web::test]
    async fn test_join_requires_live_connection() {
        let registry = ConnectionRegistry::new().start();

        let result = registry
            .send(JoinGroup { connection_id: Uuid::now_v7(), conversation_id: Uuid::now_v7() })
            .await
            .unwrap();

        assert!(matches!(result, Err(SystemError::NotFound(_))));
    }

    #[actix_web::test]
    async fn test_group_publish_skips_excluded_user() {
        let registry = ConnectionRegistry::new().start();
        let conversation_id = Uuid::now_v7();

        let typist = Uuid::now_v7();
        let peer = Uuid::now_v7();
        let typist_collector = Collector::start_new();
        let peer_collector = Collector::start_new();

        for (user_id, collector) in
            [(typist, &typist_collector), (peer, &peer_collector)]
        {
            let connection_id = Uuid::now_v7();
            registry
                .send(AddConnection {
                    user_id,
                    connection_id,
                    addr: collector.clone().recipient(),
                })
                .await
                .unwrap();
            registry.send(JoinGroup { connection_id, conversation_id }).await.unwrap().unwrap();
        }

        registry
            .send(Publish {
                event: typing_event(conversation_id, typist),
                audience: Audience::Group { conversation_id, exclude_user: Some(typist) },
            })
            .await
            .unwrap();

        assert_eq!(typist_collector.send(ReceivedCount).await.unwrap(), 0);
        assert_eq!(peer_collector.send(ReceivedCount).await.unwrap(), 1);
    }

    #[actix_web::test]
    async fn test_user_audience_reaches_every_device_of_that_user() {
        let registry = ConnectionRegistry::new().start();
        let sender = Uuid::now_v7();
        let other = Uuid::now_v7();

        let phone = Collector::start_new();
        let laptop = Collector::start_new();
        let other_device = Collector::start_new();

        for (user_id, collector) in
            [(sender, &phone), (sender, &laptop), (other, &other_device)]
        {
            registry
                .send(AddConnection {
                    user_id,
                    connection_id: Uuid::now_v7(),
                    addr: collector.clone().recipient(),
                })
                .await
                .unwrap();
        }

        registry
            .send(Publish {
                event: typing_event(Uuid::now_v7(), other),
                audience: Audience::User(sender),
            })
            .await
            .unwrap();

        assert_eq!(phone.send(ReceivedCount).await.unwrap(), 1);
        assert_eq!(laptop.send(ReceivedCount).await.unwrap(), 1);
        assert_eq!(other_device.send(ReceivedCount).await.unwrap(), 0);
    }

    #[actix_web::test]
    async fn test_removed_connection_no_longer_receives_group_events() {
        let registry = ConnectionRegistry::new().start();
        let conversation_id = Uuid::now_v7();
        let user = Uuid::now_v7();
        let connection_id = Uuid::now_v7();
        let collector = Collector::start_new();

        registry
            .send(AddConnection {
                user_id: user,
                connection_id,
                addr: collector.clone().recipient(),
            })
            .await
            .unwrap();
        registry.send(JoinGroup { connection_id, conversation_id }).await.unwrap().unwrap();
        registry.send(RemoveConnection { connection_id }).await.unwrap();

        registry
            .send(Publish {
                event: typing_event(conversation_id, Uuid::now_v7()),
                audience: Audience::Group { conversation_id, exclude_user: None },
            })
            .await
            .unwrap();

        assert_eq!(collector.send(ReceivedCount).await.unwrap(), 0);
    }
}
