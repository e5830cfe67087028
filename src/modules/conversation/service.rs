use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::error;
use crate::constants::{MAX_PAGE_SIZE, TYPING_STALE_AFTER_SECS};
use crate::modules::conversation::model::{
    ConversationDetail, NewConversationRow, NewParticipant, ParticipantView,
};
use crate::modules::conversation::repository::{
    ConversationRepository, ParticipantRepository, TypingRepository,
};
use crate::modules::conversation::schema::{
    ConversationEntity, ConversationType, ParticipantEntity, ParticipantRole,
};
use crate::modules::message::model::InsertMessage;
use crate::modules::message::repository::MessageRepository;
use crate::modules::message::schema::{MessageEntity, MessageType};
use crate::modules::realtime::event::{Audience, ChatEvent, EventSink};
use crate::modules::realtime::presence::PresenceService;
use crate::modules::user::repository::UserDirectory;

/// Shape checks, run before any transaction is opened.
fn validate_create(
    creator_id: Uuid,
    _type: ConversationType,
    title: &Option<String>,
    participant_ids: &[Uuid],
) -> Result<(), error::SystemError> {
    if !participant_ids.contains(&creator_id) {
        return Err(error::SystemError::forbidden(
            "Creator must be listed among the participants",
        ));
    }

    match _type {
        ConversationType::Direct => {
            if title.is_some() {
                return Err(error::SystemError::invalid_parameters(
                    "Direct conversations cannot have a title",
                ));
            }
            let distinct: HashSet<&Uuid> = participant_ids.iter().collect();
            if participant_ids.len() != 2 || distinct.len() != 2 {
                return Err(error::SystemError::invalid_parameters(
                    "Direct conversations need exactly two distinct participants",
                ));
            }
        }
        ConversationType::Group => {
            if title.as_deref().is_none_or(|t| t.trim().is_empty()) {
                return Err(error::SystemError::invalid_parameters(
                    "Group conversations need a non-empty title",
                ));
            }
        }
    }

    Ok(())
}

#[derive(Clone)]
pub struct ConversationService<C, P, T, M, U, S>
where
    C: ConversationRepository + Send + Sync,
    P: ParticipantRepository + Send + Sync,
    T: TypingRepository + Send + Sync,
    M: MessageRepository + Send + Sync,
    U: UserDirectory + Send + Sync,
    S: EventSink,
{
    conversation_repo: Arc<C>,
    participant_repo: Arc<P>,
    typing_repo: Arc<T>,
    message_repo: Arc<M>,
    users: Arc<U>,
    presence: Arc<PresenceService>,
    events: Arc<S>,
}

impl<C, P, T, M, U, S> ConversationService<C, P, T, M, U, S>
where
    C: ConversationRepository + Send + Sync,
    P: ParticipantRepository + Send + Sync,
    T: TypingRepository + Send + Sync,
    M: MessageRepository + Send + Sync,
    U: UserDirectory + Send + Sync,
    S: EventSink,
{
    pub fn with_dependencies(
        conversation_repo: Arc<C>,
        participant_repo: Arc<P>,
        typing_repo: Arc<T>,
        message_repo: Arc<M>,
        users: Arc<U>,
        presence: Arc<PresenceService>,
        events: Arc<S>,
    ) -> Self {
        ConversationService {
            conversation_repo,
            participant_repo,
            typing_repo,
            message_repo,
            users,
            presence,
            events,
        }
    }

    /// Creates the conversation and seeds every participant in one
    /// transaction, creator as Owner, list order preserved. A direct pair
    /// whose conversation already exists is reactivated instead of
    /// duplicated; if both sides are still active the call is rejected.
    pub async fn create_conversation(
        &self,
        creator_id: Uuid,
        _type: ConversationType,
        title: Option<String>,
        participant_ids: Vec<Uuid>,
    ) -> Result<ConversationEntity, error::SystemError> {
        validate_create(creator_id, _type, &title, &participant_ids)?;

        let mut tx = self.conversation_repo.get_pool().begin().await?;
        let mut pending: Vec<(ChatEvent, Audience)> = Vec::new();

        if _type == ConversationType::Direct {
            // Validation guarantees exactly one id besides the creator.
            let other = participant_ids
                .iter()
                .copied()
                .find(|id| *id != creator_id)
                .ok_or_else(|| {
                    error::SystemError::invalid_parameters(
                        "Direct conversations need exactly two distinct participants",
                    )
                })?;

            if let Some(existing) = self
                .conversation_repo
                .find_direct_between_users(&creator_id, &other, tx.as_mut())
                .await?
            {
                let rows = self
                    .participant_repo
                    .find_by_conversations(&[existing.id], tx.as_mut())
                    .await?;
                let inactive: Vec<Uuid> =
                    rows.iter().filter(|p| !p.is_active).map(|p| p.user_id).collect();

                if inactive.is_empty() {
                    return Err(error::SystemError::already_exists(
                        "A direct conversation between these users already exists",
                    ));
                }

                for user_id in inactive {
                    self.participant_repo.reactivate(&existing.id, &user_id, tx.as_mut()).await?;
                    pending.push((
                        ChatEvent::ParticipantAdded { conversation_id: existing.id, user_id },
                        Audience::Group { conversation_id: existing.id, exclude_user: None },
                    ));
                }

                tx.commit().await?;
                self.flush(pending);
                return Ok(existing);
            }
        }

        let conversation = self
            .conversation_repo
            .create(
                &NewConversationRow { _type, title: title.clone(), created_by: creator_id },
                tx.as_mut(),
            )
            .await?;

        for user_id in &participant_ids {
            let role = if *user_id == creator_id {
                ParticipantRole::Owner
            } else {
                ParticipantRole::Member
            };
            self.add_participant_tx(&conversation, *user_id, role, &mut tx, &mut pending).await?;
        }

        tx.commit().await?;
        self.flush(pending);

        Ok(conversation)
    }

    pub async fn add_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        role: ParticipantRole,
    ) -> Result<ParticipantEntity, error::SystemError> {
        let mut tx = self.conversation_repo.get_pool().begin().await?;
        let mut pending = Vec::new();

        let conversation = self
            .conversation_repo
            .find_by_id(&conversation_id, tx.as_mut())
            .await?
            .ok_or_else(|| error::SystemError::dependency_not_found("Conversation not found"))?;

        let participant =
            self.add_participant_tx(&conversation, user_id, role, &mut tx, &mut pending).await?;

        tx.commit().await?;
        self.flush(pending);

        Ok(participant)
    }

    /// Membership change plus its side effects, inside the caller's
    /// transaction. Events accumulate in `pending` and go out only after
    /// the caller commits.
    async fn add_participant_tx(
        &self,
        conversation: &ConversationEntity,
        user_id: Uuid,
        role: ParticipantRole,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        pending: &mut Vec<(ChatEvent, Audience)>,
    ) -> Result<ParticipantEntity, error::SystemError> {
        let existing =
            self.participant_repo.find_one(&conversation.id, &user_id, tx.as_mut()).await?;

        let participant = match existing {
            Some(row) if row.is_active => {
                return Err(error::SystemError::already_exists(
                    "User is already a participant of this conversation",
                ));
            }
            Some(_) => {
                self.participant_repo.reactivate(&conversation.id, &user_id, tx.as_mut()).await?
            }
            None => {
                self.participant_repo
                    .insert(
                        &NewParticipant { conversation_id: conversation.id, user_id, role },
                        tx.as_mut(),
                    )
                    .await?
            }
        };

        pending.push((
            ChatEvent::ParticipantAdded { conversation_id: conversation.id, user_id },
            Audience::Group { conversation_id: conversation.id, exclude_user: None },
        ));

        if conversation._type == ConversationType::Group && role != ParticipantRole::Owner {
            let display_name = self
                .users
                .find_by_id(&user_id, tx.as_mut())
                .await?
                .map(|u| u.display_name)
                .unwrap_or_else(|| "Unknown User".to_string());

            let system = self
                .message_repo
                .insert(
                    &InsertMessage {
                        conversation_id: conversation.id,
                        sender_id: None,
                        reply_to_id: None,
                        _type: MessageType::System,
                        content: format!("@{display_name} was added to the group."),
                    },
                    tx.as_mut(),
                )
                .await?;
            self.conversation_repo.touch_last_message_at(&conversation.id, tx.as_mut()).await?;

            pending.push((
                ChatEvent::MessageReceived { conversation_id: conversation.id, message: system },
                Audience::Group { conversation_id: conversation.id, exclude_user: None },
            ));
        }

        Ok(participant)
    }

    /// Marks the row inactive; history and delivery rows survive.
    pub async fn remove_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), error::SystemError> {
        let rows = self
            .participant_repo
            .deactivate(&conversation_id, &user_id, self.conversation_repo.get_pool())
            .await?;
        if rows == 0 {
            return Err(error::SystemError::not_found("Participant not found"));
        }

        self.events.publish(
            ChatEvent::ParticipantRemoved { conversation_id, user_id },
            Audience::Group { conversation_id, exclude_user: None },
        );

        Ok(())
    }

    pub async fn update_typing_status(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    ) -> Result<(), error::SystemError> {
        let pool = self.conversation_repo.get_pool();

        if !self.participant_repo.is_active_participant(&conversation_id, &user_id, pool).await? {
            return Err(error::SystemError::forbidden(
                "You are not a participant of this conversation",
            ));
        }

        if is_typing {
            self.typing_repo.set_typing(&conversation_id, &user_id, pool).await?;
        } else {
            let cleared = self.typing_repo.clear_typing(&conversation_id, &user_id, pool).await?;
            if cleared == 0 {
                // nothing to clear, stay silent
                return Ok(());
            }
        }

        self.events.publish(
            ChatEvent::TypingChanged { conversation_id, user_id, is_typing },
            Audience::Group { conversation_id, exclude_user: Some(user_id) },
        );

        Ok(())
    }

    /// Direct → the counterpart's display name, Group → the stored title.
    pub async fn get_conversation_title(
        &self,
        conversation_id: Uuid,
        caller_id: Uuid,
    ) -> Result<String, error::SystemError> {
        let pool = self.conversation_repo.get_pool();

        let conversation = self
            .conversation_repo
            .find_by_id(&conversation_id, pool)
            .await?
            .ok_or_else(|| error::SystemError::not_found("Conversation not found"))?;

        match conversation._type {
            ConversationType::Group => Ok(conversation.title.unwrap_or_default()),
            ConversationType::Direct => {
                let rows =
                    self.participant_repo.find_by_conversations(&[conversation_id], pool).await?;
                let name = match rows.iter().find(|p| p.user_id != caller_id) {
                    Some(other) => {
                        self.users.find_by_id(&other.user_id, pool).await?.map(|u| u.display_name)
                    }
                    None => None,
                };
                Ok(name.unwrap_or_else(|| "Unknown User".to_string()))
            }
        }
    }

    /// Conversation list, newest activity first, with resolved titles and
    /// per-participant presence.
    pub async fn get_user_conversations(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ConversationDetail>, error::SystemError> {
        let pool = self.conversation_repo.get_pool();

        let conversations = self.conversation_repo.find_all_by_user(&user_id, pool).await?;
        if conversations.is_empty() {
            return Ok(vec![]);
        }

        let conversation_ids: Vec<Uuid> = conversations.iter().map(|c| c.id).collect();
        let participants =
            self.participant_repo.find_by_conversations(&conversation_ids, pool).await?;

        let user_ids: Vec<Uuid> = participants
            .iter()
            .map(|p| p.user_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let names = self.users.display_names(&user_ids, pool).await?;
        let presence: HashMap<Uuid, (bool, Option<String>)> = self
            .presence
            .get_online_status_batch(&user_ids)
            .await?
            .into_iter()
            .map(|info| (info.user_id, (info.is_online, info.last_seen)))
            .collect();

        let mut by_conversation: HashMap<Uuid, Vec<ParticipantEntity>> = HashMap::new();
        for participant in participants {
            by_conversation.entry(participant.conversation_id).or_default().push(participant);
        }

        let details = conversations
            .into_iter()
            .map(|conversation| {
                let rows = by_conversation.remove(&conversation.id).unwrap_or_default();

                let title = match conversation._type {
                    ConversationType::Group => conversation.title.clone().unwrap_or_default(),
                    ConversationType::Direct => rows
                        .iter()
                        .find(|p| p.user_id != user_id)
                        .and_then(|p| names.get(&p.user_id).cloned())
                        .unwrap_or_else(|| "Unknown User".to_string()),
                };

                let views = rows
                    .into_iter()
                    .filter(|p| p.is_active)
                    .map(|p| {
                        let (is_online, last_seen) =
                            presence.get(&p.user_id).cloned().unwrap_or((false, None));
                        ParticipantView {
                            user_id: p.user_id,
                            display_name: names
                                .get(&p.user_id)
                                .cloned()
                                .unwrap_or_else(|| "Unknown User".to_string()),
                            role: p.role,
                            is_online,
                            last_seen,
                        }
                    })
                    .collect();

                ConversationDetail {
                    id: conversation.id,
                    _type: conversation._type,
                    title,
                    created_by: conversation.created_by,
                    created_at: conversation.created_at,
                    last_message_at: conversation.last_message_at,
                    participants: views,
                }
            })
            .collect();

        Ok(details)
    }

    /// Keyset pagination by sent_at descending; the returned page is in
    /// ascending order for rendering. Deleted messages come back as
    /// tombstones with blanked content.
    pub async fn get_messages(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        before: Option<String>,
        limit: i64,
    ) -> Result<(Vec<MessageEntity>, Option<String>), error::SystemError> {
        let pool = self.conversation_repo.get_pool();

        self.conversation_repo
            .find_by_id(&conversation_id, pool)
            .await?
            .ok_or_else(|| error::SystemError::not_found("Conversation not found"))?;

        if !self.participant_repo.is_active_participant(&conversation_id, &user_id, pool).await? {
            return Err(error::SystemError::forbidden(
                "You are not a participant of this conversation",
            ));
        }

        let before = match before {
            Some(cursor) => Some(
                chrono::DateTime::parse_from_rfc3339(&cursor)
                    .map_err(|_| error::SystemError::invalid_parameters("Invalid cursor format"))?
                    .with_timezone(&chrono::Utc),
            ),
            None => None,
        };

        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let mut messages =
            self.message_repo.find_page(&conversation_id, before, limit, pool).await?;

        // The extra row only signals that another page exists; the cursor
        // must point at the last row we actually return.
        let cursor = if messages.len() > limit as usize {
            messages.pop();
            messages.last().map(|m| m.sent_at.to_rfc3339())
        } else {
            None
        };

        messages.reverse();

        for message in &mut messages {
            if message.is_deleted {
                message.content.clear();
            }
        }

        Ok((messages, cursor))
    }

    /// Users currently typing; rows older than the staleness window count
    /// as not typing without being deleted.
    pub async fn get_active_typers(
        &self,
        conversation_id: Uuid,
    ) -> Result<Vec<Uuid>, error::SystemError> {
        let cutoff = chrono::Utc::now() - chrono::Duration::seconds(TYPING_STALE_AFTER_SECS);
        let rows = self
            .typing_repo
            .find_active(&conversation_id, cutoff, self.conversation_repo.get_pool())
            .await?;

        Ok(rows.into_iter().map(|row| row.user_id).collect())
    }

    pub async fn conversation_ids_of(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Uuid>, error::SystemError> {
        self.participant_repo
            .conversation_ids_of_user(&user_id, self.conversation_repo.get_pool())
            .await
    }

    fn flush(&self, pending: Vec<(ChatEvent, Audience)>) {
        for (event, audience) in pending {
            self.events.publish(event, audience);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::SystemError;

    #[test]
    fn test_create_requires_creator_in_participant_list() {
        let creator = Uuid::now_v7();
        let others = vec![Uuid::now_v7(), Uuid::now_v7()];

        let err = validate_create(creator, ConversationType::Group, &Some("Team".into()), &others)
            .unwrap_err();
        assert!(matches!(err, SystemError::Forbidden(_)));
    }

    #[test]
    fn test_direct_rejects_title() {
        let creator = Uuid::now_v7();
        let other = Uuid::now_v7();

        let err = validate_create(
            creator,
            ConversationType::Direct,
            &Some("no titles here".into()),
            &[creator, other],
        )
        .unwrap_err();
        assert!(matches!(err, SystemError::InvalidParameters(_)));
    }

    #[test]
    fn test_direct_rejects_self_pair() {
        let creator = Uuid::now_v7();

        let err =
            validate_create(creator, ConversationType::Direct, &None, &[creator, creator])
                .unwrap_err();
        assert!(matches!(err, SystemError::InvalidParameters(_)));
    }

    #[test]
    fn test_direct_rejects_three_participants() {
        let creator = Uuid::now_v7();

        let err = validate_create(
            creator,
            ConversationType::Direct,
            &None,
            &[creator, Uuid::now_v7(), Uuid::now_v7()],
        )
        .unwrap_err();
        assert!(matches!(err, SystemError::InvalidParameters(_)));
    }

    #[test]
    fn test_group_rejects_blank_title() {
        let creator = Uuid::now_v7();
        let ids = [creator, Uuid::now_v7()];

        let missing =
            validate_create(creator, ConversationType::Group, &None, &ids).unwrap_err();
        let blank =
            validate_create(creator, ConversationType::Group, &Some("   ".into()), &ids)
                .unwrap_err();
        assert!(matches!(missing, SystemError::InvalidParameters(_)));
        assert!(matches!(blank, SystemError::InvalidParameters(_)));
    }

    #[test]
    fn test_valid_shapes_pass() {
        let creator = Uuid::now_v7();
        let other = Uuid::now_v7();

        assert!(
            validate_create(creator, ConversationType::Direct, &None, &[creator, other]).is_ok()
        );
        assert!(validate_create(
            creator,
            ConversationType::Group,
            &Some("Team".into()),
            &[creator, other]
        )
        .is_ok());
    }
}
