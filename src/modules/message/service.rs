use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::error;
use crate::modules::conversation::repository::{ConversationRepository, ParticipantRepository};
use crate::modules::message::model::{InsertMessage, MessageView};
use crate::modules::message::repository::{DeliveryRepository, MessageRepository};
use crate::modules::message::schema::{
    DeliveryStatus, MessageDeliveryEntity, MessageEntity, MessageType,
};
use crate::modules::realtime::event::{Audience, ChatEvent, EventSink};

/// Computed per-recipient rollup for one message. Never stored: always
/// derived from the delivery rows against the *current* active recipient
/// set, so participant churn is reflected on the next read.
pub fn aggregate_delivery_status(
    recipients: &HashSet<Uuid>,
    rows: &[MessageDeliveryEntity],
) -> DeliveryStatus {
    if recipients.is_empty() {
        return DeliveryStatus::Delivered;
    }

    let rows: Vec<&MessageDeliveryEntity> =
        rows.iter().filter(|row| recipients.contains(&row.user_id)).collect();

    if rows.len() < recipients.len() {
        return DeliveryStatus::Sent;
    }
    if rows.iter().all(|row| row.status == DeliveryStatus::Read) {
        return DeliveryStatus::Read;
    }
    if rows.iter().all(|row| row.status >= DeliveryStatus::Delivered) {
        return DeliveryStatus::Delivered;
    }

    DeliveryStatus::Sent
}

/// True iff every recipient holds a row at or past `required`. A missing
/// row fails the check; an empty recipient set passes vacuously.
pub fn recipients_at_least(
    recipients: &HashSet<Uuid>,
    rows: &[MessageDeliveryEntity],
    required: DeliveryStatus,
) -> bool {
    recipients
        .iter()
        .all(|user| rows.iter().any(|row| row.user_id == *user && row.status >= required))
}

/// Picks, per conversation, the id of the message with the greatest
/// sent_at. Input order does not matter.
fn latest_per_conversation(messages: &[MessageEntity]) -> HashMap<Uuid, Uuid> {
    let mut latest: HashMap<Uuid, (Uuid, chrono::DateTime<chrono::Utc>)> = HashMap::new();

    for message in messages {
        match latest.get(&message.conversation_id) {
            Some((_, sent_at)) if *sent_at >= message.sent_at => {}
            _ => {
                latest.insert(message.conversation_id, (message.id, message.sent_at));
            }
        }
    }

    latest.into_iter().map(|(conversation_id, (id, _))| (conversation_id, id)).collect()
}

#[derive(Clone)]
pub struct MessageService<M, D, C, P, S>
where
    M: MessageRepository + Send + Sync,
    D: DeliveryRepository + Send + Sync,
    C: ConversationRepository + Send + Sync,
    P: ParticipantRepository + Send + Sync,
    S: EventSink,
{
    message_repo: Arc<M>,
    delivery_repo: Arc<D>,
    conversation_repo: Arc<C>,
    participant_repo: Arc<P>,
    events: Arc<S>,
}

impl<M, D, C, P, S> MessageService<M, D, C, P, S>
where
    M: MessageRepository + Send + Sync,
    D: DeliveryRepository + Send + Sync,
    C: ConversationRepository + Send + Sync,
    P: ParticipantRepository + Send + Sync,
    S: EventSink,
{
    pub fn with_dependencies(
        message_repo: Arc<M>,
        delivery_repo: Arc<D>,
        conversation_repo: Arc<C>,
        participant_repo: Arc<P>,
        events: Arc<S>,
    ) -> Self {
        MessageService { message_repo, delivery_repo, conversation_repo, participant_repo, events }
    }

    /// Persists the message and bumps the conversation's last_message_at
    /// in one transaction, then fans the message out to the group.
    pub async fn send_message(
        &self,
        sender_id: Uuid,
        conversation_id: Uuid,
        content: String,
        reply_to_id: Option<Uuid>,
    ) -> Result<MessageEntity, error::SystemError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(error::SystemError::invalid_parameters(
                "Message content cannot be empty",
            ));
        }

        let mut tx = self.message_repo.get_pool().begin().await?;

        self.conversation_repo
            .find_by_id(&conversation_id, tx.as_mut())
            .await?
            .ok_or_else(|| error::SystemError::dependency_not_found("Conversation not found"))?;

        if !self
            .participant_repo
            .is_active_participant(&conversation_id, &sender_id, tx.as_mut())
            .await?
        {
            return Err(error::SystemError::forbidden(
                "You are not a participant of this conversation",
            ));
        }

        if let Some(reply_to_id) = reply_to_id {
            let target = self
                .message_repo
                .find_by_id(&reply_to_id, tx.as_mut())
                .await?
                .filter(|m| m.conversation_id == conversation_id && !m.is_deleted);
            if target.is_none() {
                return Err(error::SystemError::invalid_parameters(
                    "Reply target must be an existing message in the same conversation",
                ));
            }
        }

        let message = self
            .message_repo
            .insert(
                &InsertMessage {
                    conversation_id,
                    sender_id: Some(sender_id),
                    reply_to_id,
                    _type: MessageType::Text,
                    content: content.to_string(),
                },
                tx.as_mut(),
            )
            .await?;

        self.conversation_repo.touch_last_message_at(&conversation_id, tx.as_mut()).await?;

        tx.commit().await?;

        self.events.publish(
            ChatEvent::MessageReceived { conversation_id, message: message.clone() },
            Audience::Group { conversation_id, exclude_user: None },
        );

        Ok(message)
    }

    /// Only the sender may edit, and only while the message is not
    /// deleted.
    pub async fn edit_message(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        new_content: String,
    ) -> Result<MessageEntity, error::SystemError> {
        let new_content = new_content.trim();
        if new_content.is_empty() {
            return Err(error::SystemError::invalid_parameters(
                "Message content cannot be empty",
            ));
        }

        let mut tx = self.message_repo.get_pool().begin().await?;

        let message = self
            .message_repo
            .find_by_id(&message_id, tx.as_mut())
            .await?
            .filter(|m| !m.is_deleted)
            .ok_or_else(|| error::SystemError::not_found("Message not found"))?;

        if message.sender_id != Some(user_id) {
            return Err(error::SystemError::forbidden("You can only edit your own messages"));
        }

        let edited = self
            .message_repo
            .update_content(&message_id, new_content, tx.as_mut())
            .await?
            .ok_or_else(|| error::SystemError::not_found("Message not found"))?;

        tx.commit().await?;

        self.events.publish(
            ChatEvent::MessageEdited {
                conversation_id: edited.conversation_id,
                message_id,
                content: edited.content.clone(),
                edited_at: edited.edited_at.unwrap_or(edited.sent_at),
            },
            Audience::Group { conversation_id: edited.conversation_id, exclude_user: None },
        );

        Ok(edited)
    }

    /// Soft delete. The row stays so replies keep resolving; deleting
    /// twice or editing afterwards reports NotFound.
    pub async fn delete_message(
        &self,
        message_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), error::SystemError> {
        let mut tx = self.message_repo.get_pool().begin().await?;

        let message = self
            .message_repo
            .find_by_id(&message_id, tx.as_mut())
            .await?
            .filter(|m| !m.is_deleted)
            .ok_or_else(|| error::SystemError::not_found("Message not found"))?;

        if message.sender_id != Some(user_id) {
            return Err(error::SystemError::forbidden("You can only delete your own messages"));
        }

        let deleted = self.message_repo.mark_deleted(&message_id, tx.as_mut()).await?;
        if !deleted {
            return Err(error::SystemError::not_found("Message not found"));
        }

        tx.commit().await?;

        self.events.publish(
            ChatEvent::MessageDeleted { conversation_id: message.conversation_id, message_id },
            Audience::Group { conversation_id: message.conversation_id, exclude_user: None },
        );

        Ok(())
    }

    pub async fn mark_delivered(
        &self,
        message_ids: &[Uuid],
        user_id: Uuid,
    ) -> Result<Vec<Uuid>, error::SystemError> {
        self.mark_messages(message_ids, user_id, DeliveryStatus::Delivered).await
    }

    pub async fn mark_read(
        &self,
        message_ids: &[Uuid],
        user_id: Uuid,
    ) -> Result<Vec<Uuid>, error::SystemError> {
        self.mark_messages(message_ids, user_id, DeliveryStatus::Read).await
    }

    /// Batch upsert of delivery rows. Ids that exist but are not markable
    /// by this user (own messages, left conversations, deleted messages)
    /// are skipped silently so retries stay idempotent. After commit the
    /// sender of each touched message is told its recomputed status.
    async fn mark_messages(
        &self,
        message_ids: &[Uuid],
        user_id: Uuid,
        target: DeliveryStatus,
    ) -> Result<Vec<Uuid>, error::SystemError> {
        if message_ids.is_empty() {
            return Err(error::SystemError::invalid_parameters(
                "At least one message id is required",
            ));
        }

        let mut tx = self.message_repo.get_pool().begin().await?;

        let messages = self.message_repo.find_by_ids(message_ids, tx.as_mut()).await?;
        if messages.is_empty() {
            return Err(error::SystemError::not_found("No matching messages found"));
        }

        let conversation_ids: Vec<Uuid> = messages
            .iter()
            .map(|m| m.conversation_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let memberships = self
            .participant_repo
            .active_memberships(&user_id, &conversation_ids, tx.as_mut())
            .await?;

        let eligible: Vec<MessageEntity> = messages
            .into_iter()
            .filter(|m| {
                memberships.contains(&m.conversation_id)
                    && m.sender_id != Some(user_id)
                    && !m.is_deleted
            })
            .collect();

        for message in &eligible {
            match target {
                DeliveryStatus::Read => {
                    self.delivery_repo.mark_read(&message.id, &user_id, tx.as_mut()).await?
                }
                _ => {
                    self.delivery_repo.mark_delivered(&message.id, &user_id, tx.as_mut()).await?
                }
            }
        }

        if target == DeliveryStatus::Read {
            for (conversation_id, message_id) in latest_per_conversation(&eligible) {
                self.participant_repo
                    .set_last_read(&conversation_id, &user_id, &message_id, tx.as_mut())
                    .await?;
            }
        }

        tx.commit().await?;

        for message in &eligible {
            let Some(sender_id) = message.sender_id else { continue };
            match self.aggregate_for(message).await {
                Ok(status) => self.events.publish(
                    ChatEvent::DeliveryUpdated {
                        conversation_id: message.conversation_id,
                        message_id: message.id,
                        status,
                    },
                    Audience::User(sender_id),
                ),
                Err(e) => tracing::warn!(
                    "Failed to recompute delivery status for message {}: {}",
                    message.id,
                    e
                ),
            }
        }

        Ok(eligible.into_iter().map(|m| m.id).collect())
    }

    pub async fn all_recipients_at_least(
        &self,
        message_id: Uuid,
        required: DeliveryStatus,
    ) -> Result<bool, error::SystemError> {
        let pool = self.message_repo.get_pool();

        let message = self
            .message_repo
            .find_by_id(&message_id, pool)
            .await?
            .ok_or_else(|| error::SystemError::not_found("Message not found"))?;

        let recipients = self.recipients_of(&message).await?;
        let rows = self.delivery_repo.find_by_message(&message_id, pool).await?;

        Ok(recipients_at_least(&recipients, &rows, required))
    }

    /// Reconnect recovery feed: everything still at Sent for this user
    /// across their active conversations, oldest first.
    pub async fn undelivered_message_ids(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Uuid>, error::SystemError> {
        self.message_repo.undelivered_ids(&user_id, self.message_repo.get_pool()).await
    }

    /// Sender-facing read: one message with its computed rollup.
    pub async fn get_message_view(
        &self,
        message_id: Uuid,
        user_id: Uuid,
    ) -> Result<MessageView, error::SystemError> {
        let pool = self.message_repo.get_pool();

        let mut message = self
            .message_repo
            .find_by_id(&message_id, pool)
            .await?
            .ok_or_else(|| error::SystemError::not_found("Message not found"))?;

        if !self
            .participant_repo
            .is_active_participant(&message.conversation_id, &user_id, pool)
            .await?
        {
            return Err(error::SystemError::forbidden(
                "You are not a participant of this conversation",
            ));
        }

        let delivery_status = self.aggregate_for(&message).await?;

        if message.is_deleted {
            message.content.clear();
        }

        Ok(MessageView { message, delivery_status })
    }

    async fn aggregate_for(
        &self,
        message: &MessageEntity,
    ) -> Result<DeliveryStatus, error::SystemError> {
        let recipients = self.recipients_of(message).await?;
        let rows = self
            .delivery_repo
            .find_by_message(&message.id, self.message_repo.get_pool())
            .await?;

        Ok(aggregate_delivery_status(&recipients, &rows))
    }

    /// Current active participants minus the sender.
    async fn recipients_of(
        &self,
        message: &MessageEntity,
    ) -> Result<HashSet<Uuid>, error::SystemError> {
        let ids = self
            .participant_repo
            .active_user_ids(&message.conversation_id, self.message_repo.get_pool())
            .await?;

        Ok(ids.into_iter().filter(|id| Some(*id) != message.sender_id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(user_id: Uuid, status: DeliveryStatus) -> MessageDeliveryEntity {
        MessageDeliveryEntity {
            message_id: Uuid::now_v7(),
            user_id,
            status,
            delivered_at: None,
            read_at: None,
        }
    }

    fn message(conversation_id: Uuid, sent_at: chrono::DateTime<chrono::Utc>) -> MessageEntity {
        MessageEntity {
            id: Uuid::now_v7(),
            conversation_id,
            sender_id: Some(Uuid::now_v7()),
            reply_to_id: None,
            _type: MessageType::Text,
            content: "hello".to_string(),
            sent_at,
            edited_at: None,
            is_deleted: false,
        }
    }

    #[test]
    fn test_aggregate_zero_recipients_is_delivered() {
        let status = aggregate_delivery_status(&HashSet::new(), &[]);
        assert_eq!(status, DeliveryStatus::Delivered);
    }

    #[test]
    fn test_aggregate_missing_rows_is_sent() {
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        let recipients: HashSet<Uuid> = [a, b].into_iter().collect();

        let status = aggregate_delivery_status(&recipients, &[row(a, DeliveryStatus::Read)]);
        assert_eq!(status, DeliveryStatus::Sent);
    }

    #[test]
    fn test_aggregate_mixed_read_and_delivered_is_delivered() {
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        let c = Uuid::now_v7();
        let recipients: HashSet<Uuid> = [a, b, c].into_iter().collect();

        let rows = vec![
            row(a, DeliveryStatus::Delivered),
            row(b, DeliveryStatus::Delivered),
            row(c, DeliveryStatus::Read),
        ];
        assert_eq!(aggregate_delivery_status(&recipients, &rows), DeliveryStatus::Delivered);
    }

    #[test]
    fn test_aggregate_all_read_is_read() {
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        let recipients: HashSet<Uuid> = [a, b].into_iter().collect();

        let rows = vec![row(a, DeliveryStatus::Read), row(b, DeliveryStatus::Read)];
        assert_eq!(aggregate_delivery_status(&recipients, &rows), DeliveryStatus::Read);
    }

    #[test]
    fn test_aggregate_any_sent_row_keeps_sent() {
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        let recipients: HashSet<Uuid> = [a, b].into_iter().collect();

        let rows = vec![row(a, DeliveryStatus::Sent), row(b, DeliveryStatus::Read)];
        assert_eq!(aggregate_delivery_status(&recipients, &rows), DeliveryStatus::Sent);
    }

    #[test]
    fn test_aggregate_ignores_rows_of_removed_participants() {
        let a = Uuid::now_v7();
        let gone = Uuid::now_v7();
        let recipients: HashSet<Uuid> = [a].into_iter().collect();

        let rows = vec![row(a, DeliveryStatus::Read), row(gone, DeliveryStatus::Sent)];
        assert_eq!(aggregate_delivery_status(&recipients, &rows), DeliveryStatus::Read);
    }

    #[test]
    fn test_recipients_at_least_missing_row_fails() {
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        let recipients: HashSet<Uuid> = [a, b].into_iter().collect();

        let rows = vec![row(a, DeliveryStatus::Delivered)];
        assert!(!recipients_at_least(&recipients, &rows, DeliveryStatus::Delivered));
        assert!(recipients_at_least(&HashSet::new(), &rows, DeliveryStatus::Read));
    }

    #[test]
    fn test_recipients_at_least_read_counts_as_delivered() {
        let a = Uuid::now_v7();
        let recipients: HashSet<Uuid> = [a].into_iter().collect();

        let rows = vec![row(a, DeliveryStatus::Read)];
        assert!(recipients_at_least(&recipients, &rows, DeliveryStatus::Delivered));
        assert!(recipients_at_least(&recipients, &rows, DeliveryStatus::Read));
    }

    #[test]
    fn test_latest_per_conversation_picks_max_sent_at() {
        let conversation = Uuid::now_v7();
        let other = Uuid::now_v7();
        let base = chrono::Utc::now();

        let older = message(conversation, base);
        let newer = message(conversation, base + chrono::Duration::seconds(5));
        let lone = message(other, base);

        // Input order deliberately newest-first.
        let latest =
            latest_per_conversation(&[newer.clone(), older.clone(), lone.clone()]);

        assert_eq!(latest.len(), 2);
        assert_eq!(latest[&conversation], newer.id);
        assert_eq!(latest[&other], lone.id);
    }
}
