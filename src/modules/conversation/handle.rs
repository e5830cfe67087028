use actix_web::{HttpRequest, delete, get, post, web};
use uuid::Uuid;

use crate::{
    api::{error, success},
    constants::DEFAULT_PAGE_SIZE,
    middlewares::get_claims,
    modules::{
        conversation::{
            model::{
                AddParticipantRequest, ConversationDetail, HistoryQuery, NewConversation,
                TitleResponse, TypingUsersResponse,
            },
            schema::{ConversationEntity, ParticipantEntity, ParticipantRole},
        },
        message::model::GetMessagesResponse,
        realtime::dispatcher::ConversationSvc,
    },
    utils::{ValidatedJson, ValidatedQuery},
};

#[post("")]
pub async fn create_conversation(
    conversation_svc: web::Data<ConversationSvc>,
    body: ValidatedJson<NewConversation>,
    req: HttpRequest,
) -> Result<success::Success<ConversationEntity>, error::Error> {
    let user_id = get_claims(&req)?.sub;
    let body = body.0;

    let conversation = conversation_svc
        .create_conversation(user_id, body._type, body.title, body.participant_ids)
        .await?;

    Ok(success::Success::created(Some(conversation)).message("Successfully created conversation"))
}

#[get("")]
pub async fn get_conversations(
    conversation_svc: web::Data<ConversationSvc>,
    req: HttpRequest,
) -> Result<success::Success<Vec<ConversationDetail>>, error::Error> {
    let user_id = get_claims(&req)?.sub;

    let conversations = conversation_svc.get_user_conversations(user_id).await?;

    Ok(success::Success::ok(Some(conversations)).message("Successfully retrieved conversations"))
}

#[get("/{conversation_id}/messages")]
pub async fn get_messages(
    conversation_svc: web::Data<ConversationSvc>,
    conversation_id: web::Path<Uuid>,
    query: ValidatedQuery<HistoryQuery>,
    req: HttpRequest,
) -> Result<success::Success<GetMessagesResponse>, error::Error> {
    let user_id = get_claims(&req)?.sub;
    let limit = query.0.limit.unwrap_or(DEFAULT_PAGE_SIZE);

    let (messages, cursor) =
        conversation_svc.get_messages(*conversation_id, user_id, query.0.before, limit).await?;

    Ok(success::Success::ok(Some(GetMessagesResponse { messages, cursor }))
        .message("Successfully retrieved messages"))
}

#[get("/{conversation_id}/title")]
pub async fn get_conversation_title(
    conversation_svc: web::Data<ConversationSvc>,
    conversation_id: web::Path<Uuid>,
    req: HttpRequest,
) -> Result<success::Success<TitleResponse>, error::Error> {
    let user_id = get_claims(&req)?.sub;

    let title = conversation_svc.get_conversation_title(*conversation_id, user_id).await?;

    Ok(success::Success::ok(Some(TitleResponse { title })))
}

#[get("/{conversation_id}/typing")]
pub async fn get_typing_users(
    conversation_svc: web::Data<ConversationSvc>,
    conversation_id: web::Path<Uuid>,
    req: HttpRequest,
) -> Result<success::Success<TypingUsersResponse>, error::Error> {
    get_claims(&req)?;

    let user_ids = conversation_svc.get_active_typers(*conversation_id).await?;

    Ok(success::Success::ok(Some(TypingUsersResponse { user_ids })))
}

#[post("/{conversation_id}/participants")]
pub async fn add_participant(
    conversation_svc: web::Data<ConversationSvc>,
    conversation_id: web::Path<Uuid>,
    body: ValidatedJson<AddParticipantRequest>,
    req: HttpRequest,
) -> Result<success::Success<ParticipantEntity>, error::Error> {
    get_claims(&req)?;
    let body = body.0;

    let participant = conversation_svc
        .add_participant(
            *conversation_id,
            body.user_id,
            body.role.unwrap_or(ParticipantRole::Member),
        )
        .await?;

    Ok(success::Success::created(Some(participant)).message("Successfully added participant"))
}

#[delete("/{conversation_id}/participants/{user_id}")]
pub async fn remove_participant(
    conversation_svc: web::Data<ConversationSvc>,
    path: web::Path<(Uuid, Uuid)>,
    req: HttpRequest,
) -> Result<success::Success<()>, error::Error> {
    get_claims(&req)?;
    let (conversation_id, user_id) = path.into_inner();

    conversation_svc.remove_participant(conversation_id, user_id).await?;

    Ok(success::Success::no_content())
}
