use actix_web::{HttpRequest, delete, get, patch, post, web};
use uuid::Uuid;

use crate::{
    api::{error, success},
    middlewares::get_claims,
    modules::{
        message::{
            model::{EditMessageRequest, MarkMessagesRequest, MarkedResponse, MessageView,
                SendMessageRequest},
            schema::MessageEntity,
        },
        realtime::dispatcher::MessageSvc,
    },
    utils::ValidatedJson,
};

#[post("")]
pub async fn send_message(
    message_svc: web::Data<MessageSvc>,
    body: ValidatedJson<SendMessageRequest>,
    req: HttpRequest,
) -> Result<success::Success<MessageEntity>, error::Error> {
    let user_id = get_claims(&req)?.sub;
    let body = body.0;

    let message = message_svc
        .send_message(user_id, body.conversation_id, body.content, body.reply_to_id)
        .await?;

    Ok(success::Success::created(Some(message)).message("Successfully sent message"))
}

#[get("/{message_id}")]
pub async fn get_message(
    message_svc: web::Data<MessageSvc>,
    message_id: web::Path<Uuid>,
    req: HttpRequest,
) -> Result<success::Success<MessageView>, error::Error> {
    let user_id = get_claims(&req)?.sub;

    let view = message_svc.get_message_view(*message_id, user_id).await?;

    Ok(success::Success::ok(Some(view)))
}

#[patch("/{message_id}")]
pub async fn edit_message(
    message_svc: web::Data<MessageSvc>,
    message_id: web::Path<Uuid>,
    body: ValidatedJson<EditMessageRequest>,
    req: HttpRequest,
) -> Result<success::Success<MessageEntity>, error::Error> {
    let user_id = get_claims(&req)?.sub;

    let message = message_svc.edit_message(*message_id, user_id, body.0.content).await?;

    Ok(success::Success::ok(Some(message)).message("Successfully edited message"))
}

#[delete("/{message_id}")]
pub async fn delete_message(
    message_svc: web::Data<MessageSvc>,
    message_id: web::Path<Uuid>,
    req: HttpRequest,
) -> Result<success::Success<()>, error::Error> {
    let user_id = get_claims(&req)?.sub;

    message_svc.delete_message(*message_id, user_id).await?;

    Ok(success::Success::no_content())
}

#[post("/read")]
pub async fn mark_read(
    message_svc: web::Data<MessageSvc>,
    body: ValidatedJson<MarkMessagesRequest>,
    req: HttpRequest,
) -> Result<success::Success<MarkedResponse>, error::Error> {
    let user_id = get_claims(&req)?.sub;

    let message_ids = message_svc.mark_read(&body.0.message_ids, user_id).await?;

    Ok(success::Success::ok(Some(MarkedResponse { message_ids }))
        .message("Successfully marked messages as read"))
}

#[post("/delivered")]
pub async fn mark_delivered(
    message_svc: web::Data<MessageSvc>,
    body: ValidatedJson<MarkMessagesRequest>,
    req: HttpRequest,
) -> Result<success::Success<MarkedResponse>, error::Error> {
    let user_id = get_claims(&req)?.sub;

    let message_ids = message_svc.mark_delivered(&body.0.message_ids, user_id).await?;

    Ok(success::Success::ok(Some(MarkedResponse { message_ids }))
        .message("Successfully marked messages as delivered"))
}
