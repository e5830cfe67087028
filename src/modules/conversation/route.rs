use actix_web::web::{ServiceConfig, scope};

use crate::modules::conversation::handle::*;

pub fn configure(cfg: &mut ServiceConfig) {
    cfg.service(
        scope("/conversations")
            .service(create_conversation)
            .service(get_conversations)
            .service(get_messages)
            .service(get_conversation_title)
            .service(get_typing_users)
            .service(add_participant)
            .service(remove_participant),
    );
}
