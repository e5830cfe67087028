use actix_web::web::{ServiceConfig, scope};

use crate::modules::message::handle::*;

pub fn configure(cfg: &mut ServiceConfig) {
    cfg.service(
        scope("/messages")
            .service(send_message)
            .service(mark_read)
            .service(mark_delivered)
            .service(get_message)
            .service(edit_message)
            .service(delete_message),
    );
}
