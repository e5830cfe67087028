use actix::Actor;
use actix_cors::Cors;
use actix_web::{
    self, App, HttpServer,
    middleware::{Logger, from_fn},
    web,
};
use std::sync::{Arc, LazyLock};

use crate::{
    configs::{connect_database, connect_redis},
    middlewares::authentication,
    modules::{
        conversation::{
            repository_pg::{
                ConversationRepositoryPg, ParticipantRepositoryPg, TypingRepositoryPg,
            },
            service::ConversationService,
        },
        message::{
            repository_pg::{DeliveryRepositoryPg, MessageRepositoryPg},
            service::MessageService,
        },
        realtime::{
            dispatcher::{Dispatcher, RegistrySink},
            presence::PresenceService,
            registry::ConnectionRegistry,
        },
        user::repository_pg::UserDirectoryPg,
        websocket::handler::websocket_handler,
    },
};

mod api;
mod configs;
mod constants;
mod middlewares;
mod modules;
mod utils;

pub static ENV: LazyLock<constants::Env> = LazyLock::new(|| {
    dotenvy::dotenv().ok();
    env_logger::init();
    log::info!("Environment variables loaded from .env file");
    constants::Env::default()
});

#[actix_web::get("/")]
async fn health_check() -> &'static str {
    "Server is running"
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let db_pool =
        connect_database().await.map_err(|_| std::io::Error::other("Database connection error"))?;

    let redis_pool =
        connect_redis().await.map_err(|_| std::io::Error::other("Redis connection error"))?;

    let presence = Arc::new(PresenceService::new(redis_pool));

    // one registry for the whole server, sessions talk to it by address
    let registry = ConnectionRegistry::new().start();
    let events = Arc::new(RegistrySink::new(registry.clone()));

    let conversation_repo = Arc::new(ConversationRepositoryPg::new(db_pool.clone()));
    let participant_repo = Arc::new(ParticipantRepositoryPg::default());
    let typing_repo = Arc::new(TypingRepositoryPg::default());
    let message_repo = Arc::new(MessageRepositoryPg::new(db_pool.clone()));
    let delivery_repo = Arc::new(DeliveryRepositoryPg::default());
    let users = Arc::new(UserDirectoryPg::new());

    let conversation_service = ConversationService::with_dependencies(
        conversation_repo.clone(),
        participant_repo.clone(),
        typing_repo,
        message_repo.clone(),
        users,
        presence.clone(),
        events.clone(),
    );
    let message_service = MessageService::with_dependencies(
        message_repo,
        delivery_repo,
        conversation_repo,
        participant_repo,
        events,
    );

    let dispatcher = Dispatcher::new(
        registry,
        presence,
        conversation_service.clone(),
        message_service.clone(),
    );

    println!("Starting server at http://{}:{}", ENV.ip.as_str(), ENV.port);
    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(ENV.frontend_url.as_str())
            .allow_any_method()
            .allow_any_header()
            .supports_credentials();

        App::new()
            .wrap(Logger::default())
            .wrap(cors)
            .app_data(web::Data::new(conversation_service.clone()))
            .app_data(web::Data::new(message_service.clone()))
            .app_data(web::Data::new(dispatcher.clone()))
            .service(health_check)
            // upgrade carries its own token, so it stays outside the auth scope
            .route("/ws", web::get().to(websocket_handler))
            .service(
                web::scope("/api/v1")
                    .wrap(from_fn(authentication))
                    .configure(modules::conversation::route::configure)
                    .configure(modules::message::route::configure),
            )
    })
    .bind((ENV.ip.as_str(), ENV.port))?
    .workers(2)
    .run()
    .await
}
