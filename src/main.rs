// src/main.rs
use actix_web::{middleware, web, App, HttpServer};
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::io;
use std::sync::Arc;

use alx_travel_app::config::AppConfig;
use alx_travel_app::db::{PgStore, Store};
use alx_travel_app::gateway::ChapaClient;
use alx_travel_app::notifications::{LogMailer, Mailer, NotificationWorker, SmtpMailer};
use alx_travel_app::queue::{self, ChannelQueue, JobQueue, RabbitQueue};
use alx_travel_app::{api, AppState};

fn startup_error(context: &str, e: impl std::fmt::Display) -> io::Error {
    log::error!("{context}: {e}");
    io::Error::new(io::ErrorKind::Other, format!("{context}: {e}"))
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::from_env().map_err(|e| startup_error("invalid configuration", e))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .map_err(|e| startup_error("failed to connect to database", e))?;

    sqlx::migrate!()
        .run(&pool)
        .await
        .map_err(|e| startup_error("failed to run migrations", e))?;

    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));
    let gateway = Arc::new(
        ChapaClient::new(&config.chapa).map_err(|e| startup_error("chapa client", e))?,
    );

    let mailer: Arc<dyn Mailer> = match &config.email.smtp {
        Some(smtp) => Arc::new(
            SmtpMailer::new(smtp, &config.email.from_email, &config.email.from_name)
                .map_err(|e| startup_error("smtp mailer", e))?,
        ),
        None => {
            log::warn!("SMTP_HOST not set, emails will only be logged");
            Arc::new(LogMailer)
        }
    };

    let job_queue: Arc<dyn JobQueue> = match &config.queue.amqp_url {
        Some(url) => {
            let rabbit = Arc::new(
                RabbitQueue::connect(url, &config.queue.queue_name, &config.queue.dead_letter_queue)
                    .await
                    .map_err(|e| startup_error("rabbitmq", e))?,
            );
            let worker = NotificationWorker::new(
                mailer,
                store.clone(),
                rabbit.clone(),
                config.queue.retry.clone(),
                config.email.from_name.clone(),
            );
            rabbit
                .spawn_consumer(worker, 16)
                .await
                .map_err(|e| startup_error("rabbitmq consumer", e))?;
            rabbit
        }
        None => {
            log::warn!("RABBITMQ_URL not set, running notification worker in process");
            let (local, receivers) = ChannelQueue::new();
            let local = Arc::new(local);
            let worker = NotificationWorker::new(
                mailer,
                store.clone(),
                local.clone(),
                config.queue.retry.clone(),
                config.email.from_name.clone(),
            );
            tokio::spawn(queue::run_local_worker(receivers.jobs, worker));
            tokio::spawn(queue::log_dead_letters(receivers.dead));
            local
        }
    };

    let state = web::Data::new(AppState::new(&config, store, gateway, job_queue));

    log::info!("listening on {}:{}", config.bind_addr, config.port);
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(middleware::Logger::default())
            .configure(api::configure)
    })
    .bind((config.bind_addr.as_str(), config.port))?
    .run()
    .await
}
