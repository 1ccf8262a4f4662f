pub mod api;
pub mod booking;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod notifications;
pub mod payment;
pub mod queue;

use std::sync::Arc;

use api::auth::JwtKeys;
use booking::BookingManager;
use config::AppConfig;
use db::Store;
use gateway::PaymentGateway;
use notifications::Notifier;
use payment::PaymentManager;
use queue::JobQueue;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub bookings: BookingManager,
    pub payments: PaymentManager,
    pub jwt: JwtKeys,
    pub webhook_secret: Option<String>,
}

impl AppState {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        let notifier = Notifier::new(queue);
        Self {
            bookings: BookingManager::new(
                store.clone(),
                notifier.clone(),
                config.booking.clone(),
                config.payments.currency.clone(),
            ),
            payments: PaymentManager::new(
                store.clone(),
                gateway,
                notifier,
                config.payments.clone(),
            ),
            jwt: JwtKeys::new(config.jwt_secret.clone(), config.jwt_ttl_days),
            webhook_secret: config.chapa.webhook_secret.clone(),
            store,
        }
    }
}
