#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::collections::HashMap;
use std::env;
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use tokio::sync::{Mutex, MutexGuard};

use alx_travel_app::config::AppConfig;
use alx_travel_app::db::{MemoryStore, NewUser, Store};
use alx_travel_app::gateway::{
    CheckoutRequest, CheckoutSession, GatewayError, GatewayStatus, PaymentGateway, Verification,
};
use alx_travel_app::models::{Listing, ListingInput, User};
use alx_travel_app::notifications::{JobEnvelope, NotificationJob};
use alx_travel_app::queue::{ChannelQueue, ChannelReceivers};
use alx_travel_app::AppState;

fn split_db_url(url: &str) -> Result<(String, String), String> {
    let (base, query) = match url.split_once('?') {
        Some((base, query)) => (base.to_string(), Some(query)),
        None => (url.to_string(), None),
    };

    let db_start = base
        .rfind('/')
        .ok_or_else(|| "invalid database url".to_string())?;
    if db_start + 1 >= base.len() {
        return Err("database name is empty".to_string());
    }

    let db_name = base[db_start + 1..].to_string();
    let mut admin_url = format!("{}postgres", &base[..db_start + 1]);
    if let Some(query) = query {
        admin_url = format!("{admin_url}?{query}");
    }

    Ok((admin_url, db_name))
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

static TEST_DB_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub struct TestDb {
    pub pool: PgPool,
    _guard: MutexGuard<'static, ()>,
}

/// Recreates the database named by `TEST_DATABASE_URL` and runs migrations.
/// Returns `None` when the variable is not set, so PostgreSQL tests skip.
pub async fn init_test_db() -> Option<TestDb> {
    dotenvy::dotenv().ok();
    let Ok(test_url) = env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping postgres test");
        return None;
    };
    let (admin_url, db_name) = split_db_url(&test_url).expect("invalid TEST_DATABASE_URL format");

    let lock = TEST_DB_LOCK.get_or_init(|| Mutex::new(()));
    let guard = lock.lock().await;

    let admin_pool = PgPool::connect(&admin_url).await.expect("connect admin db");

    let quoted_name = quote_identifier(&db_name);
    let drop_sql = format!("DROP DATABASE IF EXISTS {quoted_name} WITH (FORCE)");
    let create_sql = format!("CREATE DATABASE {quoted_name}");

    sqlx::query(&drop_sql)
        .execute(&admin_pool)
        .await
        .expect("drop test db");
    sqlx::query(&create_sql)
        .execute(&admin_pool)
        .await
        .expect("create test db");
    admin_pool.close().await;

    let pool = PgPool::connect(&test_url).await.expect("connect test db");
    sqlx::migrate!().run(&pool).await.expect("migrations");
    Some(TestDb {
        pool,
        _guard: guard,
    })
}

pub fn test_config(extra: &[(&str, &str)]) -> AppConfig {
    let mut vars: HashMap<String, String> = [
        ("DATABASE_URL", "postgres://localhost/alx_test"),
        ("JWT_SECRET", "test-jwt-secret"),
        ("CHAPA_SECRET_KEY", "CHASECK_TEST-key"),
        ("CALLBACK_BASE_URL", "http://localhost:8000"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (k, v) in extra {
        vars.insert(k.to_string(), v.to_string());
    }
    AppConfig::from_lookup(|key| vars.get(key).cloned()).expect("test config")
}

#[derive(Default)]
struct FakeGatewayState {
    verify_status: Option<GatewayStatus>,
    verify_amount: Option<Decimal>,
    verify_currency: Option<String>,
    fail_checkout: bool,
    checkout_calls: usize,
    verify_calls: usize,
    last_checkout: Option<CheckoutRequest>,
}

/// Scripted gateway. Checkout succeeds unless told otherwise; verification
/// reports `Pending` until a status is set.
#[derive(Default)]
pub struct FakeGateway {
    state: StdMutex<FakeGatewayState>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_verify_status(&self, status: GatewayStatus) {
        self.state.lock().unwrap().verify_status = Some(status);
    }

    pub fn set_verify_amount(&self, amount: Decimal) {
        self.state.lock().unwrap().verify_amount = Some(amount);
    }

    pub fn set_verify_currency(&self, currency: &str) {
        self.state.lock().unwrap().verify_currency = Some(currency.to_string());
    }

    pub fn fail_checkout(&self) {
        self.state.lock().unwrap().fail_checkout = true;
    }

    pub fn checkout_calls(&self) -> usize {
        self.state.lock().unwrap().checkout_calls
    }

    pub fn verify_calls(&self) -> usize {
        self.state.lock().unwrap().verify_calls
    }

    pub fn last_checkout(&self) -> Option<CheckoutRequest> {
        self.state.lock().unwrap().last_checkout.clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout(&self, req: &CheckoutRequest) -> Result<CheckoutSession, GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.checkout_calls += 1;
        state.last_checkout = Some(req.clone());
        if state.fail_checkout {
            return Err(GatewayError::Rejected("checkout unavailable".to_string()));
        }
        Ok(CheckoutSession {
            checkout_url: format!("https://checkout.chapa.co/checkout/payment/{}", req.tx_ref),
            reference: req.tx_ref.clone(),
        })
    }

    async fn verify(&self, tx_ref: &str) -> Result<Verification, GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.verify_calls += 1;
        Ok(Verification {
            status: state.verify_status.unwrap_or(GatewayStatus::Pending),
            reference: Some(format!("CH-{tx_ref}")),
            method: Some("telebirr".to_string()),
            amount: state.verify_amount,
            currency: Some(
                state
                    .verify_currency
                    .clone()
                    .unwrap_or_else(|| "ETB".to_string()),
            ),
        })
    }
}

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<FakeGateway>,
    pub queue: ChannelReceivers,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config(&[]))
    }

    pub fn with_config(config: AppConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let (queue, receivers) = ChannelQueue::new();
        let state = AppState::new(&config, store.clone(), gateway.clone(), Arc::new(queue));
        Self {
            state,
            store,
            gateway,
            queue: receivers,
        }
    }

    /// Jobs enqueued so far, without waiting.
    pub fn drain_jobs(&mut self) -> Vec<JobEnvelope> {
        let mut jobs = Vec::new();
        while let Ok(job) = self.queue.jobs.try_recv() {
            jobs.push(job);
        }
        jobs
    }

    pub async fn user(&self, name: &str) -> User {
        self.store
            .create_user(NewUser {
                username: name.to_string(),
                email: format!("{name}@example.com"),
                password_hash: "not-a-real-hash".to_string(),
                first_name: Some(name.to_string()),
            })
            .await
            .expect("create user")
    }

    pub async fn listing(&self, host: &User, price: Decimal) -> Listing {
        self.store
            .create_listing(
                host.id,
                &ListingInput {
                    title: "Sunny Loft".to_string(),
                    description: "Two rooms near the park".to_string(),
                    location: "New York".to_string(),
                    price_per_night: price,
                    amenities: vec!["wifi".to_string()],
                    is_available: true,
                },
            )
            .await
            .expect("create listing")
    }
}

pub fn kinds(jobs: &[JobEnvelope]) -> Vec<&'static str> {
    jobs.iter().map(|j| j.job.kind()).collect()
}

pub fn is_payment_confirmation(job: &JobEnvelope) -> bool {
    matches!(job.job, NotificationJob::PaymentConfirmation(_))
}
