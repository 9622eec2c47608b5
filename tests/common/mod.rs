#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use organic_biscuits_api::{
    config::AppConfig,
    db::{create_pool, run_migrations},
    entity::{products::ActiveModel as ProductActive, users::ActiveModel as UserActive},
    error::{AppError, AppResult},
    integrations::{GoogleProfile, IntentStatus, OAuthVerifier, PaymentGateway, PaymentIntent, SmsSender},
    middleware::auth::AuthUser,
    slug::slugify,
    state::AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ActiveValue::NotSet, Set};
use secrecy::SecretString;
use uuid::Uuid;

/// Gateway whose intents report the status and amount the test configures.
#[derive(Default)]
pub struct FakeGateway {
    pub intent: Mutex<Option<IntentStatus>>,
    pub created: Mutex<Vec<i64>>,
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_intent(&self, amount_cents: i64, _currency: &str) -> AppResult<PaymentIntent> {
        self.created.lock().unwrap().push(amount_cents);
        let id = format!("pi_test_{}", Uuid::new_v4().simple());
        Ok(PaymentIntent {
            client_secret: format!("{id}_secret"),
            id,
        })
    }

    async fn retrieve_intent(&self, id: &str) -> AppResult<IntentStatus> {
        self.intent
            .lock()
            .unwrap()
            .clone()
            .filter(|intent| intent.id == id)
            .ok_or_else(|| AppError::upstream(anyhow::anyhow!("unknown intent {id}")))
    }
}

pub struct FakeVerifier;

#[async_trait]
impl OAuthVerifier for FakeVerifier {
    async fn verify(&self, id_token: &str) -> AppResult<GoogleProfile> {
        if id_token == "bad" {
            return Err(AppError::Unauthenticated);
        }
        Ok(GoogleProfile {
            email: format!("{id_token}@gmail.example"),
            name: "Google User".into(),
            picture: None,
        })
    }
}

/// Keeps every message so tests can read the code back.
#[derive(Default)]
pub struct RecordingSms {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl RecordingSms {
    pub fn last_code_for(&self, phone: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(to, _)| to == phone)
            .and_then(|(_, body)| {
                body.split_whitespace()
                    .map(|w| w.trim_end_matches('.'))
                    .find(|w| w.len() == 6 && w.chars().all(|c| c.is_ascii_digit()))
                    .map(str::to_string)
            })
    }
}

#[async_trait]
impl SmsSender for RecordingSms {
    async fn send(&self, to: &str, body: &str) -> AppResult<()> {
        self.sent.lock().unwrap().push((to.to_string(), body.to_string()));
        Ok(())
    }
}

pub struct TestApp {
    pub state: AppState,
    pub payments: Arc<FakeGateway>,
    pub sms: Arc<RecordingSms>,
}

/// Returns `None` when no database is configured so the test can skip.
pub async fn setup() -> anyhow::Result<Option<TestApp>> {
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration tests.");
            return Ok(None);
        }
    };

    let pool = create_pool(&database_url).await?;
    run_migrations(&pool).await?;

    let config = AppConfig {
        database_url,
        host: "127.0.0.1".into(),
        port: 0,
        environment: "test".into(),
        frontend_url: "http://localhost:5173".into(),
        jwt_secret: SecretString::from("test-secret"),
        stripe_secret_key: None,
        google_client_id: None,
        twilio: None,
        otp_max_requests: 3,
        otp_window_minutes: 15,
    };

    let payments = Arc::new(FakeGateway::default());
    let sms = Arc::new(RecordingSms::default());
    let state = AppState::with_collaborators(
        pool,
        config,
        payments.clone(),
        Arc::new(FakeVerifier),
        sms.clone(),
    );

    Ok(Some(TestApp { state, payments, sms }))
}

pub fn unique_email(prefix: &str) -> String {
    format!("{prefix}-{}@example.com", Uuid::new_v4().simple())
}

/// A random, valid phone number with a `+1` prefix.
pub fn unique_phone() -> String {
    let digits = Uuid::new_v4().as_u128() % 10_000_000_000;
    format!("+1{digits:010}")
}

pub async fn create_user(state: &AppState, is_admin: bool) -> anyhow::Result<AuthUser> {
    let user = UserActive {
        id: Set(Uuid::new_v4()),
        name: Set(if is_admin { "Admin" } else { "Customer" }.into()),
        email: Set(unique_email(if is_admin { "admin" } else { "customer" })),
        password_hash: Set(None),
        phone: Set(None),
        is_admin: Set(is_admin),
        profile_picture: Set(None),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(AuthUser::from(user))
}

pub async fn create_product(
    state: &AppState,
    name: &str,
    price: &str,
    stock: i32,
) -> anyhow::Result<Uuid> {
    let name = format!("{name} {}", &Uuid::new_v4().simple().to_string()[..8]);
    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        slug: Set(slugify(&name)),
        name: Set(name),
        description: Set(Some("Baked for tests".into())),
        price: Set(price.parse::<Decimal>()?),
        original_price: Set(None),
        stock: Set(stock),
        categories: Set(vec!["cookies".into()]),
        image: Set(None),
        images: Set(Vec::new()),
        is_featured: Set(false),
        ingredients: Set(None),
        nutritional_info: Set(None),
        weight: Set(None),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(product.id)
}

pub fn dec(value: &str) -> Decimal {
    value.parse().unwrap()
}
