use std::{sync::Arc, time::Duration};

use crate::{
    config::AppConfig,
    db::{DbPool, OrmConn, orm_from_pool},
    integrations::{
        GoogleVerifier, OAuthVerifier, PaymentGateway, SmsSender, StripeGateway,
        TracingSmsSender, TwilioSender, UnconfiguredGateway, UnconfiguredVerifier, http_client,
    },
    rate_limit::OtpRateLimiter,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub orm: OrmConn,
    pub config: Arc<AppConfig>,
    pub otp_limiter: Arc<OtpRateLimiter>,
    pub payments: Arc<dyn PaymentGateway>,
    pub oauth: Arc<dyn OAuthVerifier>,
    pub sms: Arc<dyn SmsSender>,
}

impl AppState {
    /// Wire the real collaborators from configuration.
    pub fn from_config(pool: DbPool, config: AppConfig) -> anyhow::Result<Self> {
        let client = http_client()?;

        let payments: Arc<dyn PaymentGateway> = match &config.stripe_secret_key {
            Some(key) => Arc::new(StripeGateway::new(client.clone(), key.clone())),
            None => {
                tracing::warn!("STRIPE_SECRET_KEY not set, card payments are disabled");
                Arc::new(UnconfiguredGateway)
            }
        };
        let oauth: Arc<dyn OAuthVerifier> = match &config.google_client_id {
            Some(client_id) => Arc::new(GoogleVerifier::new(client.clone(), client_id.clone())),
            None => {
                tracing::warn!("GOOGLE_CLIENT_ID not set, google sign-in is disabled");
                Arc::new(UnconfiguredVerifier)
            }
        };
        let sms: Arc<dyn SmsSender> = match &config.twilio {
            Some(twilio) => Arc::new(TwilioSender::new(client, twilio.clone())),
            None => {
                tracing::warn!("twilio not configured, OTP codes are logged instead of sent");
                Arc::new(TracingSmsSender)
            }
        };

        Ok(Self::with_collaborators(pool, config, payments, oauth, sms))
    }

    pub fn with_collaborators(
        pool: DbPool,
        config: AppConfig,
        payments: Arc<dyn PaymentGateway>,
        oauth: Arc<dyn OAuthVerifier>,
        sms: Arc<dyn SmsSender>,
    ) -> Self {
        let otp_limiter = OtpRateLimiter::new(
            config.otp_max_requests,
            Duration::from_secs(config.otp_window_minutes.saturating_mul(60)),
        );
        Self {
            orm: orm_from_pool(&pool),
            pool,
            config: Arc::new(config),
            otp_limiter: Arc::new(otp_limiter),
            payments,
            oauth,
            sms,
        }
    }
}
