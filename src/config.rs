use std::env;

use secrecy::SecretString;

#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: SecretString,
    pub from_number: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub frontend_url: String,
    pub jwt_secret: SecretString,
    pub stripe_secret_key: Option<SecretString>,
    pub google_client_id: Option<String>,
    pub twilio: Option<TwilioConfig>,
    pub otp_max_requests: u32,
    pub otp_window_minutes: u64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| anyhow::anyhow!("JWT_SECRET is not set"))?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);
        let environment = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let frontend_url =
            env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:5173".to_string());

        let twilio = match (
            env_opt("TWILIO_ACCOUNT_SID"),
            env_opt("TWILIO_AUTH_TOKEN"),
            env_opt("TWILIO_FROM_NUMBER"),
        ) {
            (Some(account_sid), Some(auth_token), Some(from_number)) => Some(TwilioConfig {
                account_sid,
                auth_token: SecretString::from(auth_token),
                from_number,
            }),
            _ => None,
        };

        let otp_max_requests = env_opt("OTP_MAX_REQUESTS")
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(3);
        let otp_window_minutes = env_opt("OTP_WINDOW_MINUTES")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(15);

        Ok(Self {
            database_url,
            host,
            port,
            environment,
            frontend_url,
            jwt_secret: SecretString::from(jwt_secret),
            stripe_secret_key: env_opt("STRIPE_SECRET_KEY").map(SecretString::from),
            google_client_id: env_opt("GOOGLE_CLIENT_ID"),
            twilio,
            otp_max_requests,
            otp_window_minutes,
        })
    }

    /// Session cookies get the `Secure` attribute only in production.
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}
