use async_trait::async_trait;
use secrecy::ExposeSecret;

use crate::{
    config::TwilioConfig,
    error::{AppError, AppResult},
};

#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> AppResult<()>;
}

pub struct TwilioSender {
    client: reqwest::Client,
    config: TwilioConfig,
}

impl TwilioSender {
    pub fn new(client: reqwest::Client, config: TwilioConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl SmsSender for TwilioSender {
    async fn send(&self, to: &str, body: &str) -> AppResult<()> {
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.config.account_sid
        );
        let params = [
            ("To", to),
            ("From", self.config.from_number.as_str()),
            ("Body", body),
        ];

        self.client
            .post(url)
            .basic_auth(
                &self.config.account_sid,
                Some(self.config.auth_token.expose_secret()),
            )
            .form(&params)
            .send()
            .await
            .map_err(AppError::upstream)?
            .error_for_status()
            .map_err(AppError::upstream)?;

        tracing::info!(to, "sms dispatched");
        Ok(())
    }
}

/// Local development sender: the message only goes to the log.
pub struct TracingSmsSender;

#[async_trait]
impl SmsSender for TracingSmsSender {
    async fn send(&self, to: &str, body: &str) -> AppResult<()> {
        tracing::debug!(to, body, "sms (not sent, twilio unconfigured)");
        Ok(())
    }
}
