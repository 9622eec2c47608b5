use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::{AppError, AppResult};

const STRIPE_API: &str = "https://api.stripe.com/v1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentStatus {
    pub id: String,
    pub status: String,
    /// Amount in minor units (cents).
    pub amount: i64,
    /// Lowercase ISO code, as Stripe reports it.
    pub currency: String,
}

impl IntentStatus {
    pub fn succeeded(&self) -> bool {
        self.status == "succeeded"
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(&self, amount_cents: i64, currency: &str) -> AppResult<PaymentIntent>;

    async fn retrieve_intent(&self, id: &str) -> AppResult<IntentStatus>;
}

#[derive(Deserialize)]
struct StripeIntent {
    id: String,
    client_secret: Option<String>,
    status: String,
    amount: i64,
    currency: String,
}

pub struct StripeGateway {
    client: reqwest::Client,
    secret_key: SecretString,
}

impl StripeGateway {
    pub fn new(client: reqwest::Client, secret_key: SecretString) -> Self {
        Self { client, secret_key }
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_intent(&self, amount_cents: i64, currency: &str) -> AppResult<PaymentIntent> {
        let amount = amount_cents.to_string();
        let params = [
            ("amount", amount.as_str()),
            ("currency", currency),
            ("automatic_payment_methods[enabled]", "true"),
        ];

        let intent: StripeIntent = self
            .client
            .post(format!("{STRIPE_API}/payment_intents"))
            .bearer_auth(self.secret_key.expose_secret())
            .form(&params)
            .send()
            .await
            .map_err(AppError::upstream)?
            .error_for_status()
            .map_err(AppError::upstream)?
            .json()
            .await
            .map_err(AppError::upstream)?;

        let client_secret = intent
            .client_secret
            .ok_or_else(|| AppError::upstream(anyhow::anyhow!("intent has no client secret")))?;

        tracing::info!(intent_id = %intent.id, amount_cents, "payment intent created");
        Ok(PaymentIntent {
            id: intent.id,
            client_secret,
        })
    }

    async fn retrieve_intent(&self, id: &str) -> AppResult<IntentStatus> {
        let intent: StripeIntent = self
            .client
            .get(format!("{STRIPE_API}/payment_intents/{id}"))
            .bearer_auth(self.secret_key.expose_secret())
            .send()
            .await
            .map_err(AppError::upstream)?
            .error_for_status()
            .map_err(AppError::upstream)?
            .json()
            .await
            .map_err(AppError::upstream)?;

        Ok(IntentStatus {
            id: intent.id,
            status: intent.status,
            amount: intent.amount,
            currency: intent.currency,
        })
    }
}

/// Stand-in used when no Stripe key is configured. Every call fails.
pub struct UnconfiguredGateway;

#[async_trait]
impl PaymentGateway for UnconfiguredGateway {
    async fn create_intent(&self, _amount_cents: i64, _currency: &str) -> AppResult<PaymentIntent> {
        Err(AppError::upstream(anyhow::anyhow!(
            "STRIPE_SECRET_KEY is not configured"
        )))
    }

    async fn retrieve_intent(&self, _id: &str) -> AppResult<IntentStatus> {
        Err(AppError::upstream(anyhow::anyhow!(
            "STRIPE_SECRET_KEY is not configured"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_gateway_reports_upstream_failure() {
        let err = UnconfiguredGateway.create_intent(1897, "usd").await.unwrap_err();
        assert!(matches!(err, AppError::Upstream(_)));
    }

    #[test]
    fn only_succeeded_counts_as_paid() {
        let mut status = IntentStatus {
            id: "pi_1".into(),
            status: "processing".into(),
            amount: 1897,
            currency: "usd".into(),
        };
        assert!(!status.succeeded());
        status.status = "succeeded".into();
        assert!(status.succeeded());
    }
}
