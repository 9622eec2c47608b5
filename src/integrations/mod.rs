//! Outbound collaborators: card payments, Google sign-in and SMS delivery.
//!
//! Each is a trait so services and tests can swap the HTTP implementation
//! for something local.

use std::time::Duration;

pub mod oauth;
pub mod payments;
pub mod sms;

pub use oauth::{GoogleProfile, GoogleVerifier, OAuthVerifier, UnconfiguredVerifier};
pub use payments::{
    IntentStatus, PaymentGateway, PaymentIntent, StripeGateway, UnconfiguredGateway,
};
pub use sms::{SmsSender, TracingSmsSender, TwilioSender};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

pub fn http_client() -> anyhow::Result<reqwest::Client> {
    let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
    Ok(client)
}
