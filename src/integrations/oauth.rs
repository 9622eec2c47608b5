use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{AppError, AppResult};

const GOOGLE_TOKENINFO: &str = "https://oauth2.googleapis.com/tokeninfo";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleProfile {
    pub email: String,
    pub name: String,
    pub picture: Option<String>,
}

#[async_trait]
pub trait OAuthVerifier: Send + Sync {
    /// Rejected tokens map to `Unauthenticated`, transport failures to `Upstream`.
    async fn verify(&self, id_token: &str) -> AppResult<GoogleProfile>;
}

#[derive(Deserialize)]
struct TokenInfo {
    aud: String,
    email: Option<String>,
    // tokeninfo returns booleans as strings
    email_verified: Option<String>,
    name: Option<String>,
    picture: Option<String>,
}

pub struct GoogleVerifier {
    client: reqwest::Client,
    client_id: String,
}

impl GoogleVerifier {
    pub fn new(client: reqwest::Client, client_id: String) -> Self {
        Self { client, client_id }
    }
}

#[async_trait]
impl OAuthVerifier for GoogleVerifier {
    async fn verify(&self, id_token: &str) -> AppResult<GoogleProfile> {
        let response = self
            .client
            .post(GOOGLE_TOKENINFO)
            .form(&[("id_token", id_token)])
            .send()
            .await
            .map_err(AppError::upstream)?;

        if response.status().is_client_error() {
            tracing::warn!(status = %response.status(), "google rejected id token");
            return Err(AppError::Unauthenticated);
        }

        let info: TokenInfo = response
            .error_for_status()
            .map_err(AppError::upstream)?
            .json()
            .await
            .map_err(AppError::upstream)?;

        profile_from_token_info(info, &self.client_id)
    }
}

fn profile_from_token_info(info: TokenInfo, client_id: &str) -> AppResult<GoogleProfile> {
    if info.aud != client_id {
        tracing::warn!("google id token issued for another client");
        return Err(AppError::Unauthenticated);
    }
    if info.email_verified.as_deref() != Some("true") {
        return Err(AppError::Unauthenticated);
    }
    let email = info.email.ok_or(AppError::Unauthenticated)?;
    let name = info
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());

    Ok(GoogleProfile {
        email,
        name,
        picture: info.picture,
    })
}

/// Used when `GOOGLE_CLIENT_ID` is missing.
pub struct UnconfiguredVerifier;

#[async_trait]
impl OAuthVerifier for UnconfiguredVerifier {
    async fn verify(&self, _id_token: &str) -> AppResult<GoogleProfile> {
        Err(AppError::upstream(anyhow::anyhow!(
            "GOOGLE_CLIENT_ID is not configured"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(aud: &str, verified: &str) -> TokenInfo {
        TokenInfo {
            aud: aud.into(),
            email: Some("jane@example.com".into()),
            email_verified: Some(verified.into()),
            name: None,
            picture: Some("https://example.com/p.png".into()),
        }
    }

    #[test]
    fn accepts_verified_token_for_our_client() {
        let profile = profile_from_token_info(info("client-1", "true"), "client-1").unwrap();
        assert_eq!(profile.email, "jane@example.com");
        assert_eq!(profile.name, "jane");
    }

    #[test]
    fn rejects_foreign_audience_and_unverified_email() {
        assert!(matches!(
            profile_from_token_info(info("other", "true"), "client-1"),
            Err(AppError::Unauthenticated)
        ));
        assert!(matches!(
            profile_from_token_info(info("client-1", "false"), "client-1"),
            Err(AppError::Unauthenticated)
        ));
    }
}
