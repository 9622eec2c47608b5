//! Stateless session credentials: a signed JWT carried in an HTTP-only cookie.

use axum::http::{HeaderMap, header};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

use crate::{
    dto::auth::Claims,
    error::{AppError, AppResult},
};

pub const SESSION_COOKIE: &str = "auth_token";
pub const SESSION_TTL_DAYS: i64 = 7;

pub fn issue_token(secret: &SecretString, user_id: Uuid, now: DateTime<Utc>) -> AppResult<String> {
    let expiration = now
        .checked_add_signed(Duration::days(SESSION_TTL_DAYS))
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to set expiration")))?;

    let claims = Claims {
        sub: user_id.to_string(),
        iat: now.timestamp() as usize,
        exp: expiration.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.expose_secret().as_bytes()),
    )
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))
}

/// Signature and expiry check. Returns the user id the token was issued for.
pub fn verify_token(secret: &SecretString, token: &str) -> Option<Uuid> {
    let decoded = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.expose_secret().as_bytes()),
        &Validation::default(),
    )
    .ok()?;
    Uuid::parse_str(&decoded.claims.sub).ok()
}

pub fn session_cookie(token: &str, secure: bool) -> String {
    let max_age = Duration::days(SESSION_TTL_DAYS).num_seconds();
    let mut cookie =
        format!("{SESSION_COOKIE}={token}; HttpOnly; Path=/; Max-Age={max_age}; SameSite=Lax");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub fn clear_session_cookie(secure: bool) -> String {
    let mut cookie = format!("{SESSION_COOKIE}=; HttpOnly; Path=/; Max-Age=0; SameSite=Lax");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Session token from the `auth_token` cookie, falling back to a bearer header.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string());

    from_cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn secret() -> SecretString {
        SecretString::from("test-secret".to_string())
    }

    #[test]
    fn fresh_token_resolves_to_user() {
        let user_id = Uuid::new_v4();
        let token = issue_token(&secret(), user_id, Utc::now()).expect("token");
        assert_eq!(verify_token(&secret(), &token), Some(user_id));
    }

    #[test]
    fn expired_token_is_rejected() {
        let issued = Utc::now() - Duration::days(SESSION_TTL_DAYS + 1);
        let token = issue_token(&secret(), Uuid::new_v4(), issued).expect("token");
        assert_eq!(verify_token(&secret(), &token), None);
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let other = SecretString::from("another-secret".to_string());
        let token = issue_token(&other, Uuid::new_v4(), Utc::now()).expect("token");
        assert_eq!(verify_token(&secret(), &token), None);
        assert_eq!(verify_token(&secret(), "not-a-jwt"), None);
    }

    #[test]
    fn cookie_attributes() {
        let cookie = session_cookie("abc", false);
        assert!(cookie.starts_with("auth_token=abc;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Max-Age=604800"));
        assert!(!cookie.contains("Secure"));

        assert!(session_cookie("abc", true).ends_with("; Secure"));
        assert!(clear_session_cookie(false).contains("Max-Age=0"));
    }

    #[test]
    fn token_is_read_from_cookie_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; auth_token=tok123; lang=en"),
        );
        assert_eq!(token_from_headers(&headers).as_deref(), Some("tok123"));
    }

    #[test]
    fn bearer_header_is_a_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tok456"));
        assert_eq!(token_from_headers(&headers).as_deref(), Some("tok456"));

        headers.insert(header::COOKIE, HeaderValue::from_static("auth_token=fromcookie"));
        assert_eq!(token_from_headers(&headers).as_deref(), Some("fromcookie"));
    }

    #[test]
    fn missing_credential_yields_none() {
        let mut headers = HeaderMap::new();
        assert_eq!(token_from_headers(&headers), None);

        headers.insert(header::COOKIE, HeaderValue::from_static("auth_token="));
        assert_eq!(token_from_headers(&headers), None);
    }
}
