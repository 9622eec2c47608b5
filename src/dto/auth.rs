use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::User;

#[derive(Deserialize, Debug, ToSchema)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub phone: Option<String>,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct GoogleLoginRequest {
    /// ID token returned by Google Identity Services.
    pub credential: String,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct SendOtpRequest {
    pub phone: String,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct VerifyOtpRequest {
    pub phone: String,
    pub code: String,
    /// Required only when no account exists for the phone yet.
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Self-service profile changes. Admin rights are not editable here.
#[derive(Deserialize, Debug, Default, ToSchema)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub profile_picture: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OtpSentResponse {
    pub phone: String,
    pub expires_in_seconds: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub user: User,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct Claims {
    pub sub: String,
    pub iat: usize,
    pub exp: usize,
}
