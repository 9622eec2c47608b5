use argon2::{
    Argon2, PasswordHasher,
    password_hash::{PasswordHash, PasswordVerifier, SaltString},
};
use chrono::{Duration, Utc};
use password_hash::rand_core::OsRng;
use rand::Rng;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, Condition, EntityTrait, QueryFilter, Set,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::auth::{
        GoogleLoginRequest, LoginRequest, OtpSentResponse, RegisterRequest, SendOtpRequest,
        UpdateProfileRequest, VerifyOtpRequest,
    },
    entity::{
        Users,
        users::{ActiveModel as UserActive, Column as UserCol, Model as UserModel},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::User,
    response::{ApiResponse, Meta},
    session::issue_token,
    state::AppState,
    validation::{FieldErrors, is_valid_email, is_valid_phone, normalize_email, normalize_phone},
};

pub const MIN_PASSWORD_LEN: usize = 8;
pub const OTP_TTL_MINUTES: i64 = 10;
pub const OTP_MAX_ATTEMPTS: i32 = 5;

/// A signed-in user together with the session token the route puts in the cookie.
#[derive(Debug)]
pub struct SessionGrant {
    pub user: User,
    pub token: String,
}

pub async fn register_user(state: &AppState, payload: RegisterRequest) -> AppResult<SessionGrant> {
    let RegisterRequest {
        name,
        email,
        password,
        phone,
    } = payload;

    let email = normalize_email(&email);
    let phone = phone.filter(|p| !p.trim().is_empty());

    let mut errors = FieldErrors::new();
    errors
        .require("name", Some(name.as_str()))
        .check("email", is_valid_email(&email))
        .check("password", password.chars().count() >= MIN_PASSWORD_LEN);
    if let Some(phone) = &phone {
        errors.check("phone", is_valid_phone(phone));
    }
    errors.into_result()?;

    let phone = phone.as_deref().map(normalize_phone);

    if find_by_email(state, &email).await?.is_some() {
        return Err(AppError::Conflict("Email is already registered".into()));
    }
    if let Some(phone) = &phone {
        if find_by_phone(state, phone).await?.is_some() {
            return Err(AppError::Conflict("Phone number is already registered".into()));
        }
    }

    let password_hash = hash_password(&password)?;
    let user = insert_user(state, name.trim(), &email, Some(password_hash), phone, None).await?;

    audit::record(
        &state.pool,
        user.id,
        "user_register",
        "users",
        serde_json::json!({ "method": "password" }),
    )
    .await;
    tracing::info!(user_id = %user.id, "user registered");

    grant(state, user)
}

pub async fn login_user(state: &AppState, payload: LoginRequest) -> AppResult<SessionGrant> {
    let LoginRequest { email, password } = payload;
    let email = normalize_email(&email);

    let user = match find_by_email(state, &email).await? {
        Some(u) => u,
        None => return Err(AppError::Unauthenticated),
    };

    // Accounts created through Google or OTP have no password to check.
    let Some(stored_hash) = user.password_hash.as_deref() else {
        return Err(AppError::Unauthenticated);
    };

    let parsed_hash = PasswordHash::new(stored_hash)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("Invalid password hash")))?;

    if Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_err()
    {
        tracing::info!(user_id = %user.id, "login rejected");
        return Err(AppError::Unauthenticated);
    }

    audit::record(
        &state.pool,
        user.id,
        "user_login",
        "users",
        serde_json::json!({ "method": "password" }),
    )
    .await;

    grant(state, user)
}

pub async fn login_with_google(
    state: &AppState,
    payload: GoogleLoginRequest,
) -> AppResult<SessionGrant> {
    let profile = state.oauth.verify(payload.credential.trim()).await?;
    let email = normalize_email(&profile.email);

    let user = match find_by_email(state, &email).await? {
        Some(existing) => existing,
        None => {
            let created =
                insert_user(state, &profile.name, &email, None, None, profile.picture).await?;
            tracing::info!(user_id = %created.id, "user created from google sign-in");
            created
        }
    };

    audit::record(
        &state.pool,
        user.id,
        "user_login",
        "users",
        serde_json::json!({ "method": "google" }),
    )
    .await;

    grant(state, user)
}

pub async fn send_otp(
    state: &AppState,
    payload: SendOtpRequest,
) -> AppResult<ApiResponse<OtpSentResponse>> {
    if !is_valid_phone(&payload.phone) {
        return Err(AppError::validation(["phone"]));
    }
    let phone = normalize_phone(&payload.phone);
    let now = Utc::now();

    state.otp_limiter.check(&phone)?;

    let code = format!("{:06}", rand::rng().random_range(0..1_000_000));
    let expires_at = now + Duration::minutes(OTP_TTL_MINUTES);

    let mut tx = state.pool.begin().await?;
    // A new code supersedes any earlier unused one.
    sqlx::query("UPDATE otp_codes SET consumed_at = NOW() WHERE phone = $1 AND consumed_at IS NULL")
        .bind(&phone)
        .execute(&mut *tx)
        .await?;
    sqlx::query("INSERT INTO otp_codes (id, phone, code, expires_at) VALUES ($1, $2, $3, $4)")
        .bind(Uuid::new_v4())
        .bind(&phone)
        .bind(&code)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    let body = format!(
        "Your Organic Biscuits verification code is {code}. It expires in {OTP_TTL_MINUTES} minutes."
    );
    state.sms.send(&phone, &body).await?;
    tracing::info!(phone = %phone, "otp issued");

    Ok(ApiResponse::success(
        "Verification code sent",
        OtpSentResponse {
            phone,
            expires_in_seconds: OTP_TTL_MINUTES * 60,
        },
        Some(Meta::empty()),
    ))
}

pub async fn verify_otp(state: &AppState, payload: VerifyOtpRequest) -> AppResult<SessionGrant> {
    let phone = normalize_phone(&payload.phone);
    let code = payload.code.trim();

    let pending: Option<(Uuid, String)> = sqlx::query_as(
        r#"
        SELECT id, code
        FROM otp_codes
        WHERE phone = $1 AND consumed_at IS NULL AND expires_at > NOW()
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(&phone)
    .fetch_optional(&state.pool)
    .await?;

    let Some((otp_id, expected)) = pending else {
        return Err(AppError::InvalidCode);
    };

    // Every guess takes an attempt before it is compared, so parallel
    // guesses cannot exceed the cap.
    let attempt: Option<(i32,)> = sqlx::query_as(
        "UPDATE otp_codes SET attempts = attempts + 1 WHERE id = $1 AND attempts < $2 RETURNING attempts",
    )
    .bind(otp_id)
    .bind(OTP_MAX_ATTEMPTS)
    .fetch_optional(&state.pool)
    .await?;
    if attempt.is_none() || expected != code {
        return Err(AppError::InvalidCode);
    }

    let existing = find_by_phone(state, &phone).await?;

    // New phone numbers need a profile; the code stays valid until one is supplied.
    let profile = match &existing {
        Some(_) => None,
        None => {
            let name = payload.name.as_deref().map(str::trim).unwrap_or_default();
            let email = payload.email.as_deref().map(normalize_email).unwrap_or_default();
            let mut errors = FieldErrors::new();
            errors
                .require("name", Some(name))
                .check("email", is_valid_email(&email));
            errors.into_result()?;
            if find_by_email(state, &email).await?.is_some() {
                return Err(AppError::Conflict("Email is already registered".into()));
            }
            Some((name.to_string(), email))
        }
    };

    let consumed: Option<(Uuid,)> = sqlx::query_as(
        "UPDATE otp_codes SET consumed_at = NOW() WHERE id = $1 AND consumed_at IS NULL RETURNING id",
    )
    .bind(otp_id)
    .fetch_optional(&state.pool)
    .await?;
    if consumed.is_none() {
        return Err(AppError::InvalidCode);
    }

    let user = match (existing, profile) {
        (Some(user), _) => user,
        (None, Some((name, email))) => {
            let created = insert_user(state, &name, &email, None, Some(phone), None).await?;
            tracing::info!(user_id = %created.id, "user created from phone sign-in");
            created
        }
        (None, None) => return Err(AppError::InvalidCode),
    };

    audit::record(
        &state.pool,
        user.id,
        "user_login",
        "users",
        serde_json::json!({ "method": "otp" }),
    )
    .await;

    grant(state, user)
}

pub async fn get_profile(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<User>> {
    let model = Users::find_by_id(user.user_id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(ApiResponse::success("OK", User::from(model), None))
}

pub async fn update_profile(
    state: &AppState,
    user: &AuthUser,
    payload: UpdateProfileRequest,
) -> AppResult<ApiResponse<User>> {
    let mut errors = FieldErrors::new();
    if let Some(name) = &payload.name {
        errors.require("name", Some(name.as_str()));
    }
    if let Some(phone) = payload.phone.as_deref().filter(|p| !p.trim().is_empty()) {
        errors.check("phone", is_valid_phone(phone));
    }
    errors.into_result()?;

    let existing = Users::find_by_id(user.user_id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let mut active: UserActive = existing.into();
    if let Some(name) = payload.name {
        active.name = Set(name.trim().to_string());
    }
    if let Some(phone) = payload.phone {
        // An empty string removes the phone number.
        let phone = Some(normalize_phone(&phone)).filter(|p| !p.is_empty());
        if let Some(phone) = &phone {
            let taken = Users::find()
                .filter(
                    Condition::all()
                        .add(UserCol::Phone.eq(phone.clone()))
                        .add(UserCol::Id.ne(user.user_id)),
                )
                .one(&state.orm)
                .await?;
            if taken.is_some() {
                return Err(AppError::Conflict("Phone number is already registered".into()));
            }
        }
        active.phone = Set(phone);
    }
    if let Some(picture) = payload.profile_picture {
        active.profile_picture = Set(Some(picture).filter(|p| !p.trim().is_empty()));
    }
    active.updated_at = Set(Utc::now().into());

    let updated = active
        .update(&state.orm)
        .await
        .map_err(|e| AppError::conflict_on_unique(e, "Phone number is already registered"))?;

    audit::record(
        &state.pool,
        user.user_id,
        "profile_update",
        "users",
        serde_json::json!({ "user_id": user.user_id }),
    )
    .await;

    Ok(ApiResponse::success("Profile updated", User::from(updated), None))
}

fn grant(state: &AppState, user: UserModel) -> AppResult<SessionGrant> {
    let token = issue_token(&state.config.jwt_secret, user.id, Utc::now())?;
    Ok(SessionGrant {
        user: user.into(),
        token,
    })
}

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))?
        .to_string();
    Ok(hash)
}

async fn find_by_email(state: &AppState, email: &str) -> AppResult<Option<UserModel>> {
    let user = Users::find()
        .filter(UserCol::Email.eq(email))
        .one(&state.orm)
        .await?;
    Ok(user)
}

async fn find_by_phone(state: &AppState, phone: &str) -> AppResult<Option<UserModel>> {
    let user = Users::find()
        .filter(UserCol::Phone.eq(phone))
        .one(&state.orm)
        .await?;
    Ok(user)
}

async fn insert_user(
    state: &AppState,
    name: &str,
    email: &str,
    password_hash: Option<String>,
    phone: Option<String>,
    profile_picture: Option<String>,
) -> AppResult<UserModel> {
    let active = UserActive {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        email: Set(email.to_string()),
        password_hash: Set(password_hash),
        phone: Set(phone),
        is_admin: Set(false),
        profile_picture: Set(profile_picture),
        created_at: NotSet,
        updated_at: NotSet,
    };
    active
        .insert(&state.orm)
        .await
        .map_err(|e| AppError::conflict_on_unique(e, "Account already exists"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_verifies_and_is_salted() {
        let first = hash_password("biscuits4all").unwrap();
        let second = hash_password("biscuits4all").unwrap();
        assert_ne!(first, second);

        let parsed = PasswordHash::new(&first).unwrap();
        assert!(
            Argon2::default()
                .verify_password(b"biscuits4all", &parsed)
                .is_ok()
        );
        assert!(Argon2::default().verify_password(b"wrong", &parsed).is_err());
    }
}
