mod common;

use common::{setup, unique_email, unique_phone};
use organic_biscuits_api::{
    dto::auth::{
        GoogleLoginRequest, LoginRequest, RegisterRequest, SendOtpRequest, UpdateProfileRequest,
        VerifyOtpRequest,
    },
    error::AppError,
    middleware::auth::AuthUser,
    services::auth_service::{self, OTP_MAX_ATTEMPTS},
    session::verify_token,
};
use uuid::Uuid;

#[tokio::test]
async fn register_then_login_issues_tokens_for_the_same_user() -> anyhow::Result<()> {
    let Some(app) = setup().await? else {
        return Ok(());
    };
    let state = &app.state;
    let email = unique_email("Baker");

    let registered = auth_service::register_user(
        state,
        RegisterRequest {
            name: "Bea Baker".into(),
            email: email.clone(),
            password: "shortbread".into(),
            phone: None,
        },
    )
    .await?;
    assert_eq!(registered.user.email, email.to_lowercase());
    assert!(!registered.user.is_admin);
    assert_eq!(
        verify_token(&state.config.jwt_secret, &registered.token),
        Some(registered.user.id)
    );

    let again = auth_service::register_user(
        state,
        RegisterRequest {
            name: "Someone Else".into(),
            email: email.to_uppercase(),
            password: "shortbread".into(),
            phone: None,
        },
    )
    .await;
    assert!(matches!(again, Err(AppError::Conflict(_))));

    let logged_in = auth_service::login_user(
        state,
        LoginRequest {
            email: email.clone(),
            password: "shortbread".into(),
        },
    )
    .await?;
    assert_eq!(logged_in.user.id, registered.user.id);

    // Wrong password and unknown email fail the same way.
    let wrong_password = auth_service::login_user(
        state,
        LoginRequest {
            email: email.clone(),
            password: "gingersnap".into(),
        },
    )
    .await;
    let unknown = auth_service::login_user(
        state,
        LoginRequest {
            email: unique_email("nobody"),
            password: "gingersnap".into(),
        },
    )
    .await;
    assert!(matches!(wrong_password, Err(AppError::Unauthenticated)));
    assert!(matches!(unknown, Err(AppError::Unauthenticated)));

    let weak = auth_service::register_user(
        state,
        RegisterRequest {
            name: "".into(),
            email: "not-an-email".into(),
            password: "short".into(),
            phone: None,
        },
    )
    .await;
    assert!(matches!(&weak, Err(AppError::Validation(fields)) if fields.len() == 3));

    Ok(())
}

#[tokio::test]
async fn otp_sign_in_creates_account_and_limits_requests() -> anyhow::Result<()> {
    let Some(app) = setup().await? else {
        return Ok(());
    };
    let state = &app.state;
    let phone = unique_phone();

    let sent = auth_service::send_otp(state, SendOtpRequest { phone: phone.clone() })
        .await?
        .data
        .unwrap();
    assert_eq!(sent.phone, phone);
    assert_eq!(sent.expires_in_seconds, 600);
    let code = app.sms.last_code_for(&phone).unwrap();

    let wrong = auth_service::verify_otp(
        state,
        VerifyOtpRequest {
            phone: phone.clone(),
            code: if code == "000000" { "111111" } else { "000000" }.into(),
            name: None,
            email: None,
        },
    )
    .await;
    assert!(matches!(wrong, Err(AppError::InvalidCode)));

    // A new phone needs a profile, and the code survives the failed attempt.
    let no_profile = auth_service::verify_otp(
        state,
        VerifyOtpRequest {
            phone: phone.clone(),
            code: code.clone(),
            name: None,
            email: None,
        },
    )
    .await;
    assert!(matches!(no_profile, Err(AppError::Validation(_))));

    let email = unique_email("phone");
    let grant = auth_service::verify_otp(
        state,
        VerifyOtpRequest {
            phone: phone.clone(),
            code: code.clone(),
            name: Some("Phone Person".into()),
            email: Some(email.clone()),
        },
    )
    .await?;
    assert_eq!(grant.user.phone.as_deref(), Some(phone.as_str()));
    assert_eq!(grant.user.email, email);

    // Codes are single use.
    let replay = auth_service::verify_otp(
        state,
        VerifyOtpRequest {
            phone: phone.clone(),
            code,
            name: None,
            email: None,
        },
    )
    .await;
    assert!(matches!(replay, Err(AppError::InvalidCode)));

    auth_service::send_otp(state, SendOtpRequest { phone: phone.clone() }).await?;
    auth_service::send_otp(state, SendOtpRequest { phone: phone.clone() }).await?;
    let limited = auth_service::send_otp(state, SendOtpRequest { phone: phone.clone() }).await;
    assert!(matches!(limited, Err(AppError::RateLimited { retry_after }) if retry_after > 0));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_guesses_cannot_exceed_the_attempt_cap() -> anyhow::Result<()> {
    let Some(app) = setup().await? else {
        return Ok(());
    };
    let phone = unique_phone();
    auth_service::send_otp(&app.state, SendOtpRequest { phone: phone.clone() }).await?;
    let code = app.sms.last_code_for(&phone).unwrap();
    let wrong = if code == "000000" { "111111" } else { "000000" };

    let mut guesses = tokio::task::JoinSet::new();
    for _ in 0..(OTP_MAX_ATTEMPTS * 2) {
        let state = app.state.clone();
        let request = VerifyOtpRequest {
            phone: phone.clone(),
            code: wrong.into(),
            name: None,
            email: None,
        };
        guesses.spawn(async move { auth_service::verify_otp(&state, request).await });
    }
    while let Some(guess) = guesses.join_next().await {
        assert!(matches!(guess?, Err(AppError::InvalidCode)));
    }

    let attempts: i32 = sqlx::query_scalar(
        "SELECT attempts FROM otp_codes WHERE phone = $1 AND consumed_at IS NULL",
    )
    .bind(&phone)
    .fetch_one(&app.state.pool)
    .await?;
    assert_eq!(attempts, OTP_MAX_ATTEMPTS);

    // The right code no longer works once the cap is reached.
    let late = auth_service::verify_otp(
        &app.state,
        VerifyOtpRequest {
            phone: phone.clone(),
            code,
            name: Some("Late Guess".into()),
            email: Some(unique_email("late")),
        },
    )
    .await;
    assert!(matches!(late, Err(AppError::InvalidCode)));

    Ok(())
}

#[tokio::test]
async fn google_sign_in_reuses_the_account_and_profile_updates() -> anyhow::Result<()> {
    let Some(app) = setup().await? else {
        return Ok(());
    };
    let state = &app.state;
    let credential = Uuid::new_v4().simple().to_string();

    let first = auth_service::login_with_google(
        state,
        GoogleLoginRequest {
            credential: credential.clone(),
        },
    )
    .await?;
    let second = auth_service::login_with_google(state, GoogleLoginRequest { credential }).await?;
    assert_eq!(first.user.id, second.user.id);

    let rejected = auth_service::login_with_google(
        state,
        GoogleLoginRequest {
            credential: "bad".into(),
        },
    )
    .await;
    assert!(matches!(rejected, Err(AppError::Unauthenticated)));

    // No password was ever set for this account.
    let password_login = auth_service::login_user(
        state,
        LoginRequest {
            email: first.user.email.clone(),
            password: "whatever1".into(),
        },
    )
    .await;
    assert!(matches!(password_login, Err(AppError::Unauthenticated)));

    let user = AuthUser {
        user_id: first.user.id,
        name: first.user.name.clone(),
        email: first.user.email.clone(),
        phone: None,
        is_admin: false,
    };
    let phone = unique_phone();
    let updated = auth_service::update_profile(
        state,
        &user,
        UpdateProfileRequest {
            name: Some("  Renamed  ".into()),
            phone: Some(phone.clone()),
            ..Default::default()
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(updated.name, "Renamed");
    assert_eq!(updated.phone, Some(phone));

    let profile = auth_service::get_profile(state, &user).await?.data.unwrap();
    assert_eq!(profile.name, "Renamed");

    Ok(())
}
