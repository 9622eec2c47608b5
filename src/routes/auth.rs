use axum::{
    Json, Router,
    extract::State,
    http::{HeaderName, StatusCode, header},
    response::AppendHeaders,
    routing::{get, post},
};

use crate::{
    dto::auth::{
        AuthResponse, GoogleLoginRequest, LoginRequest, OtpSentResponse, RegisterRequest,
        SendOtpRequest, UpdateProfileRequest, VerifyOtpRequest,
    },
    error::AppResult,
    middleware::auth::AuthUser,
    models::User,
    response::{ApiResponse, Meta},
    services::auth_service::{self, SessionGrant},
    session::{clear_session_cookie, session_cookie},
    state::AppState,
};

type SetCookie = AppendHeaders<[(HeaderName, String); 1]>;
type SessionResponse = (SetCookie, Json<ApiResponse<AuthResponse>>);

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me).put(update_me))
        .route("/send-otp", post(send_otp))
        .route("/verify-otp", post(verify_otp))
        .route("/google", post(google))
}

fn signed_in(state: &AppState, grant: SessionGrant, message: &str) -> SessionResponse {
    let cookie = session_cookie(&grant.token, state.config.is_production());
    (
        AppendHeaders([(header::SET_COOKIE, cookie)]),
        Json(ApiResponse::success(
            message,
            AuthResponse { user: grant.user },
            Some(Meta::empty()),
        )),
    )
}

#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created, session cookie set", body = ApiResponse<AuthResponse>),
        (status = 400, description = "Missing or invalid fields"),
        (status = 409, description = "Email or phone already registered")
    ),
    tag = "Auth"
)]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, SetCookie, Json<ApiResponse<AuthResponse>>)> {
    let grant = auth_service::register_user(&state, payload).await?;
    let (cookie, body) = signed_in(&state, grant, "Account created");
    Ok((StatusCode::CREATED, cookie, body))
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in, session cookie set", body = ApiResponse<AuthResponse>),
        (status = 401, description = "Invalid credentials")
    ),
    tag = "Auth"
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<SessionResponse> {
    let grant = auth_service::login_user(&state, payload).await?;
    Ok(signed_in(&state, grant, "Logged in"))
}

#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 200, description = "Session cookie cleared")
    ),
    tag = "Auth"
)]
pub async fn logout(State(state): State<AppState>) -> (SetCookie, Json<ApiResponse<serde_json::Value>>) {
    let cookie = clear_session_cookie(state.config.is_production());
    (
        AppendHeaders([(header::SET_COOKIE, cookie)]),
        Json(ApiResponse::success(
            "Logged out",
            serde_json::json!({}),
            Some(Meta::empty()),
        )),
    )
}

#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses(
        (status = 200, description = "Current user", body = ApiResponse<User>),
        (status = 401, description = "Not signed in")
    ),
    security(("cookie_auth" = [])),
    tag = "Auth"
)]
pub async fn me(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<User>>> {
    let resp = auth_service::get_profile(&state, &user).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    put,
    path = "/api/auth/me",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = ApiResponse<User>),
        (status = 401, description = "Not signed in"),
        (status = 409, description = "Phone already registered")
    ),
    security(("cookie_auth" = [])),
    tag = "Auth"
)]
pub async fn update_me(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> AppResult<Json<ApiResponse<User>>> {
    let resp = auth_service::update_profile(&state, &user, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/auth/send-otp",
    request_body = SendOtpRequest,
    responses(
        (status = 200, description = "Code sent by SMS", body = ApiResponse<OtpSentResponse>),
        (status = 429, description = "Too many codes requested for this phone"),
        (status = 502, description = "SMS delivery failed")
    ),
    tag = "Auth"
)]
pub async fn send_otp(
    State(state): State<AppState>,
    Json(payload): Json<SendOtpRequest>,
) -> AppResult<Json<ApiResponse<OtpSentResponse>>> {
    let resp = auth_service::send_otp(&state, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/auth/verify-otp",
    request_body = VerifyOtpRequest,
    responses(
        (status = 200, description = "Logged in, session cookie set", body = ApiResponse<AuthResponse>),
        (status = 400, description = "Invalid or expired code, or profile required")
    ),
    tag = "Auth"
)]
pub async fn verify_otp(
    State(state): State<AppState>,
    Json(payload): Json<VerifyOtpRequest>,
) -> AppResult<SessionResponse> {
    let grant = auth_service::verify_otp(&state, payload).await?;
    Ok(signed_in(&state, grant, "Logged in"))
}

#[utoipa::path(
    post,
    path = "/api/auth/google",
    request_body = GoogleLoginRequest,
    responses(
        (status = 200, description = "Logged in, session cookie set", body = ApiResponse<AuthResponse>),
        (status = 401, description = "Token rejected"),
        (status = 502, description = "Google verification unavailable")
    ),
    tag = "Auth"
)]
pub async fn google(
    State(state): State<AppState>,
    Json(payload): Json<GoogleLoginRequest>,
) -> AppResult<SessionResponse> {
    let grant = auth_service::login_with_google(&state, payload).await?;
    Ok(signed_in(&state, grant, "Logged in"))
}
