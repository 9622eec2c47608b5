use axum::{Json, Router, extract::State, routing::post};

use crate::{
    dto::orders::PaymentIntentResponse, error::AppResult, middleware::auth::AuthUser,
    response::ApiResponse, services::payment_service, state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/intent", post(create_payment_intent))
}

#[utoipa::path(
    post,
    path = "/api/payments/intent",
    responses(
        (status = 200, description = "Card payment intent for the current cart", body = ApiResponse<PaymentIntentResponse>),
        (status = 400, description = "Cart is empty"),
        (status = 502, description = "Payment provider unavailable")
    ),
    security(("cookie_auth" = [])),
    tag = "Orders"
)]
pub async fn create_payment_intent(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<PaymentIntentResponse>>> {
    let resp = payment_service::create_payment_intent(&state, &user).await?;
    Ok(Json(resp))
}
