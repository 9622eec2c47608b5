use crate::{
    dto::orders::PaymentIntentResponse,
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    pricing,
    response::{ApiResponse, Meta},
    services::cart_service::load_cart,
    state::AppState,
};

/// Creates a card payment intent for the user's current cart, shipping included.
/// The amount is always computed here, never taken from the client.
pub async fn create_payment_intent(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<PaymentIntentResponse>> {
    let cart = load_cart(&state.orm, user.user_id).await?;
    if cart.items.is_empty() {
        return Err(AppError::validation(["cart"]));
    }

    let amount = pricing::grand_total(cart.total);
    let amount_cents = pricing::to_minor_units(amount)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("order total out of range")))?;

    let intent = state.payments.create_intent(amount_cents, pricing::CURRENCY).await?;

    Ok(ApiResponse::success(
        "Payment intent created",
        PaymentIntentResponse {
            payment_intent_id: intent.id,
            client_secret: intent.client_secret,
            amount,
            currency: pricing::CURRENCY.to_string(),
        },
        Some(Meta::empty()),
    ))
}
