use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{Order, OrderItem};

/// Shipping form as submitted; every field is optional here so that
/// validation can report all missing fields together.
#[derive(Debug, Default, Clone, Deserialize, ToSchema)]
#[serde(default)]
pub struct ShippingInfoInput {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub country: Option<String>,
}

/// Validated shipping snapshot stored on the order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ShippingInfo {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    CashOnDelivery,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PaymentInfoInput {
    pub method: PaymentMethod,
    /// Payment intent confirmed by the client for card payments.
    pub payment_intent_id: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PlaceOrderRequest {
    #[serde(default)]
    pub shipping_info: ShippingInfoInput,
    pub payment_info: PaymentInfoInput,
    /// Grand total shown to the customer, shipping included.
    pub total_amount: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderWithItems {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderList {
    pub items: Vec<Order>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentIntentResponse {
    pub payment_intent_id: String,
    pub client_secret: String,
    pub amount: Decimal,
    pub currency: String,
}
