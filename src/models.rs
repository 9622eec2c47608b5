use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entity::{addresses, categories, order_items, orders, products, users},
    pricing,
};

/// Public view of a user; the password hash never leaves the service layer.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub is_admin: bool,
    pub profile_picture: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<users::Model> for User {
    fn from(model: users::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            email: model.email,
            phone: model.phone,
            is_admin: model.is_admin,
            profile_picture: model.profile_picture,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub image: Option<String>,
    pub is_active: bool,
    pub product_count: i64,
    pub created_at: DateTime<Utc>,
}

impl Category {
    pub fn from_entity(model: categories::Model, product_count: i64) -> Self {
        Self {
            id: model.id,
            name: model.name,
            slug: model.slug,
            description: model.description,
            image: model.image,
            is_active: model.is_active,
            product_count,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub original_price: Option<Decimal>,
    pub stock: i32,
    pub categories: Vec<String>,
    pub image: Option<String>,
    pub images: Vec<String>,
    pub is_featured: bool,
    pub ingredients: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub nutritional_info: Option<Value>,
    pub weight: Option<String>,
    /// Mean review rating, one decimal place; 0 when unreviewed.
    pub rating: f64,
    pub review_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn with_review_stats(mut self, stats: Option<&ReviewStats>) -> Self {
        if let Some(stats) = stats {
            self.rating = stats.rating;
            self.review_count = stats.count;
        }
        self
    }
}

impl From<products::Model> for Product {
    fn from(model: products::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            slug: model.slug,
            description: model.description,
            price: model.price,
            original_price: model.original_price,
            stock: model.stock,
            categories: model.categories,
            image: model.image,
            images: model.images,
            is_featured: model.is_featured,
            ingredients: model.ingredients,
            nutritional_info: model.nutritional_info,
            weight: model.weight,
            rating: 0.0,
            review_count: 0,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReviewStats {
    pub rating: f64,
    pub count: i64,
}

impl ReviewStats {
    pub fn new(average: f64, count: i64) -> Self {
        Self {
            rating: (average * 10.0).round() / 10.0,
            count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    pub slug: String,
    pub image: Option<String>,
    /// Unit price captured when the item was last added or updated.
    pub price: Decimal,
    pub quantity: i32,
    pub stock: i32,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Cart {
    pub items: Vec<CartItem>,
    pub total: Decimal,
    pub item_count: i64,
}

impl Cart {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            total: Decimal::ZERO,
            item_count: 0,
        }
    }

    pub fn from_items(items: Vec<CartItem>) -> Self {
        let total = pricing::subtotal(items.iter().map(|i| (i.price, i.quantity)));
        let item_count = pricing::item_count(items.iter().map(|i| i.quantity));
        Self {
            items,
            total,
            item_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Processing => 1,
            OrderStatus::Shipped => 2,
            OrderStatus::Delivered => 3,
            OrderStatus::Cancelled => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Fulfilment only moves forward; any open order can be cancelled.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        if *self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next == OrderStatus::Cancelled || next.rank() > self.rank()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "processing" => Ok(OrderStatus::Processing),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Unpaid, PaymentStatus::Unpaid)
                | (PaymentStatus::Unpaid, PaymentStatus::Paid)
                | (PaymentStatus::Paid, PaymentStatus::Paid)
                | (PaymentStatus::Paid, PaymentStatus::Refunded)
                | (PaymentStatus::Refunded, PaymentStatus::Refunded)
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpaid" => Ok(PaymentStatus::Unpaid),
            "paid" => Ok(PaymentStatus::Paid),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(format!("unknown payment status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_number: String,
    #[schema(value_type = Object)]
    pub shipping_info: Value,
    #[schema(value_type = Object)]
    pub payment_info: Value,
    pub subtotal: Decimal,
    pub shipping_fee: Decimal,
    pub total_amount: Decimal,
    pub status: String,
    pub payment_status: String,
    pub placed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<orders::Model> for Order {
    fn from(model: orders::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            order_number: model.order_number,
            shipping_info: model.shipping_info,
            payment_info: model.payment_info,
            subtotal: model.subtotal,
            shipping_fee: model.shipping_fee,
            total_amount: model.total_amount,
            status: model.status,
            payment_status: model.payment_status,
            placed_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Option<Uuid>,
    pub product_name: String,
    pub price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
}

impl From<order_items::Model> for OrderItem {
    fn from(model: order_items::Model) -> Self {
        Self {
            line_total: pricing::round2(pricing::line_total(model.price, model.quantity)),
            id: model.id,
            order_id: model.order_id,
            product_id: model.product_id,
            product_name: model.product_name,
            price: model.price,
            quantity: model.quantity,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Address {
    pub id: Uuid,
    pub full_name: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

impl From<addresses::Model> for Address {
    fn from(model: addresses::Model) -> Self {
        Self {
            id: model.id,
            full_name: model.full_name,
            phone: model.phone,
            address: model.address,
            city: model.city,
            state: model.state,
            zip_code: model.zip_code,
            country: model.country,
            is_default: model.is_default,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Review {
    pub id: Uuid,
    pub product_id: Uuid,
    pub user_id: Uuid,
    pub user_name: String,
    pub rating: i16,
    pub comment: Option<String>,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(price: &str, quantity: i32) -> CartItem {
        let price: Decimal = price.parse().expect("decimal");
        CartItem {
            id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            name: "Biscuit".into(),
            slug: "biscuit".into(),
            image: None,
            price,
            quantity,
            stock: 100,
            line_total: pricing::line_total(price, quantity),
        }
    }

    #[test]
    fn cart_totals_use_snapshot_prices() {
        let cart = Cart::from_items(vec![item("4.99", 2), item("3.99", 1)]);
        assert_eq!(cart.total, "13.97".parse::<Decimal>().expect("decimal"));
        assert_eq!(cart.item_count, 3);
    }

    #[test]
    fn empty_cart_shape() {
        let cart = Cart::empty();
        assert!(cart.items.is_empty());
        assert_eq!(cart.total, Decimal::ZERO);
        assert_eq!(cart.item_count, 0);
    }

    #[test]
    fn order_status_forward_and_cancel() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Shipped));
        assert!(Shipped.can_transition_to(Delivered));
        assert!(Processing.can_transition_to(Cancelled));
        assert!(Pending.can_transition_to(Pending));
        assert!(!Shipped.can_transition_to(Pending));
        assert!(!Delivered.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Processing));
    }

    #[test]
    fn refund_only_from_paid() {
        use PaymentStatus::*;
        assert!(Unpaid.can_transition_to(Paid));
        assert!(Paid.can_transition_to(Refunded));
        assert!(!Unpaid.can_transition_to(Refunded));
        assert!(!Refunded.can_transition_to(Paid));
    }

    #[test]
    fn unknown_status_values_are_rejected() {
        assert!("shipping".parse::<OrderStatus>().is_err());
        assert!("PAID".parse::<PaymentStatus>().is_err());
        assert_eq!("delivered".parse::<OrderStatus>(), Ok(OrderStatus::Delivered));
    }

    #[test]
    fn review_stats_round_to_one_decimal() {
        let stats = ReviewStats::new(4.666_666, 3);
        assert_eq!(stats.rating, 4.7);
        assert_eq!(stats.count, 3);
    }
}
