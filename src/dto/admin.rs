use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{Order, Product};

/// Partial update: only the supplied fields change.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: Option<String>,
    pub payment_status: Option<String>,
}

#[derive(Debug, Serialize, FromRow, ToSchema)]
pub struct CustomerSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub order_count: i64,
    pub total_spent: Decimal,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CustomerList {
    pub items: Vec<CustomerSummary>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DashboardStats {
    pub total_revenue: Decimal,
    pub total_orders: i64,
    pub pending_orders: i64,
    pub total_customers: i64,
    pub total_products: i64,
    pub low_stock_products: Vec<Product>,
    pub recent_orders: Vec<Order>,
}

#[derive(Debug, Serialize, FromRow, ToSchema)]
pub struct DailySales {
    pub date: NaiveDate,
    pub orders: i64,
    pub revenue: Decimal,
}

#[derive(Debug, Serialize, FromRow, ToSchema)]
pub struct StatusBreakdown {
    pub status: String,
    pub orders: i64,
    pub revenue: Decimal,
}

#[derive(Debug, Serialize, FromRow, ToSchema)]
pub struct TopProduct {
    pub product_name: String,
    pub quantity: i64,
    pub revenue: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SalesReport {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub daily: Vec<DailySales>,
    pub by_status: Vec<StatusBreakdown>,
    pub top_products: Vec<TopProduct>,
}
