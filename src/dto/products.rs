use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::models::{Product, Review};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateProductRequest {
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub original_price: Option<Decimal>,
    pub stock: i32,
    #[serde(default)]
    pub categories: Vec<String>,
    pub image: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub is_featured: bool,
    pub ingredients: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub nutritional_info: Option<Value>,
    pub weight: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub original_price: Option<Decimal>,
    pub stock: Option<i32>,
    pub categories: Option<Vec<String>>,
    pub image: Option<String>,
    pub images: Option<Vec<String>>,
    pub is_featured: Option<bool>,
    pub ingredients: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub nutritional_info: Option<Value>,
    pub weight: Option<String>,
}

#[derive(Serialize, ToSchema)]
#[serde(transparent)]
pub struct ProductList {
    #[schema(value_type = Vec<Product>)]
    pub items: Vec<Product>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateReviewRequest {
    pub rating: i16,
    pub comment: Option<String>,
}

#[derive(Serialize, ToSchema)]
#[serde(transparent)]
pub struct ReviewList {
    #[schema(value_type = Vec<Review>)]
    pub items: Vec<Review>,
}
