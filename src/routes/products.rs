use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};

use crate::{
    dto::products::{CreateReviewRequest, ProductList, ReviewList},
    error::AppResult,
    middleware::auth::AuthUser,
    models::{Product, Review},
    response::ApiResponse,
    routes::params::{Pagination, ProductQuery},
    services::{product_service, review_service},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_products))
        .route("/{id_or_slug}", get(get_product))
        .route("/{id_or_slug}/reviews", get(list_reviews).post(create_review))
}

#[utoipa::path(
    get,
    path = "/api/products",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20, max 100"),
        ("search" = Option<String>, Query, description = "Match name, description or category"),
        ("category" = Option<String>, Query, description = "Category slug"),
        ("min_price" = Option<String>, Query, description = "Minimum price"),
        ("max_price" = Option<String>, Query, description = "Maximum price"),
        ("featured" = Option<bool>, Query, description = "Only featured products"),
        ("sort" = Option<String>, Query, description = "price_asc, price_desc, rating, name, newest")
    ),
    responses(
        (status = 200, description = "List products", body = ApiResponse<ProductList>)
    ),
    tag = "Products"
)]
pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductQuery>,
) -> AppResult<Json<ApiResponse<ProductList>>> {
    let resp = product_service::list_products(&state, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/products/{id_or_slug}",
    params(
        ("id_or_slug" = String, Path, description = "Product ID or slug")
    ),
    responses(
        (status = 200, description = "Get product", body = ApiResponse<Product>),
        (status = 404, description = "Product not found"),
    ),
    tag = "Products"
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(id_or_slug): Path<String>,
) -> AppResult<Json<ApiResponse<Product>>> {
    let resp = product_service::get_product(&state, &id_or_slug).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/products/{id_or_slug}/reviews",
    params(
        ("id_or_slug" = String, Path, description = "Product ID or slug"),
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20")
    ),
    responses(
        (status = 200, description = "Reviews, newest first", body = ApiResponse<ReviewList>),
        (status = 404, description = "Product not found"),
    ),
    tag = "Products"
)]
pub async fn list_reviews(
    State(state): State<AppState>,
    Path(id_or_slug): Path<String>,
    Query(pagination): Query<Pagination>,
) -> AppResult<Json<ApiResponse<ReviewList>>> {
    let resp = review_service::list_reviews(&state, &id_or_slug, pagination).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/products/{id_or_slug}/reviews",
    params(
        ("id_or_slug" = String, Path, description = "Product ID or slug")
    ),
    request_body = CreateReviewRequest,
    responses(
        (status = 201, description = "Review added", body = ApiResponse<Review>),
        (status = 400, description = "Rating outside 1..=5"),
        (status = 401, description = "Not signed in"),
        (status = 404, description = "Product not found"),
    ),
    security(("cookie_auth" = [])),
    tag = "Products"
)]
pub async fn create_review(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id_or_slug): Path<String>,
    Json(payload): Json<CreateReviewRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Review>>)> {
    let resp = review_service::create_review(&state, &user, &id_or_slug, payload).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}
