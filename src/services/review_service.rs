use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ActiveValue::NotSet, Set};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    audit,
    dto::products::{CreateReviewRequest, ReviewList},
    entity::reviews::ActiveModel as ReviewActive,
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::Review,
    response::{ApiResponse, Meta},
    routes::params::Pagination,
    services::product_service::find_by_id_or_slug,
    state::AppState,
};

#[derive(FromRow)]
struct ReviewRow {
    id: Uuid,
    product_id: Uuid,
    user_id: Uuid,
    user_name: String,
    rating: i16,
    comment: Option<String>,
    is_verified: bool,
    created_at: DateTime<Utc>,
}

impl From<ReviewRow> for Review {
    fn from(row: ReviewRow) -> Self {
        Review {
            id: row.id,
            product_id: row.product_id,
            user_id: row.user_id,
            user_name: row.user_name,
            rating: row.rating,
            comment: row.comment,
            is_verified: row.is_verified,
            created_at: row.created_at,
        }
    }
}

pub async fn list_reviews(
    state: &AppState,
    id_or_slug: &str,
    pagination: Pagination,
) -> AppResult<ApiResponse<ReviewList>> {
    let product = find_by_id_or_slug(state, id_or_slug)
        .await?
        .ok_or(AppError::NotFound)?;
    let (page, limit, offset) = pagination.normalize();

    let rows = sqlx::query_as::<_, ReviewRow>(
        r#"
        SELECT r.id, r.product_id, r.user_id, u.name AS user_name,
               r.rating, r.comment, r.is_verified, r.created_at
        FROM reviews r
        JOIN users u ON u.id = r.user_id
        WHERE r.product_id = $1
        ORDER BY r.created_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(product.id)
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.pool)
    .await?;

    let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM reviews WHERE product_id = $1")
        .bind(product.id)
        .fetch_one(&state.pool)
        .await?;

    let items = rows.into_iter().map(Review::from).collect();
    let meta = Meta::new(page, limit, total.0);
    Ok(ApiResponse::success("Reviews", ReviewList { items }, Some(meta)))
}

pub async fn create_review(
    state: &AppState,
    user: &AuthUser,
    id_or_slug: &str,
    payload: CreateReviewRequest,
) -> AppResult<ApiResponse<Review>> {
    if !(1..=5).contains(&payload.rating) {
        return Err(AppError::validation(["rating"]));
    }

    let product = find_by_id_or_slug(state, id_or_slug)
        .await?
        .ok_or(AppError::NotFound)?;

    // Verified means the reviewer has a non-cancelled order containing the product.
    let (is_verified,): (bool,) = sqlx::query_as(
        r#"
        SELECT EXISTS (
            SELECT 1
            FROM order_items oi
            JOIN orders o ON o.id = oi.order_id
            WHERE o.user_id = $1 AND oi.product_id = $2 AND o.status <> 'cancelled'
        )
        "#,
    )
    .bind(user.user_id)
    .bind(product.id)
    .fetch_one(&state.pool)
    .await?;

    let comment = payload
        .comment
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());

    let review = ReviewActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user.user_id),
        product_id: Set(product.id),
        rating: Set(payload.rating),
        comment: Set(comment),
        is_verified: Set(is_verified),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    audit::record(
        &state.pool,
        user.user_id,
        "review_create",
        "reviews",
        serde_json::json!({ "review_id": review.id, "product_id": product.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Review added",
        Review {
            id: review.id,
            product_id: review.product_id,
            user_id: review.user_id,
            user_name: user.name.clone(),
            rating: review.rating,
            comment: review.comment,
            is_verified: review.is_verified,
            created_at: review.created_at.with_timezone(&Utc),
        },
        Some(Meta::empty()),
    ))
}
