use std::collections::HashMap;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, Condition, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
    sea_query::{Expr, Order, extension::postgres::PgExpr},
};
use uuid::Uuid;

use crate::{
    audit,
    db::{DbPool, contains_pattern},
    dto::products::{CreateProductRequest, ProductList, UpdateProductRequest},
    entity::{
        Products,
        products::{ActiveModel, Column, Model as ProductModel},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Product, ReviewStats},
    response::{ApiResponse, Meta},
    routes::params::{ProductQuery, ProductSort},
    slug::slugify,
    state::AppState,
    validation::FieldErrors,
};

const RATING_EXPR: &str =
    "(SELECT COALESCE(AVG(r.rating), 0) FROM reviews r WHERE r.product_id = products.id)";

pub async fn list_products(
    state: &AppState,
    query: ProductQuery,
) -> AppResult<ApiResponse<ProductList>> {
    let (page, limit, offset) = query.pagination().normalize();
    let mut condition = Condition::all();

    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = contains_pattern(search);
        condition = condition.add(
            Condition::any()
                .add(Expr::col(Column::Name).ilike(pattern.clone()))
                .add(Expr::col(Column::Description).ilike(pattern.clone()))
                .add(Expr::cust_with_values(
                    "array_to_string(categories, ' ') ILIKE ?",
                    [pattern],
                )),
        );
    }

    if let Some(category) = query.category.as_deref().filter(|c| !c.is_empty()) {
        condition = condition.add(Expr::cust_with_values(
            "? = ANY(categories)",
            [category.to_string()],
        ));
    }

    if let Some(min_price) = query.min_price {
        condition = condition.add(Column::Price.gte(min_price));
    }

    if let Some(max_price) = query.max_price {
        condition = condition.add(Column::Price.lte(max_price));
    }

    if query.featured == Some(true) {
        condition = condition.add(Column::IsFeatured.eq(true));
    }

    let mut finder = Products::find().filter(condition);
    finder = match query.sort {
        Some(ProductSort::PriceAsc) => finder.order_by_asc(Column::Price),
        Some(ProductSort::PriceDesc) => finder.order_by_desc(Column::Price),
        Some(ProductSort::Name) => finder.order_by_asc(Column::Name),
        Some(ProductSort::Newest) => finder.order_by_desc(Column::CreatedAt),
        Some(ProductSort::Rating) => finder
            .order_by(Expr::cust(RATING_EXPR), Order::Desc)
            .order_by_desc(Column::CreatedAt),
        None => finder
            .order_by_desc(Column::IsFeatured)
            .order_by_desc(Column::CreatedAt),
    };
    // tie-breaker keeps pages stable
    finder = finder.order_by_asc(Column::Id);

    let total = finder.clone().count(&state.orm).await? as i64;

    let models = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;

    let items = with_stats(&state.pool, models).await?;

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Products", ProductList { items }, Some(meta)))
}

pub async fn get_product(state: &AppState, id_or_slug: &str) -> AppResult<ApiResponse<Product>> {
    let model = find_by_id_or_slug(state, id_or_slug)
        .await?
        .ok_or(AppError::NotFound)?;
    let product = with_stats(&state.pool, vec![model])
        .await?
        .pop()
        .ok_or(AppError::NotFound)?;
    Ok(ApiResponse::success("Product", product, None))
}

pub async fn create_product(
    state: &AppState,
    user: &AuthUser,
    payload: CreateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;

    let slug = slugify(&payload.name);
    let mut errors = FieldErrors::new();
    errors
        .require("name", Some(payload.name.as_str()))
        .check("name", !slug.is_empty())
        .check("price", payload.price > rust_decimal::Decimal::ZERO)
        .check("stock", payload.stock >= 0);
    if let Some(original) = payload.original_price {
        errors.check("original_price", original > rust_decimal::Decimal::ZERO);
    }
    errors.into_result()?;

    ensure_slug_free(state, &slug, None).await?;

    let active = ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(payload.name.trim().to_string()),
        slug: Set(slug),
        description: Set(payload.description),
        price: Set(payload.price),
        original_price: Set(payload.original_price),
        stock: Set(payload.stock),
        categories: Set(normalize_tags(payload.categories)),
        image: Set(payload.image),
        images: Set(payload.images),
        is_featured: Set(payload.is_featured),
        ingredients: Set(payload.ingredients),
        nutritional_info: Set(payload.nutritional_info),
        weight: Set(payload.weight),
        created_at: NotSet,
        updated_at: NotSet,
    };
    let product = active
        .insert(&state.orm)
        .await
        .map_err(|e| AppError::conflict_on_unique(e, "A product with this name already exists"))?;

    audit::record(
        &state.pool,
        user.user_id,
        "product_create",
        "products",
        serde_json::json!({ "product_id": product.id, "slug": product.slug }),
    )
    .await;

    Ok(ApiResponse::success(
        "Product created",
        Product::from(product),
        Some(Meta::empty()),
    ))
}

pub async fn update_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;

    let existing = Products::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let mut errors = FieldErrors::new();
    if let Some(name) = &payload.name {
        errors
            .require("name", Some(name.as_str()))
            .check("name", !slugify(name).is_empty());
    }
    if let Some(price) = payload.price {
        errors.check("price", price > rust_decimal::Decimal::ZERO);
    }
    if let Some(original) = payload.original_price {
        errors.check("original_price", original > rust_decimal::Decimal::ZERO);
    }
    if let Some(stock) = payload.stock {
        errors.check("stock", stock >= 0);
    }
    errors.into_result()?;

    let rename = payload
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| *name != existing.name)
        .map(str::to_string);

    let mut active: ActiveModel = existing.into();
    if let Some(name) = rename {
        let slug = slugify(&name);
        ensure_slug_free(state, &slug, Some(id)).await?;
        active.name = Set(name);
        active.slug = Set(slug);
    }
    if let Some(description) = payload.description {
        active.description = Set(Some(description));
    }
    if let Some(price) = payload.price {
        active.price = Set(price);
    }
    if let Some(original) = payload.original_price {
        active.original_price = Set(Some(original));
    }
    if let Some(stock) = payload.stock {
        active.stock = Set(stock);
    }
    if let Some(categories) = payload.categories {
        active.categories = Set(normalize_tags(categories));
    }
    if let Some(image) = payload.image {
        active.image = Set(Some(image));
    }
    if let Some(images) = payload.images {
        active.images = Set(images);
    }
    if let Some(is_featured) = payload.is_featured {
        active.is_featured = Set(is_featured);
    }
    if let Some(ingredients) = payload.ingredients {
        active.ingredients = Set(Some(ingredients));
    }
    if let Some(info) = payload.nutritional_info {
        active.nutritional_info = Set(Some(info));
    }
    if let Some(weight) = payload.weight {
        active.weight = Set(Some(weight));
    }
    active.updated_at = Set(Utc::now().into());

    let product = active
        .update(&state.orm)
        .await
        .map_err(|e| AppError::conflict_on_unique(e, "A product with this name already exists"))?;

    audit::record(
        &state.pool,
        user.user_id,
        "product_update",
        "products",
        serde_json::json!({ "product_id": product.id }),
    )
    .await;

    let product = with_stats(&state.pool, vec![product])
        .await?
        .pop()
        .ok_or(AppError::NotFound)?;
    Ok(ApiResponse::success("Updated", product, Some(Meta::empty())))
}

pub async fn delete_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;
    let result = Products::delete_by_id(id).exec(&state.orm).await?;

    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }

    audit::record(
        &state.pool,
        user.user_id,
        "product_delete",
        "products",
        serde_json::json!({ "product_id": id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

/// UUIDs resolve by id first; anything else (or an unknown id) is tried as a slug.
pub(crate) async fn find_by_id_or_slug(
    state: &AppState,
    id_or_slug: &str,
) -> AppResult<Option<ProductModel>> {
    if let Ok(id) = Uuid::parse_str(id_or_slug) {
        if let Some(product) = Products::find_by_id(id).one(&state.orm).await? {
            return Ok(Some(product));
        }
    }
    let product = Products::find()
        .filter(Column::Slug.eq(id_or_slug))
        .one(&state.orm)
        .await?;
    Ok(product)
}

/// Mean rating and count per product, for the given ids only.
pub(crate) async fn review_stats(
    pool: &DbPool,
    product_ids: &[Uuid],
) -> AppResult<HashMap<Uuid, ReviewStats>> {
    if product_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<(Uuid, f64, i64)> = sqlx::query_as(
        r#"
        SELECT product_id, AVG(rating)::float8, COUNT(*)
        FROM reviews
        WHERE product_id = ANY($1)
        GROUP BY product_id
        "#,
    )
    .bind(product_ids)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, avg, count)| (id, ReviewStats::new(avg, count)))
        .collect())
}

pub(crate) async fn with_stats(pool: &DbPool, models: Vec<ProductModel>) -> AppResult<Vec<Product>> {
    let ids: Vec<Uuid> = models.iter().map(|m| m.id).collect();
    let stats = review_stats(pool, &ids).await?;
    Ok(models
        .into_iter()
        .map(|m| {
            let id = m.id;
            Product::from(m).with_review_stats(stats.get(&id))
        })
        .collect())
}

async fn ensure_slug_free(state: &AppState, slug: &str, except: Option<Uuid>) -> AppResult<()> {
    let mut condition = Condition::all().add(Column::Slug.eq(slug));
    if let Some(id) = except {
        condition = condition.add(Column::Id.ne(id));
    }
    let taken = Products::find().filter(condition).one(&state.orm).await?;
    if taken.is_some() {
        return Err(AppError::Conflict(
            "A product with this name already exists".into(),
        ));
    }
    Ok(())
}

/// Category tags are stored as slugs so they match `categories.slug`.
fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags.iter().map(|t| slugify(t)).filter(|t| !t.is_empty()) {
        if !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::normalize_tags;

    #[test]
    fn tags_become_unique_slugs() {
        let tags = vec![
            "Gluten Free".to_string(),
            "gluten-free".to_string(),
            "  ".to_string(),
            "Vegan".to_string(),
        ];
        assert_eq!(normalize_tags(tags), vec!["gluten-free", "vegan"]);
    }
}
