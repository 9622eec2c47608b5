use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, Condition, EntityTrait, QueryFilter, Set,
};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    audit,
    dto::categories::{CategoryList, CreateCategoryRequest, UpdateCategoryRequest},
    entity::{
        Categories,
        categories::{ActiveModel, Column},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::Category,
    response::{ApiResponse, Meta},
    slug::slugify,
    state::AppState,
    validation::FieldErrors,
};

const DUPLICATE: &str = "A category with this name already exists";

#[derive(FromRow)]
struct CategoryRow {
    id: Uuid,
    name: String,
    slug: String,
    description: Option<String>,
    image: Option<String>,
    is_active: bool,
    product_count: i64,
    created_at: DateTime<Utc>,
}

impl From<CategoryRow> for Category {
    fn from(row: CategoryRow) -> Self {
        Category {
            id: row.id,
            name: row.name,
            slug: row.slug,
            description: row.description,
            image: row.image,
            is_active: row.is_active,
            product_count: row.product_count,
            created_at: row.created_at,
        }
    }
}

/// Categories sorted by name; product counts come from tag membership.
pub async fn list_categories(
    state: &AppState,
    active_only: bool,
) -> AppResult<ApiResponse<CategoryList>> {
    let rows = sqlx::query_as::<_, CategoryRow>(
        r#"
        SELECT c.id, c.name, c.slug, c.description, c.image, c.is_active, c.created_at,
               (SELECT COUNT(*) FROM products p WHERE c.slug = ANY(p.categories)) AS product_count
        FROM categories c
        WHERE ($1 = FALSE OR c.is_active)
        ORDER BY c.name
        "#,
    )
    .bind(active_only)
    .fetch_all(&state.pool)
    .await?;

    let total = rows.len() as i64;
    let items = rows.into_iter().map(Category::from).collect();
    Ok(ApiResponse::success(
        "Categories",
        CategoryList { items },
        Some(Meta::new(1, total.max(1), total)),
    ))
}

pub async fn list_all_categories(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<CategoryList>> {
    ensure_admin(user)?;
    list_categories(state, false).await
}

pub async fn create_category(
    state: &AppState,
    user: &AuthUser,
    payload: CreateCategoryRequest,
) -> AppResult<ApiResponse<Category>> {
    ensure_admin(user)?;

    let name = payload.name.trim().to_string();
    let slug = slugify(&name);
    let mut errors = FieldErrors::new();
    errors
        .require("name", Some(name.as_str()))
        .check("name", !slug.is_empty());
    errors.into_result()?;

    ensure_unique(state, &name, &slug, None).await?;

    let category = ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name),
        slug: Set(slug),
        description: Set(payload.description),
        image: Set(payload.image),
        is_active: Set(payload.is_active.unwrap_or(true)),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await
    .map_err(|e| AppError::conflict_on_unique(e, DUPLICATE))?;

    audit::record(
        &state.pool,
        user.user_id,
        "category_create",
        "categories",
        serde_json::json!({ "category_id": category.id, "slug": category.slug }),
    )
    .await;

    let count = product_count(state, &category.slug).await?;
    Ok(ApiResponse::success(
        "Category created",
        Category::from_entity(category, count),
        Some(Meta::empty()),
    ))
}

pub async fn update_category(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateCategoryRequest,
) -> AppResult<ApiResponse<Category>> {
    ensure_admin(user)?;

    let existing = Categories::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let rename = payload
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| *name != existing.name)
        .map(str::to_string);

    let mut active: ActiveModel = existing.into();
    if let Some(name) = rename {
        let slug = slugify(&name);
        let mut errors = FieldErrors::new();
        errors
            .require("name", Some(name.as_str()))
            .check("name", !slug.is_empty());
        errors.into_result()?;

        ensure_unique(state, &name, &slug, Some(id)).await?;
        active.name = Set(name);
        active.slug = Set(slug);
    }
    if let Some(description) = payload.description {
        active.description = Set(Some(description));
    }
    if let Some(image) = payload.image {
        active.image = Set(Some(image));
    }
    if let Some(is_active) = payload.is_active {
        active.is_active = Set(is_active);
    }
    active.updated_at = Set(Utc::now().into());

    let category = active
        .update(&state.orm)
        .await
        .map_err(|e| AppError::conflict_on_unique(e, DUPLICATE))?;

    audit::record(
        &state.pool,
        user.user_id,
        "category_update",
        "categories",
        serde_json::json!({ "category_id": category.id }),
    )
    .await;

    let count = product_count(state, &category.slug).await?;
    Ok(ApiResponse::success(
        "Updated",
        Category::from_entity(category, count),
        Some(Meta::empty()),
    ))
}

/// Products keep their tags; only the registry entry goes away.
pub async fn delete_category(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;
    let result = Categories::delete_by_id(id).exec(&state.orm).await?;
    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }

    audit::record(
        &state.pool,
        user.user_id,
        "category_delete",
        "categories",
        serde_json::json!({ "category_id": id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

async fn ensure_unique(
    state: &AppState,
    name: &str,
    slug: &str,
    except: Option<Uuid>,
) -> AppResult<()> {
    let mut condition = Condition::all().add(
        Condition::any()
            .add(Column::Name.eq(name))
            .add(Column::Slug.eq(slug)),
    );
    if let Some(id) = except {
        condition = condition.add(Column::Id.ne(id));
    }
    if Categories::find().filter(condition).one(&state.orm).await?.is_some() {
        return Err(AppError::Conflict(DUPLICATE.into()));
    }
    Ok(())
}

async fn product_count(state: &AppState, slug: &str) -> AppResult<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM products WHERE $1 = ANY(categories)")
        .bind(slug)
        .fetch_one(&state.pool)
        .await?;
    Ok(count)
}
