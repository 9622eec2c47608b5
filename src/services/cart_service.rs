use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, Condition, ConnectionTrait, DbBackend,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set, Statement, TransactionTrait,
    sea_query::LockType,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::cart::{AddToCartRequest, UpdateCartItemRequest},
    entity::{
        CartItems, Carts, Products,
        cart_items::{ActiveModel as CartItemActive, Column as CartItemCol},
        carts::{Column as CartCol, Model as CartModel},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Cart, CartItem},
    pricing,
    response::{ApiResponse, Meta},
    state::AppState,
};

pub async fn get_cart(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<Cart>> {
    let cart = load_cart(&state.orm, user.user_id).await?;
    Ok(ApiResponse::success("OK", cart, Some(Meta::empty())))
}

pub async fn add_to_cart(
    state: &AppState,
    user: &AuthUser,
    payload: AddToCartRequest,
) -> AppResult<ApiResponse<Cart>> {
    if payload.quantity < 1 {
        return Err(AppError::validation(["quantity"]));
    }

    let txn = state.orm.begin().await?;

    let product = Products::find_by_id(payload.product_id)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    let cart = lock_cart(&txn, user.user_id, true)
        .await?
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("cart row missing after upsert")))?;

    let existing = CartItems::find()
        .filter(
            Condition::all()
                .add(CartItemCol::CartId.eq(cart.id))
                .add(CartItemCol::ProductId.eq(product.id)),
        )
        .one(&txn)
        .await?;

    let in_cart = existing.as_ref().map(|item| item.quantity).unwrap_or(0);
    let wanted = in_cart
        .checked_add(payload.quantity)
        .filter(|wanted| *wanted <= product.stock)
        .ok_or(AppError::OutOfStock {
            available: product.stock,
        })?;

    match existing {
        Some(item) => {
            let mut active: CartItemActive = item.into();
            active.quantity = Set(wanted);
            active.price = Set(product.price);
            active.updated_at = Set(Utc::now().into());
            active.update(&txn).await?;
        }
        None => {
            CartItemActive {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                product_id: Set(product.id),
                quantity: Set(payload.quantity),
                price: Set(product.price),
                created_at: NotSet,
                updated_at: NotSet,
            }
            .insert(&txn)
            .await?;
        }
    }

    txn.commit().await?;

    audit::record(
        &state.pool,
        user.user_id,
        "cart_add",
        "cart_items",
        serde_json::json!({ "product_id": product.id, "quantity": payload.quantity }),
    )
    .await;

    let cart = load_cart(&state.orm, user.user_id).await?;
    Ok(ApiResponse::success("Added to cart", cart, Some(Meta::empty())))
}

pub async fn update_cart_item(
    state: &AppState,
    user: &AuthUser,
    item_id: Uuid,
    payload: UpdateCartItemRequest,
) -> AppResult<ApiResponse<Cart>> {
    if payload.quantity < 1 {
        return Err(AppError::BadRequest("quantity must be at least 1".into()));
    }

    let txn = state.orm.begin().await?;

    let cart = lock_cart(&txn, user.user_id, false)
        .await?
        .ok_or(AppError::NotFound)?;

    let item = CartItems::find()
        .filter(
            Condition::all()
                .add(CartItemCol::Id.eq(item_id))
                .add(CartItemCol::CartId.eq(cart.id)),
        )
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    let product = Products::find_by_id(item.product_id)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    if product.stock < payload.quantity {
        return Err(AppError::OutOfStock {
            available: product.stock,
        });
    }

    let mut active: CartItemActive = item.into();
    active.quantity = Set(payload.quantity);
    active.price = Set(product.price);
    active.updated_at = Set(Utc::now().into());
    active.update(&txn).await?;

    txn.commit().await?;

    audit::record(
        &state.pool,
        user.user_id,
        "cart_update",
        "cart_items",
        serde_json::json!({ "item_id": item_id, "quantity": payload.quantity }),
    )
    .await;

    let cart = load_cart(&state.orm, user.user_id).await?;
    Ok(ApiResponse::success("Cart updated", cart, Some(Meta::empty())))
}

pub async fn remove_cart_item(
    state: &AppState,
    user: &AuthUser,
    item_id: Uuid,
) -> AppResult<ApiResponse<Cart>> {
    let txn = state.orm.begin().await?;

    let cart = lock_cart(&txn, user.user_id, false)
        .await?
        .ok_or(AppError::NotFound)?;

    let result = CartItems::delete_many()
        .filter(
            Condition::all()
                .add(CartItemCol::Id.eq(item_id))
                .add(CartItemCol::CartId.eq(cart.id)),
        )
        .exec(&txn)
        .await?;

    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }

    txn.commit().await?;

    audit::record(
        &state.pool,
        user.user_id,
        "cart_remove",
        "cart_items",
        serde_json::json!({ "item_id": item_id }),
    )
    .await;

    let cart = load_cart(&state.orm, user.user_id).await?;
    Ok(ApiResponse::success("Removed from cart", cart, Some(Meta::empty())))
}

pub async fn clear_cart(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<Cart>> {
    let txn = state.orm.begin().await?;

    if let Some(cart) = lock_cart(&txn, user.user_id, false).await? {
        CartItems::delete_many()
            .filter(CartItemCol::CartId.eq(cart.id))
            .exec(&txn)
            .await?;
    }

    txn.commit().await?;

    Ok(ApiResponse::success("Cart cleared", Cart::empty(), Some(Meta::empty())))
}

/// Lock the user's cart row for the rest of the transaction, creating it first
/// when `create` is set. Concurrent cart writes for one user queue up here.
pub(crate) async fn lock_cart<C>(conn: &C, user_id: Uuid, create: bool) -> AppResult<Option<CartModel>>
where
    C: ConnectionTrait,
{
    if create {
        conn.execute(Statement::from_sql_and_values(
            DbBackend::Postgres,
            "INSERT INTO carts (id, user_id) VALUES ($1, $2) ON CONFLICT (user_id) DO NOTHING",
            [Uuid::new_v4().into(), user_id.into()],
        ))
        .await?;
    }

    let cart = Carts::find()
        .filter(CartCol::UserId.eq(user_id))
        .lock(LockType::Update)
        .one(conn)
        .await?;
    Ok(cart)
}

/// Current cart contents with totals computed from the price snapshots.
pub(crate) async fn load_cart<C>(conn: &C, user_id: Uuid) -> AppResult<Cart>
where
    C: ConnectionTrait,
{
    let Some(cart) = Carts::find()
        .filter(CartCol::UserId.eq(user_id))
        .one(conn)
        .await?
    else {
        return Ok(Cart::empty());
    };

    let items = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart.id))
        .order_by_asc(CartItemCol::CreatedAt)
        .find_also_related(Products)
        .all(conn)
        .await?
        .into_iter()
        .filter_map(|(item, product)| {
            let product = product?;
            Some(CartItem {
                id: item.id,
                product_id: product.id,
                name: product.name,
                slug: product.slug,
                image: product.image,
                price: item.price,
                quantity: item.quantity,
                stock: product.stock,
                line_total: pricing::round2(pricing::line_total(item.price, item.quantity)),
            })
        })
        .collect();

    Ok(Cart::from_items(items))
}
