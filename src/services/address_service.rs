use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, Condition, ConnectionTrait, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
    sea_query::{Expr, LockType},
};
use uuid::Uuid;

use crate::{
    audit,
    dto::addresses::{AddressList, CreateAddressRequest, UpdateAddressRequest},
    entity::{
        Addresses, Users,
        addresses::{ActiveModel, Column, Model as AddressModel},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::Address,
    response::{ApiResponse, Meta},
    state::AppState,
    validation::{FieldErrors, is_valid_phone},
};

pub async fn list_addresses(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<AddressList>> {
    let items: Vec<Address> = Addresses::find()
        .filter(Column::UserId.eq(user.user_id))
        .order_by_desc(Column::IsDefault)
        .order_by_desc(Column::CreatedAt)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Address::from)
        .collect();

    Ok(ApiResponse::success("OK", AddressList { items }, Some(Meta::empty())))
}

pub async fn create_address(
    state: &AppState,
    user: &AuthUser,
    payload: CreateAddressRequest,
) -> AppResult<ApiResponse<Address>> {
    let mut errors = FieldErrors::new();
    errors
        .require("full_name", payload.full_name.as_deref())
        .require("phone", payload.phone.as_deref())
        .require("address", payload.address.as_deref())
        .require("city", payload.city.as_deref())
        .require("state", payload.state.as_deref())
        .require("zip_code", payload.zip_code.as_deref());
    if let Some(phone) = payload.phone.as_deref().filter(|p| !p.trim().is_empty()) {
        errors.check("phone", is_valid_phone(phone));
    }
    errors.into_result()?;

    let txn = state.orm.begin().await?;
    lock_owner(&txn, user.user_id).await?;

    let existing = Addresses::find()
        .filter(Column::UserId.eq(user.user_id))
        .count(&txn)
        .await?;
    // The first address is always the default.
    let is_default = payload.is_default || existing == 0;
    if is_default {
        clear_default(&txn, user.user_id).await?;
    }

    let text = |value: Option<String>| value.map(|v| v.trim().to_string()).unwrap_or_default();
    let address = ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user.user_id),
        full_name: Set(text(payload.full_name)),
        phone: Set(text(payload.phone)),
        address: Set(text(payload.address)),
        city: Set(text(payload.city)),
        state: Set(text(payload.state)),
        zip_code: Set(text(payload.zip_code)),
        country: Set(Some(text(payload.country))
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| "US".to_string())),
        is_default: Set(is_default),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;

    audit::record(
        &state.pool,
        user.user_id,
        "address_create",
        "addresses",
        serde_json::json!({ "address_id": address.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Address saved",
        Address::from(address),
        Some(Meta::empty()),
    ))
}

pub async fn update_address(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateAddressRequest,
) -> AppResult<ApiResponse<Address>> {
    let mut errors = FieldErrors::new();
    for (field, value) in [
        ("full_name", &payload.full_name),
        ("phone", &payload.phone),
        ("address", &payload.address),
        ("city", &payload.city),
        ("state", &payload.state),
        ("zip_code", &payload.zip_code),
    ] {
        if let Some(value) = value {
            errors.require(field, Some(value.as_str()));
        }
    }
    if let Some(phone) = payload.phone.as_deref().filter(|p| !p.trim().is_empty()) {
        errors.check("phone", is_valid_phone(phone));
    }
    errors.into_result()?;

    let txn = state.orm.begin().await?;
    lock_owner(&txn, user.user_id).await?;
    let existing = find_owned(&txn, user.user_id, id).await?;

    if payload.is_default == Some(true) {
        clear_default(&txn, user.user_id).await?;
    }

    let mut active: ActiveModel = existing.into();
    if let Some(v) = payload.full_name {
        active.full_name = Set(v.trim().to_string());
    }
    if let Some(v) = payload.phone {
        active.phone = Set(v.trim().to_string());
    }
    if let Some(v) = payload.address {
        active.address = Set(v.trim().to_string());
    }
    if let Some(v) = payload.city {
        active.city = Set(v.trim().to_string());
    }
    if let Some(v) = payload.state {
        active.state = Set(v.trim().to_string());
    }
    if let Some(v) = payload.zip_code {
        active.zip_code = Set(v.trim().to_string());
    }
    if let Some(v) = payload.country.filter(|c| !c.trim().is_empty()) {
        active.country = Set(v.trim().to_string());
    }
    if let Some(is_default) = payload.is_default {
        active.is_default = Set(is_default);
    }
    active.updated_at = Set(Utc::now().into());
    let address = active.update(&txn).await?;

    txn.commit().await?;

    audit::record(
        &state.pool,
        user.user_id,
        "address_update",
        "addresses",
        serde_json::json!({ "address_id": address.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Address updated",
        Address::from(address),
        Some(Meta::empty()),
    ))
}

pub async fn delete_address(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let txn = state.orm.begin().await?;
    lock_owner(&txn, user.user_id).await?;
    let existing = find_owned(&txn, user.user_id, id).await?;
    let was_default = existing.is_default;

    Addresses::delete_by_id(existing.id).exec(&txn).await?;

    if was_default {
        let next = Addresses::find()
            .filter(Column::UserId.eq(user.user_id))
            .order_by_desc(Column::CreatedAt)
            .one(&txn)
            .await?;
        if let Some(next) = next {
            let mut active: ActiveModel = next.into();
            active.is_default = Set(true);
            active.updated_at = Set(Utc::now().into());
            active.update(&txn).await?;
        }
    }

    txn.commit().await?;

    audit::record(
        &state.pool,
        user.user_id,
        "address_delete",
        "addresses",
        serde_json::json!({ "address_id": id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

pub async fn set_default_address(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Address>> {
    let txn = state.orm.begin().await?;
    lock_owner(&txn, user.user_id).await?;
    let existing = find_owned(&txn, user.user_id, id).await?;

    clear_default(&txn, user.user_id).await?;

    let mut active: ActiveModel = existing.into();
    active.is_default = Set(true);
    active.updated_at = Set(Utc::now().into());
    let address = active.update(&txn).await?;

    txn.commit().await?;

    Ok(ApiResponse::success(
        "Default address updated",
        Address::from(address),
        Some(Meta::empty()),
    ))
}

/// Address writes for one user serialize on the user row, so the default
/// flag is read and changed by one transaction at a time.
async fn lock_owner<C>(conn: &C, user_id: Uuid) -> AppResult<()>
where
    C: ConnectionTrait,
{
    Users::find_by_id(user_id)
        .lock(LockType::Update)
        .one(conn)
        .await?
        .ok_or(AppError::Unauthenticated)?;
    Ok(())
}

async fn find_owned<C>(conn: &C, user_id: Uuid, id: Uuid) -> AppResult<AddressModel>
where
    C: ConnectionTrait,
{
    Addresses::find()
        .filter(
            Condition::all()
                .add(Column::Id.eq(id))
                .add(Column::UserId.eq(user_id)),
        )
        .one(conn)
        .await?
        .ok_or(AppError::NotFound)
}

async fn clear_default<C>(conn: &C, user_id: Uuid) -> AppResult<()>
where
    C: ConnectionTrait,
{
    Addresses::update_many()
        .col_expr(Column::IsDefault, Expr::value(false))
        .filter(
            Condition::all()
                .add(Column::UserId.eq(user_id))
                .add(Column::IsDefault.eq(true)),
        )
        .exec(conn)
        .await?;
    Ok(())
}
