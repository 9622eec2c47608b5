use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, Condition, ConnectionTrait, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
    sea_query::{Expr, LockType},
};
use uuid::Uuid;

use crate::{
    audit,
    dto::orders::{
        OrderList, OrderWithItems, PaymentMethod, PlaceOrderRequest, ShippingInfo,
        ShippingInfoInput,
    },
    entity::{
        CartItems, OrderItems, Orders, Products,
        cart_items::Column as CartItemCol,
        order_items::{ActiveModel as OrderItemActive, Column as OrderItemCol},
        orders::{ActiveModel as OrderActive, Column as OrderCol, Model as OrderModel},
        products::{Column as ProdCol, Model as ProductModel},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderItem, OrderStatus, PaymentStatus},
    pricing,
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    services::cart_service::lock_cart,
    state::AppState,
    validation::{FieldErrors, is_valid_email, is_valid_intent_id},
};

const INTENT_ALREADY_USED: &str = "Payment intent has already been used";

pub async fn place_order(
    state: &AppState,
    user: &AuthUser,
    payload: PlaceOrderRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let shipping = validate_shipping(payload.shipping_info)?;
    let payment = payload.payment_info;

    let intent_id = match (payment.method, payment.payment_intent_id.as_deref().map(str::trim)) {
        (PaymentMethod::Card, Some(id)) if !id.is_empty() => {
            if !is_valid_intent_id(id) {
                return Err(AppError::validation(["payment_info"]));
            }
            Some(id)
        }
        _ => None,
    };

    // Ask the gateway before opening the transaction so no locks are held
    // across the network call.
    let intent = match intent_id {
        Some(id) => {
            ensure_intent_unused(state, id).await?;
            let intent = state.payments.retrieve_intent(id).await?;
            if intent.id != id || !intent.currency.eq_ignore_ascii_case(pricing::CURRENCY) {
                return Err(AppError::validation(["payment_info"]));
            }
            Some(intent)
        }
        None => None,
    };

    let txn = state.orm.begin().await?;

    let cart = lock_cart(&txn, user.user_id, false)
        .await?
        .ok_or_else(|| AppError::BadRequest("Cart is empty".into()))?;

    let lines = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart.id))
        .order_by_asc(CartItemCol::CreatedAt)
        .all(&txn)
        .await?;

    if lines.is_empty() {
        return Err(AppError::BadRequest("Cart is empty".into()));
    }

    let product_ids: Vec<Uuid> = lines.iter().map(|line| line.product_id).collect();
    let products: HashMap<Uuid, ProductModel> = Products::find()
        .filter(ProdCol::Id.is_in(product_ids))
        .lock(LockType::Update)
        .all(&txn)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    for line in &lines {
        let product = products.get(&line.product_id).ok_or(AppError::NotFound)?;
        if product.stock < line.quantity {
            return Err(AppError::OutOfStock {
                available: product.stock,
            });
        }
    }

    let subtotal = pricing::subtotal(lines.iter().map(|line| (line.price, line.quantity)));
    let total_amount = pricing::grand_total(subtotal);
    if !pricing::totals_match(payload.total_amount, total_amount) {
        tracing::warn!(
            declared = %payload.total_amount,
            computed = %total_amount,
            "order total mismatch"
        );
        return Err(AppError::validation(["total_amount"]));
    }

    let payment_status = match &intent {
        Some(intent) if intent.succeeded() => {
            if pricing::to_minor_units(total_amount) != Some(intent.amount) {
                return Err(AppError::validation(["payment_info"]));
            }
            PaymentStatus::Paid
        }
        _ => PaymentStatus::Unpaid,
    };

    let now = Utc::now();
    let order_id = Uuid::new_v4();
    let shipping_json =
        serde_json::to_value(&shipping).map_err(|e| AppError::Internal(e.into()))?;
    let payment_json = serde_json::json!({
        "method": payment.method,
        "payment_intent_id": intent.as_ref().map(|i| i.id.clone()),
    });

    let order = OrderActive {
        id: Set(order_id),
        user_id: Set(user.user_id),
        order_number: Set(build_order_number(order_id, now)),
        shipping_info: Set(shipping_json),
        payment_info: Set(payment_json),
        subtotal: Set(subtotal),
        shipping_fee: Set(pricing::SHIPPING_FEE),
        total_amount: Set(total_amount),
        status: Set(OrderStatus::Pending.to_string()),
        payment_status: Set(payment_status.to_string()),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await
    .map_err(|e| AppError::conflict_on_unique(e, INTENT_ALREADY_USED))?;

    let mut items: Vec<OrderItem> = Vec::with_capacity(lines.len());
    for line in &lines {
        let product_name = products
            .get(&line.product_id)
            .map(|p| p.name.clone())
            .unwrap_or_default();

        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(Some(line.product_id)),
            product_name: Set(product_name),
            price: Set(line.price),
            quantity: Set(line.quantity),
            created_at: NotSet,
        }
        .insert(&txn)
        .await?;
        items.push(item.into());

        Products::update_many()
            .col_expr(ProdCol::Stock, Expr::col(ProdCol::Stock).sub(line.quantity))
            .filter(ProdCol::Id.eq(line.product_id))
            .exec(&txn)
            .await?;
    }

    CartItems::delete_many()
        .filter(CartItemCol::CartId.eq(cart.id))
        .exec(&txn)
        .await?;

    txn.commit().await?;

    tracing::info!(
        order_id = %order.id,
        order_number = %order.order_number,
        total = %order.total_amount,
        "order placed"
    );
    audit::record(
        &state.pool,
        user.user_id,
        "order_place",
        "orders",
        serde_json::json!({ "order_id": order.id, "total_amount": order.total_amount }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order placed",
        OrderWithItems {
            order: order.into(),
            items,
        },
        Some(Meta::empty()),
    ))
}

/// One intent pays for one order. The unique index on the stored intent id
/// catches concurrent checkouts that pass this check together.
async fn ensure_intent_unused(state: &AppState, intent_id: &str) -> AppResult<()> {
    let used: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM orders WHERE payment_info->>'payment_intent_id' = $1)",
    )
    .bind(intent_id)
    .fetch_one(&state.pool)
    .await?;

    if used {
        tracing::warn!(intent_id, "payment intent reuse rejected");
        return Err(AppError::Conflict(INTENT_ALREADY_USED.into()));
    }
    Ok(())
}

pub async fn list_my_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination().normalize();
    let mut condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(OrderCol::Status.eq(status.clone()));
    }

    let mut finder = Orders::find().filter(condition);
    finder = match query.sort_order.unwrap_or(SortOrder::Desc) {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Order::from)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Ok", OrderList { items: orders }, Some(meta)))
}

pub async fn get_my_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    // Another user's order is indistinguishable from a missing one.
    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Id.eq(id)),
        )
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let data = with_items(&state.orm, order).await?;
    Ok(ApiResponse::success("OK", data, Some(Meta::empty())))
}

pub(crate) async fn with_items<C>(conn: &C, order: OrderModel) -> AppResult<OrderWithItems>
where
    C: ConnectionTrait,
{
    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .order_by_asc(OrderItemCol::CreatedAt)
        .all(conn)
        .await?
        .into_iter()
        .map(OrderItem::from)
        .collect();

    Ok(OrderWithItems {
        order: order.into(),
        items,
    })
}

/// Checks every required shipping field and reports all failures together.
pub fn validate_shipping(input: ShippingInfoInput) -> AppResult<ShippingInfo> {
    let mut errors = FieldErrors::new();
    errors
        .require("first_name", input.first_name.as_deref())
        .require("last_name", input.last_name.as_deref())
        .require("email", input.email.as_deref())
        .require("phone", input.phone.as_deref())
        .require("address", input.address.as_deref())
        .require("city", input.city.as_deref())
        .require("state", input.state.as_deref())
        .require("zip_code", input.zip_code.as_deref());
    if let Some(email) = input.email.as_deref().filter(|e| !e.trim().is_empty()) {
        errors.check("email", is_valid_email(email.trim()));
    }
    errors.into_result()?;

    let field = |value: Option<String>| value.map(|v| v.trim().to_string()).unwrap_or_default();
    Ok(ShippingInfo {
        first_name: field(input.first_name),
        last_name: field(input.last_name),
        email: field(input.email).to_lowercase(),
        phone: field(input.phone),
        address: field(input.address),
        city: field(input.city),
        state: field(input.state),
        zip_code: field(input.zip_code),
        country: Some(field(input.country))
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| "US".to_string()),
    })
}

/// `ORD-YYYYMMDD-XXXXXXXX`, the suffix taken from the order id.
pub fn build_order_number(order_id: Uuid, placed_at: DateTime<Utc>) -> String {
    let date = placed_at.format("%Y%m%d");
    let suffix = order_id.simple().to_string();
    format!("ORD-{}-{}", date, suffix[..8].to_uppercase())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn complete_shipping() -> ShippingInfoInput {
        ShippingInfoInput {
            first_name: Some("Ada".into()),
            last_name: Some("Lovelace".into()),
            email: Some("Ada@Example.com".into()),
            phone: Some("+1 555 0100".into()),
            address: Some("1 Oat Lane".into()),
            city: Some("Portland".into()),
            state: Some("OR".into()),
            zip_code: Some("97201".into()),
            country: None,
        }
    }

    #[test]
    fn complete_shipping_is_accepted_with_default_country() {
        let info = validate_shipping(complete_shipping()).unwrap();
        assert_eq!(info.country, "US");
        assert_eq!(info.email, "ada@example.com");
    }

    #[test]
    fn every_missing_field_is_reported() {
        let input = ShippingInfoInput {
            city: Some("  ".into()),
            zip_code: None,
            email: Some("not-an-email".into()),
            ..complete_shipping()
        };
        match validate_shipping(input) {
            Err(AppError::Validation(fields)) => {
                assert_eq!(fields, vec!["city", "zip_code", "email"]);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn empty_shipping_lists_all_required_fields() {
        match validate_shipping(ShippingInfoInput::default()) {
            Err(AppError::Validation(fields)) => assert_eq!(fields.len(), 8),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn order_number_format() {
        let id = Uuid::parse_str("a1b2c3d4-0000-4000-8000-000000000000").unwrap();
        let at = Utc.with_ymd_and_hms(2025, 3, 9, 12, 0, 0).unwrap();
        assert_eq!(build_order_number(id, at), "ORD-20250309-A1B2C3D4");
    }
}
