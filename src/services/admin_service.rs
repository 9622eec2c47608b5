use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
    sea_query::{Expr, LockType},
};
use uuid::Uuid;

use crate::{
    audit,
    db::contains_pattern,
    dto::{
        admin::{
            CustomerList, CustomerSummary, DailySales, DashboardStats, SalesReport,
            StatusBreakdown, TopProduct, UpdateOrderStatusRequest,
        },
        orders::{OrderList, OrderWithItems},
        products::ProductList,
    },
    entity::{
        OrderItems, Orders, Products,
        order_items::Column as OrderItemCol,
        orders::{ActiveModel as OrderActive, Column as OrderCol},
        products::Column as ProdCol,
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Order, OrderStatus, PaymentStatus, Product},
    response::{ApiResponse, Meta},
    routes::params::{CustomerQuery, OrderListQuery, ProductQuery, ReportQuery, SortOrder},
    services::{order_service, product_service},
    state::AppState,
};

pub const LOW_STOCK_THRESHOLD: i32 = 10;
const RECENT_ORDERS: u64 = 5;
const REPORT_DAYS: i64 = 30;

pub async fn list_products(
    state: &AppState,
    user: &AuthUser,
    query: ProductQuery,
) -> AppResult<ApiResponse<ProductList>> {
    ensure_admin(user)?;
    product_service::list_products(state, query).await
}

pub async fn list_all_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = query.pagination().normalize();

    let mut condition = Condition::all();
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
    Ok(ApiResponse::success("Orders", OrderList { items: orders }, Some(meta)))
}

pub async fn get_order_admin(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    ensure_admin(user)?;
    let order = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let data = order_service::with_items(&state.orm, order).await?;
    Ok(ApiResponse::success("OK", data, Some(Meta::empty())))
}

/// Partial status update. Illegal transitions and unknown values are rejected;
/// cancelling an order puts its quantities back into stock.
pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    ensure_admin(user)?;

    if payload.status.is_none() && payload.payment_status.is_none() {
        return Err(AppError::BadRequest(
            "status or payment_status is required".into(),
        ));
    }
    let next_status = payload
        .status
        .as_deref()
        .map(str::parse::<OrderStatus>)
        .transpose()
        .map_err(AppError::BadRequest)?;
    let next_payment = payload
        .payment_status
        .as_deref()
        .map(str::parse::<PaymentStatus>)
        .transpose()
        .map_err(AppError::BadRequest)?;

    let txn = state.orm.begin().await?;

    let order = Orders::find_by_id(id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    let current_status: OrderStatus = order
        .status
        .parse()
        .map_err(|e: String| AppError::Internal(anyhow::anyhow!(e)))?;
    let current_payment: PaymentStatus = order
        .payment_status
        .parse()
        .map_err(|e: String| AppError::Internal(anyhow::anyhow!(e)))?;

    if let Some(next) = next_status {
        if !current_status.can_transition_to(next) {
            return Err(AppError::BadRequest(format!(
                "Cannot change order status from {current_status} to {next}"
            )));
        }
    }
    if let Some(next) = next_payment {
        if !current_payment.can_transition_to(next) {
            return Err(AppError::BadRequest(format!(
                "Cannot change payment status from {current_payment} to {next}"
            )));
        }
    }

    let cancelling =
        next_status == Some(OrderStatus::Cancelled) && current_status != OrderStatus::Cancelled;
    if cancelling {
        let items = OrderItems::find()
            .filter(OrderItemCol::OrderId.eq(order.id))
            .all(&txn)
            .await?;
        for item in items {
            if let Some(product_id) = item.product_id {
                Products::update_many()
                    .col_expr(ProdCol::Stock, Expr::col(ProdCol::Stock).add(item.quantity))
                    .filter(ProdCol::Id.eq(product_id))
                    .exec(&txn)
                    .await?;
            }
        }
    }

    let mut active: OrderActive = order.into();
    if let Some(next) = next_status {
        active.status = Set(next.to_string());
    }
    if let Some(next) = next_payment {
        active.payment_status = Set(next.to_string());
    }
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;

    txn.commit().await?;

    tracing::info!(
        order_id = %order.id,
        status = %order.status,
        payment_status = %order.payment_status,
        "order status updated"
    );
    audit::record(
        &state.pool,
        user.user_id,
        "order_status_update",
        "orders",
        serde_json::json!({
            "order_id": order.id,
            "status": order.status,
            "payment_status": order.payment_status,
        }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order updated",
        Order::from(order),
        Some(Meta::empty()),
    ))
}

pub async fn list_customers(
    state: &AppState,
    user: &AuthUser,
    query: CustomerQuery,
) -> AppResult<ApiResponse<CustomerList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = query.pagination().normalize();
    let pattern = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(contains_pattern);

    let items = sqlx::query_as::<_, CustomerSummary>(
        r#"
        SELECT u.id, u.name, u.email, u.phone, u.created_at AS joined_at,
               COUNT(o.id) AS order_count,
               COALESCE(SUM(o.total_amount) FILTER (WHERE o.status <> 'cancelled'), 0) AS total_spent
        FROM users u
        LEFT JOIN orders o ON o.user_id = u.id
        WHERE u.is_admin = FALSE
          AND ($1::text IS NULL OR u.name ILIKE $1 OR u.email ILIKE $1)
        GROUP BY u.id
        ORDER BY u.created_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(pattern.as_deref())
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.pool)
    .await?;

    let total: (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM users u
        WHERE u.is_admin = FALSE
          AND ($1::text IS NULL OR u.name ILIKE $1 OR u.email ILIKE $1)
        "#,
    )
    .bind(pattern.as_deref())
    .fetch_one(&state.pool)
    .await?;

    let meta = Meta::new(page, limit, total.0);
    Ok(ApiResponse::success("Customers", CustomerList { items }, Some(meta)))
}

pub async fn dashboard(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<DashboardStats>> {
    ensure_admin(user)?;

    let (total_revenue, total_orders, pending_orders): (Decimal, i64, i64) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(total_amount) FILTER (WHERE payment_status = 'paid'), 0),
               COUNT(*),
               COUNT(*) FILTER (WHERE status = 'pending')
        FROM orders
        "#,
    )
    .fetch_one(&state.pool)
    .await?;

    let (total_customers,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM users WHERE is_admin = FALSE")
            .fetch_one(&state.pool)
            .await?;

    let total_products = Products::find().count(&state.orm).await? as i64;

    let low_stock_products = Products::find()
        .filter(ProdCol::Stock.lte(LOW_STOCK_THRESHOLD))
        .order_by_asc(ProdCol::Stock)
        .order_by_asc(ProdCol::Name)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Product::from)
        .collect();

    let recent_orders = Orders::find()
        .order_by_desc(OrderCol::CreatedAt)
        .limit(RECENT_ORDERS)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Order::from)
        .collect();

    Ok(ApiResponse::success(
        "Dashboard",
        DashboardStats {
            total_revenue,
            total_orders,
            pending_orders,
            total_customers,
            total_products,
            low_stock_products,
            recent_orders,
        },
        Some(Meta::empty()),
    ))
}

pub async fn reports(
    state: &AppState,
    user: &AuthUser,
    query: ReportQuery,
) -> AppResult<ApiResponse<SalesReport>> {
    ensure_admin(user)?;

    let to = query.to.unwrap_or_else(|| Utc::now().date_naive());
    let from = query
        .from
        .unwrap_or_else(|| to - Duration::days(REPORT_DAYS - 1));
    if from > to {
        return Err(AppError::BadRequest("from must not be after to".into()));
    }

    let daily = sqlx::query_as::<_, DailySales>(
        r#"
        SELECT d::date AS date,
               COUNT(o.id) AS orders,
               COALESCE(SUM(o.total_amount), 0) AS revenue
        FROM generate_series($1::date, $2::date, INTERVAL '1 day') AS d
        LEFT JOIN orders o
               ON o.created_at::date = d::date AND o.status <> 'cancelled'
        GROUP BY d
        ORDER BY d
        "#,
    )
    .bind(from)
    .bind(to)
    .fetch_all(&state.pool)
    .await?;

    let by_status = sqlx::query_as::<_, StatusBreakdown>(
        r#"
        SELECT status, COUNT(*) AS orders, COALESCE(SUM(total_amount), 0) AS revenue
        FROM orders
        WHERE created_at::date BETWEEN $1 AND $2
        GROUP BY status
        ORDER BY status
        "#,
    )
    .bind(from)
    .bind(to)
    .fetch_all(&state.pool)
    .await?;

    let top_products = sqlx::query_as::<_, TopProduct>(
        r#"
        SELECT oi.product_name,
               SUM(oi.quantity)::bigint AS quantity,
               COALESCE(SUM(oi.price * oi.quantity), 0) AS revenue
        FROM order_items oi
        JOIN orders o ON o.id = oi.order_id
        WHERE o.status <> 'cancelled' AND o.created_at::date BETWEEN $1 AND $2
        GROUP BY oi.product_name
        ORDER BY quantity DESC, oi.product_name
        LIMIT 5
        "#,
    )
    .bind(from)
    .bind(to)
    .fetch_all(&state.pool)
    .await?;

    Ok(ApiResponse::success(
        "Report",
        SalesReport {
            from,
            to,
            daily,
            by_status,
            top_products,
        },
        Some(Meta::empty()),
    ))
}
