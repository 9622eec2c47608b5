//! Append-only trail of who changed what.

use serde_json::Value;
use uuid::Uuid;

use crate::db::DbPool;

/// Writes one `audit_logs` row. Failures are logged and swallowed so a
/// broken audit insert never fails the request that triggered it.
pub async fn record(pool: &DbPool, user_id: Uuid, action: &str, resource: &str, metadata: Value) {
    let result = sqlx::query(
        r#"
        INSERT INTO audit_logs (id, user_id, action, resource, metadata)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(action)
    .bind(resource)
    .bind(metadata)
    .execute(pool)
    .await;

    if let Err(err) = result {
        tracing::warn!(error = %err, action, resource, "audit log failed");
    }
}
