use axum::{Json, Router, extract::State, routing::get};

use crate::{
    dto::categories::CategoryList, error::AppResult, response::ApiResponse,
    services::category_service, state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_categories))
}

#[utoipa::path(
    get,
    path = "/api/categories",
    responses(
        (status = 200, description = "Active categories with product counts", body = ApiResponse<CategoryList>)
    ),
    tag = "Products"
)]
pub async fn list_categories(
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<CategoryList>>> {
    let resp = category_service::list_categories(&state, true).await?;
    Ok(Json(resp))
}
