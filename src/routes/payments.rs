use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};

use crate::{
    auth::require_user_id,
    error::{AppError, AppResult},
    repository::table_service::{get_row, list_rows},
    schemas::{clamp_limit_in_range, CreatePaymentInput, PaymentsQuery},
    services::calendar::today_in_timezone,
    services::rent_billing,
    state::AppState,
};

use super::tenants::{owned_property_ids, resolve_owned_tenant};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route(
        "/payments",
        axum::routing::get(list_payments).post(create_payment),
    )
}

async fn create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreatePaymentInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let tenant = resolve_owned_tenant(pool, &payload.tenant_id, &user_id).await?;
    let today = today_in_timezone(&state.config.reporting_timezone);

    let payment = rent_billing::create_payment(pool, &tenant, &payload, &user_id, today).await?;
    Ok((axum::http::StatusCode::CREATED, Json(payment)))
}

async fn list_payments(
    State(state): State<AppState>,
    Query(query): Query<PaymentsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    if let Some(due_date_id) = non_empty_opt(query.due_date_id.as_deref()) {
        let due_date = get_row(pool, "due_dates", &due_date_id, "id").await?;
        resolve_owned_tenant(pool, &value_str(&due_date, "tenant_id"), &user_id).await?;
        filters.insert("due_date_id".to_string(), Value::String(due_date_id));
    } else if let Some(tenant_id) = non_empty_opt(query.tenant_id.as_deref()) {
        resolve_owned_tenant(pool, &tenant_id, &user_id).await?;
        filters.insert("tenant_id".to_string(), Value::String(tenant_id));
    } else {
        let property_ids = owned_property_ids(pool, &user_id).await?;
        if property_ids.is_empty() {
            return Ok(Json(json!({ "data": [] })));
        }
        let tenant_ids = tenants_of_properties(pool, property_ids).await?;
        if tenant_ids.is_empty() {
            return Ok(Json(json!({ "data": [] })));
        }
        filters.insert(
            "tenant_id".to_string(),
            Value::Array(tenant_ids.into_iter().map(Value::String).collect()),
        );
    }

    let rows = list_rows(
        pool,
        "payments",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 2000),
        0,
        "payment_date",
        false,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

pub async fn tenants_of_properties(
    pool: &sqlx::PgPool,
    property_ids: Vec<String>,
) -> AppResult<Vec<String>> {
    let mut filters = Map::new();
    filters.insert(
        "property_id".to_string(),
        Value::Array(property_ids.into_iter().map(Value::String).collect()),
    );
    let tenants = list_rows(pool, "tenants", Some(&filters), 2000, 0, "created_at", false).await?;
    Ok(tenants
        .iter()
        .map(|row| value_str(row, "id"))
        .filter(|id| !id.is_empty())
        .collect())
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

fn value_str(row: &Value, key: &str) -> String {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}

fn non_empty_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}
