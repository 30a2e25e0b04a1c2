use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};

use crate::{
    auth::require_user_id,
    error::{AppError, AppResult},
    repository::table_service::{get_row, list_rows, update_row},
    schemas::{
        clamp_limit_in_range, CreateDueDateInput, DueDatePath, DueDatesQuery,
        GenerateDueDatesInput, RefreshOverdueInput,
    },
    services::calendar::{today_in_timezone, Period},
    services::occupancy::assert_property_owner,
    services::rent_billing,
    state::AppState,
};

use super::tenants::{owned_property_ids, resolve_owned_tenant};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/due-dates",
            axum::routing::get(list_due_dates).post(create_due_date),
        )
        .route(
            "/due-dates/generate",
            axum::routing::post(generate_due_dates),
        )
        .route(
            "/due-dates/refresh-overdue",
            axum::routing::post(refresh_overdue),
        )
        .route(
            "/due-dates/{due_date_id}/cancel",
            axum::routing::post(cancel_due_date),
        )
}

async fn generate_due_dates(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<GenerateDueDatesInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let tenant = resolve_owned_tenant(pool, &payload.tenant_id, &user_id).await?;
    let property =
        get_row(pool, "managed_properties", &value_str(&tenant, "property_id"), "id").await?;

    let from = Period::new(payload.from_year, payload.from_month)?;
    let to = Period::new(payload.to_year, payload.to_month)?;

    let created = rent_billing::generate_due_dates(pool, &tenant, &property, from, to).await?;
    Ok((
        axum::http::StatusCode::CREATED,
        Json(json!({ "data": created })),
    ))
}

async fn create_due_date(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateDueDateInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let tenant = resolve_owned_tenant(pool, &payload.tenant_id, &user_id).await?;
    let property =
        get_row(pool, "managed_properties", &value_str(&tenant, "property_id"), "id").await?;

    let created = rent_billing::create_due_date(pool, &tenant, &property, &payload).await?;
    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn list_due_dates(
    State(state): State<AppState>,
    Query(query): Query<DueDatesQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    if let Some(tenant_id) = non_empty_opt(query.tenant_id.as_deref()) {
        resolve_owned_tenant(pool, &tenant_id, &user_id).await?;
        filters.insert("tenant_id".to_string(), Value::String(tenant_id));
    } else if let Some(property_id) = non_empty_opt(query.property_id.as_deref()) {
        let property = get_row(pool, "managed_properties", &property_id, "id").await?;
        assert_property_owner(&property, &user_id)?;
        filters.insert("property_id".to_string(), Value::String(property_id));
    } else {
        let property_ids = owned_property_ids(pool, &user_id).await?;
        if property_ids.is_empty() {
            return Ok(Json(json!({ "data": [] })));
        }
        filters.insert(
            "property_id".to_string(),
            Value::Array(property_ids.into_iter().map(Value::String).collect()),
        );
    }

    if let Some(status) = non_empty_opt(query.status.as_deref()) {
        if !rent_billing::is_due_date_status(&status) {
            return Err(AppError::BadRequest(format!(
                "Unknown due date status '{status}'."
            )));
        }
        filters.insert("status".to_string(), Value::String(status));
    }
    if let Some(due_from) = non_empty_opt(query.due_from.as_deref()) {
        filters.insert("due_date__gte".to_string(), Value::String(due_from));
    }
    if let Some(due_to) = non_empty_opt(query.due_to.as_deref()) {
        filters.insert("due_date__lte".to_string(), Value::String(due_to));
    }

    let rows = list_rows(
        pool,
        "due_dates",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 2000),
        0,
        "due_date",
        true,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn cancel_due_date(
    State(state): State<AppState>,
    Path(path): Path<DueDatePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let due_date = get_row(pool, "due_dates", &path.due_date_id, "id").await?;
    resolve_owned_tenant(pool, &value_str(&due_date, "tenant_id"), &user_id).await?;

    match value_str(&due_date, "status").as_str() {
        "cancelled" => return Ok(Json(due_date)),
        "paid" => {
            return Err(AppError::UnprocessableEntity(
                "A settled due date cannot be cancelled.".to_string(),
            ))
        }
        _ => {}
    }

    let mut patch = Map::new();
    patch.insert("status".to_string(), Value::String("cancelled".to_string()));
    let updated = update_row(pool, "due_dates", &path.due_date_id, &patch, "id").await?;

    tracing::info!(due_date_id = %path.due_date_id, "Due date cancelled");
    Ok(Json(updated))
}

async fn refresh_overdue(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RefreshOverdueInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let mut scope = Map::new();
    if let Some(tenant_id) = non_empty_opt(payload.tenant_id.as_deref()) {
        resolve_owned_tenant(pool, &tenant_id, &user_id).await?;
        scope.insert("tenant_id".to_string(), Value::String(tenant_id));
    } else if let Some(property_id) = non_empty_opt(payload.property_id.as_deref()) {
        let property = get_row(pool, "managed_properties", &property_id, "id").await?;
        assert_property_owner(&property, &user_id)?;
        scope.insert("property_id".to_string(), Value::String(property_id));
    } else {
        let property_ids = owned_property_ids(pool, &user_id).await?;
        if property_ids.is_empty() {
            return Ok(Json(json!({ "examined": 0, "marked_overdue": 0 })));
        }
        scope.insert(
            "property_id".to_string(),
            Value::Array(property_ids.into_iter().map(Value::String).collect()),
        );
    }

    let today = today_in_timezone(&state.config.reporting_timezone);
    let result = rent_billing::sweep_overdue(pool, scope, today).await?;
    Ok(Json(json!({
        "examined": result.examined,
        "marked_overdue": result.marked_overdue,
    })))
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
