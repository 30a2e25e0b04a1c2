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
    repository::table_service::{create_row, get_row, list_rows, update_row},
    schemas::{
        clamp_limit_in_range, remove_nulls, serialize_to_map, validate_input, CreatePropertyInput,
        PropertiesQuery, PropertyPath, UpdatePropertyInput,
    },
    services::occupancy::assert_property_owner,
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/properties",
            axum::routing::get(list_properties).post(create_property),
        )
        .route(
            "/properties/{property_id}",
            axum::routing::get(get_property).patch(update_property),
        )
        .route(
            "/properties/{property_id}/archive",
            axum::routing::post(archive_property),
        )
}

async fn list_properties(
    State(state): State<AppState>,
    Query(query): Query<PropertiesQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    filters.insert("owner_user_id".to_string(), Value::String(user_id));
    if let Some(status) = non_empty_opt(query.status.as_deref()) {
        filters.insert("status".to_string(), Value::String(status));
    }

    let mut rows = list_rows(
        pool,
        "managed_properties",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 1000),
        0,
        "created_at",
        false,
    )
    .await?;

    // Archived properties stay out of active listings unless asked for.
    if !query.include_archived && query.status.as_deref() != Some("archived") {
        rows.retain(|row| value_str(row, "status") != "archived");
    }

    Ok(Json(json!({ "data": rows })))
}

async fn create_property(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreatePropertyInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;
    validate_input(&payload)?;

    if payload.monthly_rent <= 0.0 {
        return Err(AppError::UnprocessableEntity(
            "Monthly rent must be strictly positive.".to_string(),
        ));
    }
    if payload.charges < 0.0 {
        return Err(AppError::UnprocessableEntity(
            "Charges must not be negative.".to_string(),
        ));
    }

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert("owner_user_id".to_string(), Value::String(user_id));
    record.insert("status".to_string(), Value::String("vacant".to_string()));

    let created = create_row(pool, "managed_properties", &record).await?;
    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn get_property(
    State(state): State<AppState>,
    Path(path): Path<PropertyPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "managed_properties", &path.property_id, "id").await?;
    assert_property_owner(&record, &user_id)?;
    Ok(Json(record))
}

async fn update_property(
    State(state): State<AppState>,
    Path(path): Path<PropertyPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdatePropertyInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "managed_properties", &path.property_id, "id").await?;
    assert_property_owner(&record, &user_id)?;

    if value_str(&record, "status") == "archived" {
        return Err(AppError::UnprocessableEntity(
            "Archived properties cannot be updated.".to_string(),
        ));
    }
    if payload.monthly_rent.is_some_and(|rent| rent <= 0.0) {
        return Err(AppError::UnprocessableEntity(
            "Monthly rent must be strictly positive.".to_string(),
        ));
    }
    if payload.charges.is_some_and(|charges| charges < 0.0) {
        return Err(AppError::UnprocessableEntity(
            "Charges must not be negative.".to_string(),
        ));
    }

    // Occupancy status is owned by the coordinator; a patch never touches it.
    let patch = remove_nulls(serialize_to_map(&payload));
    let updated = update_row(pool, "managed_properties", &path.property_id, &patch, "id").await?;
    Ok(Json(updated))
}

async fn archive_property(
    State(state): State<AppState>,
    Path(path): Path<PropertyPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "managed_properties", &path.property_id, "id").await?;
    assert_property_owner(&record, &user_id)?;

    if value_str(&record, "status") == "archived" {
        return Ok(Json(record));
    }

    let mut filters = Map::new();
    filters.insert(
        "property_id".to_string(),
        Value::String(path.property_id.clone()),
    );
    filters.insert("status".to_string(), Value::String("active".to_string()));
    let active_tenants = list_rows(pool, "tenants", Some(&filters), 1, 0, "created_at", false).await?;
    if !active_tenants.is_empty() {
        return Err(AppError::UnprocessableEntity(
            "Cannot archive a property with an active tenant.".to_string(),
        ));
    }

    let mut patch = Map::new();
    patch.insert("status".to_string(), Value::String("archived".to_string()));
    let updated = update_row(pool, "managed_properties", &path.property_id, &patch, "id").await?;

    tracing::info!(property_id = %path.property_id, "Property archived");
    Ok(Json(updated))
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
