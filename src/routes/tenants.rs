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
    repository::table_service::{get_row, list_rows},
    schemas::{clamp_limit_in_range, validate_input, CreateTenantInput, TenantPath, TenantsQuery},
    services::occupancy::{self, assert_property_owner},
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/tenants",
            axum::routing::get(list_tenants).post(create_tenant),
        )
        .route("/tenants/{tenant_id}", axum::routing::get(get_tenant))
        .route(
            "/tenants/{tenant_id}/terminate",
            axum::routing::post(terminate_tenant),
        )
}

async fn list_tenants(
    State(state): State<AppState>,
    Query(query): Query<TenantsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    match non_empty_opt(query.property_id.as_deref()) {
        Some(property_id) => {
            let property = get_row(pool, "managed_properties", &property_id, "id").await?;
            assert_property_owner(&property, &user_id)?;
            filters.insert("property_id".to_string(), Value::String(property_id));
        }
        None => {
            let property_ids = owned_property_ids(pool, &user_id).await?;
            if property_ids.is_empty() {
                return Ok(Json(json!({ "data": [] })));
            }
            filters.insert(
                "property_id".to_string(),
                Value::Array(property_ids.into_iter().map(Value::String).collect()),
            );
        }
    }
    if let Some(status) = non_empty_opt(query.status.as_deref()) {
        filters.insert("status".to_string(), Value::String(status));
    }

    let rows = list_rows(
        pool,
        "tenants",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 1000),
        0,
        "created_at",
        false,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn create_tenant(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateTenantInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;
    validate_input(&payload)?;

    let property = get_row(pool, "managed_properties", &payload.property_id, "id").await?;
    assert_property_owner(&property, &user_id)?;

    let tenant = occupancy::register_tenant(pool, &property, &payload).await?;
    Ok((axum::http::StatusCode::CREATED, Json(tenant)))
}

async fn get_tenant(
    State(state): State<AppState>,
    Path(path): Path<TenantPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let tenant = resolve_owned_tenant(pool, &path.tenant_id, &user_id).await?;
    Ok(Json(tenant))
}

async fn terminate_tenant(
    State(state): State<AppState>,
    Path(path): Path<TenantPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let tenant = resolve_owned_tenant(pool, &path.tenant_id, &user_id).await?;
    let terminated = occupancy::terminate_tenant(pool, &tenant).await?;
    Ok(Json(terminated))
}

/// Fetch a tenant and check the actor owns its property.
pub async fn resolve_owned_tenant(
    pool: &sqlx::PgPool,
    tenant_id: &str,
    user_id: &str,
) -> AppResult<Value> {
    let tenant = get_row(pool, "tenants", tenant_id, "id").await?;
    let property_id = value_str(&tenant, "property_id");
    let property = get_row(pool, "managed_properties", &property_id, "id").await?;
    assert_property_owner(&property, user_id)?;
    Ok(tenant)
}

pub async fn owned_property_ids(
    pool: &sqlx::PgPool,
    user_id: &str,
) -> AppResult<Vec<String>> {
    let mut filters = Map::new();
    filters.insert(
        "owner_user_id".to_string(),
        Value::String(user_id.to_string()),
    );
    let properties = list_rows(
        pool,
        "managed_properties",
        Some(&filters),
        1000,
        0,
        "created_at",
        false,
    )
    .await?;
    Ok(properties
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
