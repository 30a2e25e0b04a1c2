use chrono::Utc;
use serde_json::{json, Map, Value};
use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::repository::table_service::{create_row, list_rows, update_row};
use crate::schemas::CreateTenantInput;
use crate::services::calendar::round2;

/// Rental-side writes are scoped to the property owner.
pub fn assert_property_owner(property: &Value, user_id: &str) -> AppResult<()> {
    if val_str(property, "owner_user_id") == user_id {
        return Ok(());
    }
    Err(AppError::Forbidden(
        "Forbidden: you do not own this property.".to_string(),
    ))
}

/// Create an active tenant on a property and mark the property occupied.
/// The caller has already resolved the property row and checked ownership.
pub async fn register_tenant(
    pool: &PgPool,
    property: &Value,
    input: &CreateTenantInput,
) -> AppResult<Value> {
    let property_id = val_str(property, "id");
    let property_status = val_str(property, "status");

    if property_status == "archived" {
        return Err(AppError::UnprocessableEntity(
            "Cannot register a tenant on an archived property.".to_string(),
        ));
    }
    if !(1..=31).contains(&input.due_day) {
        return Err(AppError::UnprocessableEntity(format!(
            "Invalid due day {}: expected 1-31.",
            input.due_day
        )));
    }

    // One active tenant per property; the datastore does not enforce this.
    let active = list_rows(
        pool,
        "tenants",
        Some(&json_map(&[
            ("property_id", Value::String(property_id.clone())),
            ("status", Value::String("active".to_string())),
        ])),
        1,
        0,
        "created_at",
        false,
    )
    .await?;
    if !active.is_empty() {
        return Err(AppError::Conflict(
            "Property already has an active tenant.".to_string(),
        ));
    }

    let monthly_rent = input
        .monthly_rent
        .unwrap_or_else(|| val_number(property, "monthly_rent"));
    if monthly_rent <= 0.0 {
        return Err(AppError::UnprocessableEntity(
            "Monthly rent must be strictly positive.".to_string(),
        ));
    }

    let mut payload = Map::new();
    payload.insert("property_id".to_string(), Value::String(property_id.clone()));
    payload.insert(
        "full_name".to_string(),
        Value::String(input.full_name.clone()),
    );
    payload.insert("monthly_rent".to_string(), json!(round2(monthly_rent)));
    payload.insert("due_day".to_string(), json!(input.due_day));
    payload.insert("status".to_string(), Value::String("active".to_string()));

    let tenant = create_row(pool, "tenants", &payload).await?;

    let mut property_patch = Map::new();
    property_patch.insert("status".to_string(), Value::String("occupied".to_string()));
    update_row(pool, "managed_properties", &property_id, &property_patch, "id").await?;

    tracing::info!(
        property_id = %property_id,
        tenant_id = %val_str(&tenant, "id"),
        "Tenant registered, property occupied"
    );
    Ok(tenant)
}

/// Terminate a tenant, then re-query the property's remaining active tenants
/// and drop the property back to vacant when none are left. The re-query runs
/// after the termination write so the terminated tenant is never counted.
pub async fn terminate_tenant(pool: &PgPool, tenant: &Value) -> AppResult<Value> {
    let tenant_id = val_str(tenant, "id");
    if val_str(tenant, "status") == "terminated" {
        return Ok(tenant.clone());
    }

    let mut patch = Map::new();
    patch.insert("status".to_string(), Value::String("terminated".to_string()));
    patch.insert(
        "terminated_at".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
    let terminated = update_row(pool, "tenants", &tenant_id, &patch, "id").await?;

    let property_id = val_str(tenant, "property_id");
    if property_id.is_empty() {
        return Ok(terminated);
    }

    let active = list_rows(
        pool,
        "tenants",
        Some(&json_map(&[
            ("property_id", Value::String(property_id.clone())),
            ("status", Value::String("active".to_string())),
        ])),
        100,
        0,
        "created_at",
        false,
    )
    .await?;

    if remaining_active(&active, &tenant_id) == 0 {
        let mut property_patch = Map::new();
        property_patch.insert("status".to_string(), Value::String("vacant".to_string()));
        update_row(pool, "managed_properties", &property_id, &property_patch, "id").await?;
        tracing::info!(property_id = %property_id, "Last active tenant terminated, property vacant");
    }

    Ok(terminated)
}

/// Count active tenants excluding the one just terminated, in case a stale
/// read still returns it.
fn remaining_active(rows: &[Value], terminated_tenant_id: &str) -> usize {
    rows.iter()
        .filter(|row| {
            val_str(row, "status") == "active" && val_str(row, "id") != terminated_tenant_id
        })
        .count()
}

fn val_str(row: &Value, key: &str) -> String {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}

fn val_number(row: &Value, key: &str) -> f64 {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(|value| {
            value
                .as_f64()
                .or_else(|| value.as_str().and_then(|raw| raw.parse::<f64>().ok()))
        })
        .unwrap_or(0.0)
}

fn json_map(entries: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in entries {
        map.insert((*key).to_string(), value.clone());
    }
    map
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{assert_property_owner, remaining_active};

    #[test]
    fn ownership_check_matches_owner_id() {
        let property = json!({"id": "p1", "owner_user_id": "owner-1"});
        assert!(assert_property_owner(&property, "owner-1").is_ok());
        assert!(assert_property_owner(&property, "someone-else").is_err());
    }

    #[test]
    fn remaining_active_excludes_the_terminated_tenant() {
        let rows = vec![
            json!({"id": "t1", "status": "active"}),
            json!({"id": "t2", "status": "active"}),
        ];
        assert_eq!(remaining_active(&rows, "t1"), 1);
        assert_eq!(remaining_active(&rows, "t3"), 2);

        let stale = vec![json!({"id": "t1", "status": "active"})];
        assert_eq!(remaining_active(&stale, "t1"), 0);
    }
}
