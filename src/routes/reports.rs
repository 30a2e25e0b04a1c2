use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use chrono::NaiveDate;
use serde_json::{json, Map, Value};

use crate::{
    auth::require_user_id,
    error::{AppError, AppResult},
    repository::table_service::{get_row, list_rows},
    schemas::{BookingsSummaryQuery, RentSummaryQuery},
    services::calendar::{round2, today_in_timezone},
    services::occupancy::assert_property_owner,
    services::rent_billing,
    state::AppState,
};

use super::payments::tenants_of_properties;
use super::tenants::{owned_property_ids, resolve_owned_tenant};

const REVENUE_PAYMENT_STATUSES: &[&str] = &["paid", "partial"];

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/reports/rent-summary", axum::routing::get(rent_summary))
        .route(
            "/reports/bookings-summary",
            axum::routing::get(bookings_summary),
        )
}

async fn rent_summary(
    State(state): State<AppState>,
    Query(query): Query<RentSummaryQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let tenant_ids = if let Some(tenant_id) = non_empty_opt(query.tenant_id.as_deref()) {
        resolve_owned_tenant(pool, &tenant_id, &user_id).await?;
        vec![tenant_id]
    } else if let Some(property_id) = non_empty_opt(query.property_id.as_deref()) {
        let property = get_row(pool, "managed_properties", &property_id, "id").await?;
        assert_property_owner(&property, &user_id)?;
        tenants_of_properties(pool, vec![property_id]).await?
    } else {
        let property_ids = owned_property_ids(pool, &user_id).await?;
        if property_ids.is_empty() {
            Vec::new()
        } else {
            tenants_of_properties(pool, property_ids).await?
        }
    };

    let stats = rent_billing::compute_rent_stats(pool, &tenant_ids).await?;
    Ok(Json(json!({
        "total_due": stats.total_due,
        "total_paid": stats.total_paid,
        "counts": {
            "pending": stats.pending_count,
            "overdue": stats.overdue_count,
            "paid": stats.paid_count,
        },
    })))
}

async fn bookings_summary(
    State(state): State<AppState>,
    Query(query): Query<BookingsSummaryQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    if let Some(establishment_id) = non_empty_opt(query.establishment_id.as_deref()) {
        filters.insert(
            "establishment_id".to_string(),
            Value::String(establishment_id),
        );
    }

    let bookings = list_rows(
        pool,
        "bookings",
        Some(&filters),
        10000,
        0,
        "check_in_date",
        true,
    )
    .await?;

    let today = today_in_timezone(&state.config.reporting_timezone);
    Ok(Json(summarize_bookings(&bookings, today)))
}

fn summarize_bookings(bookings: &[Value], today: NaiveDate) -> Value {
    let today_iso = today.to_string();
    let mut counts: Map<String, Value> = Map::new();
    let mut arriving_today = 0_i64;
    let mut departing_today = 0_i64;
    let mut revenue = 0.0;

    for booking in bookings {
        let status = value_str(booking, "status");
        if !status.is_empty() {
            let next = counts.get(&status).and_then(Value::as_i64).unwrap_or(0) + 1;
            counts.insert(status.clone(), json!(next));
        }

        if status == "confirmed" && value_str(booking, "check_in_date") == today_iso {
            arriving_today += 1;
        }
        if status == "checked_in" && value_str(booking, "check_out_date") == today_iso {
            departing_today += 1;
        }

        let payment_status = value_str(booking, "payment_status");
        if REVENUE_PAYMENT_STATUSES.contains(&payment_status.as_str()) {
            revenue += value_number(booking, "total_amount");
        }
    }

    json!({
        "counts": counts,
        "arriving_today": arriving_today,
        "departing_today": departing_today,
        "revenue": round2(revenue),
    })
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

fn value_number(row: &Value, key: &str) -> f64 {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(|value| {
            value
                .as_f64()
                .or_else(|| value.as_str().and_then(|raw| raw.parse::<f64>().ok()))
        })
        .unwrap_or(0.0)
}

fn non_empty_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use super::summarize_bookings;

    #[test]
    fn summary_counts_statuses_and_today_movements() {
        let today = NaiveDate::from_ymd_opt(2025, 8, 7).unwrap();
        let bookings = vec![
            json!({
                "status": "confirmed",
                "payment_status": "paid",
                "check_in_date": "2025-08-07",
                "check_out_date": "2025-08-10",
                "total_amount": 40000.0,
            }),
            json!({
                "status": "checked_in",
                "payment_status": "partial",
                "check_in_date": "2025-08-05",
                "check_out_date": "2025-08-07",
                "total_amount": 25000.0,
            }),
            json!({
                "status": "pending",
                "payment_status": "pending",
                "check_in_date": "2025-08-07",
                "check_out_date": "2025-08-09",
                "total_amount": 9999.0,
            }),
            json!({
                "status": "cancelled",
                "payment_status": "refunded",
                "check_in_date": "2025-08-07",
                "check_out_date": "2025-08-08",
                "total_amount": 5000.0,
            }),
        ];

        let summary = summarize_bookings(&bookings, today);
        assert_eq!(summary["counts"]["confirmed"], json!(1));
        assert_eq!(summary["counts"]["checked_in"], json!(1));
        assert_eq!(summary["counts"]["pending"], json!(1));
        assert_eq!(summary["counts"]["cancelled"], json!(1));
        // Pending arrivals and refunded/cancelled rows stay out of the
        // movement and revenue figures.
        assert_eq!(summary["arriving_today"], json!(1));
        assert_eq!(summary["departing_today"], json!(1));
        assert_eq!(summary["revenue"], json!(65000.0));
    }
}
