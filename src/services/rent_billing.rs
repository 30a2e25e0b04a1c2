use std::collections::HashSet;

use chrono::NaiveDate;
use serde_json::{json, Map, Value};
use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::repository::table_service::{create_row, get_row, list_rows, update_row};
use crate::schemas::{CreateDueDateInput, CreatePaymentInput};
use crate::services::calendar::{clamped_due_date, parse_date, periods_between, round2, Period};

/// Hard cap on the span of one generation call.
pub const MAX_GENERATION_PERIODS: usize = 24;

const DUE_DATE_STATUSES: &[&str] = &["pending", "paid", "overdue", "cancelled"];

/// Generate one pending due date per period in the inclusive range, skipping
/// periods the tenant already has a due date for. Re-running the same range
/// creates nothing new. Returns only the rows created by this call.
pub async fn generate_due_dates(
    pool: &PgPool,
    tenant: &Value,
    property: &Value,
    from: Period,
    to: Period,
) -> AppResult<Vec<Value>> {
    let periods = periods_between(from, to)?;
    if periods.len() > MAX_GENERATION_PERIODS {
        return Err(AppError::UnprocessableEntity(format!(
            "Range spans {} periods; the maximum is {MAX_GENERATION_PERIODS}.",
            periods.len()
        )));
    }

    let tenant_id = val_str(tenant, "id");
    let due_day = val_u32(tenant, "due_day").unwrap_or(1);
    let rent_amount = val_number(tenant, "monthly_rent");
    let charges_amount = val_number(property, "charges");

    let existing = list_rows(
        pool,
        "due_dates",
        Some(&json_map(&[(
            "tenant_id",
            Value::String(tenant_id.clone()),
        )])),
        2000,
        0,
        "due_date",
        true,
    )
    .await?;
    let covered = existing
        .iter()
        .filter_map(|row| {
            Some((
                val_u32(row, "period_year")? as i32,
                val_u32(row, "period_month")?,
            ))
        })
        .collect::<HashSet<(i32, u32)>>();

    let mut created = Vec::new();
    for period in periods {
        if covered.contains(&(period.year, period.month)) {
            continue;
        }

        let payload = due_date_payload(
            &tenant_id,
            &val_str(tenant, "property_id"),
            period,
            due_day,
            rent_amount,
            charges_amount,
        );
        created.push(create_row(pool, "due_dates", &payload).await?);
    }

    tracing::info!(
        tenant_id = %tenant_id,
        requested = %format!("{}-{:02}..{}-{:02}", from.year, from.month, to.year, to.month),
        created = created.len(),
        "Generated due dates"
    );
    Ok(created)
}

/// Individual due-date creation with the same computation as the generator.
/// An existing due date for the same (tenant, period) is a conflict here
/// rather than a silent skip.
pub async fn create_due_date(
    pool: &PgPool,
    tenant: &Value,
    property: &Value,
    input: &CreateDueDateInput,
) -> AppResult<Value> {
    let period = Period::new(input.period_year, input.period_month)?;
    let tenant_id = val_str(tenant, "id");

    let rent_amount = input
        .rent_amount
        .unwrap_or_else(|| val_number(tenant, "monthly_rent"));
    let charges_amount = input
        .charges_amount
        .unwrap_or_else(|| val_number(property, "charges"));
    if rent_amount < 0.0 || charges_amount < 0.0 {
        return Err(AppError::UnprocessableEntity(
            "Rent and charges amounts must not be negative.".to_string(),
        ));
    }

    let existing = list_rows(
        pool,
        "due_dates",
        Some(&json_map(&[
            ("tenant_id", Value::String(tenant_id.clone())),
            ("period_year", json!(period.year)),
            ("period_month", json!(period.month)),
        ])),
        1,
        0,
        "created_at",
        false,
    )
    .await?;
    if !existing.is_empty() {
        return Err(AppError::Conflict(format!(
            "A due date already exists for {}-{:02}.",
            period.year, period.month
        )));
    }

    let due_day = val_u32(tenant, "due_day").unwrap_or(1);
    let payload = due_date_payload(
        &tenant_id,
        &val_str(tenant, "property_id"),
        period,
        due_day,
        rent_amount,
        charges_amount,
    );
    create_row(pool, "due_dates", &payload).await
}

fn due_date_payload(
    tenant_id: &str,
    property_id: &str,
    period: Period,
    due_day: u32,
    rent_amount: f64,
    charges_amount: f64,
) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("tenant_id".to_string(), Value::String(tenant_id.to_string()));
    if !property_id.is_empty() {
        payload.insert(
            "property_id".to_string(),
            Value::String(property_id.to_string()),
        );
    }
    payload.insert("period_month".to_string(), json!(period.month));
    payload.insert("period_year".to_string(), json!(period.year));
    payload.insert("rent_amount".to_string(), json!(round2(rent_amount)));
    payload.insert("charges_amount".to_string(), json!(round2(charges_amount)));
    // The obligation total is frozen here; later rent changes never touch it.
    payload.insert(
        "total_amount".to_string(),
        json!(round2(rent_amount + charges_amount)),
    );
    payload.insert(
        "due_date".to_string(),
        Value::String(clamped_due_date(period, due_day).to_string()),
    );
    payload.insert("status".to_string(), Value::String("pending".to_string()));
    payload
}

/// Record a payment and reconcile the referenced due date, if any. The
/// payment row itself is immutable once written; reconciliation is the only
/// side effect.
pub async fn create_payment(
    pool: &PgPool,
    tenant: &Value,
    input: &CreatePaymentInput,
    recorded_by_user_id: &str,
    today: NaiveDate,
) -> AppResult<Value> {
    if input.amount <= 0.0 {
        return Err(AppError::UnprocessableEntity(
            "Payment amount must be strictly positive.".to_string(),
        ));
    }

    let payment_date = match input.payment_date.as_deref() {
        Some(raw) => parse_date(raw)?,
        None => today,
    };

    let tenant_id = val_str(tenant, "id");
    if let Some(due_date_id) = non_empty(input.due_date_id.as_deref()) {
        let due_date = get_row(pool, "due_dates", &due_date_id, "id").await?;
        if val_str(&due_date, "tenant_id") != tenant_id {
            return Err(AppError::BadRequest(
                "due_date_id does not belong to this tenant.".to_string(),
            ));
        }
        if val_str(&due_date, "status") == "cancelled" {
            return Err(AppError::UnprocessableEntity(
                "Cannot pay against a cancelled due date.".to_string(),
            ));
        }
    }

    let mut payload = Map::new();
    payload.insert("tenant_id".to_string(), Value::String(tenant_id));
    if let Some(due_date_id) = non_empty(input.due_date_id.as_deref()) {
        payload.insert("due_date_id".to_string(), Value::String(due_date_id));
    }
    payload.insert("amount".to_string(), json!(round2(input.amount)));
    payload.insert("method".to_string(), Value::String(input.method.clone()));
    payload.insert(
        "payment_date".to_string(),
        Value::String(payment_date.to_string()),
    );
    payload.insert("status".to_string(), Value::String("completed".to_string()));
    payload.insert(
        "recorded_by_user_id".to_string(),
        Value::String(recorded_by_user_id.to_string()),
    );

    let payment = create_row(pool, "payments", &payload).await?;

    if let Some(due_date_id) = non_empty(input.due_date_id.as_deref()) {
        refresh_due_date_status(pool, &due_date_id, today).await?;
    }

    Ok(payment)
}

/// Recompute a due date's status from its full payment history. Always
/// re-reads every payment rather than applying a delta, so retried and
/// out-of-order calls converge on the same answer.
pub async fn refresh_due_date_status(
    pool: &PgPool,
    due_date_id: &str,
    today: NaiveDate,
) -> AppResult<Value> {
    let due_date = get_row(pool, "due_dates", due_date_id, "id").await?;
    let current = val_str(&due_date, "status");
    if current == "cancelled" {
        return Ok(due_date);
    }

    let payments = list_rows(
        pool,
        "payments",
        Some(&json_map(&[(
            "due_date_id",
            Value::String(due_date_id.to_string()),
        )])),
        2000,
        0,
        "payment_date",
        true,
    )
    .await?;

    let paid_sum = payments
        .iter()
        .filter(|row| val_str(row, "status") != "cancelled")
        .map(|row| val_number(row, "amount"))
        .sum::<f64>();
    let total = val_number(&due_date, "total_amount");
    let due = parse_date(&val_str(&due_date, "due_date")).ok();

    let next = settled_status(total, paid_sum, due, today, &current);
    if next == current {
        return Ok(due_date);
    }

    tracing::info!(
        due_date_id = %due_date_id,
        from = %current,
        to = %next,
        paid = paid_sum,
        total = total,
        "Due date status recomputed"
    );

    let mut patch = Map::new();
    patch.insert("status".to_string(), Value::String(next.to_string()));
    update_row(pool, "due_dates", due_date_id, &patch, "id").await
}

/// Pure status rule: fully settled wins, a settled obligation never reverts,
/// otherwise past-due means overdue.
fn settled_status(
    total: f64,
    paid_sum: f64,
    due: Option<NaiveDate>,
    today: NaiveDate,
    current: &str,
) -> &'static str {
    if paid_sum >= total {
        return "paid";
    }
    if current == "paid" {
        return "paid";
    }
    if due.is_some_and(|due| due < today) {
        return "overdue";
    }
    "pending"
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct OverdueSweepResult {
    pub examined: u32,
    pub marked_overdue: u32,
}

/// Explicit overdue pass over pending due dates in scope. There is no timer
/// behind this; a caller invokes it when dashboards need the statuses fresh.
pub async fn sweep_overdue(
    pool: &PgPool,
    scope_filters: Map<String, Value>,
    today: NaiveDate,
) -> AppResult<OverdueSweepResult> {
    let mut filters = scope_filters;
    filters.insert("status".to_string(), Value::String("pending".to_string()));
    filters.insert(
        "due_date__lt".to_string(),
        Value::String(today.to_string()),
    );

    let candidates = list_rows(pool, "due_dates", Some(&filters), 2000, 0, "due_date", true).await?;

    let mut result = OverdueSweepResult {
        examined: 0,
        marked_overdue: 0,
    };
    for candidate in candidates {
        let id = val_str(&candidate, "id");
        if id.is_empty() {
            continue;
        }
        result.examined += 1;
        let refreshed = refresh_due_date_status(pool, &id, today).await?;
        if val_str(&refreshed, "status") == "overdue" {
            result.marked_overdue += 1;
        }
    }

    tracing::info!(
        examined = result.examined,
        marked_overdue = result.marked_overdue,
        "Overdue sweep completed"
    );
    Ok(result)
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RentStats {
    pub total_due: f64,
    pub total_paid: f64,
    pub pending_count: i64,
    pub overdue_count: i64,
    pub paid_count: i64,
}

/// Read-side roll-up over the scope's tenants. `total_due` is the running
/// total of every non-cancelled obligation, not the outstanding balance.
pub async fn compute_rent_stats(pool: &PgPool, tenant_ids: &[String]) -> AppResult<RentStats> {
    if tenant_ids.is_empty() {
        return Ok(RentStats::default());
    }

    let id_filter = Value::Array(
        tenant_ids
            .iter()
            .cloned()
            .map(Value::String)
            .collect::<Vec<_>>(),
    );

    let due_dates = list_rows(
        pool,
        "due_dates",
        Some(&json_map(&[("tenant_id", id_filter.clone())])),
        5000,
        0,
        "due_date",
        true,
    )
    .await?;
    let payments = list_rows(
        pool,
        "payments",
        Some(&json_map(&[("tenant_id", id_filter)])),
        5000,
        0,
        "payment_date",
        true,
    )
    .await?;

    Ok(aggregate_rent_stats(&due_dates, &payments))
}

fn aggregate_rent_stats(due_dates: &[Value], payments: &[Value]) -> RentStats {
    let mut stats = RentStats::default();

    for due_date in due_dates {
        match val_str(due_date, "status").as_str() {
            "cancelled" => continue,
            "pending" => stats.pending_count += 1,
            "overdue" => stats.overdue_count += 1,
            "paid" => stats.paid_count += 1,
            _ => {}
        }
        stats.total_due += val_number(due_date, "total_amount");
    }

    stats.total_paid = payments
        .iter()
        .filter(|row| val_str(row, "status") != "cancelled")
        .map(|row| val_number(row, "amount"))
        .sum();

    stats.total_due = round2(stats.total_due);
    stats.total_paid = round2(stats.total_paid);
    stats
}

pub fn is_due_date_status(value: &str) -> bool {
    DUE_DATE_STATUSES.contains(&value)
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

fn val_u32(row: &Value, key: &str) -> Option<u32> {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_i64)
        .and_then(|value| u32::try_from(value).ok())
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
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
    use chrono::NaiveDate;
    use serde_json::json;

    use super::{aggregate_rent_stats, due_date_payload, settled_status};
    use crate::services::calendar::Period;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn full_settlement_marks_paid() {
        let today = date(2024, 12, 15);
        assert_eq!(
            settled_status(160000.0, 160000.0, Some(date(2024, 12, 31)), today, "pending"),
            "paid"
        );
        assert_eq!(
            settled_status(160000.0, 170000.0, Some(date(2024, 12, 31)), today, "overdue"),
            "paid"
        );
    }

    #[test]
    fn paid_status_never_reverts() {
        // A later recompute with a smaller visible sum must not downgrade.
        let today = date(2025, 1, 10);
        assert_eq!(
            settled_status(160000.0, 1.0, Some(date(2024, 12, 31)), today, "paid"),
            "paid"
        );
    }

    #[test]
    fn unpaid_past_due_is_overdue_else_pending() {
        let today = date(2024, 12, 15);
        assert_eq!(
            settled_status(110000.0, 50000.0, Some(date(2024, 12, 10)), today, "pending"),
            "overdue"
        );
        assert_eq!(
            settled_status(110000.0, 50000.0, Some(date(2024, 12, 15)), today, "pending"),
            "pending"
        );
        assert_eq!(
            settled_status(110000.0, 0.0, Some(date(2024, 12, 31)), today, "overdue"),
            "overdue"
        );
    }

    #[test]
    fn payload_freezes_total_and_clamps_due_day() {
        let payload = due_date_payload(
            "tenant-1",
            "property-1",
            Period::new(2024, 12).unwrap(),
            31,
            100000.0,
            10000.0,
        );
        assert_eq!(payload.get("total_amount"), Some(&json!(110000.0)));
        assert_eq!(payload.get("due_date"), Some(&json!("2024-12-31")));
        assert_eq!(payload.get("status"), Some(&json!("pending")));

        let february = due_date_payload(
            "tenant-1",
            "property-1",
            Period::new(2025, 2).unwrap(),
            31,
            100000.0,
            10000.0,
        );
        assert_eq!(february.get("due_date"), Some(&json!("2025-02-28")));
    }

    #[test]
    fn stats_ignore_cancelled_rows_and_count_by_status() {
        let due_dates = vec![
            json!({"status": "pending", "total_amount": 110000.0}),
            json!({"status": "overdue", "total_amount": 110000.0}),
            json!({"status": "paid", "total_amount": 110000.0}),
            json!({"status": "cancelled", "total_amount": 99999.0}),
        ];
        let payments = vec![
            json!({"status": "completed", "amount": 110000.0}),
            json!({"status": "completed", "amount": 40000.0}),
            json!({"status": "cancelled", "amount": 5000.0}),
        ];

        let stats = aggregate_rent_stats(&due_dates, &payments);
        assert_eq!(stats.total_due, 330000.0);
        assert_eq!(stats.total_paid, 150000.0);
        assert_eq!(stats.pending_count, 1);
        assert_eq!(stats.overdue_count, 1);
        assert_eq!(stats.paid_count, 1);
    }
}
