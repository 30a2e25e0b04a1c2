use chrono::{Datelike, NaiveDate};
use serde_json::{json, Map, Value};
use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::repository::table_service::{create_row, list_rows, update_row};
use crate::schemas::{remove_nulls, serialize_to_map, CreateBookingInput};
use crate::services::calendar::{nights_between, parse_date, round2};

pub const BOOKING_STATUSES: &[&str] = &[
    "pending",
    "confirmed",
    "checked_in",
    "checked_out",
    "cancelled",
    "no_show",
];
pub const PAYMENT_STATUSES: &[&str] = &["pending", "partial", "paid", "refunded"];

/// Fields whose change forces a nights/subtotal/total recomputation.
const PRICING_FIELDS: &[&str] = &[
    "check_in_date",
    "check_out_date",
    "price_per_night",
    "taxes",
    "fees",
    "discount",
];

const REFERENCE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookingTotals {
    pub nights: i64,
    pub subtotal: f64,
    pub total: f64,
}

/// Nightly pricing: nights floor at one, extras are flat additive fields.
pub fn compute_totals(
    check_in: NaiveDate,
    check_out: NaiveDate,
    price_per_night: f64,
    taxes: f64,
    fees: f64,
    discount: f64,
) -> BookingTotals {
    let nights = nights_between(check_in, check_out);
    let subtotal = round2(price_per_night * nights as f64);
    let total = round2(subtotal + taxes + fees - discount);
    BookingTotals {
        nights,
        subtotal,
        total,
    }
}

fn validate_stay(check_in: NaiveDate, check_out: NaiveDate) -> AppResult<()> {
    if check_out <= check_in {
        return Err(AppError::UnprocessableEntity(
            "Check-out date must be strictly after check-in date.".to_string(),
        ));
    }
    Ok(())
}

/// `<PREFIX>-<year>-<XXXX>` with the year taken from check-in. The suffix is
/// random; uniqueness is checked by the caller with a bounded retry.
pub fn generate_reference(prefix: &str, check_in: NaiveDate) -> String {
    let suffix = uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(4)
        .collect::<String>()
        .to_ascii_uppercase();
    format!("{prefix}-{}-{suffix}", check_in.year())
}

pub async fn create_booking(
    pool: &PgPool,
    reference_prefix: &str,
    input: &CreateBookingInput,
) -> AppResult<Value> {
    let check_in = parse_date(&input.check_in_date)?;
    let check_out = parse_date(&input.check_out_date)?;
    validate_stay(check_in, check_out)?;

    if input.price_per_night <= 0.0 {
        return Err(AppError::UnprocessableEntity(
            "Price per night must be strictly positive.".to_string(),
        ));
    }
    if input.taxes < 0.0 || input.fees < 0.0 || input.discount < 0.0 {
        return Err(AppError::UnprocessableEntity(
            "Taxes, fees and discount must not be negative.".to_string(),
        ));
    }

    let status = input.status.clone().unwrap_or_else(|| "pending".to_string());
    if !BOOKING_STATUSES.contains(&status.as_str()) {
        return Err(AppError::UnprocessableEntity(format!(
            "Unknown booking status '{status}'."
        )));
    }
    let payment_status = input
        .payment_status
        .clone()
        .unwrap_or_else(|| "pending".to_string());
    if !PAYMENT_STATUSES.contains(&payment_status.as_str()) {
        return Err(AppError::UnprocessableEntity(format!(
            "Unknown payment status '{payment_status}'."
        )));
    }

    let totals = compute_totals(
        check_in,
        check_out,
        input.price_per_night,
        input.taxes,
        input.fees,
        input.discount,
    );
    if totals.total < 0.0 {
        return Err(AppError::UnprocessableEntity(
            "Discount exceeds the booking total.".to_string(),
        ));
    }

    let booking_reference =
        resolve_reference(pool, reference_prefix, check_in, input.booking_reference.as_deref())
            .await?;

    let mut record = remove_nulls(serialize_to_map(input));
    record.insert("status".to_string(), Value::String(status));
    record.insert(
        "payment_status".to_string(),
        Value::String(payment_status),
    );
    record.insert(
        "booking_reference".to_string(),
        Value::String(booking_reference),
    );
    record.insert("nights".to_string(), json!(totals.nights));
    record.insert("subtotal".to_string(), json!(totals.subtotal));
    record.insert("total_amount".to_string(), json!(totals.total));

    create_row(pool, "bookings", &record).await
}

async fn resolve_reference(
    pool: &PgPool,
    prefix: &str,
    check_in: NaiveDate,
    supplied: Option<&str>,
) -> AppResult<String> {
    if let Some(reference) = supplied.map(str::trim).filter(|value| !value.is_empty()) {
        if reference_exists(pool, reference).await? {
            return Err(AppError::Conflict(format!(
                "Booking reference '{reference}' is already in use."
            )));
        }
        return Ok(reference.to_string());
    }

    for _ in 0..REFERENCE_ATTEMPTS {
        let candidate = generate_reference(prefix, check_in);
        if !reference_exists(pool, &candidate).await? {
            return Ok(candidate);
        }
    }
    Err(AppError::Conflict(
        "Could not generate a unique booking reference.".to_string(),
    ))
}

async fn reference_exists(pool: &PgPool, reference: &str) -> AppResult<bool> {
    let mut filters = Map::new();
    filters.insert(
        "booking_reference".to_string(),
        Value::String(reference.to_string()),
    );
    let rows = list_rows(pool, "bookings", Some(&filters), 1, 0, "created_at", false).await?;
    Ok(!rows.is_empty())
}

/// Apply a partial update. Pricing is never stale: whenever the patch touches
/// a pricing field, nights/subtotal/total are recomputed from the merged
/// (existing + patch) field set. Unlike a due date, a booking total is not
/// frozen at creation.
pub async fn update_booking(
    pool: &PgPool,
    booking: &Value,
    mut patch: Map<String, Value>,
) -> AppResult<Value> {
    patch = remove_nulls(patch);

    if let Some(totals) = merged_totals(booking, &patch)? {
        patch.insert("nights".to_string(), json!(totals.nights));
        patch.insert("subtotal".to_string(), json!(totals.subtotal));
        patch.insert("total_amount".to_string(), json!(totals.total));
    }

    let booking_id = val_str(booking, "id");
    update_row(pool, "bookings", &booking_id, &patch, "id").await
}

/// Recomputed totals for a patch, or `None` when no pricing field changed.
fn merged_totals(
    booking: &Value,
    patch: &Map<String, Value>,
) -> AppResult<Option<BookingTotals>> {
    if !PRICING_FIELDS.iter().any(|field| patch.contains_key(*field)) {
        return Ok(None);
    }

    let merged = |key: &str| -> Option<Value> {
        patch
            .get(key)
            .cloned()
            .or_else(|| booking.as_object().and_then(|obj| obj.get(key)).cloned())
    };

    let check_in = parse_date(
        merged("check_in_date")
            .as_ref()
            .and_then(Value::as_str)
            .unwrap_or_default(),
    )?;
    let check_out = parse_date(
        merged("check_out_date")
            .as_ref()
            .and_then(Value::as_str)
            .unwrap_or_default(),
    )?;
    validate_stay(check_in, check_out)?;

    let number = |key: &str| -> f64 {
        merged(key)
            .and_then(|value| {
                value
                    .as_f64()
                    .or_else(|| value.as_str().and_then(|raw| raw.parse::<f64>().ok()))
            })
            .unwrap_or(0.0)
    };

    let price_per_night = number("price_per_night");
    if price_per_night <= 0.0 {
        return Err(AppError::UnprocessableEntity(
            "Price per night must be strictly positive.".to_string(),
        ));
    }
    let taxes = number("taxes");
    let fees = number("fees");
    let discount = number("discount");
    if taxes < 0.0 || fees < 0.0 || discount < 0.0 {
        return Err(AppError::UnprocessableEntity(
            "Taxes, fees and discount must not be negative.".to_string(),
        ));
    }

    let totals = compute_totals(check_in, check_out, price_per_night, taxes, fees, discount);
    if totals.total < 0.0 {
        return Err(AppError::UnprocessableEntity(
            "Discount exceeds the booking total.".to_string(),
        ));
    }
    Ok(Some(totals))
}

pub fn allowed_transition(current_status: &str, next_status: &str) -> bool {
    match current_status {
        "pending" => matches!(next_status, "confirmed" | "checked_in" | "cancelled" | "no_show"),
        "confirmed" => matches!(next_status, "checked_in" | "cancelled" | "no_show"),
        "checked_in" => matches!(next_status, "checked_out" | "cancelled"),
        "no_show" => next_status == "cancelled",
        "checked_out" | "cancelled" => false,
        _ => false,
    }
}

fn timestamp_field(status: &str) -> Option<&'static str> {
    match status {
        "confirmed" => Some("confirmed_at"),
        "checked_in" => Some("checked_in_at"),
        "checked_out" => Some("checked_out_at"),
        "cancelled" => Some("cancelled_at"),
        _ => None,
    }
}

/// Guarded status transition. Stamps the matching timestamp only the first
/// time the status is reached, and goes through the same update path as any
/// other booking edit.
pub async fn transition_booking(
    pool: &PgPool,
    booking: &Value,
    next_status: &str,
    now_iso: &str,
) -> AppResult<Value> {
    let current_status = val_str(booking, "status");
    if next_status == current_status {
        return Ok(booking.clone());
    }

    if !allowed_transition(&current_status, next_status) {
        return Err(AppError::UnprocessableEntity(format!(
            "Invalid status transition: {current_status} -> {next_status}"
        )));
    }

    let mut patch = Map::new();
    patch.insert("status".to_string(), Value::String(next_status.to_string()));
    if let Some(field) = timestamp_field(next_status) {
        if val_str(booking, field).is_empty() {
            patch.insert(field.to_string(), Value::String(now_iso.to_string()));
        }
    }

    tracing::info!(
        booking_id = %val_str(booking, "id"),
        from = %current_status,
        to = %next_status,
        "Booking status transition"
    );
    update_booking(pool, booking, patch).await
}

/// Payment status is asserted by the operator; there is no payments ledger
/// behind a booking. The first move to `paid` stamps `balance_paid_at`.
pub async fn set_payment_status(
    pool: &PgPool,
    booking: &Value,
    payment_status: &str,
    now_iso: &str,
) -> AppResult<Value> {
    if !PAYMENT_STATUSES.contains(&payment_status) {
        return Err(AppError::UnprocessableEntity(format!(
            "Unknown payment status '{payment_status}'."
        )));
    }

    let mut patch = Map::new();
    patch.insert(
        "payment_status".to_string(),
        Value::String(payment_status.to_string()),
    );
    if payment_status == "paid" && val_str(booking, "balance_paid_at").is_empty() {
        patch.insert(
            "balance_paid_at".to_string(),
            Value::String(now_iso.to_string()),
        );
    }

    update_booking(pool, booking, patch).await
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

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::{json, Map, Value};

    use super::{
        allowed_transition, compute_totals, generate_reference, merged_totals, timestamp_field,
    };

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn nightly_totals_without_extras() {
        let totals = compute_totals(date(2024, 12, 1), date(2024, 12, 5), 10000.0, 0.0, 0.0, 0.0);
        assert_eq!(totals.nights, 4);
        assert_eq!(totals.subtotal, 40000.0);
        assert_eq!(totals.total, 40000.0);
    }

    #[test]
    fn extras_are_flat_additive_fields() {
        let totals =
            compute_totals(date(2025, 3, 10), date(2025, 3, 12), 250.0, 30.0, 15.0, 20.0);
        assert_eq!(totals.nights, 2);
        assert_eq!(totals.subtotal, 500.0);
        assert_eq!(totals.total, 525.0);
    }

    #[test]
    fn transition_matrix_follows_the_lifecycle() {
        assert!(allowed_transition("pending", "confirmed"));
        assert!(allowed_transition("pending", "checked_in"));
        assert!(allowed_transition("pending", "cancelled"));
        assert!(allowed_transition("confirmed", "checked_in"));
        assert!(allowed_transition("confirmed", "no_show"));
        assert!(allowed_transition("checked_in", "checked_out"));
        assert!(allowed_transition("checked_in", "cancelled"));

        assert!(!allowed_transition("checked_in", "confirmed"));
        assert!(!allowed_transition("checked_out", "checked_in"));
        assert!(!allowed_transition("checked_out", "cancelled"));
        assert!(!allowed_transition("cancelled", "confirmed"));
        assert!(!allowed_transition("pending", "checked_out"));
    }

    #[test]
    fn each_forward_status_has_its_timestamp() {
        assert_eq!(timestamp_field("confirmed"), Some("confirmed_at"));
        assert_eq!(timestamp_field("checked_in"), Some("checked_in_at"));
        assert_eq!(timestamp_field("checked_out"), Some("checked_out_at"));
        assert_eq!(timestamp_field("cancelled"), Some("cancelled_at"));
        assert_eq!(timestamp_field("no_show"), None);
    }

    #[test]
    fn reference_embeds_check_in_year() {
        let reference = generate_reference("BKG", date(2025, 7, 4));
        let parts = reference.split('-').collect::<Vec<_>>();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "BKG");
        assert_eq!(parts[1], "2025");
        assert_eq!(parts[2].len(), 4);
        assert!(parts[2]
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    fn booking_row() -> Value {
        json!({
            "id": "b1",
            "check_in_date": "2024-12-01",
            "check_out_date": "2024-12-05",
            "price_per_night": 10000.0,
            "taxes": 0.0,
            "fees": 0.0,
            "discount": 0.0,
        })
    }

    #[test]
    fn patch_without_pricing_fields_skips_recompute() {
        let mut patch = Map::new();
        patch.insert(
            "guest_full_name".to_string(),
            Value::String("Ana".to_string()),
        );
        assert_eq!(merged_totals(&booking_row(), &patch).unwrap(), None);
    }

    #[test]
    fn patch_touching_pricing_recomputes_from_merged_fields() {
        let mut patch = Map::new();
        patch.insert("check_out_date".to_string(), json!("2024-12-03"));
        let totals = merged_totals(&booking_row(), &patch).unwrap().unwrap();
        assert_eq!(totals.nights, 2);
        assert_eq!(totals.subtotal, 20000.0);
        assert_eq!(totals.total, 20000.0);

        let mut discount_patch = Map::new();
        discount_patch.insert("discount".to_string(), json!(5000.0));
        let discounted = merged_totals(&booking_row(), &discount_patch)
            .unwrap()
            .unwrap();
        assert_eq!(discounted.nights, 4);
        assert_eq!(discounted.total, 35000.0);
    }

    #[test]
    fn merged_validation_rejects_inverted_stays() {
        let mut patch = Map::new();
        patch.insert("check_out_date".to_string(), json!("2024-11-30"));
        assert!(merged_totals(&booking_row(), &patch).is_err());

        let mut price_patch = Map::new();
        price_patch.insert("price_per_night".to_string(), json!(0.0));
        assert!(merged_totals(&booking_row(), &price_patch).is_err());
    }
}
