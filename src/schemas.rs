use serde::Deserialize;
use validator::Validate;

use crate::error::AppError;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

fn default_currency_pyg() -> String {
    "PYG".to_string()
}
fn default_zero() -> f64 {
    0.0
}
fn default_method_transfer() -> String {
    "bank_transfer".to_string()
}
fn default_limit_100() -> i64 {
    100
}
fn default_limit_500() -> i64 {
    500
}

pub fn serialize_to_map<T>(value: &T) -> serde_json::Map<String, serde_json::Value>
where
    T: serde::Serialize,
{
    let json = serde_json::to_value(value)
        .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
    json.as_object().cloned().unwrap_or_default()
}

pub fn remove_nulls(
    mut map: serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    map.retain(|_, value| !value.is_null());
    map
}

pub fn clamp_limit_in_range(limit: i64, minimum: i64, maximum: i64) -> i64 {
    limit.clamp(minimum, maximum)
}

// ---------- Managed properties ----------

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreatePropertyInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub monthly_rent: f64,
    #[serde(default = "default_zero")]
    pub charges: f64,
    #[serde(default = "default_currency_pyg")]
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdatePropertyInput {
    pub name: Option<String>,
    pub monthly_rent: Option<f64>,
    pub charges: Option<f64>,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct PropertiesQuery {
    pub status: Option<String>,
    #[serde(default)]
    pub include_archived: bool,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct PropertyPath {
    pub property_id: String,
}

// ---------- Tenants ----------

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateTenantInput {
    pub property_id: String,
    #[validate(length(min = 1, max = 255))]
    pub full_name: String,
    /// Copied from the property when absent; frozen on the tenant afterwards.
    pub monthly_rent: Option<f64>,
    pub due_day: u32,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct TenantsQuery {
    pub property_id: Option<String>,
    pub status: Option<String>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct TenantPath {
    pub tenant_id: String,
}

// ---------- Due dates ----------

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct GenerateDueDatesInput {
    pub tenant_id: String,
    pub from_month: u32,
    pub from_year: i32,
    pub to_month: u32,
    pub to_year: i32,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct CreateDueDateInput {
    pub tenant_id: String,
    pub period_month: u32,
    pub period_year: i32,
    /// Defaults to the tenant's frozen rent / the property's current charges.
    pub rent_amount: Option<f64>,
    pub charges_amount: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct DueDatesQuery {
    pub tenant_id: Option<String>,
    pub property_id: Option<String>,
    pub status: Option<String>,
    pub due_from: Option<String>,
    pub due_to: Option<String>,
    #[serde(default = "default_limit_500")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct DueDatePath {
    pub due_date_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct RefreshOverdueInput {
    pub tenant_id: Option<String>,
    pub property_id: Option<String>,
}

// ---------- Payments ----------

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct CreatePaymentInput {
    pub tenant_id: String,
    pub due_date_id: Option<String>,
    pub amount: f64,
    #[serde(default = "default_method_transfer")]
    pub method: String,
    /// ISO date; defaults to today when absent.
    pub payment_date: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct PaymentsQuery {
    pub tenant_id: Option<String>,
    pub due_date_id: Option<String>,
    #[serde(default = "default_limit_500")]
    pub limit: i64,
}

// ---------- Bookings ----------

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateBookingInput {
    pub establishment_id: String,
    pub room_id: String,
    #[validate(length(min = 1, max = 255))]
    pub guest_full_name: String,
    #[validate(email)]
    pub guest_email: Option<String>,
    pub guest_phone_e164: Option<String>,
    pub check_in_date: String,
    pub check_out_date: String,
    pub price_per_night: f64,
    #[serde(default = "default_zero")]
    pub taxes: f64,
    #[serde(default = "default_zero")]
    pub fees: f64,
    #[serde(default = "default_zero")]
    pub discount: f64,
    #[serde(default = "default_currency_pyg")]
    pub currency: String,
    pub booking_reference: Option<String>,
    pub status: Option<String>,
    pub payment_status: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdateBookingInput {
    pub room_id: Option<String>,
    pub guest_full_name: Option<String>,
    pub guest_email: Option<String>,
    pub guest_phone_e164: Option<String>,
    pub check_in_date: Option<String>,
    pub check_out_date: Option<String>,
    pub price_per_night: Option<f64>,
    pub taxes: Option<f64>,
    pub fees: Option<f64>,
    pub discount: Option<f64>,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct BookingsQuery {
    pub establishment_id: Option<String>,
    pub room_id: Option<String>,
    pub status: Option<String>,
    pub payment_status: Option<String>,
    #[serde(default = "default_limit_500")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct BookingPath {
    pub booking_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct SetBookingPaymentStatusInput {
    pub payment_status: String,
}

// ---------- Reports ----------

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct RentSummaryQuery {
    pub tenant_id: Option<String>,
    pub property_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct BookingsSummaryQuery {
    pub establishment_id: Option<String>,
}
