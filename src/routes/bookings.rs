use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::{
    auth::require_user_id,
    error::{AppError, AppResult},
    repository::table_service::{get_row, list_rows},
    schemas::{
        clamp_limit_in_range, serialize_to_map, validate_input, BookingPath, BookingsQuery,
        CreateBookingInput, SetBookingPaymentStatusInput, UpdateBookingInput,
    },
    services::booking_engine,
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/bookings",
            axum::routing::get(list_bookings).post(create_booking),
        )
        .route(
            "/bookings/{booking_id}",
            axum::routing::get(get_booking).patch(update_booking),
        )
        .route(
            "/bookings/{booking_id}/confirm",
            axum::routing::post(confirm_booking),
        )
        .route(
            "/bookings/{booking_id}/check-in",
            axum::routing::post(check_in_booking),
        )
        .route(
            "/bookings/{booking_id}/check-out",
            axum::routing::post(check_out_booking),
        )
        .route(
            "/bookings/{booking_id}/cancel",
            axum::routing::post(cancel_booking),
        )
        .route(
            "/bookings/{booking_id}/no-show",
            axum::routing::post(mark_booking_no_show),
        )
        .route(
            "/bookings/{booking_id}/payment-status",
            axum::routing::post(set_booking_payment_status),
        )
}

async fn list_bookings(
    State(state): State<AppState>,
    Query(query): Query<BookingsQuery>,
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
    if let Some(room_id) = non_empty_opt(query.room_id.as_deref()) {
        filters.insert("room_id".to_string(), Value::String(room_id));
    }
    if let Some(status) = non_empty_opt(query.status.as_deref()) {
        if !booking_engine::BOOKING_STATUSES.contains(&status.as_str()) {
            return Err(AppError::BadRequest(format!(
                "Unknown booking status '{status}'."
            )));
        }
        filters.insert("status".to_string(), Value::String(status));
    }
    if let Some(payment_status) = non_empty_opt(query.payment_status.as_deref()) {
        if !booking_engine::PAYMENT_STATUSES.contains(&payment_status.as_str()) {
            return Err(AppError::BadRequest(format!(
                "Unknown payment status '{payment_status}'."
            )));
        }
        filters.insert("payment_status".to_string(), Value::String(payment_status));
    }

    let rows = list_rows(
        pool,
        "bookings",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 2000),
        0,
        "check_in_date",
        true,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn create_booking(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateBookingInput>,
) -> AppResult<impl IntoResponse> {
    require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;
    validate_input(&payload)?;

    let created = booking_engine::create_booking(
        pool,
        &state.config.booking_reference_prefix,
        &payload,
    )
    .await?;
    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn get_booking(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "bookings", &path.booking_id, "id").await?;
    Ok(Json(record))
}

async fn update_booking(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateBookingInput>,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let booking = get_row(pool, "bookings", &path.booking_id, "id").await?;
    let patch = serialize_to_map(&payload);
    let updated = booking_engine::update_booking(pool, &booking, patch).await?;
    Ok(Json(updated))
}

async fn confirm_booking(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    transition(&state, &headers, &path.booking_id, "confirmed").await
}

async fn check_in_booking(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    transition(&state, &headers, &path.booking_id, "checked_in").await
}

async fn check_out_booking(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    transition(&state, &headers, &path.booking_id, "checked_out").await
}

async fn cancel_booking(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    transition(&state, &headers, &path.booking_id, "cancelled").await
}

async fn mark_booking_no_show(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    transition(&state, &headers, &path.booking_id, "no_show").await
}

async fn transition(
    state: &AppState,
    headers: &HeaderMap,
    booking_id: &str,
    next_status: &str,
) -> AppResult<Json<Value>> {
    require_user_id(state, headers).await?;
    let pool = db_pool(state)?;

    let booking = get_row(pool, "bookings", booking_id, "id").await?;
    let now_iso = Utc::now().to_rfc3339();
    let updated = booking_engine::transition_booking(pool, &booking, next_status, &now_iso).await?;
    Ok(Json(updated))
}

async fn set_booking_payment_status(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    headers: HeaderMap,
    Json(payload): Json<SetBookingPaymentStatusInput>,
) -> AppResult<Json<Value>> {
    require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let booking = get_row(pool, "bookings", &path.booking_id, "id").await?;
    let now_iso = Utc::now().to_rfc3339();
    let updated =
        booking_engine::set_payment_status(pool, &booking, &payload.payment_status, &now_iso)
            .await?;
    Ok(Json(updated))
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

fn non_empty_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}
