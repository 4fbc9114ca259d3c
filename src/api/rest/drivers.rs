use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, patch, post, put};
use axum::Json;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{authorize, Capability, Principal};
use crate::engine::ingest::PositionOutcome;
use crate::error::AppError;
use crate::geo::Candidate;
use crate::models::driver::{Driver, GeoPoint, Vehicle};
use crate::state::AppState;

const MAX_NEARBY_LIMIT: usize = 50;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(register_driver))
        .route("/drivers/me", get(my_profile))
        .route(
            "/drivers/me/vehicle",
            put(register_vehicle).delete(remove_vehicle),
        )
        .route("/drivers/me/availability", patch(update_availability))
        .route("/drivers/me/location", post(report_location))
        .route("/drivers/nearby", get(nearby_drivers))
}

#[derive(Deserialize)]
pub struct RegisterDriverRequest {
    pub license_number: String,
}

#[derive(Deserialize)]
pub struct UpdateAvailabilityRequest {
    pub available: bool,
}

#[derive(Deserialize)]
pub struct ReportLocationRequest {
    pub lat: f64,
    pub lng: f64,
    pub recorded_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct ReportLocationResponse {
    pub accepted: bool,
    pub ride_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct NearbyQuery {
    pub lat: f64,
    pub lng: f64,
    pub limit: Option<usize>,
}

async fn register_driver(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(payload): Json<RegisterDriverRequest>,
) -> Result<Json<Driver>, AppError> {
    authorize(&principal, Capability::ManageDriverProfile)?;
    let driver = state.drivers.register(principal.id, &payload.license_number)?;
    Ok(Json(driver))
}

async fn my_profile(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Json<Driver>, AppError> {
    authorize(&principal, Capability::ManageDriverProfile)?;
    match state.drivers.find(principal.id) {
        Some(driver) => Ok(Json(driver)),
        None => Err(AppError::NotFound(
            "driver profile not registered".to_string(),
        )),
    }
}

async fn register_vehicle(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(payload): Json<Vehicle>,
) -> Result<Json<Driver>, AppError> {
    authorize(&principal, Capability::ManageDriverProfile)?;
    let driver = state.drivers.set_vehicle(principal.id, payload)?;
    Ok(Json(driver))
}

async fn remove_vehicle(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Json<Driver>, AppError> {
    authorize(&principal, Capability::ManageDriverProfile)?;
    let driver = state.drivers.remove_vehicle(principal.id)?;
    Ok(Json(driver))
}

async fn update_availability(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(payload): Json<UpdateAvailabilityRequest>,
) -> Result<Json<Driver>, AppError> {
    authorize(&principal, Capability::ManageDriverProfile)?;
    let driver = state
        .rides
        .set_driver_online(principal.id, payload.available)?;
    Ok(Json(driver))
}

async fn report_location(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(payload): Json<ReportLocationRequest>,
) -> Result<Json<ReportLocationResponse>, AppError> {
    authorize(&principal, Capability::ReportPosition)?;
    let outcome =
        state
            .ingest
            .report_position(principal.id, payload.lat, payload.lng, payload.recorded_at)?;

    let response = match outcome {
        PositionOutcome::Recorded => ReportLocationResponse {
            accepted: true,
            ride_id: None,
        },
        PositionOutcome::Tracked(ride_id) => ReportLocationResponse {
            accepted: true,
            ride_id: Some(ride_id),
        },
        PositionOutcome::Stale => ReportLocationResponse {
            accepted: false,
            ride_id: None,
        },
    };
    Ok(Json(response))
}

async fn nearby_drivers(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Query(query): Query<NearbyQuery>,
) -> Result<Json<Vec<Candidate>>, AppError> {
    authorize(&principal, Capability::SearchDrivers)?;
    GeoPoint {
        lat: query.lat,
        lng: query.lng,
    }
    .validate()
    .map_err(AppError::Validation)?;

    let limit = query.limit.unwrap_or(10).clamp(1, MAX_NEARBY_LIMIT);
    Ok(Json(state.geo.nearest(query.lat, query.lng, limit)))
}
