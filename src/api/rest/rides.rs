use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::{authorize, Capability, Principal, Role};
use crate::error::AppError;
use crate::models::driver::GeoPoint;
use crate::models::rating::Rating;
use crate::models::ride::{Ride, RideLocation, RideStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/rides", post(request_ride))
        .route("/rides/requested", get(list_requested))
        .route("/rides/history", get(history))
        .route("/rides/:id", get(get_ride))
        .route("/rides/:id/accept", post(accept_ride))
        .route("/rides/:id/status", post(update_status))
        .route("/rides/:id/cancel", post(cancel_ride))
        .route("/rides/:id/track", get(track_ride))
        .route("/rides/:id/rating", post(rate_ride))
}

#[derive(Deserialize)]
pub struct RequestRideRequest {
    pub start_location: String,
    pub end_location: String,
    pub pickup: Option<GeoPoint>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: RideStatus,
}

#[derive(Deserialize)]
pub struct RateRideRequest {
    pub score: f64,
    pub comment: Option<String>,
}

async fn request_ride(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(payload): Json<RequestRideRequest>,
) -> Result<(StatusCode, Json<Ride>), AppError> {
    authorize(&principal, Capability::RequestRide)?;
    let ride = state.dispatcher.request_ride(
        principal.id,
        &payload.start_location,
        &payload.end_location,
        payload.pickup,
    )?;
    Ok((StatusCode::CREATED, Json(ride)))
}

async fn list_requested(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Json<Vec<Ride>>, AppError> {
    authorize(&principal, Capability::ListRequestedRides)?;
    Ok(Json(state.dispatcher.list_requested(principal.id)?))
}

async fn history(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Json<Vec<Ride>>, AppError> {
    authorize(&principal, Capability::ViewRide)?;
    Ok(Json(state.rides.history(principal.id)))
}

async fn get_ride(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<Ride>, AppError> {
    authorize(&principal, Capability::ViewRide)?;
    let ride = state.rides.get(id)?;

    // drivers browsing the pull listing may look at unclaimed rides
    let visible = principal.role == Role::Admin
        || ride.involves(principal.id)
        || (principal.role == Role::Driver && ride.status == RideStatus::Requested);
    if !visible {
        return Err(AppError::Forbidden(format!("ride {id} is not yours")));
    }
    Ok(Json(ride))
}

async fn accept_ride(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<Ride>, AppError> {
    authorize(&principal, Capability::AcceptRide)?;
    Ok(Json(state.dispatcher.accept(id, principal.id)?))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Ride>, AppError> {
    authorize(&principal, Capability::UpdateRideStatus)?;
    Ok(Json(state.rides.transition(id, principal.id, payload.status)?))
}

async fn cancel_ride(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<Ride>, AppError> {
    authorize(&principal, Capability::CancelRide)?;
    Ok(Json(state.rides.cancel_request(id, principal.id)?))
}

async fn track_ride(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<RideLocation>, AppError> {
    authorize(&principal, Capability::TrackRide)?;
    Ok(Json(state.ingest.track(id, principal.id)?))
}

async fn rate_ride(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(payload): Json<RateRideRequest>,
) -> Result<(StatusCode, Json<Rating>), AppError> {
    authorize(&principal, Capability::RateRide)?;
    let rating = state
        .dispatcher
        .rate(id, principal.id, payload.score, payload.comment)?;
    Ok((StatusCode::CREATED, Json(rating)))
}
