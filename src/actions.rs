use std::collections::BTreeMap;
use std::sync::OnceLock;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::airports_repo::AirportsRepository;
use crate::itineraries_repo::ItinerariesRepository;
use crate::simulations_repo::{Simulation, SimulationsRepository};
use crate::tasks::{SIMULATE_PASSENGERS_SUBJECT, SimulatePassengersTask};
use crate::web::AppState;

const MAX_SIMULATED_PASSENGERS: i64 = 100_000;

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9_.+-]+@[a-zA-Z0-9-]+\.[a-zA-Z0-9-.]+$")
            .expect("e-mail pattern compiles")
    })
}

fn json_error(status: StatusCode, message: &str) -> impl IntoResponse {
    (status, Json(json!({ "error": true, "message": message })))
}

fn validation_error(details: BTreeMap<&'static str, String>) -> axum::response::Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({
            "error": true,
            "message": "invalid parameters",
            "details": details,
        })),
    )
        .into_response()
}

pub async fn home() -> impl IntoResponse {
    Json(json!({ "version": env!("CARGO_PKG_VERSION") }))
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationRequest {
    pub departure_airport: String,
    pub passengers: i64,
    pub start_date: String,
    pub end_date: String,
    pub submitted_by: String,
}

#[derive(Debug, Serialize)]
pub struct SimulationAccepted {
    pub sim_id: Uuid,
}

/// Field-level validation that needs no store access. Returns the parsed
/// date range on success.
pub(crate) fn validate_request(
    request: &SimulationRequest,
) -> Result<(NaiveDate, NaiveDate), BTreeMap<&'static str, String>> {
    let mut details: BTreeMap<&'static str, String> = BTreeMap::new();

    if request.departure_airport.trim().is_empty() {
        details.insert("departure_airport", "value is required".to_string());
    }
    if request.passengers < 1 || request.passengers > MAX_SIMULATED_PASSENGERS {
        details.insert(
            "passengers",
            format!("value must be between 1 and {MAX_SIMULATED_PASSENGERS}"),
        );
    }
    if !email_pattern().is_match(&request.submitted_by) {
        details.insert("submitted_by", "value is not a valid e-mail address".to_string());
    }

    let start = NaiveDate::parse_from_str(&request.start_date, "%Y-%m-%d");
    let end = NaiveDate::parse_from_str(&request.end_date, "%Y-%m-%d");
    match (&start, &end) {
        (Ok(start_date), Ok(end_date)) if start_date > end_date => {
            details.insert("end_date", "value precedes the start date".to_string());
        }
        _ => {
            if start.is_err() {
                details.insert("start_date", "value is not an ISO date".to_string());
            }
            if end.is_err() {
                details.insert("end_date", "value is not an ISO date".to_string());
            }
        }
    }

    if details.is_empty() {
        Ok((start.expect("validated"), end.expect("validated")))
    } else {
        Err(details)
    }
}

/// Accept a simulation request: validate it, persist the submission and
/// enqueue the sampling job. Invalid requests are rejected without
/// enqueueing anything.
pub async fn submit_simulation(
    State(state): State<AppState>,
    Json(request): Json<SimulationRequest>,
) -> axum::response::Response {
    let (start_date, end_date) = match validate_request(&request) {
        Ok(dates) => dates,
        Err(details) => return validation_error(details),
    };

    let airports_repo = AirportsRepository::new(state.pool.clone());
    match airports_repo.airport_exists(&request.departure_airport).await {
        Ok(true) => {}
        Ok(false) => {
            let mut details = BTreeMap::new();
            details.insert("departure_airport", "unknown airport code".to_string());
            return validation_error(details);
        }
        Err(e) => {
            error!("failed to look up airport {}: {e}", request.departure_airport);
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "database error")
                .into_response();
        }
    }

    let simulation = Simulation {
        id: Uuid::new_v4(),
        departure_airport: request.departure_airport.clone(),
        passengers: request.passengers as i32,
        start_date,
        end_date,
        submitted_by: request.submitted_by.clone(),
        submitted_time: Utc::now(),
    };

    let simulations_repo = SimulationsRepository::new(state.pool.clone());
    if let Err(e) = simulations_repo.insert_simulation(simulation.clone()).await {
        error!("failed to store simulation record: {e}");
        return json_error(StatusCode::INTERNAL_SERVER_ERROR, "database error").into_response();
    }

    let task = SimulatePassengersTask {
        simulation_id: simulation.id,
        origin: simulation.departure_airport.clone(),
        passengers: request.passengers as usize,
        start_date: request.start_date.clone(),
        end_date: request.end_date.clone(),
        notify_email: Some(request.submitted_by.clone()),
    };
    let payload = match serde_json::to_vec(&task) {
        Ok(payload) => payload,
        Err(e) => {
            error!("failed to serialize simulation task: {e}");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
                .into_response();
        }
    };
    if let Err(e) = state
        .broker
        .publish(SIMULATE_PASSENGERS_SUBJECT, payload.into())
        .await
    {
        error!("failed to enqueue simulation {}: {e}", simulation.id);
        return json_error(StatusCode::INTERNAL_SERVER_ERROR, "queue error").into_response();
    }

    Json(SimulationAccepted {
        sim_id: simulation.id,
    })
    .into_response()
}

pub async fn get_simulation(
    State(state): State<AppState>,
    Path(simulation_id): Path<Uuid>,
) -> axum::response::Response {
    let simulations_repo = SimulationsRepository::new(state.pool.clone());
    match simulations_repo.get_simulation(simulation_id).await {
        Ok(Some(simulation)) => {
            let itineraries = ItinerariesRepository::new(state.pool)
                .count_for_simulation(simulation_id)
                .await
                .unwrap_or_else(|e| {
                    error!("failed to count itineraries for {simulation_id}: {e}");
                    0
                });
            Json(json!({
                "simulation": simulation,
                "itineraries": itineraries,
            }))
            .into_response()
        }
        Ok(None) => json_error(
            StatusCode::NOT_FOUND,
            &format!("simulation {simulation_id} not found"),
        )
        .into_response(),
        Err(e) => {
            error!("failed to load simulation {simulation_id}: {e}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "database error").into_response()
        }
    }
}
