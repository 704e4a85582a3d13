use std::collections::HashMap;

use anyhow::Result;
use diesel::dsl::{sql, sum};
use diesel::prelude::*;
use diesel::sql_types::Double;

use crate::calculator::SimulationWindow;
use crate::flights::{LOAD_RATIO_INTERCEPT, LOAD_RATIO_SLOPE};
use crate::web::PgPool;

/// origin -> destination -> summed seats over a time window.
pub type SeatFlows = HashMap<String, HashMap<String, i64>>;

/// origin -> destination -> expected passengers over a time window.
pub type PassengerFlows = HashMap<String, HashMap<String, f64>>;

#[derive(Clone)]
pub struct DirectFlowsRepository {
    pool: PgPool,
}

impl DirectFlowsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Total seats on direct flights per (origin, destination) pair within
    /// the window. Pairs without seats are dropped.
    pub async fn seat_flows(&self, window: SimulationWindow) -> Result<SeatFlows> {
        use crate::schema::flights::dsl::*;

        let pool = self.pool.clone();
        let rows = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let rows = flights
                .filter(
                    departure_time
                        .ge(window.start)
                        .and(departure_time.lt(window.end)),
                )
                .group_by((departure_airport, arrival_airport))
                .select((departure_airport, arrival_airport, sum(total_seats)))
                .load::<(String, String, Option<i64>)>(&mut conn)?;
            Ok::<_, anyhow::Error>(rows)
        })
        .await??;

        let mut result: SeatFlows = HashMap::new();
        for (origin, destination, seats) in rows {
            let seats = seats.unwrap_or(0);
            if seats > 0 {
                result.entry(origin).or_default().insert(destination, seats);
            }
        }
        Ok(result)
    }

    /// Expected direct passengers per (origin, destination) pair within the
    /// window. The load-ratio conversion is applied per flight before
    /// summing; pairs that do not come out strictly positive are dropped.
    pub async fn passenger_flows(&self, window: SimulationWindow) -> Result<PassengerFlows> {
        use crate::schema::flights::dsl::*;

        let pool = self.pool.clone();
        let rows = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let passenger_sum = sql::<Double>(&format!(
                "SUM(({LOAD_RATIO_SLOPE} * total_seats + {LOAD_RATIO_INTERCEPT}) * total_seats)"
            ));
            let rows = flights
                .filter(
                    departure_time
                        .ge(window.start)
                        .and(departure_time.lt(window.end)),
                )
                .group_by((departure_airport, arrival_airport))
                .select((departure_airport, arrival_airport, passenger_sum))
                .load::<(String, String, f64)>(&mut conn)?;
            Ok::<_, anyhow::Error>(rows)
        })
        .await??;

        let mut result: PassengerFlows = HashMap::new();
        for (origin, destination, passengers) in rows {
            if passengers > 0.0 {
                result
                    .entry(origin)
                    .or_default()
                    .insert(destination, passengers);
            }
        }
        Ok(result)
    }
}

/// Total expected direct passengers leaving `origin`.
pub fn total_departing_passengers(flows: &PassengerFlows, origin: &str) -> f64 {
    flows
        .get(origin)
        .map(|destinations| destinations.values().sum())
        .unwrap_or(0.0)
}
