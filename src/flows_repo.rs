use anyhow::Result;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use tracing::info;

use crate::schema::passenger_flows;
use crate::web::PgPool;

/// One aggregated flow record: expected passengers from an origin airport
/// terminating at a destination over a simulation window.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = passenger_flows)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewPassengerFlow {
    pub departure_airport: String,
    pub arrival_airport: String,
    pub estimated_passengers: f64,
    pub average_distance_km: f64,
    pub record_date: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub period_days: i32,
    pub sim_group: String,
}

#[derive(Clone)]
pub struct PassengerFlowsRepository {
    pool: PgPool,
}

impl PassengerFlowsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Replace all flow records for `(origin, sim_group)` with `rows` in a
    /// single transaction, so re-runs never leave a mix of old and new
    /// records behind.
    pub async fn replace_flows(
        &self,
        origin: &str,
        group: &str,
        rows: Vec<NewPassengerFlow>,
    ) -> Result<usize> {
        use crate::schema::passenger_flows::dsl::*;

        let pool = self.pool.clone();
        let origin = origin.to_string();
        let group = group.to_string();

        let inserted = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            conn.transaction::<usize, anyhow::Error, _>(|conn| {
                let deleted = diesel::delete(
                    passenger_flows
                        .filter(departure_airport.eq(&origin).and(sim_group.eq(&group))),
                )
                .execute(conn)?;
                if deleted > 0 {
                    info!("dropped {deleted} prior flow records for {origin} [{group}]");
                }

                let inserted = diesel::insert_into(passenger_flows)
                    .values(&rows)
                    .execute(conn)?;
                Ok(inserted)
            })
        })
        .await??;

        Ok(inserted)
    }
}
