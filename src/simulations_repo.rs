use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::schema::simulations;
use crate::web::PgPool;

/// A user-submitted simulation request.
#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize)]
#[diesel(table_name = simulations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Simulation {
    pub id: Uuid,
    pub departure_airport: String,
    pub passengers: i32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub submitted_by: String,
    pub submitted_time: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SimulationsRepository {
    pool: PgPool,
}

impl SimulationsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert_simulation(&self, simulation: Simulation) -> Result<()> {
        use crate::schema::simulations::dsl::*;

        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            diesel::insert_into(simulations)
                .values(&simulation)
                .execute(&mut conn)?;
            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(())
    }

    pub async fn get_simulation(&self, simulation_id: Uuid) -> Result<Option<Simulation>> {
        use crate::schema::simulations::dsl::*;

        let pool = self.pool.clone();
        let simulation = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let simulation = simulations
                .find(simulation_id)
                .select(Simulation::as_select())
                .first::<Simulation>(&mut conn)
                .optional()?;
            Ok::<Option<Simulation>, anyhow::Error>(simulation)
        })
        .await??;

        Ok(simulation)
    }
}
