use anyhow::Result;
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::simulated_itineraries;
use crate::web::PgPool;

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = simulated_itineraries)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewSimulatedItinerary {
    pub origin: String,
    pub destination: String,
    pub simulation_id: Uuid,
}

#[derive(Clone)]
pub struct ItinerariesRepository {
    pool: PgPool,
}

impl ItinerariesRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a batch of sampled itineraries. Batched to stay clear of the
    /// Postgres bind-parameter limit.
    pub async fn insert_itineraries(&self, rows: Vec<NewSimulatedItinerary>) -> Result<usize> {
        use crate::schema::simulated_itineraries::dsl::*;

        const BATCH_SIZE: usize = 1000;

        let pool = self.pool.clone();
        let inserted = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let mut total = 0usize;
            for batch in rows.chunks(BATCH_SIZE) {
                total += diesel::insert_into(simulated_itineraries)
                    .values(batch)
                    .execute(&mut conn)?;
            }
            Ok::<usize, anyhow::Error>(total)
        })
        .await??;

        Ok(inserted)
    }

    /// Number of itineraries persisted for a simulation.
    pub async fn count_for_simulation(&self, simulation: Uuid) -> Result<i64> {
        use crate::schema::simulated_itineraries::dsl::*;

        let pool = self.pool.clone();
        let count = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let count = simulated_itineraries
                .filter(simulation_id.eq(simulation))
                .count()
                .get_result::<i64>(&mut conn)?;
            Ok::<i64, anyhow::Error>(count)
        })
        .await??;

        Ok(count)
    }
}
