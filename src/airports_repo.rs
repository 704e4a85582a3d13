use anyhow::Result;
use diesel::prelude::*;

use crate::web::PgPool;

#[derive(Clone)]
pub struct AirportsRepository {
    pool: PgPool,
}

impl AirportsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn airport_exists(&self, airport_code: &str) -> Result<bool> {
        use crate::schema::airports::dsl::*;

        let pool = self.pool.clone();
        let airport_code = airport_code.to_string();
        let count = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let count = airports
                .filter(code.eq(&airport_code))
                .count()
                .get_result::<i64>(&mut conn)?;
            Ok::<i64, anyhow::Error>(count)
        })
        .await??;

        Ok(count > 0)
    }

    /// All airport codes, ordered. Used when fanning out one job per origin.
    pub async fn all_codes(&self) -> Result<Vec<String>> {
        use crate::schema::airports::dsl::*;

        let pool = self.pool.clone();
        let codes = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let codes = airports
                .select(code)
                .order(code.asc())
                .load::<String>(&mut conn)?;
            Ok::<Vec<String>, anyhow::Error>(codes)
        })
        .await??;

        Ok(codes)
    }
}
