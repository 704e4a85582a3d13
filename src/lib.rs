//! Passenger flow estimation over the commercial air-transport network.
//!
//! The core is a Monte Carlo itinerary sampler: synthetic passengers depart
//! an origin airport within a time window, transfer along scheduled flights
//! (or aggregated direct flows) and the airports where their journeys end
//! are aggregated into a terminal-flow distribution. The surrounding
//! service feeds the sampler from a Postgres schedule store, runs it from a
//! NATS job queue and persists per-destination flow estimates.

pub mod actions;
pub mod airports;
pub mod airports_repo;
pub mod calculator;
pub mod config;
pub mod direct_flows;
pub mod distances;
pub mod email;
pub mod flight_cache;
pub mod flights;
pub mod flows_repo;
pub mod itineraries_repo;
pub mod metrics;
pub mod schedule_repo;
pub mod schema;
pub mod simulations_repo;
pub mod tasks;
pub mod web;

use anyhow::{Result, anyhow};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};

pub use calculator::{
    AirportFlowCalculator, CalculatorOptions, DestinationStats, LEG_PROBABILITY_DISTRIBUTION,
    MAX_LEGS, SimulationWindow,
};
pub use distances::DistanceMatrix;
pub use flights::LightFlight;
pub use schedule_repo::ScheduleSource;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Bring the store schema up to date. Run by every long-lived process at
/// start-up.
pub fn run_migrations(pool: &web::PgPool) -> Result<()> {
    let mut conn = pool.get()?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow!("migrations failed: {e}"))?;
    Ok(())
}
