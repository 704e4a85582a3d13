use std::num::NonZeroUsize;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDate, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::calculator::{
    AirportFlowCalculator, CalculatorOptions, SimulationWindow, seats_per_passenger,
};
use crate::direct_flows::DirectFlowsRepository;
use crate::flows_repo::{NewPassengerFlow, PassengerFlowsRepository};
use crate::itineraries_repo::{ItinerariesRepository, NewSimulatedItinerary};
use crate::schedule_repo::{FlightsTable, RecurringSchedule, ScheduleSource};
use crate::web::PgPool;

pub const CALCULATE_FLOWS_SUBJECT: &str = "flows.calculate";
pub const SIMULATE_PASSENGERS_SUBJECT: &str = "flows.simulate";
pub const WORKER_QUEUE_GROUP: &str = "flow-workers";

/// Sample size for the periodic flow-caching jobs.
pub const FLOW_JOB_PASSENGERS: usize = 10_000;

/// Calculators are cached per simulation window; aggregating direct flows
/// and building the distance matrix are too expensive to repeat per job,
/// but holding more than a few months of windows wastes memory.
const CALCULATOR_WINDOW_CACHE: usize = 4;

/// Recompute terminal flows for one origin airport and replace its stored
/// flow records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculateFlowsTask {
    pub origin: String,
    pub start_date: String,
    pub end_date: String,
    pub sim_group: String,
}

/// Sample and persist raw itineraries for a user-submitted simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatePassengersTask {
    pub simulation_id: Uuid,
    pub origin: String,
    pub passengers: usize,
    pub start_date: String,
    pub end_date: String,
    #[serde(default)]
    pub notify_email: Option<String>,
}

/// Queue payloads carry dates as ISO-8601 strings; parse them into the
/// simulation window. Malformed dates fail the job.
pub fn parse_window(start_date: &str, end_date: &str) -> Result<SimulationWindow> {
    let start = NaiveDate::parse_from_str(start_date, "%Y-%m-%d")
        .with_context(|| format!("invalid start date {start_date:?}"))?;
    let end = NaiveDate::parse_from_str(end_date, "%Y-%m-%d")
        .with_context(|| format!("invalid end date {end_date:?}"))?;
    Ok(SimulationWindow::from_dates(start, end))
}

pub fn itinerary_record(itinerary: &[String], simulation_id: Uuid) -> Option<NewSimulatedItinerary> {
    let origin = itinerary.first()?;
    let destination = itinerary.last()?;
    Some(NewSimulatedItinerary {
        origin: origin.clone(),
        destination: destination.clone(),
        simulation_id,
    })
}

/// Shared state for one worker process: a connection pool and the window
/// cache of ready calculators. A calculator is initialised lazily on the
/// first job for its window, never at process start-up.
pub struct TaskContext {
    pool: PgPool,
    recurrent_schedules: bool,
    cancel: CancellationToken,
    calculators: tokio::sync::Mutex<LruCache<(DateTime<Utc>, DateTime<Utc>), Arc<AirportFlowCalculator>>>,
}

impl TaskContext {
    pub fn new(pool: PgPool, recurrent_schedules: bool, cancel: CancellationToken) -> Self {
        Self {
            pool,
            recurrent_schedules,
            cancel,
            calculators: tokio::sync::Mutex::new(LruCache::new(
                NonZeroUsize::new(CALCULATOR_WINDOW_CACHE).expect("cache size is non-zero"),
            )),
        }
    }

    async fn calculator_for(&self, window: SimulationWindow) -> Result<Arc<AirportFlowCalculator>> {
        let key = (window.start, window.end);
        {
            let mut calculators = self.calculators.lock().await;
            if let Some(calculator) = calculators.get(&key) {
                return Ok(Arc::clone(calculator));
            }
        }

        info!(
            "building calculator for window {} .. {}",
            window.start, window.end
        );
        let flows = DirectFlowsRepository::new(self.pool.clone())
            .passenger_flows(window)
            .await?;

        let pool = self.pool.clone();
        let recurrent = self.recurrent_schedules;
        let calculator = tokio::task::spawn_blocking(move || {
            let source: Arc<dyn ScheduleSource> = if recurrent {
                Arc::new(RecurringSchedule::new(pool))
            } else {
                Arc::new(FlightsTable::new(pool))
            };
            AirportFlowCalculator::new(source, Some(flows), CalculatorOptions::default())
        })
        .await??;

        let calculator = Arc::new(calculator);
        self.calculators
            .lock()
            .await
            .put(key, Arc::clone(&calculator));
        Ok(calculator)
    }
}

/// Simulate flows out of `origin` and replace its records for the task's
/// sim group. Returns the number of flow records written.
pub async fn calculate_flows_for_airport(
    ctx: &TaskContext,
    task: &CalculateFlowsTask,
) -> Result<usize> {
    let window = parse_window(&task.start_date, &task.end_date)?;
    let calculator = ctx.calculator_for(window).await?;

    let results = {
        let calculator = Arc::clone(&calculator);
        let origin = task.origin.clone();
        let cancel = ctx.cancel.clone();
        tokio::task::spawn_blocking(move || {
            calculator.calculate(&origin, FLOW_JOB_PASSENGERS, window, None, &cancel)
        })
        .await??
    };

    let repo = PassengerFlowsRepository::new(ctx.pool.clone());
    if results.is_empty() {
        info!("no flights from {}", task.origin);
        repo.replace_flows(&task.origin, &task.sim_group, Vec::new())
            .await?;
        return Ok(0);
    }

    // Scale the per-passenger flow fractions back up to an absolute
    // passenger estimate: direct passengers out of the origin, corrected
    // for each journey consuming more than one seat on average.
    let estimated_total = calculator.direct_passengers_from(&task.origin) / seats_per_passenger();
    let record_date = Utc::now();
    let rows: Vec<NewPassengerFlow> = results
        .iter()
        .map(|(terminal, stats)| NewPassengerFlow {
            departure_airport: task.origin.clone(),
            arrival_airport: terminal.clone(),
            estimated_passengers: stats.terminal_flow * estimated_total,
            average_distance_km: stats.average_distance_km,
            record_date,
            window_start: window.start,
            window_end: window.end,
            period_days: window.period_days() as i32,
            sim_group: task.sim_group.clone(),
        })
        .collect();

    let inserted = repo.replace_flows(&task.origin, &task.sim_group, rows).await?;
    info!(
        "stored {inserted} flow records for {} [{}]",
        task.origin, task.sim_group
    );
    Ok(inserted)
}

/// Sample itineraries for a user-submitted simulation and persist them.
/// Zero productive itineraries is a hard failure so the submitter learns
/// that the requested origin and window cannot be simulated.
pub async fn simulate_passengers(ctx: &TaskContext, task: &SimulatePassengersTask) -> Result<usize> {
    let window = parse_window(&task.start_date, &task.end_date)?;
    let calculator = ctx.calculator_for(window).await?;

    let itineraries = {
        let calculator = Arc::clone(&calculator);
        let origin = task.origin.clone();
        let passengers = task.passengers;
        let cancel = ctx.cancel.clone();
        tokio::task::spawn_blocking(move || {
            calculator.sample_itineraries(&origin, passengers, window, None, &cancel)
        })
        .await??
    };

    if itineraries.is_empty() {
        bail!(
            "no itineraries could be generated for {} between {} and {}",
            task.origin,
            task.start_date,
            task.end_date
        );
    }

    let rows: Vec<NewSimulatedItinerary> = itineraries
        .iter()
        .filter_map(|itinerary| itinerary_record(itinerary, task.simulation_id))
        .collect();
    let inserted = ItinerariesRepository::new(ctx.pool.clone())
        .insert_itineraries(rows)
        .await?;
    info!(
        "stored {inserted} itineraries for simulation {}",
        task.simulation_id
    );
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_window() {
        let window = parse_window("2016-02-01", "2016-02-15").unwrap();
        assert_eq!(window.period_days(), 14);
        assert!(parse_window("02/01/2016", "2016-02-15").is_err());
        assert!(parse_window("2016-02-01", "not-a-date").is_err());
    }

    #[test]
    fn test_task_payload_field_names() {
        let task = CalculateFlowsTask {
            origin: "BNA".to_string(),
            start_date: "2016-02-01".to_string(),
            end_date: "2016-02-15".to_string(),
            sim_group: "2016-02".to_string(),
        };
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["origin"], "BNA");
        assert_eq!(json["start_date"], "2016-02-01");
        assert_eq!(json["sim_group"], "2016-02");

        // notify_email is optional on the wire.
        let parsed: SimulatePassengersTask = serde_json::from_str(
            r#"{
                "simulation_id": "f6cd9c9c-0b5a-4f38-9a29-3d1e6c7f31f0",
                "origin": "BNA",
                "passengers": 1000,
                "start_date": "2016-02-01",
                "end_date": "2016-02-15"
            }"#,
        )
        .unwrap();
        assert_eq!(parsed.passengers, 1000);
        assert!(parsed.notify_email.is_none());
    }

    #[test]
    fn test_itinerary_record_uses_endpoints() {
        let simulation_id = Uuid::new_v4();
        let itinerary = vec!["BNA".to_string(), "ATL".to_string(), "CDG".to_string()];
        let record = itinerary_record(&itinerary, simulation_id).unwrap();
        assert_eq!(record.origin, "BNA");
        assert_eq!(record.destination, "CDG");
        assert_eq!(record.simulation_id, simulation_id);

        assert!(itinerary_record(&[], simulation_id).is_none());
    }
}
