use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use airflows::calculator::{AirportFlowCalculator, CalculatorOptions, SimulationWindow};
use airflows::config::Config;
use airflows::direct_flows::DirectFlowsRepository;
use airflows::schedule_repo::{FlightsTable, RecurringSchedule, ScheduleSource};
use airflows::web::create_pool;

#[allow(clippy::too_many_arguments)]
pub async fn handle_calculate(
    config: &Config,
    origin: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    passengers: usize,
    aggregated: bool,
    recurrent_schedules: bool,
    seed: Option<u64>,
) -> Result<()> {
    let pool = create_pool(&config.database_url)?;
    let window = SimulationWindow::from_dates(start_date, end_date);

    println!(
        "Calculating the probability of a passenger from {origin} reaching each airport \
         ({passengers} samples, {start_date} to {end_date})..."
    );

    let flows = DirectFlowsRepository::new(pool.clone())
        .passenger_flows(window)
        .await?;

    let cancel = CancellationToken::new();
    let results = {
        let origin = origin.clone();
        tokio::task::spawn_blocking(move || {
            let source: Arc<dyn ScheduleSource> = if recurrent_schedules {
                Arc::new(RecurringSchedule::new(pool))
            } else {
                Arc::new(FlightsTable::new(pool))
            };
            let options = CalculatorOptions {
                use_schedules: !aggregated,
                ..Default::default()
            };
            let calculator = AirportFlowCalculator::new(source, Some(flows), options)?;
            calculator.calculate(&origin, passengers, window, seed, &cancel)
        })
        .await??
    };

    if results.is_empty() {
        println!("No flights from {origin} in the window.");
        return Ok(());
    }

    let mut sorted: Vec<_> = results.iter().collect();
    sorted.sort_by(|a, b| {
        a.1.terminal_flow
            .partial_cmp(&b.1.terminal_flow)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });

    let mut cumulative = 0.0;
    for (airport, stats) in sorted {
        println!(
            "{airport}  flow {:.4}  avg legs {:.2}  avg distance {:.0} km",
            stats.terminal_flow, stats.average_legs, stats.average_distance_km
        );
        cumulative += stats.terminal_flow;
    }
    // Sanity check: should come out near 1 unless sampling gave up early.
    println!("Cumulative probability: {cumulative:.3}");

    Ok(())
}
