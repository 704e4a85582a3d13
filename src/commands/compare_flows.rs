use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use airflows::calculator::{
    AirportFlowCalculator, CalculatorOptions, DestinationStats, SimulationWindow,
};
use airflows::config::Config;
use airflows::direct_flows::DirectFlowsRepository;
use airflows::schedule_repo::{FlightsTable, ScheduleSource};
use airflows::web::create_pool;

#[derive(Debug, Serialize)]
struct FlowRow<'a> {
    airport: &'a str,
    terminal_flow: f64,
    average_legs: f64,
    average_distance_km: f64,
}

/// Write one calculator result as CSV, destinations sorted by ascending
/// terminal flow so the heavy hitters end up at the bottom of the file.
fn write_flow_csv(path: &Path, results: &HashMap<String, DestinationStats>) -> Result<()> {
    let mut sorted: Vec<_> = results.iter().collect();
    sorted.sort_by(|a, b| {
        a.1.terminal_flow
            .partial_cmp(&b.1.terminal_flow)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });

    let mut writer = csv::Writer::from_path(path)?;
    for (airport, stats) in sorted {
        writer.serialize(FlowRow {
            airport,
            terminal_flow: stats.terminal_flow,
            average_legs: stats.average_legs,
            average_distance_km: stats.average_distance_km,
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// Run the scheduled and the aggregated sampler over the same window for
/// each airport and write both result sets as CSV files for side-by-side
/// inspection. The two modes should agree at aggregate level.
pub async fn handle_compare_flows(
    config: &Config,
    airports: Vec<String>,
    start_date: NaiveDate,
    end_date: NaiveDate,
    passengers: usize,
    out_dir: PathBuf,
) -> Result<()> {
    let pool = create_pool(&config.database_url)?;
    let window = SimulationWindow::from_dates(start_date, end_date);
    let flows = DirectFlowsRepository::new(pool.clone())
        .passenger_flows(window)
        .await?;

    let cancel = CancellationToken::new();
    let results = tokio::task::spawn_blocking(move || {
        let source: Arc<dyn ScheduleSource> = Arc::new(FlightsTable::new(pool));
        let scheduled = AirportFlowCalculator::new(
            Arc::clone(&source),
            Some(flows.clone()),
            CalculatorOptions::default(),
        )?;
        let aggregated = AirportFlowCalculator::new(
            source,
            Some(flows),
            CalculatorOptions {
                use_schedules: false,
                ..Default::default()
            },
        )?;

        let mut results = Vec::with_capacity(airports.len());
        for airport in airports {
            let scheduled_flows =
                scheduled.calculate(&airport, passengers, window, None, &cancel)?;
            let aggregated_flows =
                aggregated.calculate(&airport, passengers, window, None, &cancel)?;
            results.push((airport, scheduled_flows, aggregated_flows));
        }
        Ok::<_, anyhow::Error>(results)
    })
    .await??;

    std::fs::create_dir_all(&out_dir)?;
    for (airport, scheduled_flows, aggregated_flows) in results {
        let scheduled_path = out_dir.join(format!("{airport}_with_schedules.csv"));
        let aggregated_path = out_dir.join(format!("{airport}_aggregated_flows.csv"));
        write_flow_csv(&scheduled_path, &scheduled_flows)?;
        write_flow_csv(&aggregated_path, &aggregated_flows)?;
        info!(
            "wrote {} and {}",
            scheduled_path.display(),
            aggregated_path.display()
        );
    }

    Ok(())
}
