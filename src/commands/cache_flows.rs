use anyhow::{Result, bail};
use chrono::{Duration, NaiveDate};
use tracing::info;

use airflows::airports_repo::AirportsRepository;
use airflows::config::Config;
use airflows::tasks::{CALCULATE_FLOWS_SUBJECT, CalculateFlowsTask};
use airflows::web::create_pool;

/// Enqueue one flow-calculation job per airport for each consecutive
/// simulation window. Workers pick the jobs up through the shared queue
/// group; windows beyond the first reuse the calculator cached for them.
pub async fn handle_cache_flows(
    config: &Config,
    start_date: NaiveDate,
    periods: u32,
    period_days: u32,
    sim_group_format: String,
) -> Result<()> {
    let pool = create_pool(&config.database_url)?;
    let codes = AirportsRepository::new(pool).all_codes().await?;
    if codes.is_empty() {
        bail!("the schedule store contains no airports");
    }

    let broker = async_nats::connect(&config.broker_url).await?;

    let mut enqueued = 0usize;
    for period in 0..periods {
        let window_start = start_date + Duration::days(i64::from(period * period_days));
        let window_end = window_start + Duration::days(i64::from(period_days));
        let sim_group = window_start.format(&sim_group_format).to_string();

        for code in &codes {
            let task = CalculateFlowsTask {
                origin: code.clone(),
                start_date: window_start.format("%Y-%m-%d").to_string(),
                end_date: window_end.format("%Y-%m-%d").to_string(),
                sim_group: sim_group.clone(),
            };
            broker
                .publish(CALCULATE_FLOWS_SUBJECT, serde_json::to_vec(&task)?.into())
                .await?;
            enqueued += 1;
        }
        info!(
            "enqueued {} flow jobs for the window starting {} [{}]",
            codes.len(),
            window_start,
            sim_group
        );
    }

    broker.flush().await?;
    info!("enqueued {enqueued} jobs in total");
    Ok(())
}
