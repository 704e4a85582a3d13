use std::sync::Arc;

use anyhow::Result;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use airflows::config::Config;
use airflows::email::EmailService;
use airflows::tasks::{
    self, CALCULATE_FLOWS_SUBJECT, CalculateFlowsTask, SIMULATE_PASSENGERS_SUBJECT,
    SimulatePassengersTask, TaskContext, WORKER_QUEUE_GROUP,
};
use airflows::web::create_pool;

/// Consume simulation jobs from the queue until interrupted.
///
/// Jobs are processed one at a time per worker; parallelism comes from
/// running more worker processes, which NATS balances through the shared
/// queue group.
pub async fn handle_worker(
    config: &Config,
    recurrent_schedules: bool,
    metrics_port: Option<u16>,
) -> Result<()> {
    let pool = create_pool(&config.database_url)?;
    airflows::run_migrations(&pool)?;

    info!("connecting to broker at {}", config.broker_url);
    let broker = async_nats::connect(&config.broker_url).await?;

    if let Some(port) = metrics_port {
        tokio::spawn(airflows::metrics::start_metrics_server(port));
    }

    let email = match EmailService::new(config) {
        Ok(service) => Some(service),
        Err(e) => {
            warn!("e-mail notifications disabled: {e}");
            None
        }
    };

    let cancel = CancellationToken::new();
    let ctx = Arc::new(TaskContext::new(pool, recurrent_schedules, cancel.clone()));

    let mut calculate_sub = broker
        .queue_subscribe(CALCULATE_FLOWS_SUBJECT, WORKER_QUEUE_GROUP.to_string())
        .await?;
    let mut simulate_sub = broker
        .queue_subscribe(SIMULATE_PASSENGERS_SUBJECT, WORKER_QUEUE_GROUP.to_string())
        .await?;

    info!(
        "worker ready, consuming {} and {}",
        CALCULATE_FLOWS_SUBJECT, SIMULATE_PASSENGERS_SUBJECT
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal, stopping worker");
                cancel.cancel();
                break;
            }
            message = calculate_sub.next() => {
                let Some(message) = message else {
                    warn!("flow-calculation subscription closed");
                    break;
                };
                process_calculate(&ctx, &message.payload).await;
            }
            message = simulate_sub.next() => {
                let Some(message) = message else {
                    warn!("simulation subscription closed");
                    break;
                };
                process_simulate(&ctx, email.as_ref(), &message.payload).await;
            }
        }
    }

    Ok(())
}

async fn process_calculate(ctx: &TaskContext, payload: &[u8]) {
    let task: CalculateFlowsTask = match serde_json::from_slice(payload) {
        Ok(task) => task,
        Err(e) => {
            error!("discarding malformed flow-calculation payload: {e}");
            metrics::counter!("worker.calculate.malformed").increment(1);
            return;
        }
    };

    info!("calculating flows for {} [{}]", task.origin, task.sim_group);
    match tasks::calculate_flows_for_airport(ctx, &task).await {
        Ok(_) => metrics::counter!("worker.calculate.completed").increment(1),
        Err(e) => {
            metrics::counter!("worker.calculate.failed").increment(1);
            error!("flow calculation for {} failed: {e:#}", task.origin);
        }
    }
}

async fn process_simulate(ctx: &TaskContext, email: Option<&EmailService>, payload: &[u8]) {
    let task: SimulatePassengersTask = match serde_json::from_slice(payload) {
        Ok(task) => task,
        Err(e) => {
            error!("discarding malformed simulation payload: {e}");
            metrics::counter!("worker.simulate.malformed").increment(1);
            return;
        }
    };

    info!(
        "simulating {} passengers from {} for {}",
        task.passengers, task.origin, task.simulation_id
    );
    match tasks::simulate_passengers(ctx, &task).await {
        Ok(_) => {
            metrics::counter!("worker.simulate.completed").increment(1);
            if let (Some(service), Some(to)) = (email, task.notify_email.as_deref()) {
                if let Err(e) = service.send_simulation_complete(to, task.simulation_id).await {
                    warn!("failed to send completion notification to {to}: {e}");
                }
            }
        }
        Err(e) => {
            metrics::counter!("worker.simulate.failed").increment(1);
            error!("simulation {} failed: {e:#}", task.simulation_id);
        }
    }
}
