mod commands;

use std::path::PathBuf;

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use airflows::config::Config;

#[derive(Parser, Debug)]
#[command(
    name = "airflows",
    about = "Passenger flow estimation over the commercial air-transport network",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP simulation-submission API
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        interface: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Consume simulation jobs from the queue
    Worker {
        /// Expand recurrent schedule legs on the fly instead of reading
        /// concrete-dated flights
        #[arg(long, default_value_t = false)]
        recurrent_schedules: bool,
        /// Expose Prometheus metrics on this port
        #[arg(long)]
        metrics_port: Option<u16>,
    },
    /// Run one flow calculation and print the result
    Calculate {
        #[arg(long)]
        origin: String,
        #[arg(long)]
        start_date: NaiveDate,
        /// Defaults to two weeks after the start date
        #[arg(long)]
        end_date: Option<NaiveDate>,
        #[arg(long, default_value_t = 1000)]
        passengers: usize,
        /// Sample over aggregated direct flows instead of schedules
        #[arg(long, default_value_t = false)]
        aggregated: bool,
        #[arg(long, default_value_t = false)]
        recurrent_schedules: bool,
        /// Fix the RNG seed for a reproducible run
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Enqueue flow-caching jobs for every airport over consecutive windows
    CacheFlows {
        #[arg(long)]
        start_date: NaiveDate,
        #[arg(long, default_value_t = 1)]
        periods: u32,
        #[arg(long, default_value_t = 14)]
        period_days: u32,
        /// strftime pattern applied to each window start to tag its records
        #[arg(long, default_value = "%Y-%m")]
        sim_group_format: String,
    },
    /// Run both simulation modes and write per-airport CSV comparisons
    CompareFlows {
        #[arg(long, value_delimiter = ',')]
        airports: Vec<String>,
        #[arg(long)]
        start_date: NaiveDate,
        #[arg(long)]
        end_date: NaiveDate,
        #[arg(long, default_value_t = 20_000)]
        passengers: usize,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Apply pending store migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Command::Serve { interface, port } => {
            commands::handle_serve(&config, interface, port).await
        }
        Command::Worker {
            recurrent_schedules,
            metrics_port,
        } => commands::handle_worker(&config, recurrent_schedules, metrics_port).await,
        Command::Calculate {
            origin,
            start_date,
            end_date,
            passengers,
            aggregated,
            recurrent_schedules,
            seed,
        } => {
            let end_date = end_date.unwrap_or(start_date + Duration::days(14));
            commands::handle_calculate(
                &config,
                origin,
                start_date,
                end_date,
                passengers,
                aggregated,
                recurrent_schedules,
                seed,
            )
            .await
        }
        Command::CacheFlows {
            start_date,
            periods,
            period_days,
            sim_group_format,
        } => {
            commands::handle_cache_flows(&config, start_date, periods, period_days, sim_group_format)
                .await
        }
        Command::CompareFlows {
            airports,
            start_date,
            end_date,
            passengers,
            out_dir,
        } => {
            commands::handle_compare_flows(
                &config,
                airports,
                start_date,
                end_date,
                passengers,
                out_dir,
            )
            .await
        }
        Command::Migrate => {
            let pool = airflows::web::create_pool(&config.database_url)?;
            airflows::run_migrations(&pool)?;
            println!("migrations applied");
            Ok(())
        }
    }
}
