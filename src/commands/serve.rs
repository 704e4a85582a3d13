use anyhow::Result;
use tracing::info;

use airflows::config::Config;
use airflows::web::{create_pool, start_web_server};

pub async fn handle_serve(config: &Config, interface: String, port: u16) -> Result<()> {
    let pool = create_pool(&config.database_url)?;
    airflows::run_migrations(&pool)?;

    info!("connecting to broker at {}", config.broker_url);
    let broker = async_nats::connect(&config.broker_url).await?;

    start_web_server(interface, port, pool, broker).await
}
