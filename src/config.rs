use tracing::warn;

/// Process configuration, read once from the environment at start-up.
/// Every option has a development default so a bare `cargo run` works
/// against local services.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres schedule and result store.
    pub database_url: String,
    /// NATS broker carrying the simulation job queue.
    pub broker_url: String,
    /// Base URL of the front end, used in notification e-mail links.
    pub portal_base: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub from_email: String,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Self {
        let smtp_port = env_or("SMTP_PORT", "465").parse().unwrap_or_else(|_| {
            warn!("SMTP_PORT is not a valid port number, falling back to 465");
            465
        });

        Self {
            database_url: env_or("DATABASE_URL", "postgres://localhost/airflows"),
            broker_url: env_or("NATS_URL", "nats://localhost:4222"),
            portal_base: env_or("PORTAL_BASE", "http://localhost:5173"),
            smtp_host: env_or("SMTP_HOST", "localhost"),
            smtp_port,
            smtp_username: env_or("SMTP_USERNAME", ""),
            smtp_password: env_or("SMTP_PASSWORD", ""),
            from_email: env_or("FROM_EMAIL", "noreply@localhost"),
        }
    }
}
