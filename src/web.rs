use anyhow::Result;
use axum::{
    Router,
    body::Body,
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use diesel::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool};
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::actions;

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

pub fn create_pool(database_url: &str) -> Result<PgPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = Pool::builder().build(manager)?;
    Ok(pool)
}

/// Shared handler state: the store pool and the job broker.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub broker: async_nats::Client,
}

/// Log each request with a short correlation id and its duration.
async fn request_logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = Uuid::new_v4().to_string()[..8].to_string();
    let start_time = Instant::now();

    info!("Started {} {} [{}]", method, path, request_id);
    let response = next.run(request).await;
    info!(
        "Completed {} {} [{}] {} in {:.2}ms",
        method,
        path,
        request_id,
        response.status().as_u16(),
        start_time.elapsed().as_secs_f64() * 1000.0
    );
    response
}

pub async fn start_web_server(
    interface: String,
    port: u16,
    pool: PgPool,
    broker: async_nats::Client,
) -> Result<()> {
    let app_state = AppState { pool, broker };

    let app = Router::new()
        .route("/", get(actions::home))
        .route("/simulations", post(actions::submit_simulation))
        .route("/simulations/{id}", get(actions::get_simulation))
        .with_state(app_state)
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", interface, port)).await?;
    info!("web server listening on http://{}:{}", interface, port);
    axum::serve(listener, app).await?;

    Ok(())
}
