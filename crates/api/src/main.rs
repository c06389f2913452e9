//! API server entry point.

use std::sync::Arc;

use api::AppState;
use api::config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use store::{InMemoryShopStore, PostgresShopStore, ShopStore};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use workflow::{InMemoryPaymentGateway, PaymentGateway, RealtimeHub, StripeGateway};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    // 1. Load configuration (.env first)
    let config = Config::from_env();

    // 2. Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "invalid configuration");
        std::process::exit(1);
    }

    // 3. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 4. Pick the store backend
    match config.database_url.clone() {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .connect(&url)
                .await
                .expect("failed to connect to database");
            let store = PostgresShopStore::new(pool);
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            with_gateway(config, store, metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            with_gateway(config, InMemoryShopStore::new(), metrics_handle).await;
        }
    }
}

/// Picks the payment gateway and starts serving.
async fn with_gateway<S: ShopStore>(config: Config, store: S, metrics_handle: PrometheusHandle) {
    match config.stripe_config() {
        Some(stripe) => {
            let gateway = StripeGateway::new(stripe).expect("failed to build payment gateway client");
            serve(config, store, gateway, metrics_handle).await;
        }
        None => {
            tracing::warn!("STRIPE_SECRET not set, using in-memory payment gateway");
            serve(config, store, InMemoryPaymentGateway::new(), metrics_handle).await;
        }
    }
}

async fn serve<S: ShopStore, P: PaymentGateway + 'static>(
    config: Config,
    store: S,
    gateway: P,
    metrics_handle: PrometheusHandle,
) {
    let hub = RealtimeHub::default();
    let state = Arc::new(AppState::new(store, gateway, hub.clone()));
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, currency = %config.currency, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    hub.shutdown();
    tracing::info!("server shut down gracefully");
}
