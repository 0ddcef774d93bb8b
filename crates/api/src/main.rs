//! API server entry point.

use std::error::Error;
use std::sync::Arc;

use api::config::Config;
use booking::{BookingEngine, CardProvider, InMemoryProvider, PaymentProvider, WalletProvider};
use domain::PaymentMethod;
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::postgres::PgPoolOptions;
use store::{BookingStore, InMemoryStore, PostgresStore};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Secret shared with the in-memory providers used when no real provider is configured.
const DEMO_PROVIDER_SECRET: &str = "demo-secret";

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn providers(config: &Config) -> Vec<Arc<dyn PaymentProvider>> {
    let mut providers: Vec<Arc<dyn PaymentProvider>> = Vec::new();
    if let Some(wallet) = &config.wallet {
        providers.push(Arc::new(WalletProvider::new(&wallet.api_url, &wallet.secret)));
    }
    if let Some(card) = &config.card {
        providers.push(Arc::new(CardProvider::new(&card.api_url, &card.secret)));
    }
    if providers.is_empty() {
        tracing::warn!("no payment provider configured, using in-memory demo providers");
        providers.push(Arc::new(InMemoryProvider::new(
            PaymentMethod::Wallet,
            DEMO_PROVIDER_SECRET,
        )));
        providers.push(Arc::new(InMemoryProvider::new(
            PaymentMethod::Card,
            DEMO_PROVIDER_SECRET,
        )));
    }
    providers
}

async fn serve<S: BookingStore>(
    store: S,
    config: &Config,
    metrics_handle: PrometheusHandle,
) -> Result<(), Box<dyn Error>> {
    let engine = providers(config).into_iter().fold(
        BookingEngine::builder(store)
            .hold_ttl(config.hold_ttl())
            .provider_timeout(config.provider_timeout()),
        |builder, provider| builder.provider(provider),
    );
    let engine = engine.build();

    let (expiry, stop_expiry) = engine.expiry(config.expiry_batch_size, config.expiry_interval());
    let expiry_task = tokio::spawn(expiry.run());
    let (alert, stop_alert) = engine.inventory_alert(config.inventory_alert());
    let alert_task = tokio::spawn(alert.run());

    let app = api::create_app(api::AppState::new(engine), metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = stop_expiry.send(true);
    let _ = stop_alert.send(true);
    if let Err(e) = expiry_task.await {
        tracing::error!(error = %e, "expiry task ended abnormally");
    }
    if let Err(e) = alert_task.await {
        tracing::error!(error = %e, "inventory alert task ended abnormally");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = Config::from_env();
    init_tracing(config.log_json);

    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(url)
                .await?;
            let store = PostgresStore::new(pool);
            store.run_migrations().await?;
            tracing::info!("using PostgreSQL store");
            serve(store, &config, metrics_handle).await?;
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory store");
            serve(InMemoryStore::new(), &config, metrics_handle).await?;
        }
    }

    tracing::info!("server shut down gracefully");
    Ok(())
}
